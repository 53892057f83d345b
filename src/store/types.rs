//! Persisted record types shared by the store and the engine.

use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId};
use serde::{Deserialize, Serialize};

/// Current on-disk schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// A tag assignment that must be revoked at `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedGrant {
    pub id: i64,
    pub community: CommunityId,
    pub member: MemberId,
    pub tag: TagId,
    /// Epoch seconds.
    pub expires_at: i64,
}

/// Moderation action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    Mute,
    Ban,
    Kick,
    Warn,
}

impl PunishmentKind {
    /// Kick and warn take effect immediately and are recorded inactive.
    #[must_use]
    pub fn is_instantaneous(self) -> bool {
        matches!(self, Self::Kick | Self::Warn)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Ban => "ban",
            Self::Kick => "kick",
            Self::Warn => "warn",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "mute" => Some(Self::Mute),
            "ban" => Some(Self::Ban),
            "kick" => Some(Self::Kick),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }
}

impl std::fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded moderation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub id: i64,
    pub community: CommunityId,
    pub member: MemberId,
    pub issuer: MemberId,
    pub kind: PunishmentKind,
    pub reason: String,
    /// Mute tag applied when the punishment was issued.
    pub tag: Option<TagId>,
    pub expires_at: Option<i64>,
    pub active: bool,
    pub created_at: i64,
}

/// Insert parameters for a punishment; `active` is derived from the kind.
#[derive(Debug, Clone)]
pub struct NewPunishment {
    pub community: CommunityId,
    pub member: MemberId,
    pub issuer: MemberId,
    pub kind: PunishmentKind,
    pub reason: String,
    pub tag: Option<TagId>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

/// Poll or giveaway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Poll,
    Giveaway,
}

impl EngagementKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Giveaway => "giveaway",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "poll" => Some(Self::Poll),
            "giveaway" => Some(Self::Giveaway),
            _ => None,
        }
    }
}

/// One selectable option on an engagement message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Response marker (emoji) members click.
    pub marker: String,
    pub label: String,
}

/// Entry constraints for giveaways. Polls ignore everything but defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryRules {
    pub winner_count: u32,
    pub required_tag: Option<TagId>,
    pub min_level: Option<u32>,
}

impl Default for EntryRules {
    fn default() -> Self {
        Self {
            winner_count: 1,
            required_tag: None,
            min_level: None,
        }
    }
}

/// Vote count for one poll choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceTally {
    pub marker: String,
    pub label: String,
    pub votes: u64,
    pub percent: f64,
}

/// Persisted result of a closed engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngagementOutcome {
    Poll { tallies: Vec<ChoiceTally> },
    Giveaway { winners: Vec<MemberId> },
    /// The response message vanished before the engagement could be tallied.
    Vanished,
}

/// A poll or giveaway and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub id: i64,
    pub kind: EngagementKind,
    pub community: CommunityId,
    pub channel: ChannelId,
    /// The message members respond to.
    pub response_handle: MessageId,
    pub prompt: String,
    pub created_by: MemberId,
    pub created_at: i64,
    pub ends_at: Option<i64>,
    pub is_active: bool,
    pub outcome: Option<EngagementOutcome>,
    pub choices: Vec<Choice>,
    pub entry: EntryRules,
}

/// Insert parameters for an engagement.
#[derive(Debug, Clone)]
pub struct NewEngagement {
    pub kind: EngagementKind,
    pub community: CommunityId,
    pub channel: ChannelId,
    pub response_handle: MessageId,
    pub prompt: String,
    pub created_by: MemberId,
    pub created_at: i64,
    pub ends_at: Option<i64>,
    pub choices: Vec<Choice>,
    pub entry: EntryRules,
}

/// Per-member activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionRecord {
    pub community: CommunityId,
    pub member: MemberId,
    pub message_count: u64,
    pub xp: u64,
    pub level: u32,
}

impl ProgressionRecord {
    pub(crate) fn empty(community: CommunityId, member: MemberId) -> Self {
        Self {
            community,
            member,
            message_count: 0,
            xp: 0,
            level: 0,
        }
    }
}

/// One rung of the activity ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityThreshold {
    pub community: CommunityId,
    pub tag: TagId,
    pub required_count: u64,
}

/// Reward fired when a member reaches `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReward {
    pub community: CommunityId,
    pub level: u32,
    pub tag: Option<TagId>,
    pub message: Option<String>,
}

/// Per-community settings edited by admin commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySettings {
    pub community: CommunityId,
    pub welcome_message: Option<String>,
    pub verification_tag: Option<TagId>,
    pub verification_channel: Option<ChannelId>,
    pub verification_message: Option<MessageId>,
    pub mute_tag: Option<TagId>,
    pub level_up_template: Option<String>,
    pub level_up_channel: Option<ChannelId>,
}

impl CommunitySettings {
    #[must_use]
    pub fn empty(community: CommunityId) -> Self {
        Self {
            community,
            welcome_message: None,
            verification_tag: None,
            verification_channel: None,
            verification_message: None,
            mute_tag: None,
            level_up_template: None,
            level_up_channel: None,
        }
    }
}
