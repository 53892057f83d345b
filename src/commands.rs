//! Command-boundary operations.
//!
//! Every admin or member command validates its input here, maps natural-key
//! duplicates to [`WardenError::Conflict`] and then drives the platform.
//! Records are written before the platform effect so the scheduler can
//! always find them; a failed effect rolls the record back.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngagementConfig;
use crate::error::{Result, WardenError};
use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId, format_epoch_utc};
use crate::platform::PlatformGate;
use crate::progression::{ProgressionLedger, RankCard};
use crate::reconcile::EngagementCloser;
use crate::store::{
    ActivityThreshold, Choice, EngagementEvent, EngagementKind, EngagementOutcome, EntryRules,
    LevelReward, NewEngagement, NewPunishment, Punishment, PunishmentKind, SqliteStore, TimedGrant,
};

pub const MIN_POLL_CHOICES: usize = 2;
pub const MAX_POLL_CHOICES: usize = 10;

/// Unit for command durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    #[default]
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    /// Parse a unit name. Unknown names are a validation error.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "m" | "min" | "mins" | "minute" | "minutes" => Ok(Self::Minutes),
            "h" | "hour" | "hours" => Ok(Self::Hours),
            "d" | "day" | "days" => Ok(Self::Days),
            other => Err(WardenError::Validation(format!(
                "unknown duration unit `{other}`; use minutes, hours or days"
            ))),
        }
    }

    fn seconds(self) -> i64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        }
    }
}

/// A positive amount of time given to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub amount: i64,
    pub unit: DurationUnit,
}

impl TimeSpan {
    #[must_use]
    pub fn new(amount: i64, unit: DurationUnit) -> Self {
        Self { amount, unit }
    }

    #[must_use]
    pub fn minutes(amount: i64) -> Self {
        Self::new(amount, DurationUnit::Minutes)
    }

    /// Length in seconds; non-positive or overflowing spans are rejected.
    pub fn as_secs(self) -> Result<i64> {
        if self.amount <= 0 {
            return Err(WardenError::Validation(
                "duration must be a positive number".into(),
            ));
        }
        self.amount
            .checked_mul(self.unit.seconds())
            .ok_or_else(|| WardenError::Validation("duration is too long".into()))
    }

    fn deadline(self, now: i64) -> Result<i64> {
        now.checked_add(self.as_secs()?)
            .ok_or_else(|| WardenError::Validation("duration is too long".into()))
    }
}

/// Parameters for a new giveaway.
#[derive(Debug, Clone)]
pub struct GiveawayRequest {
    pub prize: String,
    pub duration: TimeSpan,
    pub entry: EntryRules,
}

/// The command surface of the bot.
pub struct Commands {
    gate: Arc<dyn PlatformGate>,
    ledger: Arc<ProgressionLedger>,
    closer: Arc<EngagementCloser>,
    markers: EngagementConfig,
}

impl Commands {
    pub fn new(
        gate: Arc<dyn PlatformGate>,
        ledger: Arc<ProgressionLedger>,
        closer: Arc<EngagementCloser>,
        markers: EngagementConfig,
    ) -> Self {
        Self {
            gate,
            ledger,
            closer,
            markers,
        }
    }

    fn store(&self) -> &SqliteStore {
        self.ledger.store()
    }

    async fn require_manageable(&self, community: CommunityId, tag: TagId) -> Result<()> {
        if self.gate.can_manage_tag(community, tag).await? {
            Ok(())
        } else {
            Err(WardenError::Validation(format!(
                "the bot cannot manage {}; move its role above it",
                tag.mention()
            )))
        }
    }

    async fn community_label(&self, community: CommunityId) -> String {
        self.gate
            .community_name(community)
            .await
            .unwrap_or_else(|_| community.to_string())
    }

    async fn notify(&self, member: MemberId, text: &str) {
        if let Err(e) = self.gate.send_direct(member, text).await {
            debug!(%member, "direct message not delivered: {e}");
        }
    }

    // -- verification ---------------------------------------------------------

    pub fn configure_welcome(&self, community: CommunityId, message: &str) -> Result<()> {
        let message = message.trim();
        if message.is_empty() {
            return Err(WardenError::Validation("welcome message cannot be empty".into()));
        }
        let mut settings = self.store().settings(community)?;
        settings.welcome_message = Some(message.to_owned());
        self.store().save_settings(&settings)?;
        Ok(())
    }

    pub async fn configure_verification_tag(&self, community: CommunityId, tag: TagId) -> Result<()> {
        self.require_manageable(community, tag).await?;
        let mut settings = self.store().settings(community)?;
        settings.verification_tag = Some(tag);
        self.store().save_settings(&settings)?;
        info!(%community, %tag, "verification tag configured");
        Ok(())
    }

    /// Post the welcome message, attach the verification marker and
    /// remember the message so responses to it verify members.
    pub async fn publish_verification(
        &self,
        community: CommunityId,
        channel: ChannelId,
    ) -> Result<MessageId> {
        let mut settings = self.store().settings(community)?;
        let Some(welcome) = settings.welcome_message.clone() else {
            return Err(WardenError::Validation("set a welcome message first".into()));
        };
        if settings.verification_tag.is_none() {
            return Err(WardenError::Validation("set a verification tag first".into()));
        }

        let message = self.gate.send_message(channel, &welcome).await?;
        if let Err(e) = self
            .gate
            .add_response(channel, message, &self.markers.verification_marker)
            .await
        {
            warn!(%community, "could not attach verification marker: {e}");
        }
        settings.verification_channel = Some(channel);
        settings.verification_message = Some(message);
        self.store().save_settings(&settings)?;
        info!(%community, %channel, %message, "verification message published");
        Ok(message)
    }

    // -- timed tags -----------------------------------------------------------

    /// Give `member` the `tag` until `now + span`.
    pub async fn grant_timed_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        span: TimeSpan,
        now: i64,
    ) -> Result<TimedGrant> {
        let expires_at = span.deadline(now)?;
        self.require_manageable(community, tag).await?;
        if let Some(existing) = self.store().outstanding_grant(community, member, tag)? {
            return Err(WardenError::Conflict(format!(
                "{} already has {} until {}",
                member.mention(),
                tag.mention(),
                format_epoch_utc(existing.expires_at)
            )));
        }

        let grant = self.store().insert_grant(community, member, tag, expires_at)?;
        if let Err(e) = self
            .gate
            .add_tag(community, member, tag, "temporary tag granted")
            .await
        {
            if let Err(rollback) = self.store().delete_grant(grant.id) {
                warn!(grant_id = grant.id, "could not roll back grant: {rollback}");
            }
            return Err(e.into());
        }

        info!(grant_id = grant.id, %community, %member, %tag, expires_at, "timed tag granted");
        let text = format!(
            "You received {} in **{}** until {}.",
            tag.mention(),
            self.community_label(community).await,
            format_epoch_utc(expires_at)
        );
        self.notify(member, &text).await;
        Ok(grant)
    }

    // -- activity ladder ------------------------------------------------------

    pub async fn add_ladder_rung(
        &self,
        community: CommunityId,
        tag: TagId,
        required_count: u64,
    ) -> Result<ActivityThreshold> {
        if required_count == 0 {
            return Err(WardenError::Validation(
                "required message count must be greater than zero".into(),
            ));
        }
        self.require_manageable(community, tag).await?;
        Ok(self.store().insert_threshold(community, tag, required_count)?)
    }

    pub fn remove_ladder_rung(&self, community: CommunityId, tag: TagId) -> Result<bool> {
        Ok(self.store().remove_threshold(community, tag)?)
    }

    pub fn ladder(&self, community: CommunityId) -> Result<Vec<ActivityThreshold>> {
        Ok(self.store().thresholds(community)?)
    }

    // -- progression ----------------------------------------------------------

    pub fn rank(&self, community: CommunityId, member: MemberId) -> Result<RankCard> {
        self.ledger.rank(community, member)
    }

    /// Set or clear the level-up template. Tokens: `{member}`, `{level}`, `{community}`.
    pub fn set_level_up_template(&self, community: CommunityId, template: Option<&str>) -> Result<()> {
        let template = template.map(str::trim);
        if template.is_some_and(str::is_empty) {
            return Err(WardenError::Validation("template cannot be empty".into()));
        }
        let mut settings = self.store().settings(community)?;
        settings.level_up_template = template.map(str::to_owned);
        self.store().save_settings(&settings)?;
        Ok(())
    }

    pub fn set_level_up_channel(&self, community: CommunityId, channel: Option<ChannelId>) -> Result<()> {
        let mut settings = self.store().settings(community)?;
        settings.level_up_channel = channel;
        self.store().save_settings(&settings)?;
        Ok(())
    }

    /// Attach a tag, a message or both to reaching `level`.
    pub async fn set_level_reward(
        &self,
        community: CommunityId,
        level: u32,
        tag: Option<TagId>,
        message: Option<&str>,
    ) -> Result<()> {
        if level == 0 {
            return Err(WardenError::Validation("reward level must be at least 1".into()));
        }
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        if tag.is_none() && message.is_none() {
            return Err(WardenError::Validation(
                "a level reward needs a tag, a message or both".into(),
            ));
        }
        if let Some(tag) = tag {
            self.require_manageable(community, tag).await?;
        }
        self.store().upsert_level_reward(&LevelReward {
            community,
            level,
            tag,
            message: message.map(str::to_owned),
        })?;
        Ok(())
    }

    pub fn remove_level_reward(&self, community: CommunityId, level: u32) -> Result<bool> {
        Ok(self.store().remove_level_reward(community, level)?)
    }

    // -- moderation -----------------------------------------------------------

    pub async fn set_mute_tag(&self, community: CommunityId, tag: TagId) -> Result<()> {
        self.require_manageable(community, tag).await?;
        let mut settings = self.store().settings(community)?;
        settings.mute_tag = Some(tag);
        self.store().save_settings(&settings)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_punishment(
        &self,
        community: CommunityId,
        member: MemberId,
        issuer: MemberId,
        kind: PunishmentKind,
        reason: &str,
        tag: Option<TagId>,
        duration: Option<TimeSpan>,
        now: i64,
    ) -> Result<Punishment> {
        let expires_at = duration.map(|d| d.deadline(now)).transpose()?;
        let reason = match reason.trim() {
            "" => "no reason given",
            r => r,
        };
        Ok(self.store().insert_punishment(&NewPunishment {
            community,
            member,
            issuer,
            kind,
            reason: reason.to_owned(),
            tag,
            expires_at,
            created_at: now,
        })?)
    }

    fn roll_back(&self, punishment: &Punishment) {
        if let Err(e) = self.store().deactivate_punishment(punishment.id) {
            warn!(punishment_id = punishment.id, "could not roll back punishment: {e}");
        }
    }

    /// Mute by assigning the configured mute tag, optionally for `duration`.
    pub async fn mute(
        &self,
        community: CommunityId,
        member: MemberId,
        issuer: MemberId,
        reason: &str,
        duration: Option<TimeSpan>,
        now: i64,
    ) -> Result<Punishment> {
        let Some(tag) = self.store().settings(community)?.mute_tag else {
            return Err(WardenError::Validation("no mute tag is configured".into()));
        };
        self.require_manageable(community, tag).await?;
        let punishment = self.record_punishment(
            community,
            member,
            issuer,
            PunishmentKind::Mute,
            reason,
            Some(tag),
            duration,
            now,
        )?;
        if let Err(e) = self.gate.add_tag(community, member, tag, &punishment.reason).await {
            self.roll_back(&punishment);
            return Err(e.into());
        }
        info!(punishment_id = punishment.id, %community, %member, "member muted");
        Ok(punishment)
    }

    /// Ban, optionally for `duration`. The member is told before the ban
    /// since a banned member can no longer be reached.
    pub async fn ban(
        &self,
        community: CommunityId,
        member: MemberId,
        issuer: MemberId,
        reason: &str,
        duration: Option<TimeSpan>,
        now: i64,
    ) -> Result<Punishment> {
        let punishment = self.record_punishment(
            community,
            member,
            issuer,
            PunishmentKind::Ban,
            reason,
            None,
            duration,
            now,
        )?;
        let until = match punishment.expires_at {
            Some(at) => format!(" until {}", format_epoch_utc(at)),
            None => String::new(),
        };
        let text = format!(
            "You were banned from **{}**{until}. Reason: {}",
            self.community_label(community).await,
            punishment.reason
        );
        self.notify(member, &text).await;
        if let Err(e) = self.gate.ban(community, member, &punishment.reason).await {
            self.roll_back(&punishment);
            return Err(e.into());
        }
        info!(punishment_id = punishment.id, %community, %member, "member banned");
        Ok(punishment)
    }

    pub async fn kick(
        &self,
        community: CommunityId,
        member: MemberId,
        issuer: MemberId,
        reason: &str,
        now: i64,
    ) -> Result<Punishment> {
        self.gate.kick(community, member, reason).await?;
        let punishment =
            self.record_punishment(community, member, issuer, PunishmentKind::Kick, reason, None, None, now)?;
        info!(punishment_id = punishment.id, %community, %member, "member kicked");
        Ok(punishment)
    }

    pub async fn warn(
        &self,
        community: CommunityId,
        member: MemberId,
        issuer: MemberId,
        reason: &str,
        now: i64,
    ) -> Result<Punishment> {
        let punishment =
            self.record_punishment(community, member, issuer, PunishmentKind::Warn, reason, None, None, now)?;
        let text = format!(
            "⚠️ You received a warning in **{}**. Reason: {}",
            self.community_label(community).await,
            punishment.reason
        );
        self.notify(member, &text).await;
        Ok(punishment)
    }

    /// Warn records for a member, newest first.
    pub fn warnings(&self, community: CommunityId, member: MemberId) -> Result<Vec<Punishment>> {
        Ok(self
            .store()
            .punishments_for(community, member, Some(PunishmentKind::Warn))?)
    }

    // -- polls and giveaways --------------------------------------------------

    /// Post a poll. Without `duration` it stays open until closed by hand.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_poll(
        &self,
        community: CommunityId,
        channel: ChannelId,
        creator: MemberId,
        question: &str,
        options: &[String],
        duration: Option<TimeSpan>,
        now: i64,
    ) -> Result<EngagementEvent> {
        let question = question.trim();
        if question.is_empty() {
            return Err(WardenError::Validation("poll question cannot be empty".into()));
        }
        let limit = MAX_POLL_CHOICES.min(self.markers.poll_markers.len());
        if options.len() < MIN_POLL_CHOICES || options.len() > limit {
            return Err(WardenError::Validation(format!(
                "a poll needs between {MIN_POLL_CHOICES} and {limit} choices"
            )));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(WardenError::Validation("poll choices cannot be empty".into()));
        }
        let ends_at = duration.map(|d| d.deadline(now)).transpose()?;

        let choices: Vec<Choice> = self
            .markers
            .poll_markers
            .iter()
            .zip(options)
            .map(|(marker, label)| Choice {
                marker: marker.clone(),
                label: label.trim().to_owned(),
            })
            .collect();

        let mut body = format!("📊 **{question}**\n");
        for choice in &choices {
            body.push_str(&format!("\n{} {}", choice.marker, choice.label));
        }
        if let Some(at) = ends_at {
            body.push_str(&format!("\n\nEnds <t:{at}:R>"));
        }

        let markers: Vec<&str> = choices.iter().map(|c| c.marker.as_str()).collect();
        self.post_engagement(
            NewEngagement {
                kind: EngagementKind::Poll,
                community,
                channel,
                response_handle: MessageId(0),
                prompt: question.to_owned(),
                created_by: creator,
                created_at: now,
                ends_at,
                choices: choices.clone(),
                entry: EntryRules::default(),
            },
            &body,
            &markers,
        )
        .await
    }

    pub async fn create_giveaway(
        &self,
        community: CommunityId,
        channel: ChannelId,
        creator: MemberId,
        request: GiveawayRequest,
        now: i64,
    ) -> Result<EngagementEvent> {
        let prize = request.prize.trim();
        if prize.is_empty() {
            return Err(WardenError::Validation("giveaway prize cannot be empty".into()));
        }
        if request.entry.winner_count == 0 {
            return Err(WardenError::Validation("a giveaway needs at least one winner".into()));
        }
        let ends_at = request.duration.deadline(now)?;

        let marker = self.markers.giveaway_marker.clone();
        let mut body = format!(
            "🎉 **GIVEAWAY** 🎉\n**{prize}**\n\nReact with {marker} to enter!\nWinners: {}\nEnds <t:{ends_at}:R>",
            request.entry.winner_count
        );
        if let Some(tag) = request.entry.required_tag {
            body.push_str(&format!("\nRequires {}", tag.mention()));
        }
        if let Some(level) = request.entry.min_level {
            body.push_str(&format!("\nRequires level {level}"));
        }

        self.post_engagement(
            NewEngagement {
                kind: EngagementKind::Giveaway,
                community,
                channel,
                response_handle: MessageId(0),
                prompt: prize.to_owned(),
                created_by: creator,
                created_at: now,
                ends_at: Some(ends_at),
                choices: vec![Choice {
                    marker: marker.clone(),
                    label: "enter".to_owned(),
                }],
                entry: request.entry,
            },
            &body,
            &[marker.as_str()],
        )
        .await
    }

    async fn post_engagement(
        &self,
        mut new: NewEngagement,
        body: &str,
        markers: &[&str],
    ) -> Result<EngagementEvent> {
        let message = self.gate.send_message(new.channel, body).await?;
        new.response_handle = message;
        let event = match self.store().insert_engagement(&new) {
            Ok(event) => event,
            Err(e) => {
                if let Err(cleanup) = self.gate.delete_message(new.channel, message).await {
                    debug!(%message, "could not remove orphaned prompt: {cleanup}");
                }
                return Err(e.into());
            }
        };
        for marker in markers {
            if let Err(e) = self.gate.add_response(new.channel, message, marker).await {
                warn!(engagement_id = event.id, marker, "could not attach marker: {e}");
            }
        }
        info!(engagement_id = event.id, kind = ?event.kind, community = %event.community, "engagement posted");
        Ok(event)
    }

    pub async fn close_engagement(&self, id: i64) -> Result<EngagementOutcome> {
        self.closer.close_now(id).await
    }

    pub async fn reroll(&self, id: i64, target: Option<MemberId>) -> Result<Vec<MemberId>> {
        self.closer.reroll(id, target).await
    }
}
