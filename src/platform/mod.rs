//! Platform seam: everything the engine asks of the chat platform.
//!
//! The engine never talks HTTP directly; it holds an `Arc<dyn PlatformGate>`.
//! [`discord::DiscordGate`] is the production implementation and
//! [`memory::MemoryPlatform`] an in-process fake with scripted failures.

pub mod discord;
pub mod gateway;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId};

/// Failure classes the reconciler needs to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The referenced resource no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The bot lacks permission or rank for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Network failure, rate limit or server error; worth retrying later.
    #[error("transient: {0}")]
    Transient(String),
}

/// Responders per marker, in the order the platform reported them.
pub type Responses = BTreeMap<String, Vec<MemberId>>;

/// Operations the engine performs against the platform.
#[async_trait]
pub trait PlatformGate: Send + Sync {
    /// The bot's own member id; its responses never count.
    fn bot_id(&self) -> MemberId;

    async fn community_name(&self, community: CommunityId) -> Result<String, PlatformError>;

    /// Tags currently held. `NotFound` when the member left the community.
    async fn get_member_tags(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<Vec<TagId>, PlatformError>;

    async fn add_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn remove_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Whether the bot outranks `tag` and holds the permission to assign it.
    /// `NotFound` when the tag was deleted.
    async fn can_manage_tag(&self, community: CommunityId, tag: TagId)
    -> Result<bool, PlatformError>;

    /// Per-marker responders on a message, bot included.
    async fn get_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Responses, PlatformError>;

    async fn add_response(
        &self,
        channel: ChannelId,
        message: MessageId,
        marker: &str,
    ) -> Result<(), PlatformError>;

    async fn clear_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError>;

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError>;

    /// Direct message to a member. Frequently refused by privacy settings.
    async fn send_direct(&self, member: MemberId, content: &str) -> Result<(), PlatformError>;

    async fn is_banned(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<bool, PlatformError>;

    async fn ban(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn unban(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn kick(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Permalink to a message, used when pointing a prompt at its results.
    fn message_link(&self, community: CommunityId, channel: ChannelId, message: MessageId) -> String {
        format!("https://discord.com/channels/{community}/{channel}/{message}")
    }
}
