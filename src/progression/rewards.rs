//! Level-up announcement and per-level rewards.

use tracing::{debug, warn};

use crate::error::Result;
use crate::ids::{ChannelId, CommunityId, MemberId};
use crate::platform::PlatformGate;
use crate::progression::XpGrant;
use crate::store::SqliteStore;

pub const DEFAULT_LEVEL_UP_TEMPLATE: &str =
    "🎉 Congratulations {member}! You reached **level {level}**!";

/// Substitute `{member}`, `{level}` and `{community}` in `template`.
#[must_use]
pub fn render_template(template: &str, member: MemberId, level: u32, community: &str) -> String {
    template
        .replace("{member}", &member.mention())
        .replace("{level}", &level.to_string())
        .replace("{community}", community)
}

/// What a level-up produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardReport {
    pub announced: bool,
    pub tags_granted: usize,
    pub messages_posted: usize,
}

/// Fire the announcement and every reward for levels in
/// `(grant.previous_level, grant.new_level]`.
///
/// Platform failures are logged and skipped; only store failures error.
pub async fn fire_level_rewards(
    gate: &dyn PlatformGate,
    store: &SqliteStore,
    community: CommunityId,
    member: MemberId,
    grant: &XpGrant,
    origin: ChannelId,
) -> Result<RewardReport> {
    let mut report = RewardReport::default();
    if !grant.leveled_up() {
        return Ok(report);
    }

    let settings = store.settings(community)?;
    let rewards = store.level_rewards_between(community, grant.previous_level, grant.new_level)?;
    let channel = settings.level_up_channel.unwrap_or(origin);
    let community_name = gate
        .community_name(community)
        .await
        .unwrap_or_else(|_| community.to_string());

    let template = settings
        .level_up_template
        .as_deref()
        .unwrap_or(DEFAULT_LEVEL_UP_TEMPLATE);
    let text = render_template(template, member, grant.new_level, &community_name);
    match gate.send_message(channel, &text).await {
        Ok(_) => report.announced = true,
        Err(e) => warn!(%community, %member, "level-up announcement failed: {e}"),
    }

    for reward in rewards {
        if let Some(tag) = reward.tag {
            match gate
                .add_tag(community, member, tag, &format!("reached level {}", reward.level))
                .await
            {
                Ok(()) => report.tags_granted += 1,
                Err(e) => warn!(%community, %member, %tag, level = reward.level, "level reward tag failed: {e}"),
            }
        }
        if let Some(message) = reward.message.as_deref() {
            let text = render_template(message, member, reward.level, &community_name);
            match gate.send_message(channel, &text).await {
                Ok(_) => report.messages_posted += 1,
                Err(e) => debug!(%community, level = reward.level, "level reward message failed: {e}"),
            }
        }
    }
    Ok(report)
}
