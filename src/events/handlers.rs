//! Handlers composed into the startup [`HandlerChain`](super::HandlerChain).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{CommunityEvent, EventHandler};
use crate::ids::{CommunityId, MemberId, MessageId};
use crate::platform::{PlatformError, PlatformGate};
use crate::progression::{ProgressionLedger, ladder, rewards};

/// Counts messages and keeps the member on the right activity rung.
///
/// Every message from a member who qualifies for some rung reconciles their
/// tags, so a failed promotion or a rung added later is picked up next time.
pub struct ActivityHandler {
    gate: Arc<dyn PlatformGate>,
    ledger: Arc<ProgressionLedger>,
}

impl ActivityHandler {
    pub fn new(gate: Arc<dyn PlatformGate>, ledger: Arc<ProgressionLedger>) -> Self {
        Self { gate, ledger }
    }
}

#[async_trait]
impl EventHandler for ActivityHandler {
    fn name(&self) -> &'static str {
        "activity"
    }

    async fn handle(&self, event: &CommunityEvent) -> Result<()> {
        let CommunityEvent::MessageCreated {
            community, author, ..
        } = event
        else {
            return Ok(());
        };
        let count = self.ledger.record_message(*community, *author)?;
        let store = self.ledger.store();
        if ladder::highest_rung(&store.thresholds(*community)?, count).is_none() {
            return Ok(());
        }
        let change =
            ladder::reconcile_member(self.gate.as_ref(), store, *community, *author, count).await?;
        if !change.is_empty() {
            debug!(%community, member = %author, ?change, "activity ladder reconciled");
        }
        Ok(())
    }
}

/// Awards message XP and fires level rewards on level-up.
pub struct XpHandler {
    gate: Arc<dyn PlatformGate>,
    ledger: Arc<ProgressionLedger>,
}

impl XpHandler {
    pub fn new(gate: Arc<dyn PlatformGate>, ledger: Arc<ProgressionLedger>) -> Self {
        Self { gate, ledger }
    }
}

#[async_trait]
impl EventHandler for XpHandler {
    fn name(&self) -> &'static str {
        "xp"
    }

    async fn handle(&self, event: &CommunityEvent) -> Result<()> {
        let CommunityEvent::MessageCreated {
            community,
            channel,
            author,
            ..
        } = event
        else {
            return Ok(());
        };
        let Some(grant) = self.ledger.award_message_xp(*community, *author)? else {
            return Ok(());
        };
        if grant.leveled_up() {
            info!(%community, member = %author, level = grant.new_level, xp = grant.total, "level up");
            rewards::fire_level_rewards(
                self.gate.as_ref(),
                self.ledger.store(),
                *community,
                *author,
                &grant,
                *channel,
            )
            .await?;
        }
        Ok(())
    }
}

/// Grants the verification tag on the configured marker, revokes it when
/// the marker is withdrawn.
pub struct VerificationHandler {
    gate: Arc<dyn PlatformGate>,
    ledger: Arc<ProgressionLedger>,
    marker: String,
}

impl VerificationHandler {
    pub fn new(gate: Arc<dyn PlatformGate>, ledger: Arc<ProgressionLedger>, marker: &str) -> Self {
        Self {
            gate,
            ledger,
            marker: marker.to_owned(),
        }
    }

    async fn apply(
        &self,
        community: CommunityId,
        message: MessageId,
        member: MemberId,
        granting: bool,
    ) -> Result<()> {
        if member == self.gate.bot_id() {
            return Ok(());
        }
        let settings = self.ledger.store().settings(community)?;
        if settings.verification_message != Some(message) {
            return Ok(());
        }
        let Some(tag) = settings.verification_tag else {
            debug!(%community, "verification message reacted to but no tag configured");
            return Ok(());
        };
        if !self.gate.can_manage_tag(community, tag).await? {
            warn!(%community, %tag, "cannot manage the verification tag");
            return Ok(());
        }

        let held = match self.gate.get_member_tags(community, member).await {
            Ok(tags) => tags.contains(&tag),
            Err(PlatformError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if granting && !held {
            self.gate
                .add_tag(community, member, tag, "verification accepted")
                .await?;
            info!(%community, %member, "member verified");
            let name = self
                .gate
                .community_name(community)
                .await
                .unwrap_or_else(|_| community.to_string());
            let text = format!("✅ You are now verified in **{name}**. Welcome!");
            if let Err(e) = self.gate.send_direct(member, &text).await {
                debug!(%member, "verification notice not delivered: {e}");
            }
        } else if !granting && held {
            self.gate
                .remove_tag(community, member, tag, "verification withdrawn")
                .await?;
            info!(%community, %member, "verification withdrawn");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for VerificationHandler {
    fn name(&self) -> &'static str {
        "verification"
    }

    async fn handle(&self, event: &CommunityEvent) -> Result<()> {
        match event {
            CommunityEvent::ResponseAdded {
                community,
                message,
                member,
                marker,
                ..
            } if *marker == self.marker => self.apply(*community, *message, *member, true).await,
            CommunityEvent::ResponseRemoved {
                community,
                message,
                member,
                marker,
                ..
            } if *marker == self.marker => self.apply(*community, *message, *member, false).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::ProgressionConfig;
    use crate::ids::{ChannelId, TagId};
    use crate::platform::memory::{GateOp, MemoryPlatform};
    use crate::store::{CommunitySettings, SqliteStore};

    const C: CommunityId = CommunityId(1);
    const CH: ChannelId = ChannelId(5);
    const M: MemberId = MemberId(2);
    const BOT: MemberId = MemberId(99);
    const VERIFIED: TagId = TagId(40);

    fn setup(config: &ProgressionConfig) -> (Arc<MemoryPlatform>, Arc<ProgressionLedger>) {
        let gate = Arc::new(MemoryPlatform::new(BOT));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ledger = Arc::new(ProgressionLedger::new(store, config));
        gate.seed_community(C, "Cafe");
        gate.seed_member(C, M, &[]);
        (gate, ledger)
    }

    fn message(author: MemberId) -> CommunityEvent {
        CommunityEvent::MessageCreated {
            community: C,
            channel: CH,
            message: MessageId(1_000),
            author,
            content: "hello".into(),
        }
    }

    #[tokio::test]
    async fn activity_handler_promotes_once_a_rung_qualifies() {
        let (gate, ledger) = setup(&ProgressionConfig::default());
        let bronze = TagId(10);
        gate.seed_tag(C, bronze, true);
        ledger.store().insert_threshold(C, bronze, 3).unwrap();
        let handler = ActivityHandler::new(gate.clone(), ledger.clone());

        for _ in 0..2 {
            handler.handle(&message(M)).await.unwrap();
        }
        assert_eq!(gate.calls(GateOp::MemberTags), 0);
        handler.handle(&message(M)).await.unwrap();
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![bronze]);
        assert_eq!(ledger.record(C, M).unwrap().message_count, 3);

        // Already on the right rung: checked, nothing changes.
        handler.handle(&message(M)).await.unwrap();
        assert_eq!(gate.calls(GateOp::AddTag), 1);
    }

    #[tokio::test]
    async fn failed_promotion_is_retried_on_a_later_message() {
        let (gate, ledger) = setup(&ProgressionConfig::default());
        let gold = TagId(30);
        gate.seed_tag(C, gold, true);
        ledger.store().insert_threshold(C, gold, 3).unwrap();
        let handler = ActivityHandler::new(gate.clone(), ledger.clone());

        for _ in 0..2 {
            handler.handle(&message(M)).await.unwrap();
        }
        gate.fail(GateOp::AddTag, PlatformError::Transient("503".into()));
        assert!(handler.handle(&message(M)).await.is_err());
        assert!(gate.member_tags(C, M).unwrap().is_empty());

        gate.clear_failures();
        handler.handle(&message(M)).await.unwrap();
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![gold]);
        assert_eq!(ledger.record(C, M).unwrap().message_count, 4);
    }

    #[tokio::test]
    async fn rung_added_below_current_count_is_granted() {
        let (gate, ledger) = setup(&ProgressionConfig::default());
        let bronze = TagId(10);
        gate.seed_tag(C, bronze, true);
        let handler = ActivityHandler::new(gate.clone(), ledger.clone());
        for _ in 0..5 {
            handler.handle(&message(M)).await.unwrap();
        }

        ledger.store().insert_threshold(C, bronze, 2).unwrap();
        handler.handle(&message(M)).await.unwrap();
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![bronze]);
    }

    #[tokio::test]
    async fn xp_handler_announces_level_up_in_origin_channel() {
        let config = ProgressionConfig {
            xp_per_message_min: 100,
            xp_per_message_max: 100,
            xp_cooldown_secs: 60,
        };
        let (gate, ledger) = setup(&config);
        let handler = XpHandler::new(gate.clone(), ledger.clone());

        handler.handle(&message(M)).await.unwrap();
        assert_eq!(ledger.level_of(C, M).unwrap(), 1);
        let sent = gate.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, CH);
        assert!(sent[0].content.contains("level 1"));

        // Cooling down: no further XP, no further announcement.
        handler.handle(&message(M)).await.unwrap();
        assert_eq!(ledger.record(C, M).unwrap().xp, 100);
        assert_eq!(gate.sent_messages().len(), 1);
    }

    fn verification_setup() -> (Arc<MemoryPlatform>, VerificationHandler, MessageId) {
        let (gate, ledger) = setup(&ProgressionConfig::default());
        gate.seed_tag(C, VERIFIED, true);
        let welcome = gate.seed_message(CH, "Welcome!");
        let mut settings = CommunitySettings::empty(C);
        settings.verification_tag = Some(VERIFIED);
        settings.verification_channel = Some(CH);
        settings.verification_message = Some(welcome);
        ledger.store().save_settings(&settings).unwrap();
        let handler = VerificationHandler::new(gate.clone(), ledger, "✅");
        (gate, handler, welcome)
    }

    fn response(added: bool, message: MessageId, member: MemberId, marker: &str) -> CommunityEvent {
        if added {
            CommunityEvent::ResponseAdded {
                community: C,
                channel: CH,
                message,
                member,
                marker: marker.into(),
            }
        } else {
            CommunityEvent::ResponseRemoved {
                community: C,
                channel: CH,
                message,
                member,
                marker: marker.into(),
            }
        }
    }

    #[tokio::test]
    async fn verification_grants_and_revokes() {
        let (gate, handler, welcome) = verification_setup();

        handler.handle(&response(true, welcome, M, "✅")).await.unwrap();
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![VERIFIED]);
        assert_eq!(gate.directs().len(), 1);

        // Already verified: nothing more happens.
        handler.handle(&response(true, welcome, M, "✅")).await.unwrap();
        assert_eq!(gate.calls(GateOp::AddTag), 1);

        handler.handle(&response(false, welcome, M, "✅")).await.unwrap();
        assert!(gate.member_tags(C, M).unwrap().is_empty());
    }

    #[tokio::test]
    async fn verification_ignores_bot_other_markers_and_messages() {
        let (gate, handler, welcome) = verification_setup();
        gate.seed_member(C, BOT, &[]);

        handler.handle(&response(true, welcome, BOT, "✅")).await.unwrap();
        handler.handle(&response(true, welcome, M, "👍")).await.unwrap();
        handler.handle(&response(true, MessageId(7), M, "✅")).await.unwrap();

        assert_eq!(gate.calls(GateOp::AddTag), 0);
        assert!(gate.member_tags(C, M).unwrap().is_empty());
    }

    #[tokio::test]
    async fn verification_skips_unmanageable_tag() {
        let (gate, handler, welcome) = verification_setup();
        gate.set_manageable(C, VERIFIED, false);

        handler.handle(&response(true, welcome, M, "✅")).await.unwrap();
        assert_eq!(gate.calls(GateOp::AddTag), 0);
    }
}
