//! ActivityThresholdEngine: keep a member on exactly one ladder rung.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ids::{CommunityId, MemberId, TagId};
use crate::platform::{PlatformError, PlatformGate};
use crate::store::{ActivityThreshold, SqliteStore};

/// The highest rung `count` qualifies for. `ladder` must be ascending.
#[must_use]
pub fn highest_rung(ladder: &[ActivityThreshold], count: u64) -> Option<&ActivityThreshold> {
    ladder.iter().rev().find(|rung| rung.required_count <= count)
}

/// Tag changes made by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LadderChange {
    pub added: Option<TagId>,
    pub removed: Vec<TagId>,
    /// Rungs that could not be removed this time.
    pub retained: Vec<TagId>,
}

impl LadderChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.removed.is_empty() && self.retained.is_empty()
    }
}

/// Move `member` toward holding only the rung `count` qualifies for.
///
/// Lower rungs are removed first, but a failed removal never blocks adding
/// the new rung; the leftover is cleaned up by the next qualifying message.
pub async fn reconcile_member(
    gate: &dyn PlatformGate,
    store: &SqliteStore,
    community: CommunityId,
    member: MemberId,
    count: u64,
) -> Result<LadderChange> {
    let ladder = store.thresholds(community)?;
    let Some(target) = highest_rung(&ladder, count).map(|r| r.tag) else {
        return Ok(LadderChange::default());
    };

    let held = gate.get_member_tags(community, member).await?;
    let mut change = LadderChange::default();

    for rung in ladder.iter().filter(|r| r.tag != target && held.contains(&r.tag)) {
        match gate
            .remove_tag(community, member, rung.tag, "activity ladder promotion")
            .await
        {
            Ok(()) => change.removed.push(rung.tag),
            Err(e) => {
                warn!(%community, %member, tag = %rung.tag, "could not remove lower rung: {e}");
                change.retained.push(rung.tag);
            }
        }
    }

    if !held.contains(&target) {
        match gate
            .add_tag(community, member, target, "activity ladder promotion")
            .await
        {
            Ok(()) => {
                info!(%community, %member, tag = %target, count, "promoted on activity ladder");
                change.added = Some(target);
                notify_promotion(gate, community, member, target, count).await;
            }
            Err(PlatformError::Forbidden(e)) => {
                warn!(%community, %member, tag = %target, "not allowed to grant rung: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(change)
}

async fn notify_promotion(
    gate: &dyn PlatformGate,
    community: CommunityId,
    member: MemberId,
    tag: TagId,
    count: u64,
) {
    let name = gate
        .community_name(community)
        .await
        .unwrap_or_else(|_| community.to_string());
    let text = format!(
        "🎉 You earned {} in **{name}** after {count} messages!",
        tag.mention()
    );
    if let Err(e) = gate.send_direct(member, &text).await {
        debug!(%member, "promotion notice not delivered: {e}");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::memory::{GateOp, MemoryPlatform};

    const C: CommunityId = CommunityId(1);
    const M: MemberId = MemberId(2);
    const BRONZE: TagId = TagId(10);
    const SILVER: TagId = TagId(20);
    const GOLD: TagId = TagId(30);

    fn setup() -> (MemoryPlatform, SqliteStore) {
        let gate = MemoryPlatform::new(MemberId(99));
        let store = SqliteStore::open_in_memory().unwrap();
        gate.seed_community(C, "Cafe");
        for (tag, count) in [(BRONZE, 10), (SILVER, 50), (GOLD, 100)] {
            gate.seed_tag(C, tag, true);
            store.insert_threshold(C, tag, count).unwrap();
        }
        (gate, store)
    }

    #[test]
    fn highest_rung_picks_last_qualifying() {
        let ladder = vec![
            ActivityThreshold { community: C, tag: BRONZE, required_count: 10 },
            ActivityThreshold { community: C, tag: SILVER, required_count: 50 },
        ];
        assert!(highest_rung(&ladder, 9).is_none());
        assert_eq!(highest_rung(&ladder, 10).unwrap().tag, BRONZE);
        assert_eq!(highest_rung(&ladder, 500).unwrap().tag, SILVER);
    }

    #[tokio::test]
    async fn promotion_swaps_rungs_and_notifies() {
        let (gate, store) = setup();
        gate.seed_member(C, M, &[BRONZE, TagId(5)]);

        let change = reconcile_member(&gate, &store, C, M, 60).await.unwrap();
        assert_eq!(change.added, Some(SILVER));
        assert_eq!(change.removed, vec![BRONZE]);
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![TagId(5), SILVER]);
        assert_eq!(gate.directs().len(), 1);
    }

    #[tokio::test]
    async fn failed_removal_does_not_block_add() {
        let (gate, store) = setup();
        gate.seed_member(C, M, &[BRONZE]);
        gate.fail(GateOp::RemoveTag, PlatformError::Forbidden("rank".into()));

        let change = reconcile_member(&gate, &store, C, M, 100).await.unwrap();
        assert_eq!(change.added, Some(GOLD));
        assert_eq!(change.retained, vec![BRONZE]);
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![BRONZE, GOLD]);

        gate.clear_failures();
        let change = reconcile_member(&gate, &store, C, M, 101).await.unwrap();
        assert_eq!(change.removed, vec![BRONZE]);
        assert!(change.added.is_none());
        assert_eq!(gate.member_tags(C, M).unwrap(), vec![GOLD]);
    }

    #[tokio::test]
    async fn below_first_rung_touches_nothing() {
        let (gate, store) = setup();
        gate.seed_member(C, M, &[]);
        let change = reconcile_member(&gate, &store, C, M, 3).await.unwrap();
        assert!(change.is_empty());
        assert_eq!(gate.calls(GateOp::MemberTags), 0);
    }
}
