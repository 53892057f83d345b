use std::sync::Arc;

use warden::commands::TimeSpan;
use warden::ids::{MemberId, TagId, now_epoch_secs};
use warden::platform::memory::GateOp;
use warden::reconcile::{GrantReconciler, Resolution};
use warden::scheduler::SweepKind;

use crate::helpers::{COMMUNITY, MODERATOR, harness};

const MEMBER: MemberId = MemberId(2);
const MUTED: TagId = TagId(11);
const VIP: TagId = TagId(12);

#[tokio::test]
async fn expired_mute_is_lifted_by_one_sweep() {
    let h = harness();
    h.gate.seed_tag(COMMUNITY, MUTED, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let commands = h.runtime.commands();
    commands.set_mute_tag(COMMUNITY, MUTED).await.unwrap();

    let now = now_epoch_secs();
    let mute = commands
        .mute(COMMUNITY, MEMBER, MODERATOR, "spam", Some(TimeSpan::minutes(1)), now - 61)
        .await
        .unwrap();
    assert_eq!(mute.expires_at, Some(now - 1));
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![MUTED]);

    let report = h.runtime.scheduler().sweep(SweepKind::Punishments, now).await;
    assert_eq!(report.applied, 1);
    assert!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap().is_empty());
    assert!(!h.runtime.store().punishment(mute.id).unwrap().unwrap().active);

    let again = h.runtime.scheduler().sweep(SweepKind::Punishments, now).await;
    assert_eq!(again.total(), 0);
}

#[tokio::test]
async fn retired_grant_rerun_is_a_no_op() {
    let h = harness();
    h.gate.seed_tag(COMMUNITY, VIP, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let grant = h
        .runtime
        .commands()
        .grant_timed_tag(COMMUNITY, MEMBER, VIP, TimeSpan::minutes(5), 0)
        .await
        .unwrap();

    let report = h.runtime.scheduler().sweep(SweepKind::Grants, 301).await;
    assert_eq!(report.applied, 1);
    let removals = h.gate.calls(GateOp::RemoveTag);

    let reconciler = GrantReconciler::new(h.gate.clone(), Arc::clone(h.runtime.store()));
    assert_eq!(reconciler.reconcile_grant(&grant).await.unwrap(), Resolution::Stale);
    assert_eq!(h.gate.calls(GateOp::RemoveTag), removals);
    assert!(h.runtime.store().grant(grant.id).unwrap().is_none());
}

#[tokio::test]
async fn grant_survives_restart_and_expires_afterwards() {
    let h = harness();
    h.gate.seed_tag(COMMUNITY, VIP, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    h.runtime
        .commands()
        .grant_timed_tag(COMMUNITY, MEMBER, VIP, TimeSpan::minutes(10), 1_000)
        .await
        .unwrap();

    let h = h.restart();
    let early = h.runtime.scheduler().sweep(SweepKind::Grants, 1_500).await;
    assert_eq!(early.total(), 0);
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![VIP]);

    let due = h.runtime.scheduler().sweep(SweepKind::Grants, 1_600).await;
    assert_eq!(due.applied, 1);
    assert!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap().is_empty());
}

#[tokio::test]
async fn outranked_tag_stays_due_until_authority_returns() {
    let h = harness();
    h.gate.seed_tag(COMMUNITY, VIP, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    h.runtime
        .commands()
        .grant_timed_tag(COMMUNITY, MEMBER, VIP, TimeSpan::minutes(1), 0)
        .await
        .unwrap();
    h.gate.set_manageable(COMMUNITY, VIP, false);

    let scheduler = h.runtime.scheduler();
    let blocked = scheduler.sweep(SweepKind::Grants, 100).await;
    assert_eq!(blocked.deferred, 1);
    assert_eq!(h.runtime.store().due_grants(100).unwrap().len(), 1);

    h.gate.set_manageable(COMMUNITY, VIP, true);
    let lifted = scheduler.sweep(SweepKind::Grants, 100).await;
    assert_eq!(lifted.applied, 1);
    assert!(h.runtime.store().due_grants(100).unwrap().is_empty());
}
