use warden::commands::TimeSpan;
use warden::config::{ProgressionConfig, WardenConfig};
use warden::error::WardenError;
use warden::ids::{ChannelId, MemberId, TagId};
use warden::progression::{ladder, rewards};

use crate::helpers::{CHANNEL, COMMUNITY, harness, harness_with, message_from};

const MEMBER: MemberId = MemberId(2);

#[tokio::test]
async fn xp_jump_advances_level_once_and_fires_each_reward() {
    let h = harness();
    let badge = TagId(70);
    let announcements = ChannelId(77);
    h.gate.seed_tag(COMMUNITY, badge, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let commands = h.runtime.commands();
    commands.set_level_up_channel(COMMUNITY, Some(announcements)).unwrap();
    commands
        .set_level_up_template(COMMUNITY, Some("{member} is now level {level} in {community}"))
        .unwrap();
    commands.set_level_reward(COMMUNITY, 1, Some(badge), None).await.unwrap();
    commands
        .set_level_reward(COMMUNITY, 2, None, Some("Level {level} unlocked!"))
        .await
        .unwrap();

    // 300 XP crosses the floors of level 1 (100) and level 2 (255).
    let grant = h.runtime.ledger().grant_xp(COMMUNITY, MEMBER, 300).unwrap();
    assert_eq!((grant.previous_level, grant.new_level), (0, 2));
    let report = rewards::fire_level_rewards(
        h.runtime.gate().as_ref(),
        h.runtime.store(),
        COMMUNITY,
        MEMBER,
        &grant,
        CHANNEL,
    )
    .await
    .unwrap();
    assert!(report.announced);
    assert_eq!(report.tags_granted, 1);
    assert_eq!(report.messages_posted, 1);

    let sent = h.gate.sent_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.channel == announcements));
    assert_eq!(sent[0].content, "<@2> is now level 2 in Test Community");
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![badge]);

    // Staying inside level 2 changes nothing.
    let small = h.runtime.ledger().grant_xp(COMMUNITY, MEMBER, 10).unwrap();
    assert!(!small.leveled_up());
    assert_eq!(h.runtime.ledger().level_of(COMMUNITY, MEMBER).unwrap(), 2);
}

#[tokio::test]
async fn crossing_two_rungs_leaves_only_the_highest() {
    let h = harness();
    let (bronze, silver, gold) = (TagId(10), TagId(20), TagId(30));
    for tag in [bronze, silver, gold] {
        h.gate.seed_tag(COMMUNITY, tag, true);
    }
    h.gate.seed_member(COMMUNITY, MEMBER, &[bronze]);
    let commands = h.runtime.commands();
    commands.add_ladder_rung(COMMUNITY, bronze, 10).await.unwrap();
    commands.add_ladder_rung(COMMUNITY, silver, 50).await.unwrap();
    commands.add_ladder_rung(COMMUNITY, gold, 100).await.unwrap();

    let change = ladder::reconcile_member(
        h.runtime.gate().as_ref(),
        h.runtime.store(),
        COMMUNITY,
        MEMBER,
        120,
    )
    .await
    .unwrap();
    assert_eq!(change.added, Some(gold));
    assert_eq!(change.removed, vec![bronze]);
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![gold]);
}

#[tokio::test]
async fn messages_walk_member_up_the_ladder() {
    let mut config = WardenConfig::default();
    config.progression = ProgressionConfig {
        xp_per_message_min: 1,
        xp_per_message_max: 1,
        xp_cooldown_secs: 60,
    };
    let h = harness_with(config);
    let (first, second) = (TagId(10), TagId(20));
    h.gate.seed_tag(COMMUNITY, first, true);
    h.gate.seed_tag(COMMUNITY, second, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let commands = h.runtime.commands();
    commands.add_ladder_rung(COMMUNITY, first, 1).await.unwrap();
    commands.add_ladder_rung(COMMUNITY, second, 2).await.unwrap();

    h.runtime.dispatch(&message_from(MEMBER, 1)).await;
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![first]);
    h.runtime.dispatch(&message_from(MEMBER, 2)).await;
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![second]);

    let card = commands.rank(COMMUNITY, MEMBER).unwrap();
    assert_eq!(card.message_count, 2);
    // Second message fell inside the cooldown window.
    assert_eq!(card.xp, 1);
    assert_eq!(card.level, 0);
}

#[tokio::test]
async fn outstanding_timed_tag_conflicts() {
    let h = harness();
    let vip = TagId(12);
    h.gate.seed_tag(COMMUNITY, vip, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let commands = h.runtime.commands();
    commands
        .grant_timed_tag(COMMUNITY, MEMBER, vip, TimeSpan::minutes(90), 0)
        .await
        .unwrap();

    match commands
        .grant_timed_tag(COMMUNITY, MEMBER, vip, TimeSpan::minutes(5), 60)
        .await
    {
        Err(WardenError::Conflict(msg)) => assert!(msg.contains("1970-01-01 01:30:00 UTC")),
        other => panic!("expected conflict, got {other:?}"),
    }
}
