use warden::commands::{GiveawayRequest, TimeSpan};
use warden::error::WardenError;
use warden::ids::MemberId;
use warden::scheduler::SweepKind;
use warden::store::{EngagementOutcome, EntryRules};

use crate::helpers::{CHANNEL, COMMUNITY, Harness, MODERATOR, harness};

const NOW: i64 = 10_000;

fn winners_of(h: &Harness, id: i64) -> Vec<MemberId> {
    match h.runtime.store().engagement(id).unwrap().unwrap().outcome {
        Some(EngagementOutcome::Giveaway { winners }) => winners,
        other => panic!("unexpected outcome {other:?}"),
    }
}

async fn giveaway(h: &Harness, winner_count: u32, entrants: &[MemberId]) -> i64 {
    let request = GiveawayRequest {
        prize: "Limited sticker pack".to_owned(),
        duration: TimeSpan::minutes(10),
        entry: EntryRules {
            winner_count,
            ..EntryRules::default()
        },
    };
    let event = h
        .runtime
        .commands()
        .create_giveaway(COMMUNITY, CHANNEL, MODERATOR, request, NOW)
        .await
        .unwrap();
    for &member in entrants {
        h.gate.seed_member(COMMUNITY, member, &[]);
        h.gate.seed_response(event.response_handle, "🎉", member);
    }
    event.id
}

#[tokio::test]
async fn giveaway_with_fewer_entrants_than_winners_pays_everyone() {
    let h = harness();
    let entrants = [MemberId(10), MemberId(11)];
    let id = giveaway(&h, 3, &entrants).await;

    let early = h.runtime.scheduler().sweep(SweepKind::Engagements, NOW + 599).await;
    assert_eq!(early.total(), 0);

    let report = h.runtime.scheduler().sweep(SweepKind::Engagements, NOW + 600).await;
    assert_eq!(report.applied, 1);
    let mut winners = winners_of(&h, id);
    winners.sort();
    assert_eq!(winners, entrants.to_vec());
    assert!(!h.runtime.store().engagement(id).unwrap().unwrap().is_active);

    // Results are announced exactly once.
    let results: Vec<_> = h
        .gate
        .sent_messages()
        .into_iter()
        .filter(|m| m.content.contains("has ended"))
        .collect();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn poll_without_votes_closes_at_zero_percent() {
    let h = harness();
    let options = vec!["Tea".to_owned(), "Coffee".to_owned(), "Water".to_owned()];
    let poll = h
        .runtime
        .commands()
        .create_poll(COMMUNITY, CHANNEL, MODERATOR, "Drinks?", &options, Some(TimeSpan::minutes(1)), NOW)
        .await
        .unwrap();

    h.runtime.scheduler().sweep(SweepKind::Engagements, NOW + 60).await;
    match h.runtime.store().engagement(poll.id).unwrap().unwrap().outcome {
        Some(EngagementOutcome::Poll { tallies }) => {
            assert_eq!(tallies.len(), 3);
            assert!(tallies.iter().all(|t| t.votes == 0 && t.percent == 0.0));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn manual_close_twice_is_an_error_and_sweep_skips_it() {
    let h = harness();
    let id = giveaway(&h, 1, &[MemberId(10)]).await;
    let commands = h.runtime.commands();

    commands.close_engagement(id).await.unwrap();
    assert!(matches!(
        commands.close_engagement(id).await,
        Err(WardenError::AlreadyClosed(closed)) if closed == id
    ));
    let report = h.runtime.scheduler().sweep(SweepKind::Engagements, NOW + 600).await;
    assert_eq!(report.total(), 0);
    assert_eq!(winners_of(&h, id), vec![MemberId(10)]);
}

#[tokio::test]
async fn named_reroll_replaces_only_that_slot() {
    let h = harness();
    let entrants: Vec<MemberId> = (10..16).map(MemberId).collect();
    let id = giveaway(&h, 2, &entrants).await;
    let commands = h.runtime.commands();
    commands.close_engagement(id).await.unwrap();
    let prior = winners_of(&h, id);
    assert_eq!(prior.len(), 2);

    let rerolled = commands.reroll(id, Some(prior[0])).await.unwrap();
    assert_eq!(rerolled.len(), 2);
    assert_eq!(rerolled[1], prior[1]);
    assert!(!prior.contains(&rerolled[0]));
    assert_eq!(winners_of(&h, id), rerolled);

    let full = commands.reroll(id, None).await.unwrap();
    assert_eq!(full.len(), 2);
    assert!(full.iter().all(|w| !rerolled.contains(w)));
}

#[tokio::test]
async fn reroll_with_exhausted_pool_keeps_winners() {
    let h = harness();
    let id = giveaway(&h, 1, &[MemberId(10)]).await;
    let commands = h.runtime.commands();
    commands.close_engagement(id).await.unwrap();

    assert!(matches!(
        commands.reroll(id, None).await,
        Err(WardenError::Validation(_))
    ));
    assert_eq!(winners_of(&h, id), vec![MemberId(10)]);
}
