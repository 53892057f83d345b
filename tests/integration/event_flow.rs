use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden::ids::{MemberId, TagId};
use warden::platform::gateway::parse_dispatch;
use warden::runtime::EVENT_QUEUE_CAPACITY;

use crate::helpers::{BOT, CHANNEL, COMMUNITY, harness, message_from};

const MEMBER: MemberId = MemberId(2);
const VERIFIED: TagId = TagId(40);

#[tokio::test]
async fn reaction_dispatch_verifies_member_end_to_end() {
    let h = harness();
    h.gate.seed_tag(COMMUNITY, VERIFIED, true);
    h.gate.seed_member(COMMUNITY, MEMBER, &[]);
    let commands = h.runtime.commands();
    commands
        .configure_welcome(COMMUNITY, "Welcome! React below to get access.")
        .unwrap();
    commands.configure_verification_tag(COMMUNITY, VERIFIED).await.unwrap();
    let welcome = commands.publish_verification(COMMUNITY, CHANNEL).await.unwrap();

    let payload = json!({
        "guild_id": COMMUNITY.to_string(),
        "channel_id": CHANNEL.to_string(),
        "message_id": welcome.to_string(),
        "user_id": MEMBER.to_string(),
        "emoji": {"id": null, "name": "✅"}
    });
    let event = parse_dispatch("MESSAGE_REACTION_ADD", &payload, BOT).expect("community reaction");
    assert_eq!(h.runtime.dispatch(&event).await, 0);
    assert_eq!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap(), vec![VERIFIED]);

    let removed = parse_dispatch("MESSAGE_REACTION_REMOVE", &payload, BOT).expect("removal");
    h.runtime.dispatch(&removed).await;
    assert!(h.gate.member_tags(COMMUNITY, MEMBER).unwrap().is_empty());
}

#[tokio::test]
async fn event_loop_stops_on_cancel() {
    let h = harness();
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    tx.send(message_from(MEMBER, 1)).await.unwrap();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let runtime = &h.runtime;
    let (handled, ()) = tokio::join!(runtime.run_events(rx, cancel), async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stopper.cancel();
    });
    assert_eq!(handled, 1);
    assert_eq!(
        h.runtime.ledger().record(COMMUNITY, MEMBER).unwrap().message_count,
        1
    );
    drop(tx);
}
