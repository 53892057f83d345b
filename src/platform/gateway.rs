//! Discord gateway pump.
//!
//! Holds one websocket session, keeps it alive with heartbeats and turns the
//! dispatches the engine cares about into [`CommunityEvent`]s. The caller
//! restarts the pump when it returns an error.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DiscordConfig;
use crate::events::CommunityEvent;
use crate::ids::MemberId;

// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT
const INTENTS: u64 = 1 | (1 << 1) | (1 << 9) | (1 << 10) | (1 << 15);
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;

/// Run one gateway session until it fails, the receiver closes or `cancel` fires.
///
/// Returns `Ok(())` only on cancellation or when the event receiver is gone.
pub async fn run_gateway(
    config: &DiscordConfig,
    bot: MemberId,
    tx: mpsc::Sender<CommunityEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if config.bot_token.trim().is_empty() {
        anyhow::bail!("discord bot token is empty");
    }

    let ws_url = format!("{}/?v=10&encoding=json", config.gateway_url.trim_end_matches('/'));
    let (stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
    let (mut write, mut read) = stream.split();

    let hello = read
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("no hello"))??;
    let hello_text = match hello {
        Message::Text(text) => text.to_string(),
        _ => anyhow::bail!("unexpected discord hello payload"),
    };
    let hello_json: Value = serde_json::from_str(&hello_text)?;
    let heartbeat_interval_ms = hello_json
        .get("d")
        .and_then(|v| v.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_HEARTBEAT_MS);

    write
        .send(Message::Text(identify_payload(&config.bot_token).to_string()))
        .await?;
    info!(heartbeat_interval_ms, "discord gateway session identified");

    let mut heartbeat =
        tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval_ms));
    // The first tick fires immediately; skip it so the first beat lands after one interval.
    heartbeat.tick().await;
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                let beat = json!({"op": OP_HEARTBEAT, "d": last_seq});
                if write.send(Message::Text(beat.to_string())).await.is_err() {
                    anyhow::bail!("discord heartbeat failed");
                }
            }
            maybe_msg = read.next() => {
                let raw = match maybe_msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("discord websocket closed");
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => anyhow::bail!("discord websocket error: {err}"),
                };

                let payload: Value = match serde_json::from_str(&raw) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(seq) = payload.get("s").and_then(Value::as_u64) {
                    last_seq = Some(seq);
                }

                match payload.get("op").and_then(Value::as_u64) {
                    Some(OP_DISPATCH) => {}
                    Some(OP_HEARTBEAT) => {
                        let beat = json!({"op": OP_HEARTBEAT, "d": last_seq});
                        write.send(Message::Text(beat.to_string())).await?;
                        continue;
                    }
                    Some(OP_RECONNECT) => anyhow::bail!("discord requested reconnect"),
                    Some(OP_INVALID_SESSION) => anyhow::bail!("discord invalidated the session"),
                    _ => continue,
                }

                let event_name = payload.get("t").and_then(Value::as_str).unwrap_or_default();
                let Some(data) = payload.get("d") else {
                    continue;
                };
                let Some(event) = parse_dispatch(event_name, data, bot) else {
                    continue;
                };
                debug!(event = event_name, community = %event.community(), "gateway dispatch");
                if tx.send(event).await.is_err() {
                    info!("event receiver closed, stopping gateway");
                    return Ok(());
                }
            }
        }
    }
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "warden",
                "device": "warden"
            }
        }
    })
}

fn snowflake<T: std::str::FromStr>(data: &Value, key: &str) -> Option<T> {
    data.get(key).and_then(Value::as_str)?.parse().ok()
}

/// Reaction marker: the unicode emoji itself, or `name:id` for custom emoji.
fn marker_of(data: &Value) -> Option<String> {
    let emoji = data.get("emoji")?;
    let name = emoji.get("name").and_then(Value::as_str).unwrap_or_default();
    match emoji.get("id").and_then(Value::as_str) {
        Some(id) => Some(format!("{name}:{id}")),
        None if !name.is_empty() => Some(name.to_owned()),
        None => None,
    }
}

/// Convert one dispatch payload into a [`CommunityEvent`].
///
/// Direct messages, events caused by `bot` and messages from other bots are
/// dropped.
#[must_use]
pub fn parse_dispatch(event_name: &str, data: &Value, bot: MemberId) -> Option<CommunityEvent> {
    let community = snowflake(data, "guild_id")?;
    let channel = snowflake(data, "channel_id")?;
    match event_name {
        "MESSAGE_CREATE" => {
            let author_data = data.get("author")?;
            let author: MemberId = snowflake(author_data, "id")?;
            let author_is_bot = author_data
                .get("bot")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if author == bot || author_is_bot {
                return None;
            }
            Some(CommunityEvent::MessageCreated {
                community,
                channel,
                message: snowflake(data, "id")?,
                author,
                content: data
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            })
        }
        "MESSAGE_REACTION_ADD" | "MESSAGE_REACTION_REMOVE" => {
            let member: MemberId = snowflake(data, "user_id")?;
            if member == bot {
                return None;
            }
            let message = snowflake(data, "message_id")?;
            let marker = marker_of(data)?;
            Some(if event_name == "MESSAGE_REACTION_ADD" {
                CommunityEvent::ResponseAdded { community, channel, message, member, marker }
            } else {
                CommunityEvent::ResponseRemoved { community, channel, message, member, marker }
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::ids::{ChannelId, CommunityId, MessageId};

    const BOT: MemberId = MemberId(99);

    #[test]
    fn message_create_becomes_event() {
        let data = json!({
            "id": "30",
            "guild_id": "1",
            "channel_id": "2",
            "content": "hello there",
            "author": {"id": "7"}
        });
        assert_eq!(
            parse_dispatch("MESSAGE_CREATE", &data, BOT),
            Some(CommunityEvent::MessageCreated {
                community: CommunityId(1),
                channel: ChannelId(2),
                message: MessageId(30),
                author: MemberId(7),
                content: "hello there".into(),
            })
        );
    }

    #[test]
    fn direct_and_bot_messages_are_dropped() {
        let dm = json!({"id": "30", "channel_id": "2", "content": "x", "author": {"id": "7"}});
        assert!(parse_dispatch("MESSAGE_CREATE", &dm, BOT).is_none());

        let own = json!({"id": "30", "guild_id": "1", "channel_id": "2", "author": {"id": "99"}});
        assert!(parse_dispatch("MESSAGE_CREATE", &own, BOT).is_none());

        let other_bot = json!({
            "id": "30", "guild_id": "1", "channel_id": "2",
            "author": {"id": "8", "bot": true}
        });
        assert!(parse_dispatch("MESSAGE_CREATE", &other_bot, BOT).is_none());
    }

    #[test]
    fn reactions_carry_marker() {
        let add = json!({
            "guild_id": "1", "channel_id": "2", "message_id": "30", "user_id": "7",
            "emoji": {"id": null, "name": "🎉"}
        });
        assert_eq!(
            parse_dispatch("MESSAGE_REACTION_ADD", &add, BOT),
            Some(CommunityEvent::ResponseAdded {
                community: CommunityId(1),
                channel: ChannelId(2),
                message: MessageId(30),
                member: MemberId(7),
                marker: "🎉".into(),
            })
        );

        let custom = json!({
            "guild_id": "1", "channel_id": "2", "message_id": "30", "user_id": "7",
            "emoji": {"id": "555", "name": "party"}
        });
        match parse_dispatch("MESSAGE_REACTION_REMOVE", &custom, BOT) {
            Some(CommunityEvent::ResponseRemoved { marker, .. }) => assert_eq!(marker, "party:555"),
            other => panic!("unexpected {other:?}"),
        }

        let own = json!({
            "guild_id": "1", "channel_id": "2", "message_id": "30", "user_id": "99",
            "emoji": {"name": "🎉"}
        });
        assert!(parse_dispatch("MESSAGE_REACTION_ADD", &own, BOT).is_none());
    }

    #[test]
    fn unrelated_dispatch_is_ignored() {
        let data = json!({"guild_id": "1", "channel_id": "2"});
        assert!(parse_dispatch("TYPING_START", &data, BOT).is_none());
    }

    #[test]
    fn identify_requests_reaction_and_content_intents() {
        let payload = identify_payload("tok");
        let intents = payload["d"]["intents"].as_u64().unwrap();
        assert_ne!(intents & (1 << 10), 0);
        assert_ne!(intents & (1 << 15), 0);
        assert_eq!(payload["op"], 2);
    }
}
