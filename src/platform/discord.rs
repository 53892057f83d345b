use crate::config::DiscordConfig;
use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId};
use crate::platform::{PlatformError, PlatformGate, Responses};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

/// Discord error code for "Unknown Ban".
const UNKNOWN_BAN: u64 = 10026;
const ADMINISTRATOR: u64 = 1 << 3;
const MANAGE_ROLES: u64 = 1 << 28;
/// Page size for reaction user listings.
const REACTION_PAGE: usize = 100;

/// [`PlatformGate`] over the Discord REST API.
pub struct DiscordGate {
    bot_token: String,
    api_base: String,
    bot: MemberId,
    client: reqwest::Client,
}

impl DiscordGate {
    pub fn new(config: &DiscordConfig) -> Self {
        Self::with_api_base(&config.bot_token, &config.api_base)
    }

    pub fn with_api_base(bot_token: &str, api_base: &str) -> Self {
        let bot = bot_user_id_from_token(bot_token)
            .and_then(|id| id.parse().ok())
            .unwrap_or(MemberId(0));
        Self {
            bot_token: bot_token.to_owned(),
            api_base: api_base.trim_end_matches('/').to_owned(),
            bot,
            client: reqwest::Client::new(),
        }
    }

    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        reason: &str,
    ) -> Result<reqwest::Response, PlatformError> {
        let url = format!("{}{path}", self.api_base);
        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.bot_token));
        if !reason.is_empty() {
            request = request.header("X-Audit-Log-Reason", urlencoding::encode(reason).into_owned());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .map_err(|e| PlatformError::Transient(format!("discord request failed: {e}")))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        reason: &str,
    ) -> Result<reqwest::Response, PlatformError> {
        let response = self.send_raw(method, path, body, reason).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, path, &body))
    }

    async fn call_json(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, PlatformError> {
        self.call(method, path, body, "")
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::Transient(format!("discord returned malformed json: {e}")))
    }

    async fn reaction_users(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<Vec<MemberId>, PlatformError> {
        let mut users = Vec::new();
        let mut after: Option<u64> = None;
        loop {
            let mut path = format!(
                "/channels/{channel}/messages/{message}/reactions/{}?limit={REACTION_PAGE}",
                urlencoding::encode(emoji)
            );
            if let Some(after) = after {
                path.push_str(&format!("&after={after}"));
            }
            let page = self.call_json(Method::GET, &path, None).await?;
            let ids: Vec<u64> = page
                .as_array()
                .map(|items| items.iter().filter_map(|u| snowflake(u.get("id"))).collect())
                .unwrap_or_default();
            let full = ids.len() >= REACTION_PAGE;
            after = ids.last().copied();
            users.extend(ids.into_iter().map(MemberId));
            if !full {
                return Ok(users);
            }
        }
    }
}

/// Extract the bot's user id from the first token segment.
fn bot_user_id_from_token(token: &str) -> Option<String> {
    let first = token.split('.').next()?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(first)
        .ok()?;
    String::from_utf8(decoded).ok()
}

fn classify_status(status: StatusCode, path: &str, body: &str) -> PlatformError {
    let detail = format!("{path} ({status}): {body}");
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Forbidden(detail),
        _ => PlatformError::Transient(detail),
    }
}

fn discord_error_code(body: &str) -> Option<u64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("code")?
        .as_u64()
}

/// Discord sends snowflakes as strings.
fn snowflake(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Role attributes needed for the hierarchy check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RoleInfo {
    id: u64,
    position: i64,
    permissions: u64,
}

fn parse_roles(value: &Value) -> Vec<RoleInfo> {
    value
        .as_array()
        .map(|roles| {
            roles
                .iter()
                .filter_map(|r| {
                    Some(RoleInfo {
                        id: snowflake(r.get("id"))?,
                        position: r.get("position").and_then(Value::as_i64).unwrap_or_default(),
                        permissions: snowflake(r.get("permissions")).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `None` when the tag does not exist. The `@everyone` role shares the
/// community id and always applies to the bot.
fn can_manage(roles: &[RoleInfo], bot_roles: &[u64], community: u64, tag: u64) -> Option<bool> {
    let target = roles.iter().find(|r| r.id == tag)?;
    let held = roles
        .iter()
        .filter(|r| r.id == community || bot_roles.contains(&r.id));
    let mut permissions = 0u64;
    let mut top = 0i64;
    for role in held {
        permissions |= role.permissions;
        top = top.max(role.position);
    }
    let permitted = permissions & (ADMINISTRATOR | MANAGE_ROLES) != 0;
    Some(permitted && target.position < top)
}

fn emoji_marker(emoji: &Value) -> Option<String> {
    let name = emoji.get("name").and_then(Value::as_str)?;
    match snowflake(emoji.get("id")) {
        Some(id) => Some(format!("{name}:{id}")),
        None => Some(name.to_owned()),
    }
}

#[async_trait]
impl PlatformGate for DiscordGate {
    fn bot_id(&self) -> MemberId {
        self.bot
    }

    async fn community_name(&self, community: CommunityId) -> Result<String, PlatformError> {
        let guild = self
            .call_json(Method::GET, &format!("/guilds/{community}"), None)
            .await?;
        Ok(guild
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }

    async fn get_member_tags(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<Vec<TagId>, PlatformError> {
        let body = self
            .call_json(
                Method::GET,
                &format!("/guilds/{community}/members/{member}"),
                None,
            )
            .await?;
        Ok(body
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(|r| snowflake(Some(r))).map(TagId).collect())
            .unwrap_or_default())
    }

    async fn add_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::PUT,
            &format!("/guilds/{community}/members/{member}/roles/{tag}"),
            None,
            reason,
        )
        .await?;
        Ok(())
    }

    async fn remove_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::DELETE,
            &format!("/guilds/{community}/members/{member}/roles/{tag}"),
            None,
            reason,
        )
        .await?;
        Ok(())
    }

    async fn can_manage_tag(
        &self,
        community: CommunityId,
        tag: TagId,
    ) -> Result<bool, PlatformError> {
        let roles = parse_roles(
            &self
                .call_json(Method::GET, &format!("/guilds/{community}/roles"), None)
                .await?,
        );
        let bot_roles: Vec<u64> = self
            .get_member_tags(community, self.bot)
            .await?
            .into_iter()
            .map(TagId::get)
            .collect();
        can_manage(&roles, &bot_roles, community.get(), tag.get())
            .ok_or_else(|| PlatformError::NotFound(format!("tag {tag}")))
    }

    async fn get_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Responses, PlatformError> {
        let body = self
            .call_json(
                Method::GET,
                &format!("/channels/{channel}/messages/{message}"),
                None,
            )
            .await?;
        let markers: Vec<String> = body
            .get("reactions")
            .and_then(Value::as_array)
            .map(|reactions| {
                reactions
                    .iter()
                    .filter_map(|r| r.get("emoji").and_then(emoji_marker))
                    .collect()
            })
            .unwrap_or_default();

        let mut responses = Responses::new();
        for marker in markers {
            let users = self.reaction_users(channel, message, &marker).await?;
            responses.insert(marker, users);
        }
        Ok(responses)
    }

    async fn add_response(
        &self,
        channel: ChannelId,
        message: MessageId,
        marker: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::PUT,
            &format!(
                "/channels/{channel}/messages/{message}/reactions/{}/@me",
                urlencoding::encode(marker)
            ),
            None,
            "",
        )
        .await?;
        Ok(())
    }

    async fn clear_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::DELETE,
            &format!("/channels/{channel}/messages/{message}/reactions"),
            None,
            "",
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        let body = self
            .call_json(
                Method::POST,
                &format!("/channels/{channel}/messages"),
                Some(json!({ "content": content })),
            )
            .await?;
        snowflake(body.get("id"))
            .map(MessageId)
            .ok_or_else(|| PlatformError::Transient("discord send returned no message id".into()))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::PATCH,
            &format!("/channels/{channel}/messages/{message}"),
            Some(json!({ "content": content })),
            "",
        )
        .await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::DELETE,
            &format!("/channels/{channel}/messages/{message}"),
            None,
            "",
        )
        .await?;
        Ok(())
    }

    async fn send_direct(&self, member: MemberId, content: &str) -> Result<(), PlatformError> {
        let dm = self
            .call_json(
                Method::POST,
                "/users/@me/channels",
                Some(json!({ "recipient_id": member.to_string() })),
            )
            .await?;
        let channel = snowflake(dm.get("id"))
            .map(ChannelId)
            .ok_or_else(|| PlatformError::Transient("discord returned no dm channel".into()))?;
        self.send_message(channel, content).await?;
        Ok(())
    }

    async fn is_banned(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<bool, PlatformError> {
        let path = format!("/guilds/{community}/bans/{member}");
        let response = self.send_raw(Method::GET, &path, None, "").await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND && discord_error_code(&body) == Some(UNKNOWN_BAN) {
            return Ok(false);
        }
        Err(classify_status(status, &path, &body))
    }

    async fn ban(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::PUT,
            &format!("/guilds/{community}/bans/{member}"),
            Some(json!({})),
            reason,
        )
        .await?;
        Ok(())
    }

    async fn unban(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::DELETE,
            &format!("/guilds/{community}/bans/{member}"),
            None,
            reason,
        )
        .await?;
        Ok(())
    }

    async fn kick(
        &self,
        community: CommunityId,
        member: MemberId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Method::DELETE,
            &format!("/guilds/{community}/members/{member}"),
            None,
            reason,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Token whose first segment decodes to "4242".
    fn token() -> String {
        let id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("4242");
        format!("{id}.xyz.abc")
    }

    async fn gate() -> (MockServer, DiscordGate) {
        let server = MockServer::start().await;
        let gate = DiscordGate::with_api_base(&token(), &server.uri());
        (server, gate)
    }

    #[test]
    fn bot_id_is_decoded_from_token() {
        let gate = DiscordGate::with_api_base(&token(), "http://localhost");
        assert_eq!(gate.bot_id(), MemberId(4242));
        let garbage = DiscordGate::with_api_base("not-base64!.x.y", "http://localhost");
        assert_eq!(garbage.bot_id(), MemberId(0));
    }

    #[test]
    fn hierarchy_check_needs_rank_and_permission() {
        let roles = vec![
            RoleInfo { id: 1, position: 0, permissions: 0 },
            RoleInfo { id: 10, position: 5, permissions: MANAGE_ROLES },
            RoleInfo { id: 11, position: 3, permissions: 0 },
            RoleInfo { id: 12, position: 8, permissions: 0 },
            RoleInfo { id: 13, position: 6, permissions: ADMINISTRATOR },
        ];
        assert_eq!(can_manage(&roles, &[10], 1, 11), Some(true));
        assert_eq!(can_manage(&roles, &[10], 1, 12), Some(false));
        // Rank without the permission bit is not enough.
        assert_eq!(can_manage(&roles[..4], &[12], 1, 11), Some(false));
        assert_eq!(can_manage(&roles, &[13], 1, 10), Some(true));
        assert_eq!(can_manage(&roles, &[10], 1, 99), None);
    }

    #[tokio::test]
    async fn status_codes_map_to_error_classes() {
        let (server, gate) = gate().await;
        for (tag, status) in [(404, 404u16), (403, 403), (503, 503), (429, 429)] {
            Mock::given(method("DELETE"))
                .and(path(format!("/guilds/1/members/2/roles/{tag}")))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }
        let remove = |tag| gate.remove_tag(CommunityId(1), MemberId(2), TagId(tag), "");
        assert!(matches!(remove(404).await, Err(PlatformError::NotFound(_))));
        assert!(matches!(remove(403).await, Err(PlatformError::Forbidden(_))));
        assert!(matches!(remove(503).await, Err(PlatformError::Transient(_))));
        assert!(matches!(remove(429).await, Err(PlatformError::Transient(_))));
    }

    #[tokio::test]
    async fn network_failure_is_transient() {
        let gate = DiscordGate::with_api_base(&token(), "http://127.0.0.1:9");
        let err = gate.community_name(CommunityId(1)).await.unwrap_err();
        assert!(matches!(err, PlatformError::Transient(_)));
    }

    #[tokio::test]
    async fn audit_reason_is_url_encoded() {
        let (server, gate) = gate().await;
        Mock::given(method("PUT"))
            .and(path("/guilds/1/members/2/roles/3"))
            .and(header("X-Audit-Log-Reason", "timed%20grant"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        gate.add_tag(CommunityId(1), MemberId(2), TagId(3), "timed grant")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_ban_means_not_banned() {
        let (server, gate) = gate().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1/bans/2"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"code": UNKNOWN_BAN, "message": "Unknown Ban"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/1/bans/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reason": null})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/9/bans/2"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"code": 10004, "message": "Unknown Guild"})),
            )
            .mount(&server)
            .await;

        assert!(!gate.is_banned(CommunityId(1), MemberId(2)).await.unwrap());
        assert!(gate.is_banned(CommunityId(1), MemberId(3)).await.unwrap());
        assert!(matches!(
            gate.is_banned(CommunityId(9), MemberId(2)).await,
            Err(PlatformError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn member_tags_and_responses_parse_string_snowflakes() {
        let (server, gate) = gate().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1/members/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"roles": ["7", "8"]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/5/messages/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "6",
                "reactions": [{"count": 2, "emoji": {"id": null, "name": "🎉"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/5/messages/6/reactions/%F0%9F%8E%89"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "2"}, {"id": "4242"}])),
            )
            .mount(&server)
            .await;

        assert_eq!(
            gate.get_member_tags(CommunityId(1), MemberId(2)).await.unwrap(),
            vec![TagId(7), TagId(8)]
        );
        let responses = gate.get_responses(ChannelId(5), MessageId(6)).await.unwrap();
        assert_eq!(responses["🎉"], vec![MemberId(2), MemberId(4242)]);
    }

    #[tokio::test]
    async fn send_message_returns_new_id() {
        let (server, gate) = gate().await;
        Mock::given(method("POST"))
            .and(path("/channels/5/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "77"})))
            .mount(&server)
            .await;
        assert_eq!(
            gate.send_message(ChannelId(5), "hello").await.unwrap(),
            MessageId(77)
        );
    }
}
