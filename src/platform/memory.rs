//! In-process [`PlatformGate`] used by tests and local dry runs.
//!
//! Behaves like the real platform where the engine cares: unknown
//! resources report `NotFound`, tags the bot cannot manage report
//! `Forbidden`. Any operation can additionally be scripted to fail.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{PlatformError, PlatformGate, Responses};
use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId};

/// Operation selector for scripted failures and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateOp {
    CommunityName,
    MemberTags,
    AddTag,
    RemoveTag,
    CanManage,
    Responses,
    AddResponse,
    ClearResponses,
    Send,
    Edit,
    Delete,
    Direct,
    IsBanned,
    Ban,
    Unban,
    Kick,
}

/// A message the fake has seen sent or edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub id: MessageId,
    pub content: String,
}

#[derive(Debug, Default)]
struct CommunityState {
    name: String,
    tags: HashSet<TagId>,
    manageable: HashSet<TagId>,
    members: HashMap<MemberId, BTreeSet<TagId>>,
    bans: HashSet<MemberId>,
}

#[derive(Debug)]
struct StoredMessage {
    channel: ChannelId,
    content: String,
    responses: Responses,
}

#[derive(Debug, Default)]
struct State {
    communities: HashMap<CommunityId, CommunityState>,
    messages: HashMap<MessageId, StoredMessage>,
    sent: Vec<SentMessage>,
    directs: Vec<(MemberId, String)>,
    failures: HashMap<GateOp, PlatformError>,
    stalls: HashMap<GateOp, usize>,
    calls: HashMap<GateOp, usize>,
    next_message: u64,
}

/// Scriptable in-memory platform.
pub struct MemoryPlatform {
    bot: MemberId,
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new(bot: MemberId) -> Self {
        Self {
            bot,
            state: Mutex::new(State {
                next_message: 1_000_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding ------------------------------------------------------------

    pub fn seed_community(&self, community: CommunityId, name: &str) {
        let mut state = self.state();
        state.communities.entry(community).or_default().name = name.to_owned();
    }

    /// Create a tag; `manageable` controls whether the bot outranks it.
    pub fn seed_tag(&self, community: CommunityId, tag: TagId, manageable: bool) {
        let mut state = self.state();
        let c = state.communities.entry(community).or_default();
        c.tags.insert(tag);
        if manageable {
            c.manageable.insert(tag);
        } else {
            c.manageable.remove(&tag);
        }
    }

    pub fn set_manageable(&self, community: CommunityId, tag: TagId, manageable: bool) {
        self.seed_tag(community, tag, manageable);
    }

    pub fn delete_tag(&self, community: CommunityId, tag: TagId) {
        let mut state = self.state();
        if let Some(c) = state.communities.get_mut(&community) {
            c.tags.remove(&tag);
            c.manageable.remove(&tag);
            for held in c.members.values_mut() {
                held.remove(&tag);
            }
        }
    }

    pub fn seed_member(&self, community: CommunityId, member: MemberId, tags: &[TagId]) {
        let mut state = self.state();
        let c = state.communities.entry(community).or_default();
        c.members
            .entry(member)
            .or_default()
            .extend(tags.iter().copied());
    }

    pub fn remove_member(&self, community: CommunityId, member: MemberId) {
        let mut state = self.state();
        if let Some(c) = state.communities.get_mut(&community) {
            c.members.remove(&member);
        }
    }

    pub fn seed_ban(&self, community: CommunityId, member: MemberId) {
        let mut state = self.state();
        state.communities.entry(community).or_default().bans.insert(member);
    }

    /// Create a message that responses can be attached to.
    pub fn seed_message(&self, channel: ChannelId, content: &str) -> MessageId {
        let mut state = self.state();
        let id = next_message_id(&mut state);
        state.messages.insert(
            id,
            StoredMessage {
                channel,
                content: content.to_owned(),
                responses: Responses::new(),
            },
        );
        id
    }

    pub fn seed_response(&self, message: MessageId, marker: &str, member: MemberId) {
        let mut state = self.state();
        if let Some(m) = state.messages.get_mut(&message) {
            let responders = m.responses.entry(marker.to_owned()).or_default();
            if !responders.contains(&member) {
                responders.push(member);
            }
        }
    }

    pub fn vanish_message(&self, message: MessageId) {
        self.state().messages.remove(&message);
    }

    // -- failure scripting --------------------------------------------------

    /// Make every call to `op` fail with `err` until cleared.
    pub fn fail(&self, op: GateOp, err: PlatformError) {
        self.state().failures.insert(op, err);
    }

    /// Yield to the runtime `yields` times before each `op` completes.
    pub fn stall(&self, op: GateOp, yields: usize) {
        self.state().stalls.insert(op, yields);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// How many times `op` was invoked, failed or not.
    pub fn calls(&self, op: GateOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }

    // -- inspection ---------------------------------------------------------

    pub fn member_tags(&self, community: CommunityId, member: MemberId) -> Option<Vec<TagId>> {
        let state = self.state();
        state
            .communities
            .get(&community)?
            .members
            .get(&member)
            .map(|tags| tags.iter().copied().collect())
    }

    pub fn banned(&self, community: CommunityId, member: MemberId) -> bool {
        self.state()
            .communities
            .get(&community)
            .is_some_and(|c| c.bans.contains(&member))
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn directs(&self) -> Vec<(MemberId, String)> {
        self.state().directs.clone()
    }

    pub fn message_content(&self, message: MessageId) -> Option<String> {
        self.state().messages.get(&message).map(|m| m.content.clone())
    }

    pub fn responses_on(&self, message: MessageId) -> Option<Responses> {
        self.state().messages.get(&message).map(|m| m.responses.clone())
    }

    async fn pause(&self, op: GateOp) {
        let yields = self.state().stalls.get(&op).copied().unwrap_or_default();
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
    }

    /// Count the call and return a scripted failure if one is set.
    fn enter(&self, op: GateOp) -> Result<MutexGuard<'_, State>, PlatformError> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get(&op) {
            return Err(err.clone());
        }
        Ok(state)
    }
}

fn next_message_id(state: &mut State) -> MessageId {
    state.next_message += 1;
    MessageId(state.next_message)
}

fn community_mut(
    state: &mut State,
    community: CommunityId,
) -> Result<&mut CommunityState, PlatformError> {
    state
        .communities
        .get_mut(&community)
        .ok_or_else(|| PlatformError::NotFound(format!("community {community}")))
}

fn check_tag(c: &CommunityState, tag: TagId) -> Result<(), PlatformError> {
    if !c.tags.contains(&tag) {
        return Err(PlatformError::NotFound(format!("tag {tag}")));
    }
    if !c.manageable.contains(&tag) {
        return Err(PlatformError::Forbidden(format!("tag {tag} is above the bot")));
    }
    Ok(())
}

fn message_mut(
    state: &mut State,
    channel: ChannelId,
    message: MessageId,
) -> Result<&mut StoredMessage, PlatformError> {
    match state.messages.get_mut(&message) {
        Some(m) if m.channel == channel => Ok(m),
        _ => Err(PlatformError::NotFound(format!("message {message}"))),
    }
}

#[async_trait]
impl PlatformGate for MemoryPlatform {
    fn bot_id(&self) -> MemberId {
        self.bot
    }

    async fn community_name(&self, community: CommunityId) -> Result<String, PlatformError> {
        let mut state = self.enter(GateOp::CommunityName)?;
        Ok(community_mut(&mut state, community)?.name.clone())
    }

    async fn get_member_tags(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<Vec<TagId>, PlatformError> {
        let mut state = self.enter(GateOp::MemberTags)?;
        let c = community_mut(&mut state, community)?;
        c.members
            .get(&member)
            .map(|tags| tags.iter().copied().collect())
            .ok_or_else(|| PlatformError::NotFound(format!("member {member}")))
    }

    async fn add_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::AddTag)?;
        let c = community_mut(&mut state, community)?;
        check_tag(c, tag)?;
        c.members
            .get_mut(&member)
            .ok_or_else(|| PlatformError::NotFound(format!("member {member}")))?
            .insert(tag);
        Ok(())
    }

    async fn remove_tag(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::RemoveTag)?;
        let c = community_mut(&mut state, community)?;
        check_tag(c, tag)?;
        c.members
            .get_mut(&member)
            .ok_or_else(|| PlatformError::NotFound(format!("member {member}")))?
            .remove(&tag);
        Ok(())
    }

    async fn can_manage_tag(
        &self,
        community: CommunityId,
        tag: TagId,
    ) -> Result<bool, PlatformError> {
        let mut state = self.enter(GateOp::CanManage)?;
        let c = community_mut(&mut state, community)?;
        if !c.tags.contains(&tag) {
            return Err(PlatformError::NotFound(format!("tag {tag}")));
        }
        Ok(c.manageable.contains(&tag))
    }

    async fn get_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Responses, PlatformError> {
        self.pause(GateOp::Responses).await;
        let mut state = self.enter(GateOp::Responses)?;
        Ok(message_mut(&mut state, channel, message)?.responses.clone())
    }

    async fn add_response(
        &self,
        channel: ChannelId,
        message: MessageId,
        marker: &str,
    ) -> Result<(), PlatformError> {
        let bot = self.bot;
        let mut state = self.enter(GateOp::AddResponse)?;
        let m = message_mut(&mut state, channel, message)?;
        let responders = m.responses.entry(marker.to_owned()).or_default();
        if !responders.contains(&bot) {
            responders.push(bot);
        }
        Ok(())
    }

    async fn clear_responses(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::ClearResponses)?;
        message_mut(&mut state, channel, message)?.responses.clear();
        Ok(())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        let mut state = self.enter(GateOp::Send)?;
        let id = next_message_id(&mut state);
        state.messages.insert(
            id,
            StoredMessage {
                channel,
                content: content.to_owned(),
                responses: Responses::new(),
            },
        );
        state.sent.push(SentMessage {
            channel,
            id,
            content: content.to_owned(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Edit)?;
        message_mut(&mut state, channel, message)?.content = content.to_owned();
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Delete)?;
        message_mut(&mut state, channel, message)?;
        state.messages.remove(&message);
        Ok(())
    }

    async fn send_direct(&self, member: MemberId, content: &str) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Direct)?;
        state.directs.push((member, content.to_owned()));
        Ok(())
    }

    async fn is_banned(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<bool, PlatformError> {
        let mut state = self.enter(GateOp::IsBanned)?;
        Ok(community_mut(&mut state, community)?.bans.contains(&member))
    }

    async fn ban(
        &self,
        community: CommunityId,
        member: MemberId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Ban)?;
        let c = community_mut(&mut state, community)?;
        c.members.remove(&member);
        c.bans.insert(member);
        Ok(())
    }

    async fn unban(
        &self,
        community: CommunityId,
        member: MemberId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Unban)?;
        let c = community_mut(&mut state, community)?;
        if !c.bans.remove(&member) {
            return Err(PlatformError::NotFound(format!("ban for {member}")));
        }
        Ok(())
    }

    async fn kick(
        &self,
        community: CommunityId,
        member: MemberId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.enter(GateOp::Kick)?;
        let c = community_mut(&mut state, community)?;
        if c.members.remove(&member).is_none() {
            return Err(PlatformError::NotFound(format!("member {member}")));
        }
        Ok(())
    }
}
