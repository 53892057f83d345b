//! GrantReconciler: expiry of timed grants and timed punishments.

use std::sync::Arc;

use tracing::debug;

use super::{DeferReason, Resolution, log_resolution};
use crate::error::Result;
use crate::ids::{CommunityId, MemberId, TagId};
use crate::platform::{PlatformError, PlatformGate};
use crate::store::{Punishment, PunishmentKind, SqliteStore, TimedGrant};

/// Retires expired grants and punishments.
pub struct GrantReconciler {
    gate: Arc<dyn PlatformGate>,
    store: Arc<SqliteStore>,
}

impl GrantReconciler {
    pub fn new(gate: Arc<dyn PlatformGate>, store: Arc<SqliteStore>) -> Self {
        Self { gate, store }
    }

    /// Revoke an expired grant.
    ///
    /// A grant that was already retired resolves `Stale` without touching
    /// the platform. A store error leaves the record due.
    pub async fn reconcile_grant(&self, grant: &TimedGrant) -> Result<Resolution> {
        if self.store.grant(grant.id)?.is_none() {
            debug!(grant_id = grant.id, "grant already retired");
            return Ok(Resolution::Stale);
        }

        let (resolution, detail) = self.revoke_grant(grant).await;
        log_resolution("grant", grant.id, resolution, &detail);
        if resolution.is_deferred() {
            return Ok(resolution);
        }

        self.store.delete_grant(grant.id)?;
        if resolution == Resolution::Applied {
            let text = format!(
                "Your temporary {} in **{}** has expired.",
                tag_label(grant.tag),
                self.community_label(grant.community).await
            );
            self.notify(grant.member, &text).await;
        }
        Ok(resolution)
    }

    async fn revoke_grant(&self, grant: &TimedGrant) -> (Resolution, String) {
        let held = match self.gate.get_member_tags(grant.community, grant.member).await {
            Ok(held) => held,
            Err(e) => return (Resolution::from_platform_error(&e), e.to_string()),
        };
        if let Some(blocked) = self.check_authority(grant.community, grant.tag).await {
            return blocked;
        }
        if !held.contains(&grant.tag) {
            return (Resolution::Applied, "tag already gone".to_owned());
        }
        match self
            .gate
            .remove_tag(grant.community, grant.member, grant.tag, "timed grant expired")
            .await
        {
            Ok(()) => (Resolution::Applied, format!("removed tag {}", grant.tag)),
            Err(e) => (Resolution::from_platform_error(&e), e.to_string()),
        }
    }

    /// Lift an expired mute or ban.
    pub async fn reconcile_punishment(&self, punishment: &Punishment) -> Result<Resolution> {
        match self.store.punishment(punishment.id)? {
            Some(current) if current.active => {}
            _ => {
                debug!(punishment_id = punishment.id, "punishment already inactive");
                return Ok(Resolution::Stale);
            }
        }

        let (resolution, detail) = match punishment.kind {
            PunishmentKind::Mute => self.lift_mute(punishment).await?,
            PunishmentKind::Ban => self.lift_ban(punishment).await,
            PunishmentKind::Kick | PunishmentKind::Warn => {
                (Resolution::Stale, format!("{} has nothing to lift", punishment.kind))
            }
        };
        log_resolution("punishment", punishment.id, resolution, &detail);
        if resolution.is_deferred() {
            return Ok(resolution);
        }

        self.store.deactivate_punishment(punishment.id)?;
        if resolution == Resolution::Applied && punishment.kind == PunishmentKind::Mute {
            let text = format!(
                "Your mute in **{}** has expired.",
                self.community_label(punishment.community).await
            );
            self.notify(punishment.member, &text).await;
        }
        Ok(resolution)
    }

    async fn lift_mute(&self, punishment: &Punishment) -> Result<(Resolution, String)> {
        let tag = match punishment.tag {
            Some(tag) => tag,
            None => match self.store.settings(punishment.community)?.mute_tag {
                Some(tag) => tag,
                None => return Ok((Resolution::Stale, "no mute tag configured".to_owned())),
            },
        };
        let held = match self
            .gate
            .get_member_tags(punishment.community, punishment.member)
            .await
        {
            Ok(held) => held,
            Err(e) => return Ok((Resolution::from_platform_error(&e), e.to_string())),
        };
        if !held.contains(&tag) {
            return Ok((Resolution::Stale, "mute tag already removed".to_owned()));
        }
        if let Some(blocked) = self.check_authority(punishment.community, tag).await {
            return Ok(blocked);
        }
        let outcome = match self
            .gate
            .remove_tag(punishment.community, punishment.member, tag, "mute expired")
            .await
        {
            Ok(()) => (Resolution::Applied, format!("unmuted {}", punishment.member)),
            Err(e) => (Resolution::from_platform_error(&e), e.to_string()),
        };
        Ok(outcome)
    }

    async fn lift_ban(&self, punishment: &Punishment) -> (Resolution, String) {
        match self.gate.is_banned(punishment.community, punishment.member).await {
            Ok(true) => {}
            Ok(false) => return (Resolution::Stale, "ban already lifted".to_owned()),
            Err(e) => return (Resolution::from_platform_error(&e), e.to_string()),
        }
        match self
            .gate
            .unban(punishment.community, punishment.member, "ban expired")
            .await
        {
            Ok(()) => (Resolution::Applied, format!("unbanned {}", punishment.member)),
            Err(e) => (Resolution::from_platform_error(&e), e.to_string()),
        }
    }

    /// `Some` when the bot may not touch `tag` right now.
    async fn check_authority(
        &self,
        community: CommunityId,
        tag: TagId,
    ) -> Option<(Resolution, String)> {
        match self.gate.can_manage_tag(community, tag).await {
            Ok(true) => None,
            Ok(false) => Some((
                Resolution::Deferred(DeferReason::Authority),
                format!("tag {tag} is above the bot or MANAGE_ROLES is missing"),
            )),
            Err(e) => Some((Resolution::from_platform_error(&e), e.to_string())),
        }
    }

    async fn community_label(&self, community: CommunityId) -> String {
        self.gate
            .community_name(community)
            .await
            .unwrap_or_else(|_| community.to_string())
    }

    async fn notify(&self, member: MemberId, text: &str) {
        if let Err(e) = self.gate.send_direct(member, text).await {
            log_undelivered(member, &e);
        }
    }
}

fn tag_label(tag: TagId) -> String {
    format!("tag {}", tag.mention())
}

fn log_undelivered(member: MemberId, err: &PlatformError) {
    debug!(%member, "notice not delivered: {err}");
}
