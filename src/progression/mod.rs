//! ProgressionLedger: message counters, XP, and the XP to level formula.
//!
//! `level` is only ever written by [`ProgressionLedger::grant_xp`], and only
//! upward, so the level-reward trigger fires once per level reached.

pub mod cooldown;
pub mod ladder;
pub mod rewards;

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::config::ProgressionConfig;
use crate::error::Result;
use crate::ids::{CommunityId, MemberId};
use crate::store::{ProgressionRecord, SqliteStore};

pub use cooldown::XpCooldowns;

/// Upper bound for the level search; `xp_floor` saturates well below it.
const MAX_LEVEL: u32 = 3_000_000;

/// Minimum total XP at which a member is at `level`.
///
/// Advancing from level `i` costs `5i² + 50i + 100`; this is the closed
/// form of that cost summed over all lower levels, saturating at `u64::MAX`.
#[must_use]
pub fn xp_floor(level: u32) -> u64 {
    let l = u128::from(level);
    if l == 0 {
        return 0;
    }
    let squares = (l - 1) * l * (2 * l - 1) / 6;
    let linear = (l - 1) * l / 2;
    let total = 5 * squares + 50 * linear + 100 * l;
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Level reached with `xp` total experience.
#[must_use]
pub fn level_for_xp(xp: u64) -> u32 {
    let (mut lo, mut hi) = (0u32, MAX_LEVEL);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if xp_floor(mid) <= xp {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Result of one XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpGrant {
    pub total: u64,
    pub previous_level: u32,
    pub new_level: u32,
}

impl XpGrant {
    #[must_use]
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.previous_level
    }
}

/// Progress summary shown by the rank command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankCard {
    pub level: u32,
    pub xp: u64,
    pub message_count: u64,
    /// XP earned since reaching `level`.
    pub into_level: u64,
    /// XP between `level` and `level + 1`.
    pub span: u64,
    pub percent: f64,
}

/// Owner of the progression counters and the volatile cooldown cache.
pub struct ProgressionLedger {
    store: Arc<SqliteStore>,
    cooldowns: Mutex<XpCooldowns>,
    xp_per_message: RangeInclusive<u64>,
}

impl ProgressionLedger {
    pub fn new(store: Arc<SqliteStore>, config: &ProgressionConfig) -> Self {
        let min = config.xp_per_message_min.min(config.xp_per_message_max);
        Self {
            store,
            cooldowns: Mutex::new(XpCooldowns::new(Duration::from_secs(
                config.xp_cooldown_secs,
            ))),
            xp_per_message: min..=config.xp_per_message_max,
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Count a message. Not gated by the cooldown.
    pub fn record_message(&self, community: CommunityId, member: MemberId) -> Result<u64> {
        Ok(self.store.increment_message_count(community, member)?)
    }

    /// Add `amount` XP and advance the cached level if the new total earns it.
    pub fn grant_xp(&self, community: CommunityId, member: MemberId, amount: u64) -> Result<XpGrant> {
        let before = self.store.progression(community, member)?;
        let total = self.store.add_xp(community, member, amount)?;
        let earned = level_for_xp(total);
        let advanced = earned > before.level && self.store.advance_level(community, member, earned)?;
        let new_level = if advanced { earned } else { before.level };
        if advanced {
            debug!(%community, %member, from = before.level, to = earned, "level advanced");
        }
        Ok(XpGrant {
            total,
            previous_level: before.level,
            new_level,
        })
    }

    /// Award per-message XP unless the member is cooling down.
    pub fn award_message_xp(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<Option<XpGrant>> {
        self.award_message_xp_at(community, member, Instant::now(), &mut rand::thread_rng())
    }

    /// [`Self::award_message_xp`] with an explicit clock and RNG.
    pub fn award_message_xp_at<R: Rng + ?Sized>(
        &self,
        community: CommunityId,
        member: MemberId,
        now: Instant,
        rng: &mut R,
    ) -> Result<Option<XpGrant>> {
        let allowed = self
            .cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(community, member, now);
        if !allowed {
            return Ok(None);
        }
        let amount = rng.gen_range(self.xp_per_message.clone());
        self.grant_xp(community, member, amount).map(Some)
    }

    pub fn record(&self, community: CommunityId, member: MemberId) -> Result<ProgressionRecord> {
        Ok(self.store.progression(community, member)?)
    }

    pub fn level_of(&self, community: CommunityId, member: MemberId) -> Result<u32> {
        Ok(self.store.progression(community, member)?.level)
    }

    pub fn rank(&self, community: CommunityId, member: MemberId) -> Result<RankCard> {
        let record = self.store.progression(community, member)?;
        Ok(rank_card(&record))
    }
}

fn rank_card(record: &ProgressionRecord) -> RankCard {
    let floor = xp_floor(record.level);
    let span = xp_floor(record.level.saturating_add(1)).saturating_sub(floor);
    let into_level = record.xp.saturating_sub(floor).min(span);
    let percent = if span > 0 {
        into_level as f64 / span as f64 * 100.0
    } else if record.level > 0 {
        100.0
    } else {
        0.0
    };
    RankCard {
        level: record.level,
        xp: record.xp,
        message_count: record.message_count,
        into_level,
        span,
        percent,
    }
}
