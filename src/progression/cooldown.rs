//! Volatile XP cooldown cache.
//!
//! Keyed by (community, member); a restart forgets every window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ids::{CommunityId, MemberId};

/// Entries beyond this count trigger an eviction pass.
const SOFT_CAP: usize = 4_096;

/// Sliding cooldown per member.
#[derive(Debug, Clone)]
pub struct XpCooldowns {
    window: Duration,
    last_award: HashMap<(CommunityId, MemberId), Instant>,
    soft_cap: usize,
}

impl XpCooldowns {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_soft_cap(window, SOFT_CAP)
    }

    #[must_use]
    pub fn with_soft_cap(window: Duration, soft_cap: usize) -> Self {
        Self {
            window,
            last_award: HashMap::new(),
            soft_cap: soft_cap.max(1),
        }
    }

    /// Claim an award slot at `now`. Returns `false` while the member is
    /// still inside the window of their previous award.
    pub fn try_acquire(&mut self, community: CommunityId, member: MemberId, now: Instant) -> bool {
        if self.last_award.len() >= self.soft_cap {
            self.evict(now);
        }
        let key = (community, member);
        if let Some(&last) = self.last_award.get(&key)
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_award.insert(key, now);
        true
    }

    /// Drop entries whose window has elapsed.
    pub fn evict(&mut self, now: Instant) {
        let window = self.window;
        self.last_award
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last_award.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_award.is_empty()
    }
}
