//! TimeStore: durable records of time-bound and progression state.
//!
//! Every obligation the engine must honor later (grant expiry, punishment
//! expiry, engagement close) is persisted here first, so a restart loses
//! nothing. The reconciliation scheduler only ever reads *due* rows and
//! resolves them one at a time.

pub(crate) mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::{SqliteStore, StoreError};
pub use types::{
    ActivityThreshold, Choice, ChoiceTally, CommunitySettings, EngagementEvent, EngagementKind,
    EngagementOutcome, EntryRules, LevelReward, NewEngagement, NewPunishment, ProgressionRecord,
    Punishment, PunishmentKind, TimedGrant,
};
