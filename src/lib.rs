//! Warden: scheduled reconciliation and fair outcomes for a community bot.
//!
//! The crate keeps time-bound community state honest:
//!
//! - **Timed grants and punishments** are written to SQLite when issued and
//!   retired by a periodic sweep, whether or not any live event arrives.
//! - **Polls and giveaways** are tallied, drawn and published exactly once,
//!   guarded by a compare-and-set on the stored record.
//! - **Progression** counts messages and XP, promotes members along an
//!   activity ladder and fires level rewards.
//!
//! # Architecture
//!
//! The platform sits behind [`platform::PlatformGate`]; the engine never
//! talks HTTP directly. Inbound events arrive from
//! [`platform::gateway::run_gateway`] and flow through a [`HandlerChain`]
//! composed once at startup. The [`ReconciliationScheduler`] runs one sweep
//! loop per record kind on the same runtime.

pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod ids;
pub mod platform;
pub mod progression;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod selection;
pub mod store;

pub use commands::{Commands, DurationUnit, GiveawayRequest, TimeSpan};
pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use events::{CommunityEvent, EventHandler, HandlerChain};
pub use platform::{PlatformError, PlatformGate};
pub use progression::ProgressionLedger;
pub use reconcile::{EngagementCloser, GrantReconciler, Resolution};
pub use runtime::Runtime;
pub use scheduler::{ReconciliationScheduler, SweepKind, SweepReport};
pub use store::SqliteStore;
