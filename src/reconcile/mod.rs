//! Reconciliation of persisted intent against live platform state.
//!
//! Every due record resolves to exactly one [`Resolution`]:
//!
//! - `Applied`: the platform now matches intent; the record is retired.
//! - `Stale`: the target no longer exists; the record is retired.
//! - `Deferred`: the bot cannot act right now; the record stays due.

pub mod engagement;
pub mod grants;

use tracing::{debug, info, warn};

use crate::platform::PlatformError;

pub use engagement::EngagementCloser;
pub use grants::GrantReconciler;

/// Why a record was left pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Missing permission or the target tag ranks above the bot.
    Authority,
    /// Network trouble, rate limit or a store hiccup.
    Transient,
}

/// Outcome of reconciling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Stale,
    Deferred(DeferReason),
}

impl Resolution {
    /// Resolution implied by a failed platform call.
    #[must_use]
    pub fn from_platform_error(err: &PlatformError) -> Self {
        match err {
            PlatformError::NotFound(_) => Self::Stale,
            PlatformError::Forbidden(_) => Self::Deferred(DeferReason::Authority),
            PlatformError::Transient(_) => Self::Deferred(DeferReason::Transient),
        }
    }

    #[must_use]
    pub fn is_deferred(self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

/// Emit the single diagnostic for one record in one sweep.
pub(crate) fn log_resolution(record: &str, id: i64, resolution: Resolution, detail: &str) {
    match resolution {
        Resolution::Applied => info!(record, id, "applied: {detail}"),
        Resolution::Stale => info!(record, id, "stale, retiring: {detail}"),
        Resolution::Deferred(DeferReason::Authority) => {
            warn!(record, id, "deferred, insufficient authority: {detail}");
        }
        Resolution::Deferred(DeferReason::Transient) => {
            debug!(record, id, "deferred, will retry: {detail}");
        }
    }
}
