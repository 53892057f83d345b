//! Reconciliation scheduler.
//!
//! Runs the grant, punishment and engagement sweeps on a fixed interval.
//! It is the only path that applies time-triggered effects when no live
//! event arrives.

pub mod runner;

pub use runner::{ReconciliationScheduler, SweepKind, SweepReport};
