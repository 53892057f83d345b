//! Wiring of the engine: one store, one gate, one handler chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::Commands;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::events::handlers::{ActivityHandler, VerificationHandler, XpHandler};
use crate::events::{CommunityEvent, HandlerChain};
use crate::platform::PlatformGate;
use crate::progression::ProgressionLedger;
use crate::reconcile::{EngagementCloser, GrantReconciler};
use crate::scheduler::ReconciliationScheduler;
use crate::store::SqliteStore;

/// Capacity of the inbound event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Everything the bot needs at run time, built once.
pub struct Runtime {
    config: WardenConfig,
    store: Arc<SqliteStore>,
    gate: Arc<dyn PlatformGate>,
    ledger: Arc<ProgressionLedger>,
    grants: Arc<GrantReconciler>,
    closer: Arc<EngagementCloser>,
    commands: Arc<Commands>,
    chain: HandlerChain,
}

impl Runtime {
    /// Open the configured store and wire the engine around `gate`.
    pub fn open(config: WardenConfig, gate: Arc<dyn PlatformGate>) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store.path)?);
        info!(path = %config.store.path.display(), "store opened");
        Ok(Self::with_store(config, gate, store))
    }

    pub fn with_store(
        config: WardenConfig,
        gate: Arc<dyn PlatformGate>,
        store: Arc<SqliteStore>,
    ) -> Self {
        let ledger = Arc::new(ProgressionLedger::new(store.clone(), &config.progression));
        let grants = Arc::new(GrantReconciler::new(gate.clone(), store.clone()));
        let closer = Arc::new(EngagementCloser::new(
            gate.clone(),
            store.clone(),
            ledger.clone(),
        ));
        let commands = Arc::new(Commands::new(
            gate.clone(),
            ledger.clone(),
            closer.clone(),
            config.engagement.clone(),
        ));
        let chain = HandlerChain::new()
            .with(VerificationHandler::new(
                gate.clone(),
                ledger.clone(),
                &config.engagement.verification_marker,
            ))
            .with(ActivityHandler::new(gate.clone(), ledger.clone()))
            .with(XpHandler::new(gate.clone(), ledger.clone()));
        Self {
            config,
            store,
            gate,
            ledger,
            grants,
            closer,
            commands,
            chain,
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<dyn PlatformGate> {
        &self.gate
    }

    pub fn ledger(&self) -> &Arc<ProgressionLedger> {
        &self.ledger
    }

    pub fn commands(&self) -> &Arc<Commands> {
        &self.commands
    }

    /// A scheduler over this runtime's reconcilers, using the configured interval.
    pub fn scheduler(&self) -> ReconciliationScheduler {
        ReconciliationScheduler::new(
            self.store.clone(),
            self.grants.clone(),
            self.closer.clone(),
        )
        .with_interval(Duration::from_secs(self.config.scheduler.sweep_interval_secs))
    }

    /// Handle one event through the whole chain.
    pub async fn dispatch(&self, event: &CommunityEvent) -> usize {
        self.chain.dispatch(event).await
    }

    /// Process events one at a time until the sender side closes or
    /// `cancel` fires. Returns how many events were handled.
    pub async fn run_events(
        &self,
        mut events: mpsc::Receiver<CommunityEvent>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut handled = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        debug!("event queue closed");
                        break;
                    };
                    self.chain.dispatch(&event).await;
                    handled += 1;
                }
            }
        }
        info!(handled, "event loop stopped");
        handled
    }
}
