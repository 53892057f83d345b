//! Inbound community events and the handler chain that consumes them.
//!
//! The chain is composed once at startup and never mutated afterwards;
//! every event visits every handler in registration order.

pub mod handlers;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::ids::{ChannelId, CommunityId, MemberId, MessageId};

/// Platform events the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityEvent {
    MessageCreated {
        community: CommunityId,
        channel: ChannelId,
        message: MessageId,
        author: MemberId,
        content: String,
    },
    ResponseAdded {
        community: CommunityId,
        channel: ChannelId,
        message: MessageId,
        member: MemberId,
        marker: String,
    },
    ResponseRemoved {
        community: CommunityId,
        channel: ChannelId,
        message: MessageId,
        member: MemberId,
        marker: String,
    },
}

impl CommunityEvent {
    #[must_use]
    pub fn community(&self) -> CommunityId {
        match self {
            Self::MessageCreated { community, .. }
            | Self::ResponseAdded { community, .. }
            | Self::ResponseRemoved { community, .. } => *community,
        }
    }
}

/// One stage of the chain.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &CommunityEvent) -> Result<()>;
}

/// Ordered, immutable list of handlers.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler. A failing handler is logged and the rest still run.
    /// Returns the number of handlers that failed.
    pub async fn dispatch(&self, event: &CommunityEvent) -> usize {
        let mut failures = 0;
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                warn!(handler = handler.name(), community = %event.community(), "handler failed: {e}");
                failures += 1;
            }
        }
        failures
    }
}
