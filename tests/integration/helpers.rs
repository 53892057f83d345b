//! Shared helpers for integration tests.

use std::sync::Arc;

use warden::config::WardenConfig;
use warden::events::CommunityEvent;
use warden::ids::{ChannelId, CommunityId, MemberId, MessageId};
use warden::platform::memory::MemoryPlatform;
use warden::runtime::Runtime;

pub(crate) const COMMUNITY: CommunityId = CommunityId(1);
pub(crate) const CHANNEL: ChannelId = ChannelId(5);
pub(crate) const BOT: MemberId = MemberId(99);
pub(crate) const MODERATOR: MemberId = MemberId(3);

/// A runtime over an on-disk store and an in-memory platform.
pub(crate) struct Harness {
    pub gate: Arc<MemoryPlatform>,
    pub runtime: Runtime,
    pub config: WardenConfig,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Rebuild the runtime over the same database file, as after a restart.
    pub(crate) fn restart(self) -> Self {
        let Harness {
            gate, config, dir, runtime,
        } = self;
        drop(runtime);
        let runtime = Runtime::open(config.clone(), gate.clone()).expect("reopen runtime");
        Harness {
            gate,
            runtime,
            config,
            dir,
        }
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(WardenConfig::default())
}

pub(crate) fn harness_with(mut config: WardenConfig) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    config.store.path = dir.path().join("warden.db");
    let gate = Arc::new(MemoryPlatform::new(BOT));
    gate.seed_community(COMMUNITY, "Test Community");
    let runtime = Runtime::open(config.clone(), gate.clone()).expect("open runtime");
    Harness {
        gate,
        runtime,
        config,
        dir,
    }
}

pub(crate) fn message_from(author: MemberId, id: u64) -> CommunityEvent {
    CommunityEvent::MessageCreated {
        community: COMMUNITY,
        channel: CHANNEL,
        message: MessageId(id),
        author,
        content: "hello".to_owned(),
    }
}
