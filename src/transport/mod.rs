//! Transport registry
//!
//! The fixed, ordered set of backends able to open a live session against a
//! resolved address, plus the resolution cache the container-side URL
//! resolver reads from so a container re-requesting its own address does not
//! hit the network again.
//!
//! The composition is deterministic: one durable-storage-backed factory and
//! one realtime-ordering-backed factory, tried in that precedence order when
//! opening a session. Additional backends only need to satisfy
//! [`TransportFactory`]; nothing downstream of session open knows which
//! backend produced the session.

pub mod ordering;
pub mod socket;
pub mod storage;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::container::CachingUrlResolver;
use crate::resolution::ResolvedUrl;
use crate::session::ContainerSession;
use crate::types::Result;

pub use ordering::OrderingFactory;
pub use storage::DurableStorageFactory;

/// A pluggable backend that can open a session for a resolved address.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Stable identifier, matched against the resolved record's transport tag.
    fn id(&self) -> &str;

    /// Whether this factory can open a session for the given address.
    fn can_open(&self, resolved: &ResolvedUrl) -> bool {
        resolved.transport == self.id()
    }

    /// Open a live session. The resolver is handed to the session so that
    /// address re-resolution (e.g. on reconnect) goes through the cache.
    async fn open(
        &self,
        locator: &str,
        resolved: &ResolvedUrl,
        resolver: Arc<CachingUrlResolver>,
    ) -> Result<Arc<dyn ContainerSession>>;
}

/// Per-factory settings shared by the fixed composition.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Client name advertised to the container runtime on connect.
    pub client_name: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            client_name: "latchkey".into(),
        }
    }
}

/// Build the fixed factory list: durable storage first, realtime ordering
/// second.
pub fn build_factories(settings: &TransportSettings) -> Vec<Arc<dyn TransportFactory>> {
    vec![
        Arc::new(DurableStorageFactory::new(settings.clone())),
        Arc::new(OrderingFactory::new(settings.clone())),
    ]
}

/// Cache mapping locator to its resolved address.
///
/// Seeded once per load with the address obtained from the resolution
/// service; resolved addresses are immutable for the lifetime of a loader
/// instance.
#[derive(Default)]
pub struct ResolutionCache {
    entries: DashMap<String, ResolvedUrl>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the known address for a locator.
    pub fn seed(&self, locator: impl Into<String>, resolved: ResolvedUrl) {
        self.entries.insert(locator.into(), resolved);
    }

    /// Look up the cached address for a locator.
    pub fn lookup(&self, locator: &str) -> Option<ResolvedUrl> {
        self.entries.get(locator).map(|entry| entry.clone())
    }
}
