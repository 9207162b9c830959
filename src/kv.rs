//! The key/value capability surface
//!
//! This is the interface callers ultimately receive from the loader. The
//! backing data structure lives inside the remote container; this crate only
//! defines the surface and hands out live handles to it.

use async_trait::async_trait;
use std::sync::Arc;

/// A live handle on a container-hosted key/value store.
///
/// Implementations are expected to proxy each operation to the container;
/// transient transport failures surface as misses rather than errors.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Look up a key. `None` when absent.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Set a key to a value.
    async fn set(&self, key: &str, value: serde_json::Value);

    /// Delete a key. Returns whether the key existed.
    async fn delete(&self, key: &str) -> bool;

    /// Snapshot of all entries.
    async fn entries(&self) -> Vec<(String, serde_json::Value)>;
}

/// The discovered capability handed to callers. Shared and cheaply cloneable;
/// every caller of the loader observes the identical instance.
pub type Capability = Arc<dyn KeyValue>;
