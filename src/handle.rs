//! Write-once handle publishing
//!
//! The attacher may attempt discovery many times across epochs, but callers
//! must see at most one capability for the lifetime of a loader instance.
//! This cell is the single piece of shared mutable state in the crate: a
//! two-state slot (pending / fulfilled) with a compare-and-set style publish.
//! Racing deliveries are safe, the first write wins and later writes are
//! no-ops.

use tokio::sync::watch;

use crate::kv::Capability;

/// Single-assignment cell callers await the capability through.
pub struct HandleCell {
    slot: watch::Sender<Option<Capability>>,
}

impl HandleCell {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Publish a capability. Returns whether this call won the slot; once
    /// fulfilled the cell never resets and later capabilities are discarded.
    pub fn fulfill(&self, capability: Capability) -> bool {
        let mut capability = Some(capability);
        self.slot.send_if_modified(|current| {
            if current.is_none() {
                *current = capability.take();
                true
            } else {
                false
            }
        })
    }

    /// Whether a capability has been delivered.
    pub fn is_fulfilled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Await the capability.
    ///
    /// Callable any number of times, before or after fulfillment; every call
    /// resolves to the identical instance. No timeout or cancellation is
    /// imposed here.
    pub async fn wait(&self) -> Capability {
        let mut rx = self.slot.subscribe();
        let guard = rx
            .wait_for(|slot| slot.is_some())
            .await
            // The sender lives on self, which the caller borrows.
            .expect("handle cell sender dropped while awaited");
        guard.clone().expect("slot checked above")
    }
}

impl Default for HandleCell {
    fn default() -> Self {
        Self::new()
    }
}
