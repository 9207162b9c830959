//! Capability attachment state machine
//!
//! The heart of the loader: issues capability-discovery requests against the
//! open container and publishes the discovered capability through the
//! write-once handle cell.
//!
//! States: `Idle -> Requesting -> {Delivered, Skipped}`, re-entrant. The
//! first attempt fires when the attacher is spawned; every context-change
//! notification after that starts a fresh attempt regardless of prior
//! terminal state. Attempts are not coalesced: overlapping attempts are
//! independent and harmless because delivery is idempotent and write-once.
//!
//! An unsuccessful or ill-typed discovery response is not an error. It means
//! "capability not yet available in this epoch"; the next notification gives
//! another opportunity. Transport failures during an attempt are absorbed
//! the same way.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::handle::HandleCell;
use crate::kv::Capability;
use crate::session::{ContainerSession, SessionResponse};

/// Root sub-path requested on every discovery attempt.
pub const DEFAULT_ROOT_PATH: &str = "/";

/// Attempt states. `Skipped` and `Delivered` are terminal for one attempt
/// only; a context change restarts at `Requesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Idle,
    Requesting,
    Skipped,
    Delivered,
}

/// Pure transition from a discovery response to the attempt's terminal state
/// and its effect (the capability to publish, if any).
pub fn evaluate(response: &SessionResponse) -> (AttachState, Option<Capability>) {
    if !response.is_component() {
        return (AttachState::Skipped, None);
    }
    (AttachState::Delivered, response.value.clone())
}

/// Drives discovery attempts for the lifetime of a session.
pub struct CapabilityAttacher;

impl CapabilityAttacher {
    /// Start the attacher: one immediate attempt, then one fresh attempt per
    /// context-change notification, forever. Never returns errors; nothing
    /// here can fail the handle cell.
    pub fn spawn(
        session: Arc<dyn ContainerSession>,
        handle: Arc<HandleCell>,
        root_path: impl Into<String>,
    ) {
        let root_path = root_path.into();
        let mut changes = session.context_changes();

        tokio::spawn(attempt(
            Arc::clone(&session),
            Arc::clone(&handle),
            root_path.clone(),
        ));

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) => {}
                    // A lag means at least one change was missed, which is
                    // still a reason to attempt.
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Change notifications lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Change notification stream closed");
                        break;
                    }
                }
                debug!("Context changed, re-attaching");
                tokio::spawn(attempt(
                    Arc::clone(&session),
                    Arc::clone(&handle),
                    root_path.clone(),
                ));
            }
        });
    }
}

/// One discovery attempt: `Requesting` through to `Skipped` or `Delivered`.
/// Returns `Idle` when the request itself failed and the attempt is back to
/// waiting for the next context change.
async fn attempt(
    session: Arc<dyn ContainerSession>,
    handle: Arc<HandleCell>,
    root_path: String,
) -> AttachState {
    let state = AttachState::Requesting;
    debug!(?state, path = %root_path, "Discovery attempt");

    let response = match session.request(&root_path).await {
        Ok(response) => response,
        Err(e) => {
            debug!("Discovery request failed, awaiting next context change: {}", e);
            return AttachState::Idle;
        }
    };

    let (state, capability) = evaluate(&response);
    match (state, capability) {
        (AttachState::Delivered, Some(capability)) => {
            if handle.fulfill(capability) {
                info!("Resolved key-value component");
            } else {
                debug!("Capability already delivered, discarding");
            }
        }
        _ => {
            debug!(
                status = response.status,
                content_kind = %response.content_kind,
                "Capability not yet available"
            );
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KeyValue;
    use crate::session::CONTENT_KIND_COMPONENT;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, Mutex};

    struct Tagged(&'static str);

    #[async_trait]
    impl KeyValue for Tagged {
        async fn get(&self, _key: &str) -> Option<serde_json::Value> {
            Some(serde_json::json!(self.0))
        }
        async fn set(&self, _key: &str, _value: serde_json::Value) {}
        async fn delete(&self, _key: &str) -> bool {
            false
        }
        async fn entries(&self) -> Vec<(String, serde_json::Value)> {
            Vec::new()
        }
    }

    fn component(capability: &Capability) -> SessionResponse {
        SessionResponse {
            status: 200,
            content_kind: CONTENT_KIND_COMPONENT.into(),
            value: Some(Arc::clone(capability)),
        }
    }

    fn not_found() -> SessionResponse {
        SessionResponse {
            status: 404,
            content_kind: String::new(),
            value: None,
        }
    }

    fn wrong_kind(capability: &Capability) -> SessionResponse {
        SessionResponse {
            status: 200,
            content_kind: "text/plain".into(),
            value: Some(Arc::clone(capability)),
        }
    }

    /// Session serving a scripted sequence of responses; the last response
    /// repeats once the script runs out.
    #[derive(Debug)]
    struct ScriptedSession {
        script: Mutex<VecDeque<SessionResponse>>,
        fallback: SessionResponse,
        changes: broadcast::Sender<()>,
    }

    impl ScriptedSession {
        fn new(script: Vec<SessionResponse>, fallback: SessionResponse) -> Arc<Self> {
            let (changes, _) = broadcast::channel(16);
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                changes,
            })
        }

        fn notify(&self) {
            let _ = self.changes.send(());
        }
    }

    #[async_trait]
    impl ContainerSession for ScriptedSession {
        async fn request(&self, _path: &str) -> crate::types::Result<SessionResponse> {
            let mut script = self.script.lock().await;
            Ok(script.pop_front().unwrap_or_else(|| self.fallback.clone()))
        }
        fn context_changes(&self) -> broadcast::Receiver<()> {
            self.changes.subscribe()
        }
    }

    #[test]
    fn test_evaluate_transitions() {
        let capability: Capability = Arc::new(Tagged("kv1"));

        let (state, effect) = evaluate(&component(&capability));
        assert_eq!(state, AttachState::Delivered);
        assert!(Arc::ptr_eq(&effect.unwrap(), &capability));

        let (state, effect) = evaluate(&not_found());
        assert_eq!(state, AttachState::Skipped);
        assert!(effect.is_none());

        let (state, effect) = evaluate(&wrong_kind(&capability));
        assert_eq!(state, AttachState::Skipped);
        assert!(effect.is_none());

        // Component kind and status but no key/value surface.
        let (state, _) = evaluate(&SessionResponse {
            status: 200,
            content_kind: CONTENT_KIND_COMPONENT.into(),
            value: None,
        });
        assert_eq!(state, AttachState::Skipped);
    }

    #[tokio::test]
    async fn test_first_valid_response_delivers() {
        let kv1: Capability = Arc::new(Tagged("kv1"));
        let session = ScriptedSession::new(vec![component(&kv1)], not_found());
        let handle = Arc::new(HandleCell::new());

        CapabilityAttacher::spawn(session.clone(), Arc::clone(&handle), DEFAULT_ROOT_PATH);

        let delivered = handle.wait().await;
        assert!(Arc::ptr_eq(&delivered, &kv1));

        // Later notifications yield 404s; the handle must not change.
        session.notify();
        session.notify();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(Arc::ptr_eq(&handle.wait().await, &kv1));
    }

    #[tokio::test]
    async fn test_invalid_responses_then_valid_delivers_late() {
        let kv1: Capability = Arc::new(Tagged("kv1"));
        let session = ScriptedSession::new(
            vec![not_found(), wrong_kind(&kv1), component(&kv1)],
            not_found(),
        );
        let handle = Arc::new(HandleCell::new());

        CapabilityAttacher::spawn(session.clone(), Arc::clone(&handle), DEFAULT_ROOT_PATH);

        // First attempt consumed the 404; nothing delivered yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_fulfilled());

        // Second attempt sees the wrong content kind.
        session.notify();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_fulfilled());

        // Third attempt discovers the component.
        session.notify();
        let delivered = handle.wait().await;
        assert!(Arc::ptr_eq(&delivered, &kv1));
    }

    #[tokio::test]
    async fn test_later_epochs_never_swap_the_handle() {
        let kv1: Capability = Arc::new(Tagged("kv1"));
        let kv2: Capability = Arc::new(Tagged("kv2"));
        let session = ScriptedSession::new(vec![component(&kv1)], component(&kv2));
        let handle = Arc::new(HandleCell::new());

        CapabilityAttacher::spawn(session.clone(), Arc::clone(&handle), DEFAULT_ROOT_PATH);
        let first = handle.wait().await;
        assert!(Arc::ptr_eq(&first, &kv1));

        // Every later epoch discovers a different in-memory instance; all of
        // them must be discarded.
        for _ in 0..5 {
            session.notify();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(Arc::ptr_eq(&handle.wait().await, &kv1));
    }

    #[tokio::test]
    async fn test_at_most_one_delivery_across_concurrent_notifications() {
        let kv1: Capability = Arc::new(Tagged("kv1"));
        let session = ScriptedSession::new(Vec::new(), component(&kv1));
        let handle = Arc::new(HandleCell::new());

        CapabilityAttacher::spawn(session.clone(), Arc::clone(&handle), DEFAULT_ROOT_PATH);

        // A burst of notifications; every attempt finds a valid component,
        // only the first successful publish may win.
        for _ in 0..20 {
            session.notify();
        }

        let delivered = handle.wait().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(Arc::ptr_eq(&delivered, &handle.wait().await));
    }

    #[tokio::test]
    async fn test_attempt_terminal_states() {
        let kv1: Capability = Arc::new(Tagged("kv1"));
        let session = ScriptedSession::new(vec![not_found(), component(&kv1)], not_found());
        let handle = Arc::new(HandleCell::new());

        let first = attempt(session.clone(), Arc::clone(&handle), "/".into()).await;
        assert_eq!(first, AttachState::Skipped);
        assert!(!handle.is_fulfilled());

        let second = attempt(session.clone(), Arc::clone(&handle), "/".into()).await;
        assert_eq!(second, AttachState::Delivered);
        assert!(handle.is_fulfilled());

        // Fulfilled cell, exhausted script: further attempts skip.
        let third = attempt(session, Arc::clone(&handle), "/".into()).await;
        assert_eq!(third, AttachState::Skipped);
    }

    #[tokio::test]
    async fn test_attempt_returns_to_idle_on_request_failure() {
        #[derive(Debug)]
        struct BrokenSession {
            changes: broadcast::Sender<()>,
        }

        #[async_trait]
        impl ContainerSession for BrokenSession {
            async fn request(&self, _path: &str) -> crate::types::Result<SessionResponse> {
                Err(crate::types::LatchkeyError::Transport("connection reset".into()))
            }
            fn context_changes(&self) -> broadcast::Receiver<()> {
                self.changes.subscribe()
            }
        }

        let (changes, _) = broadcast::channel(4);
        let session = Arc::new(BrokenSession { changes });
        let handle = Arc::new(HandleCell::new());

        let state = attempt(session, Arc::clone(&handle), "/".into()).await;
        assert_eq!(state, AttachState::Idle);
        assert!(!handle.is_fulfilled());
    }

    #[tokio::test]
    async fn test_transport_errors_are_absorbed() {
        #[derive(Debug)]
        struct FailingSession {
            changes: broadcast::Sender<()>,
        }

        #[async_trait]
        impl ContainerSession for FailingSession {
            async fn request(&self, _path: &str) -> crate::types::Result<SessionResponse> {
                Err(crate::types::LatchkeyError::Transport("connection reset".into()))
            }
            fn context_changes(&self) -> broadcast::Receiver<()> {
                self.changes.subscribe()
            }
        }

        let (changes, _) = broadcast::channel(4);
        let session = Arc::new(FailingSession { changes });
        let handle = Arc::new(HandleCell::new());

        CapabilityAttacher::spawn(session.clone(), Arc::clone(&handle), DEFAULT_ROOT_PATH);
        let _ = session.changes.send(());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_fulfilled());
    }
}
