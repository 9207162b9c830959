//! Container session surface
//!
//! A session is a live, long-running handle to a collaborative container's
//! runtime. It exposes two things this crate relies on: a request/response
//! surface over the container's component tree, and a context-change
//! notification stream that fires whenever the container reloads its
//! component tree (e.g. after a code upgrade).

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::kv::Capability;
use crate::types::Result;

/// Content kind a successful component discovery response must declare.
pub const CONTENT_KIND_COMPONENT: &str = "component";

/// Response to a component request against an open container.
#[derive(Clone)]
pub struct SessionResponse {
    /// HTTP-style status; 200 is success.
    pub status: u16,
    /// Declared content kind of the value.
    pub content_kind: String,
    /// The discovered capability, present only when the responding component
    /// exposes the key/value surface.
    pub value: Option<Capability>,
}

impl SessionResponse {
    /// Whether this response carries a usable key/value capability.
    pub fn is_component(&self) -> bool {
        self.status == 200 && self.content_kind == CONTENT_KIND_COMPONENT && self.value.is_some()
    }
}

impl std::fmt::Debug for SessionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResponse")
            .field("status", &self.status)
            .field("content_kind", &self.content_kind)
            .field("value", &self.value.as_ref().map(|_| "<capability>"))
            .finish()
    }
}

/// A live container session.
///
/// Opened by a transport factory, owned by the loader for the process
/// lifetime. There is no close operation; the session and its notification
/// subscription live until the hosting process terminates.
#[async_trait]
pub trait ContainerSession: Send + Sync + std::fmt::Debug {
    /// Issue a request for the component at `path` and await the response.
    ///
    /// No timeout is imposed here; the caller decides how long to wait.
    async fn request(&self, path: &str) -> Result<SessionResponse>;

    /// Subscribe to context-change notifications.
    ///
    /// No payload contract beyond "a context change occurred". Notifications
    /// arrive asynchronously and are not de-duplicated.
    fn context_changes(&self) -> broadcast::Receiver<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_component() {
        use crate::kv::KeyValue;
        use async_trait::async_trait;
        use std::sync::Arc;

        struct Noop;

        #[async_trait]
        impl KeyValue for Noop {
            async fn get(&self, _key: &str) -> Option<serde_json::Value> {
                None
            }
            async fn set(&self, _key: &str, _value: serde_json::Value) {}
            async fn delete(&self, _key: &str) -> bool {
                false
            }
            async fn entries(&self) -> Vec<(String, serde_json::Value)> {
                Vec::new()
            }
        }

        let ok = SessionResponse {
            status: 200,
            content_kind: CONTENT_KIND_COMPONENT.into(),
            value: Some(Arc::new(Noop)),
        };
        assert!(ok.is_component());

        let wrong_status = SessionResponse {
            status: 404,
            content_kind: CONTENT_KIND_COMPONENT.into(),
            value: Some(Arc::new(Noop)),
        };
        assert!(!wrong_status.is_component());

        let wrong_kind = SessionResponse {
            status: 200,
            content_kind: "text/plain".into(),
            value: Some(Arc::new(Noop)),
        };
        assert!(!wrong_kind.is_component());

        let no_surface = SessionResponse {
            status: 200,
            content_kind: CONTENT_KIND_COMPONENT.into(),
            value: None,
        };
        assert!(!no_surface.is_component());
    }
}
