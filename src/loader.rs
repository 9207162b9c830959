//! Top-level loader
//!
//! Orchestrates one load cycle: issue a credential, resolve the locator,
//! seed the resolution cache, assemble the host configuration, open the
//! container session, and start the capability attacher. A load call either
//! yields a usable loader instance or fails fast with one of the three fatal
//! error kinds; once an instance exists, awaiting the capability either
//! succeeds eventually or waits forever.

use std::sync::Arc;
use tracing::info;

use crate::attach::{CapabilityAttacher, DEFAULT_ROOT_PATH};
use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::container::{open_session, CachingUrlResolver, HostConfig};
use crate::handle::HandleCell;
use crate::kv::Capability;
use crate::resolution::{ResolutionClient, SCOPE_DOC_READ};
use crate::session::ContainerSession;
use crate::transport::{build_factories, ResolutionCache, TransportSettings};
use crate::types::Result;

/// A live loader instance bound to one locator.
///
/// Holds the session and the write-once handle cell; the attacher runs in
/// the background for the lifetime of the session.
pub struct KeyValueLoader {
    locator: String,
    session: Arc<dyn ContainerSession>,
    handle: Arc<HandleCell>,
}

impl std::fmt::Debug for KeyValueLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueLoader")
            .field("locator", &self.locator)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl KeyValueLoader {
    /// Perform one full load cycle.
    ///
    /// Fails with `Config` before any network call when the signing secret
    /// is missing, with `Resolution` when the resolution service is
    /// unreachable or returns an unusable payload, and with `SessionOpen`
    /// when the container rejects the locator or the open times out. None of
    /// these are retried here; retry means a fresh load call.
    pub async fn load(config: &Config) -> Result<Self> {
        let locator = config.document_url.clone();
        info!("Loading key value cache from {}", locator);

        let issuer = TokenIssuer::new(config.gateway_key.as_deref(), &config.principal)?;
        let credential = issuer.issue()?;

        let client = ResolutionClient::new(config.resolution_base()?);
        let resolved = client
            .resolve(&locator, &credential, &[SCOPE_DOC_READ])
            .await?;

        let cache = ResolutionCache::new();
        cache.seed(locator.clone(), resolved.clone());
        let resolver = Arc::new(CachingUrlResolver::new(
            client,
            credential,
            cache,
            config.gateway_url.clone(),
        ));

        let host = HostConfig {
            factories: build_factories(&TransportSettings {
                client_name: config.client_name.clone(),
            }),
            resolver,
        };

        let session = open_session(&locator, &resolved, &host, config.session_timeout()).await?;
        info!("Loaded key value container from {}", locator);

        Ok(Self::attach(locator, session))
    }

    /// Attach to an already-open session. Used by embedders that manage
    /// container acquisition themselves.
    pub fn from_session(locator: impl Into<String>, session: Arc<dyn ContainerSession>) -> Self {
        Self::attach(locator.into(), session)
    }

    fn attach(locator: String, session: Arc<dyn ContainerSession>) -> Self {
        let handle = Arc::new(HandleCell::new());
        CapabilityAttacher::spawn(Arc::clone(&session), Arc::clone(&handle), DEFAULT_ROOT_PATH);
        Self {
            locator,
            session,
            handle,
        }
    }

    /// The locator this loader was created for.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// The underlying container session.
    pub fn session(&self) -> &Arc<dyn ContainerSession> {
        &self.session
    }

    /// Await the discovered key/value capability.
    ///
    /// Callable any number of times and from any number of callers; every
    /// call resolves to the identical instance once the first discovery
    /// succeeds. No timeout is imposed; a caller-side timeout, if desired,
    /// is the caller's responsibility.
    pub async fn key_value(&self) -> Capability {
        self.handle.wait().await
    }
}
