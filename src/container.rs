//! Container acquisition
//!
//! Assembles the host configuration (transport factories plus the
//! credential-bearing URL resolver) and opens the container session for a
//! resolved locator. Session open is the last fallible step of a load call;
//! afterwards everything is driven by the attacher.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::auth::Credential;
use crate::resolution::{ResolutionClient, ResolvedUrl, SCOPE_DOC_READ};
use crate::session::ContainerSession;
use crate::transport::{ResolutionCache, TransportFactory};
use crate::types::{LatchkeyError, Result};

/// Container-side URL resolver.
///
/// When the container re-requests its own address (e.g. after a reload), this
/// answers from the seeded cache and only falls back to the resolution
/// service on a miss, carrying the load-time credential.
pub struct CachingUrlResolver {
    client: ResolutionClient,
    credential: Credential,
    cache: ResolutionCache,
    gateway_url: String,
}

impl CachingUrlResolver {
    pub fn new(
        client: ResolutionClient,
        credential: Credential,
        cache: ResolutionCache,
        gateway_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credential,
            cache,
            gateway_url: gateway_url.into(),
        }
    }

    /// Externally reachable URL of the host, advertised to the container
    /// runtime as the connection origin.
    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    /// Resolve a locator, preferring the cache.
    pub async fn resolve(&self, locator: &str) -> Result<ResolvedUrl> {
        if let Some(hit) = self.cache.lookup(locator) {
            debug!(%locator, "Resolution cache hit");
            return Ok(hit);
        }

        let resolved = self
            .client
            .resolve(locator, &self.credential, &[SCOPE_DOC_READ])
            .await?;
        self.cache.seed(locator, resolved.clone());
        Ok(resolved)
    }
}

/// Host configuration handed to session open.
pub struct HostConfig {
    pub factories: Vec<Arc<dyn TransportFactory>>,
    pub resolver: Arc<CachingUrlResolver>,
}

/// Open the container session for a resolved locator.
///
/// Picks the first factory in precedence order that accepts the resolved
/// address. The whole open, including the container's acceptance of the
/// locator, is bounded by `wait_timeout`; rejection and expiry both fail with
/// a session-open error and are not retried here.
pub async fn open_session(
    locator: &str,
    resolved: &ResolvedUrl,
    host: &HostConfig,
    wait_timeout: Duration,
) -> Result<Arc<dyn ContainerSession>> {
    let factory = host
        .factories
        .iter()
        .find(|f| f.can_open(resolved))
        .ok_or_else(|| {
            LatchkeyError::SessionOpen(format!(
                "no transport factory for '{}'",
                resolved.transport
            ))
        })?;

    info!(
        transport = factory.id(),
        endpoint = %resolved.endpoint,
        %locator,
        "Opening container session"
    );

    match timeout(
        wait_timeout,
        factory.open(locator, resolved, Arc::clone(&host.resolver)),
    )
    .await
    {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(LatchkeyError::SessionOpen(msg))) => Err(LatchkeyError::SessionOpen(msg)),
        Ok(Err(e)) => Err(LatchkeyError::SessionOpen(e.to_string())),
        Err(_) => Err(LatchkeyError::SessionOpen(format!(
            "timed out opening session for {} after {:?}",
            locator, wait_timeout
        ))),
    }
}
