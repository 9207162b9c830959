//! Resolution client
//!
//! Maps a logical document locator to a resolved, transport-specific address
//! by calling the resolution service over HTTP with a bearer credential.
//! Any failure here is fatal to the load call; there is no internal retry.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::auth::Credential;
use crate::types::{LatchkeyError, Result};

/// Read-only document scope requested for every resolution.
pub const SCOPE_DOC_READ: &str = "doc:read";

/// Path of the load endpoint under the resolution base URL.
const LOAD_PATH: &str = "/api/v1/load";

/// Transport-specific addressing data for a locator.
///
/// Treated as immutable once obtained; a new resolved address requires a new
/// load cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedUrl {
    /// Which transport family can open this address (e.g. "storage",
    /// "ordering").
    pub transport: String,
    /// Transport-specific endpoint (e.g. a wss:// URL).
    pub endpoint: String,
    /// Opaque per-service tokens, passed through to the transport.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Request body for the load endpoint.
#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    scopes: &'a [&'a str],
    url: &'a str,
}

/// HTTP client for the resolution service.
#[derive(Clone)]
pub struct ResolutionClient {
    client: Client,
    base_url: String,
}

impl ResolutionClient {
    /// Create a client for the given resolution base URL (scheme + host).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn load_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), LOAD_PATH)
    }

    /// Resolve a locator to a transport address.
    ///
    /// Sends the credential as a bearer header and the locator plus requested
    /// scopes as the body. Blocks the calling task until the remote responds.
    /// Non-success statuses and malformed payloads fail with a resolution
    /// error.
    pub async fn resolve(
        &self,
        locator: &str,
        credential: &Credential,
        scopes: &[&str],
    ) -> Result<ResolvedUrl> {
        let url = self.load_url();
        debug!(%url, %locator, "Resolving document locator");

        let response = self
            .client
            .post(&url)
            .header("Authorization", credential.bearer())
            .json(&LoadRequest {
                scopes,
                url: locator,
            })
            .send()
            .await
            .map_err(|e| LatchkeyError::Resolution(format!("Resolution request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LatchkeyError::Resolution(format!(
                "Resolution service returned {} for {}",
                status, locator
            )));
        }

        let resolved = response
            .json::<ResolvedUrl>()
            .await
            .map_err(|e| LatchkeyError::Resolution(format!("Unusable resolution payload: {}", e)))?;

        debug!(
            transport = %resolved.transport,
            endpoint = %resolved.endpoint,
            "Locator resolved"
        );
        Ok(resolved)
    }
}
