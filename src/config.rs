//! Configuration for Latchkey
//!
//! CLI arguments and environment variable handling using clap. Configuration
//! is threaded explicitly into each component at construction; nothing reads
//! process-wide state after parse time.

use clap::Parser;
use std::time::Duration;

use crate::types::{LatchkeyError, Result};

/// Latchkey - key/value capability loader for collaborative containers
#[derive(Parser, Debug, Clone)]
#[command(name = "latchkey")]
#[command(about = "Loads a live key/value capability from a collaborative container")]
pub struct Config {
    /// Locator of the document whose container hosts the key/value component
    #[arg(long, env = "DOCUMENT_URL")]
    pub document_url: String,

    /// Secret used to sign the bearer token for resolution requests
    /// (required)
    #[arg(long, env = "GATEWAY_KEY")]
    pub gateway_key: Option<String>,

    /// Externally reachable URL of this host, advertised to the container
    /// runtime as the connection origin
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:8080")]
    pub gateway_url: String,

    /// Resolution service base URL override
    /// If unset, derived from the document URL's scheme and host
    #[arg(long, env = "RESOLUTION_URL")]
    pub resolution_url: Option<String>,

    /// Principal identity the bearer token is bound to
    #[arg(long, env = "PRINCIPAL", default_value = "gateway")]
    pub principal: String,

    /// Bounded wait for opening the container session, in milliseconds
    #[arg(long, env = "SESSION_TIMEOUT_MS", default_value = "60000")]
    pub session_timeout_ms: u64,

    /// Client name advertised to the container runtime
    #[arg(long, env = "CLIENT_NAME", default_value = "latchkey")]
    pub client_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Resolution service base URL: the explicit override when set,
    /// otherwise the document URL's scheme and host.
    pub fn resolution_base(&self) -> Result<String> {
        if let Some(url) = &self.resolution_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let (scheme, rest) = self.document_url.split_once("//").ok_or_else(|| {
            LatchkeyError::Config(format!(
                "cannot derive resolution base from document URL '{}'",
                self.document_url
            ))
        })?;
        let host = rest.split('/').next().filter(|h| !h.is_empty()).ok_or_else(|| {
            LatchkeyError::Config(format!(
                "document URL '{}' has no host",
                self.document_url
            ))
        })?;

        Ok(format!("{}//{}", scheme, host))
    }

    /// Bounded wait for opening the container session.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.document_url.is_empty() {
            return Err(LatchkeyError::Config("DOCUMENT_URL is required".into()));
        }
        if self.gateway_key.as_deref().map_or(true, |k| k.is_empty()) {
            return Err(LatchkeyError::Config("GATEWAY_KEY is required".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(LatchkeyError::Config(
                "SESSION_TIMEOUT_MS must be greater than zero".into(),
            ));
        }
        self.resolution_base()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            document_url: "https://docs.example.com/doc/abc".into(),
            gateway_key: Some("test-signing-secret".into()),
            gateway_url: "http://localhost:8080".into(),
            resolution_url: None,
            principal: "gateway".into(),
            session_timeout_ms: 60_000,
            client_name: "latchkey".into(),
            log_level: "info".into(),
        }
    }

    #[test]
    fn test_resolution_base_derived_from_document_url() {
        let config = test_config();
        assert_eq!(
            config.resolution_base().unwrap(),
            "https://docs.example.com"
        );
    }

    #[test]
    fn test_resolution_base_override_wins() {
        let mut config = test_config();
        config.resolution_url = Some("https://resolver.example.com/".into());
        assert_eq!(
            config.resolution_base().unwrap(),
            "https://resolver.example.com"
        );
    }

    #[test]
    fn test_resolution_base_requires_host() {
        let mut config = test_config();
        config.document_url = "not-a-url".into();
        assert!(matches!(
            config.resolution_base().unwrap_err(),
            LatchkeyError::Config(_)
        ));
    }

    #[test]
    fn test_validate_requires_gateway_key() {
        let mut config = test_config();
        config.gateway_key = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            LatchkeyError::Config(_)
        ));

        config.gateway_key = Some(String::new());
        assert!(matches!(
            config.validate().unwrap_err(),
            LatchkeyError::Config(_)
        ));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(test_config().validate().is_ok());
    }
}
