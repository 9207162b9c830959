//! Credential issuing for resolution requests
//!
//! Signs a bearer token bound to a fixed principal identity with HS256.
//! The token carries a single `user` claim and no expiry; expiry policy
//! belongs to the service validating the token, not to this adapter.

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::types::{LatchkeyError, Result};

/// Payload stored in the issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identity the token is bound to
    pub user: String,
}

/// A signed bearer credential for a fixed principal.
#[derive(Debug, Clone)]
pub struct Credential(String);

impl Credential {
    /// The raw compact token.
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

/// Token issuer bound to a signing secret and a principal identity.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    principal: String,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &"<redacted>")
            .field("principal", &self.principal)
            .finish()
    }
}

impl TokenIssuer {
    /// Create a new issuer.
    ///
    /// Fails with a configuration error when the signing secret is absent or
    /// empty. This is checked before any network activity happens.
    pub fn new(secret: Option<&str>, principal: &str) -> Result<Self> {
        let secret = match secret {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                return Err(LatchkeyError::Config(
                    "signing secret (GATEWAY_KEY) is required".into(),
                ))
            }
        };

        Ok(Self {
            secret,
            principal: principal.to_string(),
        })
    }

    /// Sign a token for the fixed principal. Pure with respect to the secret.
    pub fn issue(&self) -> Result<Credential> {
        let claims = Claims {
            user: self.principal.clone(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| LatchkeyError::Config(format!("Failed to sign token: {}", e)))?;

        Ok(Credential(token))
    }
}
