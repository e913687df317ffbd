//! Authentication module
//!
//! Provides credentials and the UH-V1 request signing scheme.
//!
//! # Design
//!
//! Uses a trait-based approach for credential sources:
//! - `CredentialsProvider` trait defines the interface
//! - `ConfigCredentials` reads the configuration store (with environment overrides)
//! - `StaticCredentials` holds a fixed pair
//!
//! Providers are asked for credentials on every signed request, so nothing
//! derived from the secret outlives a single call.
//!
//! # Example
//!
//! ```
//! use uhu::auth::{CredentialsProvider, StaticCredentials};
//!
//! let provider = StaticCredentials::new("access-id", "secret");
//! let creds = provider.credentials().unwrap();
//! assert_eq!(creds.access_id(), "access-id");
//! assert_eq!(creds.secret(), "secret");
//! ```

use crate::config::Config;
use std::fmt;
use thiserror::Error;

pub mod canonical;
pub mod signature;

pub use canonical::{canonical_query, sha256_hex, HeaderValue, InvalidUrl, Request, RequestBuilder};
pub use signature::{canonical_json, sign_dict, Signature};

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Access id and secret used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_id: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            secret: secret.into(),
        }
    }

    /// Build credentials from optional parts. Empty values count as absent.
    pub fn from_parts(
        access_id: Option<String>,
        secret: Option<String>,
    ) -> Result<Self, CredentialsError> {
        let access_id = access_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials("access id not set".into()))?;
        let secret = secret
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials("access secret not set".into()))?;

        Ok(Self::new(access_id, secret))
    }

    /// Get the access id
    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    /// Get the secret
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Trait for credential providers
///
/// Implementations must be re-entrant: concurrent upload workers fetch
/// credentials independently.
pub trait CredentialsProvider: Send + Sync {
    /// Fetch the current credentials
    fn credentials(&self) -> Result<Credentials, CredentialsError>;
}

/// Static credentials provider
///
/// Holds credentials directly. Useful for testing or embedding.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a new static credentials provider
    pub fn new(access_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(access_id, secret),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn credentials(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}

/// Configuration-backed credentials provider
///
/// Reads `auth.access_id` / `auth.access_secret` from the in-memory
/// configuration, with `UHU_ACCESS_ID` / `UHU_ACCESS_SECRET` taking
/// precedence. The environment is consulted on every call.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    config: Config,
}

impl ConfigCredentials {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl CredentialsProvider for ConfigCredentials {
    fn credentials(&self) -> Result<Credentials, CredentialsError> {
        self.config.credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_creation() {
        let creds = Credentials::new("access", "secret");
        assert_eq!(creds.access_id(), "access");
        assert_eq!(creds.secret(), "secret");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("access", "very-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("access"));
        assert!(!debug.contains("very-secret"));
    }

    #[test]
    fn test_from_parts_missing_access_id() {
        let result = Credentials::from_parts(None, Some("secret".into()));
        assert!(matches!(result, Err(CredentialsError::MissingCredentials(_))));
    }

    #[test]
    fn test_from_parts_empty_secret() {
        let result = Credentials::from_parts(Some("access".into()), Some("  ".into()));
        assert!(matches!(result, Err(CredentialsError::MissingCredentials(_))));
    }

    #[test]
    fn test_static_credentials() {
        let provider = StaticCredentials::new("static-access", "static-secret");
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.access_id(), "static-access");
        assert_eq!(creds.secret(), "static-secret");
    }
}
