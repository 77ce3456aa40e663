//! Service-account credential blobs.
//!
//! A credential is the JSON key document issued for an identity. It is kept
//! as an opaque string; only the identifying fields are parsed out.

use crate::core::error::PoolError;
use crate::core::redact;
use serde::Deserialize;
use std::fmt;

/// Opaque credential blob. `Debug` and `Display` print a fingerprint, never
/// the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        redact::credential_fingerprint(&self.0)
    }

    pub fn details(&self) -> Result<CredentialDetails, PoolError> {
        CredentialDetails::parse(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialDetails {
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
}

impl CredentialDetails {
    /// Parse the identifying fields. `project_id` and `client_email` are
    /// required; everything else may be empty.
    pub fn parse(blob: &str) -> Result<Self, PoolError> {
        let details: CredentialDetails = serde_json::from_str(blob)
            .map_err(|e| PoolError::CredentialParseFailed(format!("invalid JSON: {}", e)))?;
        if details.project_id.trim().is_empty() {
            return Err(PoolError::CredentialParseFailed(
                "missing project_id".to_string(),
            ));
        }
        if details.client_email.trim().is_empty() {
            return Err(PoolError::CredentialParseFailed(
                "missing client_email".to_string(),
            ));
        }
        Ok(details)
    }
}
