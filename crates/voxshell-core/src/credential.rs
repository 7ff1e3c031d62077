//! Upstream API credential.
//!
//! Loaded once at startup and held for the life of the process. The value is
//! redacted from `Debug` output and the variable it came from is scrubbed from
//! every spawned tool subprocess.

use std::fmt;

use crate::error::ConfigError;

/// Environment variable holding the upstream bearer token.
pub const CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read [`CREDENTIAL_ENV`]. Empty counts as missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        match lookup(CREDENTIAL_ENV) {
            Some(secret) if !secret.trim().is_empty() => Ok(Self::new(secret)),
            _ => Err(ConfigError::MissingCredential(CREDENTIAL_ENV)),
        }
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
