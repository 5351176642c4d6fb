//! Shared-secret credential check

use std::fmt;
use subtle::ConstantTimeEq;

use crate::{Result, SqlGateError};

/// The process-wide API secret, loaded once at startup
#[derive(Clone)]
pub struct Credentials {
    secret: String,
}

impl Credentials {
    /// Fails on an empty secret so a misconfigured gateway never starts open.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SqlGateError::Config("API key must not be empty".to_string()));
        }
        Ok(Credentials { secret })
    }

    /// Compare a presented key against the secret
    pub fn verify(&self, presented: &str) -> bool {
        self.secret.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("secret", &"<redacted>").finish()
    }
}
