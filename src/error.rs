//! Gateway error taxonomy
//!
//! Every failure a caller can see is one of four kinds. `GatewayError::from`
//! is the single place library failures are sorted into those kinds.

use std::fmt;
use std::time::Duration;

use crate::SqlGateError;

pub const INVALID_API_KEY: &str = "Invalid API key";
pub const RATE_LIMIT_EXCEEDED: &str =
    "Rate limit exceeded. Please try again later or contact your administrator.";
const DATABASE_ERROR_PREFIX: &str = "Database error";
const UNEXPECTED_ERROR_PREFIX: &str = "Unexpected error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    Unauthorized,
    RateLimited,
    DatabaseFailure,
    UnexpectedFailure,
}

impl GatewayErrorKind {
    /// HTTP status for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayErrorKind::Unauthorized => 401,
            GatewayErrorKind::RateLimited => 429,
            GatewayErrorKind::DatabaseFailure => 500,
            GatewayErrorKind::UnexpectedFailure => 500,
        }
    }
}

/// How much failure detail reaches the caller. The log always gets all of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ErrorExposure {
    /// Driver text is returned verbatim
    #[default]
    Full,
    /// Only the kind's fixed prefix is returned
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        GatewayError {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(GatewayErrorKind::Unauthorized, INVALID_API_KEY)
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        GatewayError {
            retry_after: Some(retry_after),
            ..Self::new(GatewayErrorKind::RateLimited, RATE_LIMIT_EXCEEDED)
        }
    }

    pub fn database(detail: impl fmt::Display) -> Self {
        Self::new(
            GatewayErrorKind::DatabaseFailure,
            format!("{}: {}", DATABASE_ERROR_PREFIX, detail),
        )
    }

    pub fn unexpected(detail: impl fmt::Display) -> Self {
        Self::new(
            GatewayErrorKind::UnexpectedFailure,
            format!("{}: {}", UNEXPECTED_ERROR_PREFIX, detail),
        )
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Apply the exposure level to the caller-facing message
    pub fn exposed(self, exposure: ErrorExposure) -> Self {
        match (exposure, self.kind) {
            (ErrorExposure::Full, _) => self,
            (ErrorExposure::Generic, GatewayErrorKind::DatabaseFailure) => {
                Self::new(self.kind, DATABASE_ERROR_PREFIX)
            }
            (ErrorExposure::Generic, GatewayErrorKind::UnexpectedFailure) => {
                Self::new(self.kind, UNEXPECTED_ERROR_PREFIX)
            }
            (ErrorExposure::Generic, _) => self,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Sort a library failure into its kind. With `prefixed` off the message is
    /// the bare failure text, as the JSON-body endpoint reports it.
    pub fn classify(err: SqlGateError, prefixed: bool) -> Self {
        match (err.is_database_failure(), prefixed) {
            (true, true) => GatewayError::database(err),
            (false, true) => GatewayError::unexpected(err),
            (true, false) => Self::new(GatewayErrorKind::DatabaseFailure, err.to_string()),
            (false, false) => Self::new(GatewayErrorKind::UnexpectedFailure, err.to_string()),
        }
    }
}

impl From<SqlGateError> for GatewayError {
    fn from(err: SqlGateError) -> Self {
        GatewayError::classify(err, true)
    }
}
