pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod query;
pub mod rate_limit;
pub mod session;
pub mod types;

use std::time::Duration;
use thiserror::Error;

pub use error::{ErrorExposure, GatewayError, GatewayErrorKind};
pub use gateway::{EntryPoint, Gateway, GatewayBuilder, QueryRequest};
pub use types::QueryResult;

#[derive(Error, Debug)]
pub enum SqlGateError {
    #[error("{}", types::pg_error_message(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    #[error("connection pool is closed")]
    PoolClosed,

    /// Failure reported by a backend that does not speak through `tokio-postgres`.
    #[error("{0}")]
    Backend(String),

    #[error("cannot convert value of column \"{column}\": {message}")]
    Conversion { column: String, message: String },

    #[error("query text is empty")]
    EmptyQuery,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SqlGateError>;

impl SqlGateError {
    /// True when the failure originated in the database or the connection layer.
    pub fn is_database_failure(&self) -> bool {
        matches!(
            self,
            SqlGateError::Postgres(_)
                | SqlGateError::PoolTimeout(_)
                | SqlGateError::PoolClosed
                | SqlGateError::Backend(_)
        )
    }
}
