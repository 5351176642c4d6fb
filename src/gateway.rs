//! Request pipeline shared by every entry point
//!
//! credential check → rate check → connection → read-only transaction →
//! classify → execute → normalize or classify the failure.

use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::Credentials;
use crate::config::Config;
use crate::error::{ErrorExposure, GatewayError, GatewayErrorKind};
use crate::query::{PrefixClassifier, QueryExecutor, StatementClassifier};
use crate::rate_limit::{FixedWindowLimiter, RateDecision, RequestThrottle};
use crate::session::{BackendKind, ConnectionProvider, DirectConnector, PgPool};
use crate::types::QueryResult;
use crate::{Result, SqlGateError};

pub const QUERY_EXECUTED: &str = "Query executed successfully";
pub const NON_SELECT_EXECUTED: &str = "Non-select executed";

/// One inbound call, as validated by the surface in front of the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub sql: String,
    pub api_key: String,
    pub client_addr: String,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, api_key: impl Into<String>, client_addr: impl Into<String>) -> Self {
        QueryRequest {
            sql: sql.into(),
            api_key: api_key.into(),
            client_addr: client_addr.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Pooled backend, throttled
    ViaPool,
    /// Direct backend, throttled
    Direct,
    /// Direct backend, JSON body; throttling is a configuration choice
    Unthrottled,
}

impl EntryPoint {
    pub fn name(&self) -> &'static str {
        match self {
            EntryPoint::ViaPool => "sqlquery_pooled",
            EntryPoint::Direct => "sqlquery_direct",
            EntryPoint::Unthrottled => "sqlquery",
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            EntryPoint::ViaPool => BackendKind::Pooled,
            EntryPoint::Direct | EntryPoint::Unthrottled => BackendKind::Direct,
        }
    }

    /// Message returned for statements that produce no rows
    pub fn acknowledgement(&self) -> &'static str {
        match self {
            EntryPoint::ViaPool | EntryPoint::Direct => QUERY_EXECUTED,
            EntryPoint::Unthrottled => NON_SELECT_EXECUTED,
        }
    }

    /// Whether failure messages carry the `Database error: ` / `Unexpected
    /// error: ` prefix. The JSON-body endpoint reports the bare text.
    pub fn prefixes_failures(&self) -> bool {
        !matches!(self, EntryPoint::Unthrottled)
    }
}

/// Service context built once at startup and shared by every request
pub struct Gateway {
    credentials: Credentials,
    throttle: Arc<dyn RequestThrottle>,
    pooled: Arc<dyn ConnectionProvider>,
    direct: Arc<dyn ConnectionProvider>,
    classifier: Arc<dyn StatementClassifier>,
    executor: QueryExecutor,
    throttle_json_endpoint: bool,
    exposure: ErrorExposure,
    max_logged_query_chars: usize,
}

impl Gateway {
    pub fn builder(
        credentials: Credentials,
        pooled: Arc<dyn ConnectionProvider>,
        direct: Arc<dyn ConnectionProvider>,
    ) -> GatewayBuilder {
        GatewayBuilder::new(credentials, pooled, direct)
    }

    /// Wire up the Postgres backends and in-memory limiter from configuration.
    ///
    /// Returns the pool handle too so the caller can report its statistics.
    pub fn from_config(config: &Config) -> Result<(Self, Arc<PgPool>, Arc<FixedWindowLimiter>)> {
        config.validate()?;

        let pg_config = config.pg_config()?;
        let pool = Arc::new(PgPool::new(
            pg_config.clone(),
            config.pool_size,
            config.pool_timeout_duration(),
        ));
        let direct = Arc::new(DirectConnector::new(pg_config, !config.no_direct_session_read_only));
        let limiter = Arc::new(FixedWindowLimiter::new(config.rate_quota()?));

        let gateway = Gateway::builder(Credentials::new(config.api_key.clone())?, pool.clone(), direct)
            .throttle(limiter.clone())
            .throttle_json_endpoint(config.throttle_json_endpoint)
            .error_exposure(config.error_detail)
            .max_logged_query_chars(config.max_logged_query_chars)
            .build();

        Ok((gateway, pool, limiter))
    }

    /// `sqlQueryViaPool`
    pub async fn sql_query_via_pool(&self, request: &QueryRequest) -> std::result::Result<QueryResult, GatewayError> {
        self.handle(EntryPoint::ViaPool, request).await
    }

    /// `sqlQueryDirect`
    pub async fn sql_query_direct(&self, request: &QueryRequest) -> std::result::Result<QueryResult, GatewayError> {
        self.handle(EntryPoint::Direct, request).await
    }

    /// `sqlQueryUnthrottled`; the client address only matters when the JSON
    /// endpoint has been configured to be throttled
    pub async fn sql_query_unthrottled(&self, request: &QueryRequest) -> std::result::Result<QueryResult, GatewayError> {
        self.handle(EntryPoint::Unthrottled, request).await
    }

    pub fn is_throttled(&self, entry: EntryPoint) -> bool {
        match entry {
            EntryPoint::ViaPool | EntryPoint::Direct => true,
            EntryPoint::Unthrottled => self.throttle_json_endpoint,
        }
    }

    pub fn throttle(&self) -> &Arc<dyn RequestThrottle> {
        &self.throttle
    }

    pub async fn handle(&self, entry: EntryPoint, request: &QueryRequest) -> std::result::Result<QueryResult, GatewayError> {
        let request_id = Uuid::new_v4();
        let logged_sql = truncate_for_log(&request.sql, self.max_logged_query_chars);
        debug!(
            "[{}] {} request from {}: {}",
            request_id,
            entry.name(),
            request.client_addr,
            logged_sql
        );

        if !self.credentials.verify(&request.api_key) {
            warn!("[{}] {} rejected: invalid API key from {}", request_id, entry.name(), request.client_addr);
            return Err(GatewayError::unauthorized());
        }

        if self.is_throttled(entry) {
            if let RateDecision::Limited { retry_after } = self.throttle.check(entry.name(), &request.client_addr) {
                warn!(
                    "[{}] {} rate limited for {} (retry after {}s)",
                    request_id,
                    entry.name(),
                    request.client_addr,
                    retry_after.as_secs()
                );
                return Err(GatewayError::rate_limited(retry_after));
            }
        }

        match self.execute(entry, &request.sql).await {
            Ok(result) => {
                debug!(
                    "[{}] {} succeeded via {} backend, returned {} rows",
                    request_id,
                    entry.name(),
                    entry.backend(),
                    result.row_count()
                );
                Ok(result)
            }
            Err(e) => {
                let gateway_error = GatewayError::classify(e, entry.prefixes_failures());
                match gateway_error.kind {
                    GatewayErrorKind::DatabaseFailure => error!(
                        "[{}] {} database failure: {} (query: {})",
                        request_id, entry.name(), gateway_error.message, logged_sql
                    ),
                    _ => error!(
                        "[{}] {} unexpected failure: {} (query: {})",
                        request_id, entry.name(), gateway_error.message, logged_sql
                    ),
                }
                Err(gateway_error.exposed(self.exposure))
            }
        }
    }

    async fn execute(&self, entry: EntryPoint, sql: &str) -> Result<QueryResult> {
        if sql.trim().is_empty() {
            return Err(SqlGateError::EmptyQuery);
        }

        let provider = match entry.backend() {
            BackendKind::Pooled => &self.pooled,
            BackendKind::Direct => &self.direct,
        };

        let mut session = provider.acquire().await?;
        let kind = self.classifier.classify(sql);

        self.executor
            .run(session.as_mut(), sql, kind, entry.acknowledgement())
            .await
    }
}

/// Optional pieces of a `Gateway`, with the production defaults
pub struct GatewayBuilder {
    credentials: Credentials,
    pooled: Arc<dyn ConnectionProvider>,
    direct: Arc<dyn ConnectionProvider>,
    throttle: Option<Arc<dyn RequestThrottle>>,
    classifier: Arc<dyn StatementClassifier>,
    throttle_json_endpoint: bool,
    exposure: ErrorExposure,
    max_logged_query_chars: usize,
}

impl GatewayBuilder {
    pub fn new(
        credentials: Credentials,
        pooled: Arc<dyn ConnectionProvider>,
        direct: Arc<dyn ConnectionProvider>,
    ) -> Self {
        GatewayBuilder {
            credentials,
            pooled,
            direct,
            throttle: None,
            classifier: Arc::new(PrefixClassifier),
            throttle_json_endpoint: false,
            exposure: ErrorExposure::Full,
            max_logged_query_chars: 2000,
        }
    }

    pub fn throttle(mut self, throttle: Arc<dyn RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn StatementClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn throttle_json_endpoint(mut self, enabled: bool) -> Self {
        self.throttle_json_endpoint = enabled;
        self
    }

    pub fn error_exposure(mut self, exposure: ErrorExposure) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn max_logged_query_chars(mut self, chars: usize) -> Self {
        self.max_logged_query_chars = chars;
        self
    }

    pub fn build(self) -> Gateway {
        Gateway {
            credentials: self.credentials,
            throttle: self
                .throttle
                .unwrap_or_else(|| Arc::new(FixedWindowLimiter::new(Default::default()))),
            pooled: self.pooled,
            direct: self.direct,
            classifier: self.classifier,
            executor: QueryExecutor::new(),
            throttle_json_endpoint: self.throttle_json_endpoint,
            exposure: self.exposure,
            max_logged_query_chars: self.max_logged_query_chars,
        }
    }
}

/// Cut query text for logging on a char boundary
pub fn truncate_for_log(sql: &str, max_chars: usize) -> String {
    match sql.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}... ({} bytes total)", &sql[..byte_idx], sql.len()),
        None => sql.to_string(),
    }
}
