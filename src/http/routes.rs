//! Query and health endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::gateway::{EntryPoint, Gateway, QueryRequest};
use crate::types::QueryResult;

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Default, Deserialize)]
pub struct SqlQueryParams {
    #[serde(default)]
    pub sqlquery: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SqlQueryBody {
    #[serde(default)]
    pub sqlquery: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.retry_after;
        let mut response = (status, Json(ErrorBody { detail: self.message })).into_response();

        if let Some(retry_after) = retry_after {
            // Round up so a client never retries before the window ends
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Row results as a bare array of objects, acknowledgements as a status object
fn query_endpoint_body(result: QueryResult) -> Value {
    match result {
        QueryResult::Rows { rows, .. } => Value::Array(rows.into_iter().map(Value::Object).collect()),
        QueryResult::Acknowledgement { message } => json!({ "status": "success", "message": message }),
    }
}

/// Row results wrapped as `{"status", "data"}`
fn json_endpoint_body(result: QueryResult) -> Value {
    match result {
        QueryResult::Rows { rows, .. } => json!({
            "status": "success",
            "data": rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
        }),
        QueryResult::Acknowledgement { message } => json!({ "status": "success", "message": message }),
    }
}

// ==================
// Handlers
// ==================

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Extractor failures use the same `{"detail"}` body as gateway errors
fn rejection_response(status: StatusCode, detail: String) -> Response {
    (status, Json(ErrorBody { detail })).into_response()
}

fn query_request(
    params: Result<Query<SqlQueryParams>, QueryRejection>,
    peer: SocketAddr,
) -> Result<QueryRequest, Response> {
    let Query(params) = params.map_err(|r| rejection_response(r.status(), r.body_text()))?;
    // A missing key fails the credential check; missing SQL fails after it
    Ok(QueryRequest::new(
        params.sqlquery.unwrap_or_default(),
        params.api_key.unwrap_or_default(),
        peer.ip().to_string(),
    ))
}

async fn sql_query_pooled(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    params: Result<Query<SqlQueryParams>, QueryRejection>,
) -> Result<Json<Value>, Response> {
    let request = query_request(params, peer)?;
    let result = gateway
        .handle(EntryPoint::ViaPool, &request)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(query_endpoint_body(result)))
}

async fn sql_query_direct(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    params: Result<Query<SqlQueryParams>, QueryRejection>,
) -> Result<Json<Value>, Response> {
    let request = query_request(params, peer)?;
    let result = gateway
        .handle(EntryPoint::Direct, &request)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(query_endpoint_body(result)))
}

async fn sql_query_json(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Json<SqlQueryBody>, JsonRejection>,
) -> Result<Json<Value>, Response> {
    let Json(body) = body.map_err(|r| rejection_response(r.status(), r.body_text()))?;
    let request = QueryRequest::new(
        body.sqlquery.unwrap_or_default(),
        body.api_key.unwrap_or_default(),
        peer.ip().to_string(),
    );
    let result = gateway
        .handle(EntryPoint::Unthrottled, &request)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(json_endpoint_body(result)))
}

pub fn health_routes() -> Router {
    Router::new().route("/", get(health_check))
}

pub fn query_routes(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/sqlquery_pooled/", get(sql_query_pooled))
        .route("/sqlquery_direct/", get(sql_query_direct))
        .route("/sqlquery", post(sql_query_json))
        // Older client paths for the same operations
        .route("/sqlquery_alchemy/", get(sql_query_pooled))
        .route("/querySalesforceData", post(sql_query_json))
        .with_state(gateway)
}
