mod common;

use common::{API_KEY, FakeDatabase, FakeProvider, TestGateway};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use sqlgate::auth::Credentials;
use sqlgate::error::{INVALID_API_KEY, RATE_LIMIT_EXCEEDED};
use sqlgate::query::{StatementClassifier, StatementKind};
use sqlgate::rate_limit::{RateQuota, RequestThrottle};
use sqlgate::session::BackendKind;
use sqlgate::{EntryPoint, ErrorExposure, Gateway, GatewayErrorKind, QueryRequest, QueryResult};

const CLIENT: &str = "10.0.0.1";

fn request(sql: &str) -> QueryRequest {
    QueryRequest::new(sql, API_KEY, CLIENT)
}

#[tokio::test]
async fn test_select_returns_named_rows_on_both_backends() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let pooled = gateway.sql_query_via_pool(&request("SELECT 1 AS x")).await.unwrap();
    let direct = gateway.sql_query_direct(&request("SELECT 1 AS x")).await.unwrap();

    let expected_row = json!({ "x": 1 });
    match &pooled {
        QueryResult::Rows { columns, rows } => {
            assert_eq!(columns, &vec!["x".to_string()]);
            assert_eq!(rows.len(), 1);
            assert_eq!(serde_json::Value::Object(rows[0].clone()), expected_row);
        }
        other => panic!("expected rows, got {:?}", other),
    }
    assert_eq!(pooled, direct);
    assert_eq!(harness.pooled.checkouts(), 1);
    assert_eq!(harness.direct.checkouts(), 1);
}

#[tokio::test]
async fn test_rows_keep_column_order() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let result = gateway
        .sql_query_via_pool(&request("select id, name from accounts order by id"))
        .await
        .unwrap();

    let QueryResult::Rows { columns, rows } = result else {
        panic!("expected rows");
    };
    assert_eq!(columns, vec!["id".to_string(), "name".to_string()]);
    assert_eq!(rows.len(), 3);
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["id", "name"]);
    assert_eq!(rows[2]["name"], json!("carol"));
}

#[tokio::test]
async fn test_empty_result_is_empty_row_list() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let result = gateway
        .sql_query_direct(&request("select id from accounts where id < 0"))
        .await
        .unwrap();

    assert_eq!(
        result,
        QueryResult::Rows {
            columns: vec!["id".to_string()],
            rows: vec![],
        }
    );
}

#[tokio::test]
async fn test_invalid_key_is_rejected_before_any_connection() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    for entry in [EntryPoint::ViaPool, EntryPoint::Direct, EntryPoint::Unthrottled] {
        for sql in ["select 1 as x", "delete from accounts", ""] {
            let err = gateway
                .handle(entry, &QueryRequest::new(sql, "wrong", CLIENT))
                .await
                .unwrap_err();
            assert_eq!(err.kind, GatewayErrorKind::Unauthorized);
            assert_eq!(err.message, INVALID_API_KEY);
            assert_eq!(err.status_code(), 401);
        }
    }

    assert_eq!(harness.total_checkouts(), 0);
    assert!(harness.db.statements.lock().is_empty());
}

#[tokio::test]
async fn test_unauthorized_requests_do_not_consume_quota() {
    let harness = TestGateway::new(RateQuota::per_hour(2));
    let gateway = harness.gateway();

    for _ in 0..5 {
        let err = gateway
            .sql_query_via_pool(&QueryRequest::new("select 1 as x", "wrong", CLIENT))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Unauthorized);
    }

    assert!(gateway.sql_query_via_pool(&request("select 1 as x")).await.is_ok());
    assert!(gateway.sql_query_via_pool(&request("select 1 as x")).await.is_ok());
}

#[tokio::test]
async fn test_delete_is_refused_and_table_is_unchanged() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    for entry in [EntryPoint::ViaPool, EntryPoint::Direct, EntryPoint::Unthrottled] {
        let err = gateway
            .handle(entry, &request("DELETE FROM accounts"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);
        assert_eq!(
            err.message.starts_with("Database error: "),
            entry.prefixes_failures(),
            "unexpected message {}",
            err.message
        );
        assert!(err.message.contains("read-only transaction"));
    }

    assert_eq!(harness.db.account_count(), 3);
    let count = gateway
        .sql_query_direct(&request("select count(*) from accounts"))
        .await
        .unwrap();
    let QueryResult::Rows { rows, .. } = count else {
        panic!("expected rows");
    };
    assert_eq!(rows[0]["count"], json!(3));
}

#[tokio::test]
async fn test_failed_statement_rolls_back_and_returns_session() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let err = gateway
        .sql_query_via_pool(&request("update accounts set name = 'x'"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);

    let statements = harness.db.statements.lock().clone();
    assert_eq!(
        statements,
        vec![
            "BEGIN".to_string(),
            "SET TRANSACTION READ ONLY".to_string(),
            "update accounts set name = 'x'".to_string(),
            "ROLLBACK".to_string(),
        ]
    );
    assert_eq!(harness.pooled.released(), 1);
    assert_eq!(harness.pooled.discarded(), 0);
}

#[tokio::test]
async fn test_non_select_is_acknowledged() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let pooled = gateway.sql_query_via_pool(&request("SHOW search_path")).await.unwrap();
    assert_eq!(pooled, QueryResult::acknowledgement("Query executed successfully"));

    let json = gateway.sql_query_unthrottled(&request("show search_path")).await.unwrap();
    assert_eq!(json, QueryResult::acknowledgement("Non-select executed"));

    let statements = harness.db.statements.lock().clone();
    assert_eq!(statements.iter().filter(|s| s.as_str() == "COMMIT").count(), 2);
}

#[tokio::test]
async fn test_empty_query_is_unexpected_failure() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let err = gateway.sql_query_direct(&request("   ")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::UnexpectedFailure);
    assert!(err.message.starts_with("Unexpected error: "));
    assert_eq!(harness.total_checkouts(), 0);
}

#[tokio::test]
async fn test_json_endpoint_reports_bare_failure_text() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let err = gateway.sql_query_unthrottled(&request("")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::UnexpectedFailure);
    assert_eq!(err.message, "query text is empty");

    let err = gateway.sql_query_unthrottled(&request("selec 1")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);
    assert!(!err.message.starts_with("Database error"), "got {}", err.message);
    assert!(err.message.contains("syntax error"));

    // Generic exposure still hides the text
    let gateway = harness.builder().error_exposure(ErrorExposure::Generic).build();
    let err = gateway.sql_query_unthrottled(&request("selec 1")).await.unwrap_err();
    assert_eq!(err.message, "Database error");
}

#[tokio::test]
async fn test_syntax_error_is_database_failure() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.gateway();

    let err = gateway.sql_query_direct(&request("selec 1")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);
    assert!(err.message.contains("syntax error"));
}

#[tokio::test]
async fn test_connection_failure_is_database_failure() {
    let db = FakeDatabase::new();
    let gateway = Gateway::builder(
        Credentials::new(API_KEY).unwrap(),
        FakeProvider::failing(BackendKind::Pooled, db.clone()),
        FakeProvider::failing(BackendKind::Direct, db),
    )
    .build();

    let err = gateway.sql_query_via_pool(&request("select 1 as x")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);
    assert!(err.message.contains("connection refused"));
}

#[tokio::test]
async fn test_generic_exposure_hides_driver_text() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.builder().error_exposure(ErrorExposure::Generic).build();

    let err = gateway.sql_query_direct(&request("delete from accounts")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::DatabaseFailure);
    assert_eq!(err.message, "Database error");

    let err = gateway.sql_query_direct(&request("")).await.unwrap_err();
    assert_eq!(err.message, "Unexpected error");

    // Fixed messages are unaffected
    let err = gateway
        .sql_query_direct(&QueryRequest::new("select 1 as x", "nope", CLIENT))
        .await
        .unwrap_err();
    assert_eq!(err.message, INVALID_API_KEY);
}

#[tokio::test]
async fn test_rate_limit_per_client_and_entry_point() {
    let harness = TestGateway::new(RateQuota::per_hour(3));
    let gateway = harness.gateway();

    for _ in 0..3 {
        gateway.sql_query_via_pool(&request("select 1 as x")).await.unwrap();
    }

    let err = gateway.sql_query_via_pool(&request("select 1 as x")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::RateLimited);
    assert_eq!(err.message, RATE_LIMIT_EXCEEDED);
    assert_eq!(err.status_code(), 429);
    let retry_after = err.retry_after.expect("retry-after on a limited request");
    assert!(retry_after <= Duration::from_secs(3600));

    // The rejected call never reached a backend
    assert_eq!(harness.pooled.checkouts(), 3);

    // Another address has its own budget
    gateway
        .sql_query_via_pool(&QueryRequest::new("select 1 as x", API_KEY, "10.0.0.2"))
        .await
        .unwrap();

    // Another entry point has its own budget
    for _ in 0..3 {
        gateway.sql_query_direct(&request("select 1 as x")).await.unwrap();
    }
    let err = gateway.sql_query_direct(&request("select 1 as x")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::RateLimited);
}

#[tokio::test]
async fn test_failed_queries_count_against_quota() {
    let harness = TestGateway::new(RateQuota::per_hour(2));
    let gateway = harness.gateway();

    gateway.sql_query_direct(&request("delete from accounts")).await.unwrap_err();
    gateway.sql_query_direct(&request("selec 1")).await.unwrap_err();

    let err = gateway.sql_query_direct(&request("select 1 as x")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::RateLimited);
}

#[tokio::test]
async fn test_json_endpoint_unthrottled_by_default() {
    let harness = TestGateway::new(RateQuota::per_hour(1));
    let gateway = harness.gateway();
    assert!(!gateway.is_throttled(EntryPoint::Unthrottled));

    for _ in 0..10 {
        gateway.sql_query_unthrottled(&request("select 1 as x")).await.unwrap();
    }
    assert_eq!(harness.direct.checkouts(), 10);
    assert_eq!(harness.limiter.tracked(), 0);
}

#[tokio::test]
async fn test_json_endpoint_throttled_when_configured() {
    let harness = TestGateway::new(RateQuota::per_hour(1));
    let gateway = harness.builder().throttle_json_endpoint(true).build();
    assert!(gateway.is_throttled(EntryPoint::Unthrottled));

    gateway.sql_query_unthrottled(&request("select 1 as x")).await.unwrap();
    let err = gateway.sql_query_unthrottled(&request("select 1 as x")).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::RateLimited);

    // Its budget is separate from the direct entry point's
    gateway.sql_query_direct(&request("select 1 as x")).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_burst_admits_exactly_the_quota() {
    let harness = TestGateway::new(RateQuota::per_hour(5));
    let db = harness.db.clone();
    let gateway = Arc::new(
        Gateway::builder(
            Credentials::new(API_KEY).unwrap(),
            FakeProvider::slow(BackendKind::Pooled, db.clone(), Duration::from_millis(5)),
            FakeProvider::slow(BackendKind::Direct, db, Duration::from_millis(5)),
        )
        .throttle(harness.limiter.clone())
        .build(),
    );

    let calls = (0..20).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.sql_query_via_pool(&request("select 1 as x")).await }
    });
    let results = futures::future::join_all(calls).await;

    let allowed = results.iter().filter(|r| r.is_ok()).count();
    let limited = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind == GatewayErrorKind::RateLimited))
        .count();
    assert_eq!(allowed, 5);
    assert_eq!(limited, 15);
}

struct AlwaysAcknowledge;

impl StatementClassifier for AlwaysAcknowledge {
    fn classify(&self, _sql: &str) -> StatementKind {
        StatementKind::ExpectsAcknowledgement
    }
}

#[tokio::test]
async fn test_classifier_is_replaceable() {
    let harness = TestGateway::new(RateQuota::per_hour(100));
    let gateway = harness.builder().classifier(Arc::new(AlwaysAcknowledge)).build();

    let result = gateway.sql_query_direct(&request("select 1 as x")).await.unwrap();
    assert_eq!(result, QueryResult::acknowledgement("Query executed successfully"));
}
