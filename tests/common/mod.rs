use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlgate::auth::Credentials;
use sqlgate::rate_limit::{FixedWindowLimiter, RateQuota};
use sqlgate::session::{BackendKind, ConnectionProvider, SqlSession};
use sqlgate::types::RawResultSet;
use sqlgate::{Gateway, GatewayBuilder, SqlGateError};

#[allow(dead_code)]
pub const API_KEY: &str = "test-secret";

/// Shared state behind both fake backends: a single `accounts` table
#[derive(Debug)]
pub struct FakeDatabase {
    pub accounts: Mutex<Vec<(i64, String)>>,
    pub statements: Mutex<Vec<String>>,
}

impl FakeDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeDatabase {
            accounts: Mutex::new(vec![(1, "alice".to_string()), (2, "bob".to_string()), (3, "carol".to_string())]),
            statements: Mutex::new(Vec::new()),
        })
    }

    #[allow(dead_code)]
    pub fn account_count(&self) -> usize {
        self.accounts.lock().len()
    }
}

/// Scripted backend: counts checkouts and emulates Postgres read-only rejection
pub struct FakeProvider {
    kind: BackendKind,
    db: Arc<FakeDatabase>,
    checkouts: AtomicUsize,
    released: Arc<AtomicUsize>,
    discarded: Arc<AtomicUsize>,
    fail_connect: bool,
    latency: Option<Duration>,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new(kind: BackendKind, db: Arc<FakeDatabase>) -> Arc<Self> {
        Arc::new(Self::build(kind, db, false, None))
    }

    pub fn failing(kind: BackendKind, db: Arc<FakeDatabase>) -> Arc<Self> {
        Arc::new(Self::build(kind, db, true, None))
    }

    pub fn slow(kind: BackendKind, db: Arc<FakeDatabase>, latency: Duration) -> Arc<Self> {
        Arc::new(Self::build(kind, db, false, Some(latency)))
    }

    fn build(kind: BackendKind, db: Arc<FakeDatabase>, fail_connect: bool, latency: Option<Duration>) -> Self {
        FakeProvider {
            kind,
            db,
            checkouts: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            discarded: Arc::new(AtomicUsize::new(0)),
            fail_connect,
            latency,
        }
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn acquire(&self) -> sqlgate::Result<Box<dyn SqlSession>> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(SqlGateError::Backend(
                "connection refused: is the server running on port 5432?".to_string(),
            ));
        }
        Ok(Box::new(FakeSession {
            kind: self.kind,
            db: self.db.clone(),
            in_transaction: false,
            read_only: false,
            released: self.released.clone(),
            discarded: self.discarded.clone(),
            reusable: true,
            latency: self.latency,
        }))
    }
}

pub struct FakeSession {
    kind: BackendKind,
    db: Arc<FakeDatabase>,
    in_transaction: bool,
    read_only: bool,
    released: Arc<AtomicUsize>,
    discarded: Arc<AtomicUsize>,
    reusable: bool,
    latency: Option<Duration>,
}

impl FakeSession {
    fn record(&self, sql: &str) {
        self.db.statements.lock().push(sql.to_string());
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn select(&self, sql: &str) -> sqlgate::Result<RawResultSet> {
        let normalized = sql.trim().to_lowercase();
        let accounts = self.db.accounts.lock();

        match normalized.as_str() {
            "select 1 as x" => Ok(RawResultSet::new(vec!["x".to_string()], vec![vec![json!(1)]])),
            "select count(*) from accounts" => Ok(RawResultSet::new(
                vec!["count".to_string()],
                vec![vec![json!(accounts.len() as i64)]],
            )),
            "select id, name from accounts order by id" => Ok(RawResultSet::new(
                vec!["id".to_string(), "name".to_string()],
                accounts
                    .iter()
                    .map(|(id, name)| vec![json!(id), Value::String(name.clone())])
                    .collect(),
            )),
            "select id from accounts where id < 0" => Ok(RawResultSet::new(vec!["id".to_string()], vec![])),
            _ => Err(SqlGateError::Backend(format!(
                "ERROR: syntax error at or near \"{}\"",
                normalized.split_whitespace().next().unwrap_or("")
            ))),
        }
    }

    fn mutate(&self, sql: &str) -> sqlgate::Result<u64> {
        let normalized = sql.trim().to_lowercase();
        let verb = normalized.split_whitespace().next().unwrap_or("").to_string();

        match verb.as_str() {
            "delete" | "update" | "insert" | "truncate" => {
                if self.read_only {
                    return Err(SqlGateError::Backend(format!(
                        "ERROR: cannot execute {} in a read-only transaction",
                        verb.to_uppercase()
                    )));
                }
                let mut accounts = self.db.accounts.lock();
                let affected = accounts.len() as u64;
                if verb == "delete" || verb == "truncate" {
                    accounts.clear();
                }
                Ok(affected)
            }
            "show" | "set" | "explain" => Ok(0),
            "select" => Ok(1),
            _ => Err(SqlGateError::Backend(format!("ERROR: syntax error at or near \"{}\"", verb))),
        }
    }
}

#[async_trait]
impl SqlSession for FakeSession {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    async fn batch_execute(&mut self, sql: &str) -> sqlgate::Result<()> {
        self.record(sql);
        match sql {
            "BEGIN" => self.in_transaction = true,
            "SET TRANSACTION READ ONLY" => {
                if !self.in_transaction {
                    return Err(SqlGateError::Backend(
                        "WARNING: SET TRANSACTION can only be used in transaction blocks".to_string(),
                    ));
                }
                self.read_only = true;
            }
            "COMMIT" | "ROLLBACK" => {
                self.in_transaction = false;
                self.read_only = false;
            }
            _ => {}
        }
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str) -> sqlgate::Result<RawResultSet> {
        self.record(sql);
        self.round_trip().await;
        self.select(sql)
    }

    async fn execute(&mut self, sql: &str) -> sqlgate::Result<u64> {
        self.record(sql);
        self.round_trip().await;
        self.mutate(sql)
    }

    fn discard(&mut self) {
        self.reusable = false;
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        assert!(!self.in_transaction || !self.reusable, "session released with an open transaction");
        if self.reusable {
            self.released.fetch_add(1, Ordering::SeqCst);
        } else {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Fake backends plus the gateway built on them
#[allow(dead_code)]
pub struct TestGateway {
    pub db: Arc<FakeDatabase>,
    pub pooled: Arc<FakeProvider>,
    pub direct: Arc<FakeProvider>,
    pub limiter: Arc<FixedWindowLimiter>,
}

#[allow(dead_code)]
impl TestGateway {
    pub fn new(quota: RateQuota) -> Self {
        let db = FakeDatabase::new();
        TestGateway {
            pooled: FakeProvider::new(BackendKind::Pooled, db.clone()),
            direct: FakeProvider::new(BackendKind::Direct, db.clone()),
            limiter: Arc::new(FixedWindowLimiter::new(quota)),
            db,
        }
    }

    pub fn builder(&self) -> GatewayBuilder {
        Gateway::builder(
            Credentials::new(API_KEY).unwrap(),
            self.pooled.clone(),
            self.direct.clone(),
        )
        .throttle(self.limiter.clone())
    }

    pub fn gateway(&self) -> Gateway {
        self.builder().build()
    }

    pub fn total_checkouts(&self) -> usize {
        self.pooled.checkouts() + self.direct.checkouts()
    }
}
