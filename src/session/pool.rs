use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{Client, Config as PgConfig};
use tracing::{debug, warn};

use crate::session::backend::{
    BackendKind, ConnectionProvider, SqlSession, client_batch_execute, client_execute, client_fetch_all,
    open_client,
};
use crate::session::read_only::{SESSION_RESET, mark_session_read_only};
use crate::types::RawResultSet;
use crate::{Result, SqlGateError};

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub opened: u64,
    pub discarded: u64,
    pub checkouts: u64,
    pub ping_failures: u64,
}

#[derive(Default)]
struct PoolCounters {
    opened: AtomicU64,
    discarded: AtomicU64,
    checkouts: AtomicU64,
    ping_failures: AtomicU64,
}

/// Bounded pool of read-only Postgres connections.
///
/// Capacity is enforced by a semaphore; the permit travels with the checked-out
/// connection and is released when it drops. The idle list lock is only held
/// to push or pop, never across a database round-trip.
pub struct PgPool {
    config: PgConfig,
    idle: Arc<Mutex<Vec<Client>>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
    acquire_timeout: Duration,
    counters: Arc<PoolCounters>,
}

impl PgPool {
    pub fn new(config: PgConfig, max_size: usize, acquire_timeout: Duration) -> Self {
        PgPool {
            config,
            idle: Arc::new(Mutex::new(Vec::with_capacity(max_size))),
            semaphore: Arc::new(Semaphore::new(max_size)),
            max_size,
            acquire_timeout,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub async fn acquire_connection(&self) -> Result<PooledConnection> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| SqlGateError::PoolTimeout(self.acquire_timeout))?
            .map_err(|_| SqlGateError::PoolClosed)?;

        self.counters.checkouts.fetch_add(1, Ordering::Relaxed);

        let client = match self.checkout_idle().await {
            Some(client) => client,
            None => self.open().await?,
        };

        Ok(PooledConnection {
            client: Some(client),
            idle: self.idle.clone(),
            counters: self.counters.clone(),
            reusable: true,
            _permit: permit,
        })
    }

    /// Pop idle connections until one accepts the session reset, which doubles
    /// as the liveness check
    async fn checkout_idle(&self) -> Option<Client> {
        loop {
            let candidate = self.idle.lock().pop()?;

            if candidate.is_closed() {
                debug!("Dropping closed idle connection");
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match candidate.batch_execute(SESSION_RESET).await {
                Ok(()) => return Some(candidate),
                Err(e) => {
                    warn!("Session reset failed on idle connection, discarding: {}", e);
                    self.counters.ping_failures.fetch_add(1, Ordering::Relaxed);
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn open(&self) -> Result<Client> {
        let client = open_client(&self.config, BackendKind::Pooled).await?;
        mark_session_read_only(&client, BackendKind::Pooled).await;
        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        Ok(client)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_size: self.max_size,
            idle: self.idle.lock().len(),
            in_use: self.max_size - self.semaphore.available_permits(),
            opened: self.counters.opened.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            checkouts: self.counters.checkouts.load(Ordering::Relaxed),
            ping_failures: self.counters.ping_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out connections and drop the idle ones
    pub fn close(&self) {
        self.semaphore.close();
        let drained = std::mem::take(&mut *self.idle.lock());
        debug!("Closed pool, dropped {} idle connections", drained.len());
    }
}

#[async_trait]
impl ConnectionProvider for PgPool {
    fn kind(&self) -> BackendKind {
        BackendKind::Pooled
    }

    async fn acquire(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.acquire_connection().await?))
    }
}

/// A checked-out pool connection; returns itself to the idle list on drop
pub struct PooledConnection {
    client: Option<Client>,
    idle: Arc<Mutex<Vec<Client>>>,
    counters: Arc<PoolCounters>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(SqlGateError::PoolClosed)
    }
}

#[async_trait]
impl SqlSession for PooledConnection {
    fn backend(&self) -> BackendKind {
        BackendKind::Pooled
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        client_batch_execute(self.client()?, sql).await
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<RawResultSet> {
        client_fetch_all(self.client()?, sql).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        client_execute(self.client()?, sql).await
    }

    fn discard(&mut self) {
        self.reusable = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.reusable && !client.is_closed() {
                self.idle.lock().push(client);
            } else {
                debug!("Discarding pooled connection");
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
