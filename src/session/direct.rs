use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_postgres::{Client, Config as PgConfig};

use crate::Result;
use crate::session::backend::{
    BackendKind, ConnectionProvider, SqlSession, client_batch_execute, client_execute, client_fetch_all,
    open_client,
};
use crate::session::read_only::mark_session_read_only;
use crate::types::RawResultSet;

/// Opens a new physical connection for every request
pub struct DirectConnector {
    config: PgConfig,
    session_read_only: bool,
    opened: AtomicU64,
}

impl DirectConnector {
    /// `session_read_only` controls the session-level read-only default on each
    /// new connection. The per-transaction directive is applied regardless.
    pub fn new(config: PgConfig, session_read_only: bool) -> Self {
        DirectConnector {
            config,
            session_read_only,
            opened: AtomicU64::new(0),
        }
    }

    pub async fn connect(&self) -> Result<DirectConnection> {
        let client = open_client(&self.config, BackendKind::Direct).await?;
        if self.session_read_only {
            mark_session_read_only(&client, BackendKind::Direct).await;
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(DirectConnection { client })
    }

    /// Number of physical connections opened so far
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConnectionProvider for DirectConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn acquire(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.connect().await?))
    }
}

/// Single-use connection, closed when dropped
pub struct DirectConnection {
    client: Client,
}

#[async_trait]
impl SqlSession for DirectConnection {
    fn backend(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        client_batch_execute(&self.client, sql).await
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<RawResultSet> {
        client_fetch_all(&self.client, sql).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        client_execute(&self.client, sql).await
    }

    // Nothing to do: the connection is never reused
    fn discard(&mut self) {}
}
