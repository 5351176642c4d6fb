use async_trait::async_trait;
use std::fmt;
use tokio_postgres::{Client, Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::Result;
use crate::types::{RawResultSet, ValueConverter};

/// Which strategy produced a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Long-lived bounded pool, session reset on checkout
    Pooled,
    /// Fresh physical connection per request
    Direct,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Pooled => "pooled",
            BackendKind::Direct => "direct",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection owned by exactly one request.
///
/// Dropping the session releases it: pooled sessions go back to the idle list
/// unless they were discarded, direct sessions close.
#[async_trait]
pub trait SqlSession: Send {
    fn backend(&self) -> BackendKind;

    /// Run control statements through the simple query protocol
    async fn batch_execute(&mut self, sql: &str) -> Result<()>;

    /// Run one statement and fetch every row with its column names
    async fn fetch_all(&mut self, sql: &str) -> Result<RawResultSet>;

    /// Run one statement for its side effect, returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Never hand this connection to another request
    fn discard(&mut self);
}

/// Source of `SqlSession`s for one backend
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn acquire(&self) -> Result<Box<dyn SqlSession>>;
}

/// Open a physical connection and drive its I/O on the runtime
pub(crate) async fn open_client(config: &PgConfig, backend: BackendKind) -> Result<Client> {
    let (client, connection) = config.connect(NoTls).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("{} backend connection closed with error: {}", backend, e);
        }
    });

    debug!("Opened {} backend connection", backend);
    Ok(client)
}

pub(crate) async fn client_batch_execute(client: &Client, sql: &str) -> Result<()> {
    client.batch_execute(sql).await?;
    Ok(())
}

pub(crate) async fn client_fetch_all(client: &Client, sql: &str) -> Result<RawResultSet> {
    // Prepare first so column names and types are known even for an empty
    // result; this also refuses text holding more than one statement
    let statement = client.prepare(sql).await?;
    let columns = statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    // Rows come back in text form so every type has a representation
    let mut rows = Vec::new();
    for message in client.simple_query(sql).await? {
        if let SimpleQueryMessage::Row(row) = message {
            rows.push(ValueConverter::row_to_values(&row, statement.columns())?);
        }
    }

    Ok(RawResultSet::new(columns, rows))
}

pub(crate) async fn client_execute(client: &Client, sql: &str) -> Result<u64> {
    Ok(client.execute(sql, &[]).await?)
}
