use tracing::debug;

use crate::Result;
use crate::query::statement_classifier::StatementKind;
use crate::session::{ReadOnlyTransaction, SqlSession};
use crate::types::QueryResult;

/// Runs caller SQL verbatim inside a read-only transaction.
///
/// The text is sent as-is with no parameter binding. The shared secret and the
/// read-only transaction are the whole trust boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        QueryExecutor
    }

    /// Commit on success, roll back on any failure and return that failure.
    pub async fn run<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        sql: &str,
        kind: StatementKind,
        acknowledgement: &str,
    ) -> Result<QueryResult> {
        let mut tx = ReadOnlyTransaction::begin(session).await?;

        let outcome = match kind {
            StatementKind::ExpectsRows => tx.session().fetch_all(sql).await.map(|raw| raw.normalize()),
            StatementKind::ExpectsAcknowledgement => tx
                .session()
                .execute(sql)
                .await
                .map(|_| QueryResult::acknowledgement(acknowledgement)),
        };

        match outcome {
            Ok(result) => {
                tx.commit().await?;
                debug!("Read-only transaction committed ({} rows)", result.row_count());
                Ok(result)
            }
            Err(e) => {
                tx.rollback().await;
                Err(e)
            }
        }
    }
}
