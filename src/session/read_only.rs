use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::Result;
use crate::session::backend::{BackendKind, SqlSession};

pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ROLLBACK: &str = "ROLLBACK";
pub const SET_TRANSACTION_READ_ONLY: &str = "SET TRANSACTION READ ONLY";
pub const SET_SESSION_READ_ONLY: &str = "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY";

/// Undo session state a previous request may have left on a pooled connection
/// (`SET`, `SET ROLE`, held cursors, listeners, advisory locks) and restore
/// the read-only default. Prepared statements are kept since the driver
/// caches its own.
pub const SESSION_RESET: &str = "CLOSE ALL; UNLISTEN *; SELECT pg_advisory_unlock_all(); \
     SET SESSION AUTHORIZATION DEFAULT; RESET ALL; \
     SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY";

/// Make read-only the default for every transaction on a fresh physical connection.
///
/// Best effort: a failure is logged and the connection is still used, since
/// every request also opens its transaction with `SET TRANSACTION READ ONLY`.
pub async fn mark_session_read_only(client: &Client, backend: BackendKind) -> bool {
    match client.batch_execute(SET_SESSION_READ_ONLY).await {
        Ok(()) => {
            debug!("{} backend session set to read-only", backend);
            true
        }
        Err(e) => {
            warn!("Failed to set {} backend session to read-only: {}", backend, e);
            false
        }
    }
}

/// An explicit transaction marked read-only before any caller SQL runs.
///
/// It must end in `commit` or `rollback`. If it is dropped unfinished, or the
/// closing statement fails, the session is discarded so the connection never
/// carries an open transaction into another request.
pub struct ReadOnlyTransaction<'a, S: SqlSession + ?Sized> {
    session: &'a mut S,
    finished: bool,
}

impl<'a, S: SqlSession + ?Sized> ReadOnlyTransaction<'a, S> {
    /// `BEGIN` then `SET TRANSACTION READ ONLY`. A failing directive rolls back
    /// and is returned before the caller's statement is attempted.
    pub async fn begin(session: &'a mut S) -> Result<Self> {
        session.batch_execute(BEGIN).await?;

        let mut tx = ReadOnlyTransaction {
            session,
            finished: false,
        };

        if let Err(e) = tx.session.batch_execute(SET_TRANSACTION_READ_ONLY).await {
            tx.rollback_in_place().await;
            return Err(e);
        }

        Ok(tx)
    }

    pub fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    pub async fn commit(mut self) -> Result<()> {
        self.session.batch_execute(COMMIT).await?;
        self.finished = true;
        Ok(())
    }

    /// Roll back, logging rather than returning a rollback failure so the
    /// statement's own error stays the one reported.
    pub async fn rollback(mut self) {
        self.rollback_in_place().await;
    }

    async fn rollback_in_place(&mut self) {
        match self.session.batch_execute(ROLLBACK).await {
            Ok(()) => self.finished = true,
            Err(e) => warn!("Rollback failed on {} backend: {}", self.session.backend(), e),
        }
    }
}

impl<S: SqlSession + ?Sized> Drop for ReadOnlyTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Discarding {} connection with unfinished transaction", self.session.backend());
            self.session.discard();
        }
    }
}
