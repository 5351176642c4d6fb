// Connection backends and read-only enforcement
pub mod backend;
pub mod direct;
pub mod pool;
pub mod read_only;

pub use backend::{BackendKind, ConnectionProvider, SqlSession};
pub use direct::{DirectConnection, DirectConnector};
pub use pool::{PgPool, PoolStats, PooledConnection};
pub use read_only::{ReadOnlyTransaction, mark_session_read_only};
