//! # HTTP surface
//!
//! - `GET /` - health check
//! - `GET /sqlquery_pooled/` - query through the connection pool
//! - `GET /sqlquery_direct/` - query through a fresh connection
//! - `POST /sqlquery` - JSON-body query through a fresh connection
//! - `GET /sqlquery_alchemy/`, `POST /querySalesforceData` - older paths for
//!   the pooled and JSON-body queries

pub mod routes;
pub mod server;

pub use server::{HttpServer, build_router};
