//! PostgreSQL persistence
//!
//! Schema, queries and connection pooling for the routing database.
//! Dovecot front-ends read this database directly (via `lb_proxy_host`),
//! so every write here is immediately visible to login routing.

pub mod affinity;
pub mod lease;
pub mod pool;
pub mod schema;
pub mod servers;
pub mod settings;

pub use pool::{build_pool, ping};
pub use servers::{ServerRow, ServerState};
