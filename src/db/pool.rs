//! Connection pooling

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Build a lazy connection pool from the database section.
///
/// No connection is opened here; the first query does that. The daemon
/// can therefore start while the database is still coming up.
pub fn build_pool(db: &DatabaseConfig) -> Result<Pool> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&db.host)
        .port(db.port)
        .dbname(&db.dbname)
        .user(&db.user)
        .application_name("dovecot-loadbalancer")
        .connect_timeout(Duration::from_secs(db.connect_timeout_secs));
    if let Some(password) = &db.password {
        pg.password(password);
    }

    let mgr = Manager::from_config(
        pg,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(mgr)
        .max_size(db.pool_size)
        .build()
        .context("Failed to build database pool")
}

/// Round-trip check used at daemon startup and by `status`
pub async fn ping(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .query_one("SELECT 1", &[])
        .await
        .context("Database ping failed")?;
    Ok(())
}
