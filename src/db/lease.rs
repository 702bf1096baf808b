//! Active-node lease
//!
//! A single database row arbitrates which daemon instance publishes
//! health and runs maintenance. All expiry arithmetic happens in SQL on
//! the database server's clock, so daemon hosts need not agree on time.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use std::time::SystemTime;

/// Current lease row. Expiry is reported as `remaining_secs` computed
/// on the database clock; local clocks never enter the comparison.
#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub holder: String,
    pub priority: i32,
    pub acquired_at: SystemTime,
    pub remaining_secs: f64,
}

impl LeaseRow {
    pub fn expired(&self) -> bool {
        self.remaining_secs <= 0.0
    }
}

/// Acquire or renew the lease in a single compare-and-swap statement.
///
/// Succeeds when this node already holds the row or the current lease
/// has expired; an unexpired lease held elsewhere is left untouched and
/// reported as failure.
pub async fn try_acquire(
    pool: &Pool,
    node: &str,
    priority: u32,
    duration_secs: u64,
) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_opt(
            "INSERT INTO lb_lease AS l (id, holder, priority, acquired_at, expires_at)
             VALUES (1, $1, $2, now(), now() + make_interval(secs => $3))
             ON CONFLICT (id) DO UPDATE
             SET holder = EXCLUDED.holder,
                 priority = EXCLUDED.priority,
                 acquired_at = CASE WHEN l.holder = EXCLUDED.holder
                                    THEN l.acquired_at ELSE now() END,
                 expires_at = EXCLUDED.expires_at
             WHERE l.holder = EXCLUDED.holder OR l.expires_at < now()
             RETURNING holder",
            &[&node, &(priority as i32), &(duration_secs as f64)],
        )
        .await
        .context("Lease acquisition failed")?;
    Ok(row.is_some())
}

/// Release the lease if this node holds it
pub async fn release(pool: &Pool, node: &str) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute("DELETE FROM lb_lease WHERE id = 1 AND holder = $1", &[&node])
        .await
        .context("Lease release failed")?;
    Ok(n > 0)
}

/// Read the current lease, if any
pub async fn current(pool: &Pool) -> Result<Option<LeaseRow>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_opt(
            "SELECT holder, priority, acquired_at,
                    (extract(epoch FROM expires_at - now()))::float8 AS remaining_secs
             FROM lb_lease WHERE id = 1",
            &[],
        )
        .await
        .context("Failed to read lease")?;
    row.map(|r| {
        Ok(LeaseRow {
            holder: r.try_get("holder")?,
            priority: r.try_get("priority")?,
            acquired_at: r.try_get("acquired_at")?,
            remaining_secs: r.try_get("remaining_secs")?,
        })
    })
    .transpose()
}
