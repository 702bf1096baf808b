//! User affinity
//!
//! The sticky user -> server assignments Dovecot's lookups honor.
//! `lb_proxy_host` creates and refreshes these rows on login; the daemon
//! expires and re-homes them during maintenance; operators pin and evict
//! through the control utility.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use std::time::SystemTime;
use tokio_postgres::Row;

/// One affinity row joined with its server's name and host
#[derive(Debug, Clone)]
pub struct AffinityRow {
    pub username: String,
    pub server_id: i32,
    pub server_name: String,
    pub host: String,
    pub pinned: bool,
    pub assigned_at: SystemTime,
    pub last_login: SystemTime,
}

impl AffinityRow {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            username: row.try_get("username")?,
            server_id: row.try_get("server_id")?,
            server_name: row.try_get("server_name")?,
            host: row.try_get("host")?,
            pinned: row.try_get("pinned")?,
            assigned_at: row.try_get("assigned_at")?,
            last_login: row.try_get("last_login")?,
        })
    }
}

/// Look up a user's assignment
pub async fn lookup(pool: &Pool, username: &str) -> Result<Option<AffinityRow>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_opt(
            "SELECT a.username, a.server_id, a.pinned, a.assigned_at, a.last_login,
                    s.name AS server_name, s.host
             FROM lb_affinity a
             JOIN lb_server s ON s.id = a.server_id
             WHERE a.username = $1",
            &[&username],
        )
        .await
        .with_context(|| format!("Failed to look up user {}", username))?;
    row.as_ref().map(AffinityRow::from_row).transpose()
}

/// Pin a user, optionally moving them to an explicit server first.
///
/// Without a server id this only marks an existing assignment; false
/// means there was nothing to pin.
pub async fn pin_user(pool: &Pool, username: &str, server_id: Option<i32>) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = match server_id {
        Some(id) => {
            client
                .execute(
                    "INSERT INTO lb_affinity (username, server_id, pinned)
                     VALUES ($1, $2, TRUE)
                     ON CONFLICT (username) DO UPDATE
                     SET server_id = EXCLUDED.server_id, pinned = TRUE, assigned_at = now()",
                    &[&username, &id],
                )
                .await
        }
        None => {
            client
                .execute(
                    "UPDATE lb_affinity SET pinned = TRUE WHERE username = $1",
                    &[&username],
                )
                .await
        }
    }
    .with_context(|| format!("Failed to pin user {}", username))?;
    Ok(n > 0)
}

/// Clear a user's pin; false when the user has no assignment
pub async fn unpin_user(pool: &Pool, username: &str) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute(
            "UPDATE lb_affinity SET pinned = FALSE WHERE username = $1",
            &[&username],
        )
        .await
        .with_context(|| format!("Failed to unpin user {}", username))?;
    Ok(n > 0)
}

/// Drop a user's assignment so the next login is balanced afresh
pub async fn drop_affinity(pool: &Pool, username: &str) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute("DELETE FROM lb_affinity WHERE username = $1", &[&username])
        .await
        .with_context(|| format!("Failed to evict user {}", username))?;
    Ok(n > 0)
}

/// Expire unpinned assignments idle longer than the sticky TTL.
/// Returns the number of rows dropped.
pub async fn expire_stale(pool: &Pool, ttl_secs: u64) -> Result<u64> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute(
            "DELETE FROM lb_affinity
             WHERE NOT pinned AND last_login < now() - make_interval(secs => $1)",
            &[&(ttl_secs as f64)],
        )
        .await
        .context("Failed to expire stale affinity")?;
    Ok(n)
}

/// Unpinned users homed on an unusable server: disabled outright, or
/// offline past the re-homing grace period.
pub async fn orphans(pool: &Pool, grace_secs: u64) -> Result<Vec<String>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let rows = client
        .query(
            "SELECT a.username
             FROM lb_affinity a
             JOIN lb_server s ON s.id = a.server_id
             WHERE NOT a.pinned
               AND (s.state = 'disabled'
                    OR (NOT s.online
                        AND (s.last_seen IS NULL
                             OR s.last_seen < now() - make_interval(secs => $1))))
             ORDER BY a.username",
            &[&(grace_secs as f64)],
        )
        .await
        .context("Failed to collect orphaned users")?;
    rows.iter()
        .map(|row| Ok(row.try_get("username")?))
        .collect()
}

/// Move a user to another server, keeping login history
pub async fn reassign(pool: &Pool, username: &str, server_id: i32) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .execute(
            "UPDATE lb_affinity SET server_id = $2, assigned_at = now() WHERE username = $1",
            &[&username, &server_id],
        )
        .await
        .with_context(|| format!("Failed to reassign user {}", username))?;
    Ok(())
}
