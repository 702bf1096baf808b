//! Balancer settings mirror
//!
//! `lb_proxy_host` reads the policy from `lb_setting` so Dovecot-side
//! placement follows the daemon's configuration; the sticky TTL is
//! mirrored alongside for operator visibility.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;

/// Sync the daemon's balancer configuration into the settings table
pub async fn sync(pool: &Pool, policy: &str, sticky_ttl_secs: u64) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .execute(
            "INSERT INTO lb_setting (key, value)
             VALUES ('policy', $1), ('sticky_ttl_secs', $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            &[&policy, &sticky_ttl_secs.to_string()],
        )
        .await
        .context("Failed to sync settings")?;
    Ok(())
}

/// Read one setting
pub async fn get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_opt("SELECT value FROM lb_setting WHERE key = $1", &[&key])
        .await
        .with_context(|| format!("Failed to read setting {}", key))?;
    row.map(|r| Ok(r.try_get(0)?)).transpose()
}
