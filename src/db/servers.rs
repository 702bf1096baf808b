//! Server registry
//!
//! CRUD over `lb_server` plus the health columns the daemon publishes.
//! Reads go through the `lb_overview` view so every row carries its
//! session count.

use anyhow::{bail, Context, Result};
use deadpool_postgres::Pool;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use tokio_postgres::Row;

/// Administrative state of a backend server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Takes new assignments and keeps existing ones
    Active,
    /// Keeps existing users, takes no new assignments
    Draining,
    /// Resolves nothing; users are re-homed at the next maintenance pass
    Disabled,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Active => "active",
            ServerState::Draining => "draining",
            ServerState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ServerState::Active),
            "draining" => Ok(ServerState::Draining),
            "disabled" => Ok(ServerState::Disabled),
            other => bail!("Unknown server state: {}", other),
        }
    }
}

/// One row of `lb_overview`
#[derive(Debug, Clone)]
pub struct ServerRow {
    pub id: i32,
    pub name: String,
    pub host: String,
    /// 0 disables the IMAP probe
    pub imap_port: u16,
    /// 0 disables the POP3 probe
    pub pop3_port: u16,
    pub lmtp_port: Option<u16>,
    pub weight: i32,
    pub state: ServerState,
    pub online: bool,
    pub latency_ms: Option<i32>,
    /// Last time a probe round saw every service healthy
    pub last_seen: Option<SystemTime>,
    pub comment: Option<String>,
    /// Affinity rows currently homed on this server
    pub sessions: i64,
}

impl ServerRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let state: String = row.try_get("state")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            imap_port: port_u16(row.try_get("imap_port")?, "imap_port")?,
            pop3_port: port_u16(row.try_get("pop3_port")?, "pop3_port")?,
            lmtp_port: match row.try_get::<_, Option<i32>>("lmtp_port")? {
                Some(p) => Some(port_u16(p, "lmtp_port")?),
                None => None,
            },
            weight: row.try_get("weight")?,
            state: state.parse()?,
            online: row.try_get("online")?,
            latency_ms: row.try_get("latency_ms")?,
            last_seen: row.try_get("last_seen")?,
            comment: row.try_get("comment")?,
            sessions: row.try_get("sessions")?,
        })
    }
}

// The schema CHECKs the range, but a row predating the CHECK could
// still carry anything.
fn port_u16(v: i32, column: &str) -> Result<u16> {
    u16::try_from(v).with_context(|| format!("{} out of range: {}", column, v))
}

/// Parameters for registering a backend
#[derive(Debug)]
pub struct NewServer<'a> {
    pub name: &'a str,
    pub host: &'a str,
    pub imap_port: u16,
    pub pop3_port: u16,
    pub lmtp_port: Option<u16>,
    pub weight: i32,
    pub comment: Option<&'a str>,
}

/// Register a backend; returns its id
pub async fn insert_server(pool: &Pool, server: &NewServer<'_>) -> Result<i32> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_one(
            "INSERT INTO lb_server (name, host, imap_port, pop3_port, lmtp_port, weight, comment)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
            &[
                &server.name,
                &server.host,
                &(server.imap_port as i32),
                &(server.pop3_port as i32),
                &server.lmtp_port.map(|p| p as i32),
                &server.weight,
                &server.comment,
            ],
        )
        .await
        .with_context(|| format!("Failed to register server {}", server.name))?;
    Ok(row.try_get(0)?)
}

/// Remove a backend by name.
///
/// Returns the number of affinity rows cascaded with it, or `None` when
/// no such server exists.
pub async fn delete_server(pool: &Pool, name: &str) -> Result<Option<u64>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_one(
            "WITH doomed AS (SELECT id FROM lb_server WHERE name = $1),
                  dropped AS (SELECT count(*) AS n FROM lb_affinity
                              WHERE server_id IN (SELECT id FROM doomed)),
                  gone AS (DELETE FROM lb_server WHERE id IN (SELECT id FROM doomed)
                           RETURNING id)
             SELECT (SELECT n FROM dropped) AS affinity_dropped,
                    (SELECT count(*) FROM gone) AS removed",
            &[&name],
        )
        .await
        .with_context(|| format!("Failed to remove server {}", name))?;
    let removed: i64 = row.try_get("removed")?;
    if removed == 0 {
        return Ok(None);
    }
    let affinity: i64 = row.try_get("affinity_dropped")?;
    Ok(Some(affinity as u64))
}

/// Set a server's administrative state; false when the name is unknown
pub async fn set_server_state(pool: &Pool, name: &str, state: ServerState) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute(
            "UPDATE lb_server SET state = $2 WHERE name = $1",
            &[&name, &state.as_str()],
        )
        .await
        .with_context(|| format!("Failed to update server {}", name))?;
    Ok(n > 0)
}

/// Set a server's weight; false when the name is unknown
pub async fn set_server_weight(pool: &Pool, name: &str, weight: i32) -> Result<bool> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let n = client
        .execute(
            "UPDATE lb_server SET weight = $2 WHERE name = $1",
            &[&name, &weight],
        )
        .await
        .with_context(|| format!("Failed to update server {}", name))?;
    Ok(n > 0)
}

/// All servers with session counts, ordered by id
pub async fn list_servers(pool: &Pool) -> Result<Vec<ServerRow>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let rows = client
        .query("SELECT * FROM lb_overview ORDER BY id", &[])
        .await
        .context("Failed to list servers")?;
    rows.iter().map(ServerRow::from_row).collect()
}

/// Look up one server by name
pub async fn get_server(pool: &Pool, name: &str) -> Result<Option<ServerRow>> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let row = client
        .query_opt("SELECT * FROM lb_overview WHERE name = $1", &[&name])
        .await
        .with_context(|| format!("Failed to look up server {}", name))?;
    row.as_ref().map(ServerRow::from_row).transpose()
}

/// Publish a health transition.
///
/// `last_seen` only moves forward on an online transition; the offline
/// transition keeps the last healthy timestamp for re-homing grace
/// arithmetic. Zero rows updated (server removed mid-round) is not an
/// error.
pub async fn publish_transition(
    pool: &Pool,
    server_id: i32,
    online: bool,
    latency_ms: Option<i32>,
) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .execute(
            "UPDATE lb_server
             SET online = $2, latency_ms = $3,
                 last_seen = CASE WHEN $2 THEN now() ELSE last_seen END
             WHERE id = $1",
            &[&server_id, &online, &latency_ms],
        )
        .await
        .with_context(|| format!("Failed to publish transition for server {}", server_id))?;
    Ok(())
}

/// Refresh `last_seen` and latency after a healthy round without
/// touching the published online flag
pub async fn touch_seen(pool: &Pool, server_id: i32, latency_ms: Option<i32>) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .execute(
            "UPDATE lb_server SET latency_ms = $2, last_seen = now() WHERE id = $1",
            &[&server_id, &latency_ms],
        )
        .await
        .with_context(|| format!("Failed to touch server {}", server_id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_state_round_trip() {
        for state in [
            ServerState::Active,
            ServerState::Draining,
            ServerState::Disabled,
        ] {
            assert_eq!(state.as_str().parse::<ServerState>().unwrap(), state);
        }
        assert!("offline".parse::<ServerState>().is_err());
    }

    #[test]
    fn test_port_conversion_bounds() {
        assert_eq!(port_u16(0, "imap_port").unwrap(), 0);
        assert_eq!(port_u16(65535, "imap_port").unwrap(), 65535);
        assert!(port_u16(-1, "imap_port").is_err());
        assert!(port_u16(70000, "imap_port").is_err());
    }
}
