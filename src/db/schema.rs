//! Database schema
//!
//! The complete DDL, idempotent so `schema --apply` can run on every
//! upgrade. The PL/pgSQL function `lb_proxy_host` is the piece Dovecot
//! actually calls; its selection logic must stay in step with the Rust
//! side in [`crate::balance`].

use anyhow::{Context, Result};
use deadpool_postgres::Pool;

/// Full schema: tables, index, overview view, routing function.
pub const SCHEMA_SQL: &str = r#"
-- Registered Dovecot backends.
CREATE TABLE IF NOT EXISTS lb_server (
    id          SERIAL PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    host        TEXT NOT NULL,
    imap_port   INTEGER NOT NULL DEFAULT 143 CHECK (imap_port BETWEEN 0 AND 65535),
    pop3_port   INTEGER NOT NULL DEFAULT 110 CHECK (pop3_port BETWEEN 0 AND 65535),
    lmtp_port   INTEGER CHECK (lmtp_port BETWEEN 1 AND 65535),
    weight      INTEGER NOT NULL DEFAULT 100 CHECK (weight >= 0),
    state       TEXT NOT NULL DEFAULT 'active' CHECK (state IN ('active', 'draining', 'disabled')),
    online      BOOLEAN NOT NULL DEFAULT FALSE,
    latency_ms  INTEGER,
    last_seen   TIMESTAMPTZ,
    comment     TEXT
);

-- User -> server stickiness, one row per user.
CREATE TABLE IF NOT EXISTS lb_affinity (
    username    TEXT PRIMARY KEY,
    server_id   INTEGER NOT NULL REFERENCES lb_server(id) ON DELETE CASCADE,
    pinned      BOOLEAN NOT NULL DEFAULT FALSE,
    assigned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_login  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS lb_affinity_server_idx ON lb_affinity (server_id);

-- Balancer settings consumed by lb_proxy_host; synced from the daemon config.
CREATE TABLE IF NOT EXISTS lb_setting (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Single-row lease granting one daemon instance the active role.
CREATE TABLE IF NOT EXISTS lb_lease (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    holder      TEXT NOT NULL,
    priority    INTEGER NOT NULL,
    acquired_at TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
);

-- Server table with per-server session (affinity) counts.
CREATE OR REPLACE VIEW lb_overview AS
SELECT s.id, s.name, s.host, s.imap_port, s.pop3_port, s.lmtp_port,
       s.weight, s.state, s.online, s.latency_ms, s.last_seen, s.comment,
       coalesce(a.sessions, 0) AS sessions
FROM lb_server s
LEFT JOIN (
    SELECT server_id, count(*) AS sessions
    FROM lb_affinity
    GROUP BY server_id
) a ON a.server_id = s.id;

-- Routing lookup called by Dovecot's password_query. Returns the backend
-- host for the user, assigning one on first contact, or NULL when no
-- usable server exists.
CREATE OR REPLACE FUNCTION lb_proxy_host(p_username TEXT) RETURNS TEXT AS $func$
DECLARE
    r        RECORD;
    c        RECORD;
    v_policy TEXT;
    v_total  BIGINT;
    v_hash   BIGINT;
    v_edge   BIGINT := 0;
    v_id     INTEGER;
    v_host   TEXT;
BEGIN
    -- Sticky affinity first.
    SELECT a.pinned, s.host, s.online, s.state INTO r
    FROM lb_affinity a JOIN lb_server s ON s.id = a.server_id
    WHERE a.username = p_username;
    IF FOUND THEN
        IF r.online AND r.state IN ('active', 'draining') THEN
            UPDATE lb_affinity SET last_login = now() WHERE username = p_username;
            RETURN r.host;
        END IF;
        IF r.pinned THEN
            -- A pin is never silently moved.
            RETURN NULL;
        END IF;
    END IF;

    SELECT value INTO v_policy FROM lb_setting WHERE key = 'policy';
    IF v_policy IS NULL THEN
        v_policy := 'least-sessions';
    END IF;

    IF v_policy = 'user-hash' THEN
        SELECT sum(weight) INTO v_total FROM lb_server
        WHERE state = 'active' AND online AND weight > 0;
        IF v_total IS NULL OR v_total = 0 THEN
            RETURN NULL;
        END IF;
        v_hash := ('x' || substr(md5(p_username), 1, 8))::bit(32)::bigint % v_total;
        FOR c IN
            SELECT id, host, weight FROM lb_server
            WHERE state = 'active' AND online AND weight > 0
            ORDER BY id
        LOOP
            v_edge := v_edge + c.weight;
            IF v_hash < v_edge THEN
                v_id := c.id;
                v_host := c.host;
                EXIT;
            END IF;
        END LOOP;
    ELSIF v_policy = 'weighted' THEN
        SELECT id, host INTO v_id, v_host FROM lb_server
        WHERE state = 'active' AND online AND weight > 0
        ORDER BY power(random(), 1.0 / greatest(weight, 1)) DESC
        LIMIT 1;
    ELSE
        SELECT s.id, s.host INTO v_id, v_host
        FROM lb_server s
        LEFT JOIN (
            SELECT server_id, count(*) AS n FROM lb_affinity GROUP BY server_id
        ) a ON a.server_id = s.id
        WHERE s.state = 'active' AND s.online AND s.weight > 0
        ORDER BY coalesce(a.n, 0)::float / greatest(s.weight, 1), s.id
        LIMIT 1;
    END IF;

    IF v_id IS NULL THEN
        RETURN NULL;
    END IF;

    INSERT INTO lb_affinity (username, server_id) VALUES (p_username, v_id)
    ON CONFLICT (username) DO UPDATE
    SET server_id = EXCLUDED.server_id, assigned_at = now(), last_login = now();

    RETURN v_host;
END;
$func$ LANGUAGE plpgsql;
"#;

/// Apply the schema to the configured database
pub async fn apply(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    client
        .batch_execute(SCHEMA_SQL)
        .await
        .context("Failed to apply schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        // Re-applying on upgrade must not error out.
        for table in ["lb_server", "lb_affinity", "lb_setting", "lb_lease"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "{} missing or not idempotent",
                table
            );
        }
        assert!(SCHEMA_SQL.contains("CREATE OR REPLACE VIEW lb_overview"));
        assert!(SCHEMA_SQL.contains("CREATE OR REPLACE FUNCTION lb_proxy_host"));
    }

    #[test]
    fn test_function_body_quoting_balanced() {
        assert_eq!(SCHEMA_SQL.matches("$func$").count(), 2);
    }
}
