//! Integration tests against a live PostgreSQL
//!
//! These need a scratch database the test user may create tables in,
//! e.g. `createdb dovecot_lb_test`. Connection settings come from
//! DLB_TEST_DB_HOST / DLB_TEST_DB_NAME / DLB_TEST_DB_USER /
//! DLB_TEST_DB_PASSWORD, defaulting to a local socketless setup.
//!
//! Run with: `cargo test --test live_database -- --ignored --test-threads=1`
//!
//! The tests share one schema; each works on `it_` prefixed rows and
//! scrubs them on entry, so they must not run concurrently.

use dovecot_loadbalancer::balance::user_hash_key;
use dovecot_loadbalancer::config::DatabaseConfig;
use dovecot_loadbalancer::db::{self, ServerState};
use deadpool_postgres::Pool;

fn test_db_config() -> DatabaseConfig {
    let env = |key: &str| std::env::var(key).ok();
    DatabaseConfig {
        host: env("DLB_TEST_DB_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        port: 5432,
        dbname: env("DLB_TEST_DB_NAME").unwrap_or_else(|| "dovecot_lb_test".to_string()),
        user: env("DLB_TEST_DB_USER").unwrap_or_else(|| "dovecot_lb".to_string()),
        password: env("DLB_TEST_DB_PASSWORD"),
        connect_timeout_secs: 5,
        pool_size: 2,
    }
}

/// Open a pool and make sure the schema exists
async fn setup() -> Pool {
    let pool = db::build_pool(&test_db_config()).unwrap();
    db::schema::apply(&pool).await.unwrap();
    pool
}

/// Drop everything this test file may have left behind
async fn scrub(pool: &Pool) {
    let client = pool.get().await.unwrap();
    client
        .execute("DELETE FROM lb_affinity WHERE username LIKE 'it_%'", &[])
        .await
        .unwrap();
    client
        .execute("DELETE FROM lb_server WHERE name LIKE 'it_%'", &[])
        .await
        .unwrap();
    client
        .execute("DELETE FROM lb_lease WHERE holder LIKE 'it_%'", &[])
        .await
        .unwrap();
}

fn new_server<'a>(name: &'a str, host: &'a str) -> db::servers::NewServer<'a> {
    db::servers::NewServer {
        name,
        host,
        imap_port: 143,
        pop3_port: 110,
        lmtp_port: None,
        weight: 100,
        comment: None,
    }
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_schema_applies_twice() {
    let pool = db::build_pool(&test_db_config()).unwrap();
    db::schema::apply(&pool).await.unwrap();
    // Everything is IF NOT EXISTS / OR REPLACE.
    db::schema::apply(&pool).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_server_lifecycle() {
    let pool = setup().await;
    scrub(&pool).await;

    let id = db::servers::insert_server(&pool, &new_server("it_mx1", "10.99.0.1"))
        .await
        .unwrap();

    let fetched = db::servers::get_server(&pool, "it_mx1").await.unwrap().unwrap();
    assert_eq!(fetched.id, id);
    assert_eq!(fetched.state, ServerState::Active);
    assert!(!fetched.online, "new servers must start offline");
    assert_eq!(fetched.sessions, 0);

    assert!(db::servers::set_server_state(&pool, "it_mx1", ServerState::Draining)
        .await
        .unwrap());
    assert!(db::servers::set_server_weight(&pool, "it_mx1", 25).await.unwrap());

    let fetched = db::servers::get_server(&pool, "it_mx1").await.unwrap().unwrap();
    assert_eq!(fetched.state, ServerState::Draining);
    assert_eq!(fetched.weight, 25);

    // Unknown names report false, not an error.
    assert!(!db::servers::set_server_weight(&pool, "it_missing", 1).await.unwrap());

    assert_eq!(db::servers::delete_server(&pool, "it_mx1").await.unwrap(), Some(0));
    assert_eq!(db::servers::delete_server(&pool, "it_mx1").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_publish_transition_sets_last_seen_only_when_online() {
    let pool = setup().await;
    scrub(&pool).await;

    let id = db::servers::insert_server(&pool, &new_server("it_mx2", "10.99.0.2"))
        .await
        .unwrap();

    db::servers::publish_transition(&pool, id, true, Some(7)).await.unwrap();
    let row = db::servers::get_server(&pool, "it_mx2").await.unwrap().unwrap();
    assert!(row.online);
    assert_eq!(row.latency_ms, Some(7));
    let seen_when_online = row.last_seen.expect("online publish must stamp last_seen");

    db::servers::publish_transition(&pool, id, false, None).await.unwrap();
    let row = db::servers::get_server(&pool, "it_mx2").await.unwrap().unwrap();
    assert!(!row.online);
    // Going offline keeps the last good timestamp for the operator.
    assert_eq!(row.last_seen, Some(seen_when_online));

    db::servers::delete_server(&pool, "it_mx2").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_affinity_pin_unpin_evict() {
    let pool = setup().await;
    scrub(&pool).await;

    let id = db::servers::insert_server(&pool, &new_server("it_mx3", "10.99.0.3"))
        .await
        .unwrap();

    // Pin with an explicit target creates the row.
    assert!(db::affinity::pin_user(&pool, "it_alice", Some(id)).await.unwrap());
    let row = db::affinity::lookup(&pool, "it_alice").await.unwrap().unwrap();
    assert_eq!(row.server_id, id);
    assert!(row.pinned);
    assert_eq!(row.server_name, "it_mx3");

    // Pin without a target needs an existing row.
    assert!(!db::affinity::pin_user(&pool, "it_bob", None).await.unwrap());
    assert!(db::affinity::pin_user(&pool, "it_alice", None).await.unwrap());

    assert!(db::affinity::unpin_user(&pool, "it_alice").await.unwrap());
    let row = db::affinity::lookup(&pool, "it_alice").await.unwrap().unwrap();
    assert!(!row.pinned);

    assert!(db::affinity::drop_affinity(&pool, "it_alice").await.unwrap());
    assert!(db::affinity::lookup(&pool, "it_alice").await.unwrap().is_none());
    assert!(!db::affinity::drop_affinity(&pool, "it_alice").await.unwrap());

    db::servers::delete_server(&pool, "it_mx3").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_server_removal_cascades_affinity() {
    let pool = setup().await;
    scrub(&pool).await;

    let id = db::servers::insert_server(&pool, &new_server("it_mx4", "10.99.0.4"))
        .await
        .unwrap();
    db::affinity::pin_user(&pool, "it_carol", Some(id)).await.unwrap();
    db::affinity::pin_user(&pool, "it_dave", Some(id)).await.unwrap();

    assert_eq!(db::servers::delete_server(&pool, "it_mx4").await.unwrap(), Some(2));
    assert!(db::affinity::lookup(&pool, "it_carol").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_lease_is_single_holder() {
    let pool = setup().await;
    scrub(&pool).await;
    {
        // The lease row is global; clear it for this test.
        let client = pool.get().await.unwrap();
        client.execute("DELETE FROM lb_lease", &[]).await.unwrap();
    }

    assert!(db::lease::try_acquire(&pool, "it_node_a", 10, 30).await.unwrap());
    // A renewal by the holder succeeds.
    assert!(db::lease::try_acquire(&pool, "it_node_a", 10, 30).await.unwrap());
    // A rival loses while the lease is fresh.
    assert!(!db::lease::try_acquire(&pool, "it_node_b", 5, 30).await.unwrap());

    let lease = db::lease::current(&pool).await.unwrap().unwrap();
    assert_eq!(lease.holder, "it_node_a");
    assert!(!lease.expired());
    assert!(lease.remaining_secs > 0.0);

    // Only the holder may release.
    assert!(!db::lease::release(&pool, "it_node_b").await.unwrap());
    assert!(db::lease::release(&pool, "it_node_a").await.unwrap());
    assert!(db::lease::current(&pool).await.unwrap().is_none());

    // Released means claimable by anyone.
    assert!(db::lease::try_acquire(&pool, "it_node_b", 5, 30).await.unwrap());
    db::lease::release(&pool, "it_node_b").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_expired_lease_can_be_taken() {
    let pool = setup().await;
    scrub(&pool).await;
    {
        let client = pool.get().await.unwrap();
        client.execute("DELETE FROM lb_lease", &[]).await.unwrap();
    }

    // Zero-length lease expires immediately.
    assert!(db::lease::try_acquire(&pool, "it_node_a", 10, 0).await.unwrap());
    let lease = db::lease::current(&pool).await.unwrap().unwrap();
    assert!(lease.expired());

    assert!(db::lease::try_acquire(&pool, "it_node_b", 20, 30).await.unwrap());
    let lease = db::lease::current(&pool).await.unwrap().unwrap();
    assert_eq!(lease.holder, "it_node_b");
    db::lease::release(&pool, "it_node_b").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_settings_sync_upserts() {
    let pool = setup().await;

    db::settings::sync(&pool, "least-sessions", 604_800).await.unwrap();
    assert_eq!(
        db::settings::get(&pool, "policy").await.unwrap().as_deref(),
        Some("least-sessions")
    );

    db::settings::sync(&pool, "user-hash", 3600).await.unwrap();
    assert_eq!(
        db::settings::get(&pool, "policy").await.unwrap().as_deref(),
        Some("user-hash")
    );
    assert_eq!(
        db::settings::get(&pool, "sticky_ttl_secs").await.unwrap().as_deref(),
        Some("3600")
    );
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_user_hash_matches_sql() {
    // The Rust picker and the SQL router must hash identically or
    // user-hash placement would depend on who computed it.
    let pool = setup().await;
    let client = pool.get().await.unwrap();

    let long = "x".repeat(200);
    for username in ["", "a", "abc", "jdoe", "it_jörg@example.org", long.as_str()] {
        let row = client
            .query_one(
                "SELECT ('x' || substr(md5($1::text), 1, 8))::bit(32)::bigint",
                &[&username],
            )
            .await
            .unwrap();
        let sql_hash: i64 = row.get(0);
        assert_eq!(
            sql_hash,
            i64::from(user_hash_key(username)),
            "hash mismatch for {:?}",
            username
        );
    }
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn test_proxy_host_function_returns_and_sticks() {
    let pool = setup().await;
    scrub(&pool).await;

    let id = db::servers::insert_server(&pool, &new_server("it_mx5", "10.99.0.5"))
        .await
        .unwrap();
    db::servers::publish_transition(&pool, id, true, Some(1)).await.unwrap();
    db::settings::sync(&pool, "least-sessions", 0).await.unwrap();

    let client = pool.get().await.unwrap();
    let row = client
        .query_one("SELECT lb_proxy_host($1)", &[&"it_erin"])
        .await
        .unwrap();
    let host: Option<String> = row.get(0);
    assert_eq!(host.as_deref(), Some("10.99.0.5"));

    // The login created an affinity row; the next call must stick.
    let row = db::affinity::lookup(&pool, "it_erin").await.unwrap().unwrap();
    assert_eq!(row.server_id, id);

    let row = client
        .query_one("SELECT lb_proxy_host($1)", &[&"it_erin"])
        .await
        .unwrap();
    let host: Option<String> = row.get(0);
    assert_eq!(host.as_deref(), Some("10.99.0.5"));

    // Offline server, unpinned user: the router reports nothing usable.
    db::servers::publish_transition(&pool, id, false, None).await.unwrap();
    let row = client
        .query_one("SELECT lb_proxy_host($1)", &[&"it_erin"])
        .await
        .unwrap();
    let host: Option<String> = row.get(0);
    assert_eq!(host, None);

    db::servers::delete_server(&pool, "it_mx5").await.unwrap();
}
