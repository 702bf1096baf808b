//! Main scheduler loops

use crate::balance::{self, Policy};
use crate::config::{self, Config};
use crate::db;
use crate::failover::{FailoverState, Role};
use crate::health::{probe_all, Verdict};
use crate::state::RuntimeState;
use crate::util;
use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Notify, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Run the daemon
pub async fn run(config: Config, config_path: PathBuf) -> Result<()> {
    info!(
        "dovecot-loadbalancer {} starting (node {}, priority {})",
        crate::VERSION,
        config.node.id,
        config.node.priority
    );

    let pool = db::build_pool(&config.database)?;
    wait_for_database(&pool).await;

    let pid_file = config.daemon.pid_file.clone();
    if let Some(path) = &pid_file {
        write_pid_file(path)?;
    }

    let state = Arc::new(RwLock::new(RuntimeState::new()));
    let failover = Arc::new(RwLock::new(FailoverState::new(
        config.node.id.clone(),
        config.node.priority,
    )));
    let config = Arc::new(RwLock::new(config));
    let probe_kick = Arc::new(Notify::new());

    let pool_clone = pool.clone();
    let config_clone = Arc::clone(&config);
    let state_clone = Arc::clone(&state);
    let kick_clone = Arc::clone(&probe_kick);
    let mut probe_handle = tokio::spawn(async move {
        probe_loop(pool_clone, config_clone, state_clone, kick_clone).await
    });

    let pool_clone = pool.clone();
    let config_clone = Arc::clone(&config);
    let state_clone = Arc::clone(&state);
    let failover_clone = Arc::clone(&failover);
    let kick_clone = Arc::clone(&probe_kick);
    let mut lease_handle = tokio::spawn(async move {
        lease_loop(
            pool_clone,
            config_clone,
            state_clone,
            failover_clone,
            kick_clone,
        )
        .await
    });

    let pool_clone = pool.clone();
    let config_clone = Arc::clone(&config);
    let state_clone = Arc::clone(&state);
    let mut maintenance_handle =
        tokio::spawn(async move { maintenance_loop(pool_clone, config_clone, state_clone).await });

    let config_clone = Arc::clone(&config);
    let failover_clone = Arc::clone(&failover);
    let mut reload_handle =
        tokio::spawn(async move { reload_loop(config_clone, failover_clone, config_path).await });

    tokio::select! {
        r = &mut probe_handle => {
            error!("Probe loop exited: {:?}", r);
        }
        r = &mut lease_handle => {
            error!("Lease loop exited: {:?}", r);
        }
        r = &mut maintenance_handle => {
            error!("Maintenance loop exited: {:?}", r);
        }
        r = &mut reload_handle => {
            error!("Reload loop exited: {:?}", r);
        }
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("{} received, shutting down", name),
                Err(e) => error!("Signal handling failed: {:#}", e),
            }
        }
    }

    // Stop the loops before touching the lease, so a renewal cannot
    // race the release.
    probe_handle.abort();
    lease_handle.abort();
    maintenance_handle.abort();
    reload_handle.abort();

    let (was_active, node) = {
        let failover = failover.read().await;
        (failover.is_active(), failover.node_id().to_string())
    };
    if was_active {
        match db::lease::release(&pool, &node).await {
            Ok(true) => info!("Lease released"),
            Ok(false) => debug!("Lease was already gone"),
            Err(e) => warn!("Failed to release lease on shutdown: {:#}", e),
        }
    }

    if let Some(path) = &pid_file {
        remove_pid_file(path);
    }

    let (rounds, transitions) = {
        let state = state.read().await;
        (state.rounds_completed, state.transitions_published)
    };
    info!(
        "Shutdown complete ({} probe round(s), {} transition(s) published)",
        rounds, transitions
    );
    Ok(())
}

/// Block until the database answers a ping
async fn wait_for_database(pool: &Pool) {
    let mut attempt = 0u32;
    loop {
        match db::ping(pool).await {
            Ok(()) => {
                info!("Database reachable");
                return;
            }
            Err(e) => {
                let delay = util::rand::backoff(attempt, 1, 60);
                warn!(
                    "Database unreachable ({:#}), retrying in {}s",
                    e,
                    delay.as_secs()
                );
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Probe loop - probes all registered servers every interval (plus
/// jitter), feeds the trackers, and publishes transitions when this
/// node holds the lease
async fn probe_loop(
    pool: Pool,
    config: Arc<RwLock<Config>>,
    state: Arc<RwLock<RuntimeState>>,
    probe_kick: Arc<Notify>,
) -> Result<()> {
    loop {
        let (base, jitter, timeout_secs, rise, fall) = {
            let config = config.read().await;
            (
                config.health.probe_interval_secs,
                config.health.jitter_secs,
                config.health.probe_timeout_secs,
                config.health.rise,
                config.health.fall,
            )
        };

        tokio::select! {
            _ = sleep(util::rand::jitter(base, jitter)) => {}
            _ = probe_kick.notified() => {
                debug!("Probe round kicked off ahead of schedule");
            }
        }

        // Refresh the registry; a failure keeps the cached list so
        // probing survives database outages.
        match db::servers::list_servers(&pool).await {
            Ok(servers) => {
                let mut state = state.write().await;
                state.servers = servers;
                state.prune_trackers();
            }
            Err(e) => {
                warn!("Server list refresh failed, probing cached list: {:#}", e);
            }
        }

        let (servers, publishing) = {
            let state = state.read().await;
            (state.servers.clone(), state.role == Role::Active)
        };
        if servers.is_empty() {
            debug!("No servers registered, skipping round");
            continue;
        }

        let reports = probe_all(&servers, Duration::from_secs(timeout_secs)).await;

        let mut transitions: Vec<(i32, String, bool, Option<i32>)> = Vec::new();
        let mut healthy_unchanged: Vec<(i32, Option<i32>)> = Vec::new();
        {
            let mut state = state.write().await;
            for report in &reports {
                let server = match servers.iter().find(|s| s.id == report.server_id) {
                    Some(server) => server,
                    None => continue,
                };
                let healthy = report.healthy();
                let tracker = state.tracker_mut(server, rise, fall);
                match tracker.record(healthy) {
                    Verdict::GoesOnline => {
                        transitions.push((server.id, server.name.clone(), true, report.latency_ms()));
                    }
                    Verdict::GoesOffline => {
                        transitions.push((server.id, server.name.clone(), false, None));
                    }
                    Verdict::Unchanged => {
                        if healthy {
                            healthy_unchanged.push((server.id, report.latency_ms()));
                        }
                    }
                }
            }
            state.record_round();
        }

        if publishing {
            for (id, name, online, latency) in transitions {
                let label = if online { "online" } else { "offline" };
                info!("Server {} is {}", name, label);
                match db::servers::publish_transition(&pool, id, online, latency).await {
                    Ok(()) => {
                        state.write().await.transitions_published += 1;
                    }
                    Err(e) => warn!("Failed to publish {} for {}: {:#}", label, name, e),
                }
            }
            for (id, latency) in healthy_unchanged {
                if let Err(e) = db::servers::touch_seen(&pool, id, latency).await {
                    debug!("Failed to refresh last_seen for server {}: {:#}", id, e);
                }
            }
        } else {
            for (_, name, online, _) in &transitions {
                debug!(
                    "Standby view: server {} now considered {}",
                    name,
                    if *online { "online" } else { "offline" }
                );
            }
        }
    }
}

/// Lease loop - renews while active, watches for takeover while standby
async fn lease_loop(
    pool: Pool,
    config: Arc<RwLock<Config>>,
    state: Arc<RwLock<RuntimeState>>,
    failover: Arc<RwLock<FailoverState>>,
    probe_kick: Arc<Notify>,
) -> Result<()> {
    loop {
        let (renew_interval, lease_duration, takeover_jitter, policy, sticky_ttl) = {
            let config = config.read().await;
            (
                config.failover.renew_interval_secs,
                config.failover.lease_duration_secs,
                config.failover.takeover_jitter_secs,
                config.balancer.policy.clone(),
                config.balancer.sticky_ttl_secs,
            )
        };

        let (active, node, priority) = {
            let failover = failover.read().await;
            (
                failover.is_active(),
                failover.node_id().to_string(),
                failover.priority(),
            )
        };

        if active {
            match db::lease::try_acquire(&pool, &node, priority, lease_duration).await {
                Ok(true) => {
                    failover.write().await.record_renewal();
                }
                Ok(false) => {
                    if failover.write().await.record_rejection() {
                        state.write().await.role = Role::Standby;
                    }
                }
                Err(e) => {
                    warn!("Lease renewal failed: {:#}", e);
                    let demoted = failover
                        .write()
                        .await
                        .record_error(Duration::from_secs(lease_duration));
                    if demoted {
                        state.write().await.role = Role::Standby;
                    }
                }
            }
            sleep(Duration::from_secs(renew_interval)).await;
            continue;
        }

        match db::lease::current(&pool).await {
            Ok(None) => {
                // Unclaimed; no reason to wait.
                try_takeover(
                    &pool,
                    &state,
                    &failover,
                    &probe_kick,
                    lease_duration,
                    &policy,
                    sticky_ttl,
                )
                .await;
            }
            Ok(Some(lease)) if lease.holder == node => {
                // The database says we hold it (e.g. a restart inside
                // the lease window); pick it back up immediately.
                try_takeover(
                    &pool,
                    &state,
                    &failover,
                    &probe_kick,
                    lease_duration,
                    &policy,
                    sticky_ttl,
                )
                .await;
            }
            Ok(Some(lease)) if lease.expired() => {
                let delay = { failover.read().await.takeover_delay(takeover_jitter) };
                info!(
                    "Lease held by {} expired, attempting takeover in {:.1}s",
                    lease.holder,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                try_takeover(
                    &pool,
                    &state,
                    &failover,
                    &probe_kick,
                    lease_duration,
                    &policy,
                    sticky_ttl,
                )
                .await;
            }
            Ok(Some(lease)) => {
                debug!(
                    "Standby: lease held by {} for another {:.0}s",
                    lease.holder, lease.remaining_secs
                );
            }
            Err(e) => {
                warn!("Lease check failed: {:#}", e);
            }
        }

        sleep(Duration::from_secs(renew_interval)).await;
    }
}

/// One acquisition attempt from standby. On success the node becomes
/// active, corrects any published state its warm trackers disagree
/// with, syncs settings, and kicks an immediate probe round.
async fn try_takeover(
    pool: &Pool,
    state: &Arc<RwLock<RuntimeState>>,
    failover: &Arc<RwLock<FailoverState>>,
    probe_kick: &Arc<Notify>,
    lease_duration: u64,
    policy: &str,
    sticky_ttl: u64,
) {
    let (node, priority) = {
        let failover = failover.read().await;
        (failover.node_id().to_string(), failover.priority())
    };

    match db::lease::try_acquire(pool, &node, priority, lease_duration).await {
        Ok(true) => {
            let took_over = failover.write().await.record_renewal();
            if took_over {
                let view_age = {
                    let mut state = state.write().await;
                    state.role = Role::Active;
                    state.last_round.map(util::time::age_secs)
                };
                match view_age {
                    Some(age) => info!("Taking over with a probe view {}s old", age),
                    None => info!("Taking over before the first probe round"),
                }
                match reconcile_published(pool, state).await {
                    Ok(0) => {}
                    Ok(n) => info!("Corrected {} published state(s) after takeover", n),
                    Err(e) => warn!("Post-takeover reconciliation failed: {:#}", e),
                }
                if let Err(e) = db::settings::sync(pool, policy, sticky_ttl).await {
                    warn!("Settings sync after takeover failed: {:#}", e);
                }
                probe_kick.notify_one();
            }
        }
        Ok(false) => {
            debug!("Takeover attempt lost to another node");
        }
        Err(e) => {
            warn!("Takeover attempt failed: {:#}", e);
        }
    }
}

/// Align the database's online flags with what this node's warm
/// trackers believe. Returns the number of corrections written.
async fn reconcile_published(pool: &Pool, state: &Arc<RwLock<RuntimeState>>) -> Result<usize> {
    let servers = db::servers::list_servers(pool).await?;
    let corrections = { state.read().await.published_drift(&servers) };

    let n = corrections.len();
    for (id, name, online, latency) in corrections {
        info!(
            "Correcting published state for {}: {}",
            name,
            if online { "online" } else { "offline" }
        );
        db::servers::publish_transition(pool, id, online, latency).await?;
    }
    Ok(n)
}

/// Maintenance loop - lease holder only: settings sync, published-state
/// repair, affinity expiry, re-homing of users on unusable servers
async fn maintenance_loop(
    pool: Pool,
    config: Arc<RwLock<Config>>,
    state: Arc<RwLock<RuntimeState>>,
) -> Result<()> {
    loop {
        let (interval_secs, policy, sticky_ttl, grace) = {
            let config = config.read().await;
            (
                config.balancer.maintenance_interval_secs,
                config.balancer.policy.clone(),
                config.balancer.sticky_ttl_secs,
                config.balancer.rehome_grace_secs,
            )
        };

        sleep(Duration::from_secs(interval_secs)).await;

        let active = { state.read().await.role == Role::Active };
        if !active {
            continue;
        }

        if let Err(e) = maintenance_pass(&pool, &state, &policy, sticky_ttl, grace).await {
            warn!("Maintenance pass failed: {:#}", e);
        }
    }
}

async fn maintenance_pass(
    pool: &Pool,
    state: &Arc<RwLock<RuntimeState>>,
    policy: &str,
    sticky_ttl: u64,
    grace: u64,
) -> Result<()> {
    db::settings::sync(pool, policy, sticky_ttl).await?;

    // A transition write the probe loop lost to a database hiccup stays
    // lost otherwise; trackers latch on the verdict, not on the write.
    reconcile_published(pool, state).await?;

    if sticky_ttl > 0 {
        let expired = db::affinity::expire_stale(pool, sticky_ttl).await?;
        if expired > 0 {
            info!("Expired {} stale affinity row(s)", expired);
        }
    }

    let orphans = db::affinity::orphans(pool, grace).await?;
    if !orphans.is_empty() {
        rehome(pool, policy, &orphans).await?;
    }

    Ok(())
}

/// Move unpinned users off unusable servers, spreading them by policy.
/// Session counts are bumped locally as users land so least-sessions
/// does not dogpile one server within a single pass.
async fn rehome(pool: &Pool, policy: &str, orphans: &[String]) -> Result<()> {
    let policy: Policy = policy.parse()?;
    let mut servers = db::servers::list_servers(pool).await?;

    let mut moved = 0usize;
    for username in orphans {
        let target = {
            let pool_refs = balance::candidates(&servers);
            balance::select(policy, &pool_refs, username).map(|server| server.id)
        };
        match target {
            Some(server_id) => {
                db::affinity::reassign(pool, username, server_id).await?;
                if let Some(server) = servers.iter_mut().find(|s| s.id == server_id) {
                    server.sessions += 1;
                }
                moved += 1;
            }
            None => {
                debug!("No candidate server for {}, leaving assignment alone", username);
                break;
            }
        }
    }
    if moved > 0 {
        info!("Re-homed {} user(s) away from unusable servers", moved);
    }
    Ok(())
}

/// Reload loop - SIGHUP re-reads the configuration file. The loops
/// read the shared config each pass, but the failover priority lives
/// in `FailoverState` and has to be pushed there explicitly.
async fn reload_loop(
    config: Arc<RwLock<Config>>,
    failover: Arc<RwLock<FailoverState>>,
    config_path: PathBuf,
) -> Result<()> {
    let mut hup =
        signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    while hup.recv().await.is_some() {
        info!("SIGHUP received, reloading {}", config_path.display());
        match config::load_from_path(&config_path) {
            Ok(next) => {
                let current = config.read().await.clone();
                match config::validate_reload(&current, &next) {
                    Ok(()) => {
                        let priority = next.node.priority;
                        *config.write().await = next;
                        failover.write().await.set_priority(priority);
                        info!("Configuration reloaded");
                    }
                    Err(e) => warn!("Reload rejected: {:#}", e),
                }
            }
            Err(e) => warn!("Reload failed: {:#}", e),
        }
    }
    Ok(())
}

/// Resolves when SIGTERM or SIGINT arrives
async fn shutdown_signal() -> Result<&'static str> {
    let mut term =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut int =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = term.recv() => Ok("SIGTERM"),
        _ = int.recv() => Ok("SIGINT"),
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    std::fs::write(path, format!("{}\n", pid))
        .with_context(|| format!("Failed to write PID file {}", path.display()))?;
    info!("PID {} written to {}", pid, path.display());
    Ok(())
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove PID file {}: {}", path.display(), e);
    }
}
