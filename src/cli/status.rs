//! Status command - show lease, policy, and server health
//!
//! Everything displayed comes from the database, so the command works
//! whether or not a daemon is running on this host.

use super::StatusArgs;
use crate::config::Config;
use crate::db::{self, ServerRow};
use crate::util::time::{age_secs, format_duration};
use anyhow::Result;
use std::path::Path;

/// Run the status command
pub async fn run_status(config_path: &Path, args: &StatusArgs) -> Result<()> {
    let (config, pool) = super::open(config_path).await?;

    let lease = db::lease::current(&pool).await?;
    let servers = db::servers::list_servers(&pool).await?;

    // The SQL router reads lb_setting; fall back to our own config when
    // no daemon has synced it yet.
    let policy = match db::settings::get(&pool, "policy").await? {
        Some(policy) => policy,
        None => config.balancer.policy.clone(),
    };
    let sticky_ttl = match db::settings::get(&pool, "sticky_ttl_secs").await? {
        Some(value) => value.parse::<u64>().unwrap_or(config.balancer.sticky_ttl_secs),
        None => config.balancer.sticky_ttl_secs,
    };

    if args.format == "json" {
        print_json_status(&config, lease.as_ref(), &policy, sticky_ttl, &servers)?;
    } else {
        print_text_status(&config, lease.as_ref(), &policy, sticky_ttl, &servers);
    }

    Ok(())
}

fn print_text_status(
    config: &Config,
    lease: Option<&db::lease::LeaseRow>,
    policy: &str,
    sticky_ttl: u64,
    servers: &[ServerRow],
) {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              dovecot-loadbalancer Status                   ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    println!("📋 This Node:");
    println!("   ID:       {}", config.node.id);
    println!("   Priority: {} (lower = preferred holder)", config.node.priority);
    println!();

    println!("🔒 Lease:");
    match lease {
        Some(lease) if lease.expired() => {
            println!("   Holder: {} (priority {})", lease.holder, lease.priority);
            println!(
                "   State:  ⚠️  expired {:.0}s ago, takeover pending",
                -lease.remaining_secs
            );
        }
        Some(lease) => {
            println!("   Holder: {} (priority {})", lease.holder, lease.priority);
            println!(
                "   State:  🟢 held for {}, {:.0}s remaining",
                format_duration(age_secs(lease.acquired_at)),
                lease.remaining_secs
            );
        }
        None => {
            println!("   State:  ⚠️  unclaimed (no daemon running?)");
        }
    }
    println!();

    println!("⚖️  Routing:");
    println!("   Policy:     {}", policy);
    if sticky_ttl == 0 {
        println!("   Sticky TTL: unlimited");
    } else {
        println!("   Sticky TTL: {}", format_duration(sticky_ttl));
    }
    println!();

    let online = servers.iter().filter(|s| s.online).count();
    let sessions: i64 = servers.iter().map(|s| s.sessions).sum();

    println!("🖥️  Servers ({} registered, {} online):", servers.len(), online);
    if servers.is_empty() {
        println!("   (none - add one with 'server add')");
        return;
    }

    println!(
        "{:<4} {:<16} {:<22} {:<9} {:<7} {:>6} {:>6} {:>5}  {}",
        "ID", "NAME", "HOST", "STATE", "ONLINE", "WEIGHT", "SESS", "MS", "LAST SEEN"
    );
    println!("{}", "-".repeat(96));
    for server in servers {
        let online = if server.online { "yes" } else { "NO" };
        let latency = server
            .latency_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        let last_seen = server
            .last_seen
            .map(|t| format!("{} ago", format_duration(age_secs(t))))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<4} {:<16} {:<22} {:<9} {:<7} {:>6} {:>6} {:>5}  {}",
            server.id,
            server.name,
            server.host,
            server.state.as_str(),
            online,
            server.weight,
            server.sessions,
            latency,
            last_seen
        );
    }
    println!("\n   Total sessions: {}", sessions);
}

fn print_json_status(
    config: &Config,
    lease: Option<&db::lease::LeaseRow>,
    policy: &str,
    sticky_ttl: u64,
    servers: &[ServerRow],
) -> Result<()> {
    let lease_json = lease.map(|lease| {
        serde_json::json!({
            "holder": lease.holder,
            "priority": lease.priority,
            "held_secs": age_secs(lease.acquired_at),
            "remaining_secs": lease.remaining_secs,
            "expired": lease.expired(),
        })
    });

    let server_json: Vec<serde_json::Value> = servers
        .iter()
        .map(|server| {
            serde_json::json!({
                "id": server.id,
                "name": server.name,
                "host": server.host,
                "state": server.state.as_str(),
                "online": server.online,
                "weight": server.weight,
                "sessions": server.sessions,
                "latency_ms": server.latency_ms,
                "last_seen_secs_ago": server.last_seen.map(age_secs),
            })
        })
        .collect();

    let status = serde_json::json!({
        "node": {
            "id": config.node.id,
            "priority": config.node.priority,
        },
        "lease": lease_json,
        "policy": policy,
        "sticky_ttl_secs": sticky_ttl,
        "servers": server_json,
        "totals": {
            "registered": servers.len(),
            "online": servers.iter().filter(|s| s.online).count(),
            "sessions": servers.iter().map(|s| s.sessions).sum::<i64>(),
        },
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
