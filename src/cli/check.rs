//! Check command - one ad-hoc probe round
//!
//! Probes every registered server exactly like the daemon does, prints
//! per-service results, and exits non-zero when anything fails. Writes
//! nothing; published state stays whatever the lease holder says.

use super::CheckArgs;
use crate::db;
use crate::health::{probe_all, ProbeOutcome};
use anyhow::{bail, Result};
use std::path::Path;
use tokio::time::Duration;

/// Run the check command
pub async fn run_check(config_path: &Path, args: &CheckArgs) -> Result<()> {
    let (config, pool) = super::open(config_path).await?;

    let servers = db::servers::list_servers(&pool).await?;
    if servers.is_empty() {
        println!("No servers registered");
        return Ok(());
    }

    let timeout =
        Duration::from_secs(args.timeout_secs.unwrap_or(config.health.probe_timeout_secs));
    println!(
        "🔍 Probing {} server(s), timeout {}s...\n",
        servers.len(),
        timeout.as_secs()
    );

    let reports = probe_all(&servers, timeout).await;

    let mut checked = 0usize;
    let mut failed = 0usize;
    for report in &reports {
        if report.outcomes.is_empty() {
            println!("   ⚠️  {} has no probe ports configured", report.server_name);
            continue;
        }
        for (kind, port, outcome) in &report.outcomes {
            checked += 1;
            let label = format!("{} {}/{}", report.server_name, kind.name(), port);
            match outcome {
                ProbeOutcome::Ok { rtt } => {
                    println!("   ✅ {:<36} {}ms", label, rtt.as_millis());
                }
                ProbeOutcome::Refused { error } => {
                    failed += 1;
                    println!("   ❌ {:<36} {}", label, error);
                }
                ProbeOutcome::Timeout => {
                    failed += 1;
                    println!("   ⏱️  {:<36} timed out", label);
                }
                ProbeOutcome::BadGreeting { line } => {
                    failed += 1;
                    println!("   ❌ {:<36} unexpected greeting: {:?}", label, line);
                }
            }
        }
    }

    println!();
    if failed > 0 {
        bail!("{} of {} service check(s) failed", failed, checked);
    }
    println!("✅ All {} service check(s) passed", checked);
    Ok(())
}
