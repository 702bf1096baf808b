//! Route command - dry-run the routing decision
//!
//! Resolves usernames with the same decision order the SQL function
//! applies, but read-only: no affinity rows are written or touched, so
//! it is safe against production data.

use super::RouteArgs;
use crate::balance::{resolve, Policy, Resolution};
use crate::db;
use anyhow::{Context, Result};
use std::path::Path;

/// Run the route command
pub async fn run_route(config_path: &Path, args: &RouteArgs) -> Result<()> {
    let (config, pool) = super::open(config_path).await?;

    // Match what the SQL router would use right now, not what our own
    // config says it should be after the next sync.
    let policy_str = match db::settings::get(&pool, "policy").await? {
        Some(policy) => policy,
        None => config.balancer.policy.clone(),
    };
    let policy: Policy = policy_str
        .parse()
        .with_context(|| format!("Database holds an unusable policy setting: {}", policy_str))?;

    let servers = db::servers::list_servers(&pool).await?;

    let width = args.usernames.iter().map(|u| u.len()).max().unwrap_or(0);
    for username in &args.usernames {
        let affinity = db::affinity::lookup(&pool, username).await?;
        match resolve(policy, &servers, affinity.as_ref(), username) {
            Resolution::Sticky { server_name, host } => {
                println!("{:>w$} -> {} ({})  [sticky]", username, server_name, host, w = width);
            }
            Resolution::Fresh { server_name, host } => {
                println!(
                    "{:>w$} -> {} ({})  [would assign, {}]",
                    username,
                    server_name,
                    host,
                    policy,
                    w = width
                );
            }
            Resolution::PinnedUnavailable { server_name } => {
                println!(
                    "{:>w$} -> NONE  [pinned to {}, which takes no logins]",
                    username,
                    server_name,
                    w = width
                );
            }
            Resolution::NoCandidate => {
                println!("{:>w$} -> NONE  [no usable server]", username, w = width);
            }
        }
    }

    Ok(())
}
