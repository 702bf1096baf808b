//! User management command
//!
//! Look up, pin, unpin, and evict user-to-server assignments.

use super::{UserAction, UserArgs, UserPinArgs, UsernameArgs};
use crate::db;
use crate::util::time::{age_secs, format_duration};
use anyhow::{bail, Result};
use deadpool_postgres::Pool;
use std::path::Path;

/// Run the user command
pub async fn run_user(config_path: &Path, args: &UserArgs) -> Result<()> {
    let (_config, pool) = super::open(config_path).await?;

    match &args.action {
        UserAction::Lookup(user_args) => lookup(&pool, user_args).await,
        UserAction::Pin(pin_args) => pin(&pool, pin_args).await,
        UserAction::Unpin(user_args) => unpin(&pool, user_args).await,
        UserAction::Evict(user_args) => evict(&pool, user_args).await,
    }
}

/// Show a user's current assignment
async fn lookup(pool: &Pool, args: &UsernameArgs) -> Result<()> {
    match db::affinity::lookup(pool, &args.username).await? {
        Some(affinity) => {
            println!("📋 {}", affinity.username);
            println!("   Server:     {} ({})", affinity.server_name, affinity.host);
            println!("   Pinned:     {}", if affinity.pinned { "yes" } else { "no" });
            println!(
                "   Assigned:   {} ago",
                format_duration(age_secs(affinity.assigned_at))
            );
            println!(
                "   Last login: {} ago",
                format_duration(age_secs(affinity.last_login))
            );
        }
        None => {
            println!("No assignment for {} (first login will create one)", args.username);
        }
    }
    Ok(())
}

/// Pin a user to a server
async fn pin(pool: &Pool, args: &UserPinArgs) -> Result<()> {
    let target = match &args.server {
        Some(name) => match db::servers::get_server(pool, name).await? {
            Some(server) => Some(server),
            None => bail!("No such server: {}", name),
        },
        None => None,
    };

    let pinned = db::affinity::pin_user(pool, &args.username, target.as_ref().map(|s| s.id)).await?;
    if !pinned {
        bail!(
            "{} has no assignment to pin; name a target with --server",
            args.username
        );
    }

    match target {
        Some(server) => println!("📌 {} pinned to {} ({})", args.username, server.name, server.host),
        None => println!("📌 {} pinned to their current server", args.username),
    }
    println!("   Pinned users never move, even when the server goes offline.");
    Ok(())
}

/// Remove a user's pin
async fn unpin(pool: &Pool, args: &UsernameArgs) -> Result<()> {
    if !db::affinity::unpin_user(pool, &args.username).await? {
        bail!("No assignment for {}", args.username);
    }
    println!("✅ {} unpinned (assignment kept, normal expiry applies)", args.username);
    Ok(())
}

/// Drop a user's assignment entirely
async fn evict(pool: &Pool, args: &UsernameArgs) -> Result<()> {
    if !db::affinity::drop_affinity(pool, &args.username).await? {
        bail!("No assignment for {}", args.username);
    }
    println!("🗑  Assignment for {} dropped", args.username);
    println!("   The next login places them fresh by the active policy.");
    Ok(())
}
