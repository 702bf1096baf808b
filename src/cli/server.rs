//! Server management command
//!
//! Register, remove, and list backend Dovecot servers. State changes
//! take effect on the next proxy login; the running daemon notices new
//! rows on its next probe round without a restart.

use super::{ServerAction, ServerAddArgs, ServerArgs, ServerNameArgs, ServerSetWeightArgs};
use crate::db::{self, ServerState};
use crate::util::time::{age_secs, format_duration};
use anyhow::{bail, Context, Result};
use deadpool_postgres::Pool;
use std::path::Path;

/// Run the server command
pub async fn run_server(config_path: &Path, args: &ServerArgs) -> Result<()> {
    let (config, pool) = super::open(config_path).await?;

    match &args.action {
        ServerAction::Add(add_args) => add_server(&pool, add_args, config.health.rise).await,
        ServerAction::Remove(name_args) => remove_server(&pool, name_args).await,
        ServerAction::Enable(name_args) => {
            set_state(&pool, name_args, ServerState::Active).await
        }
        ServerAction::Disable(name_args) => {
            set_state(&pool, name_args, ServerState::Disabled).await
        }
        ServerAction::Drain(name_args) => {
            set_state(&pool, name_args, ServerState::Draining).await
        }
        ServerAction::SetWeight(weight_args) => set_weight(&pool, weight_args).await,
        ServerAction::List => list_servers(&pool).await,
    }
}

/// Register a new backend
async fn add_server(pool: &Pool, args: &ServerAddArgs, rise: u32) -> Result<()> {
    let name = args.name.trim();
    if !is_valid_server_name(name) {
        bail!(
            "Invalid server name: {:?}. Use 1-64 characters from [a-zA-Z0-9._-], starting with a letter or digit",
            args.name
        );
    }

    let host = args.host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        bail!("Invalid host: {:?}", args.host);
    }

    if args.imap_port == 0 && args.pop3_port == 0 && args.lmtp_port.is_none() {
        bail!("At least one of --imap-port, --pop3-port, --lmtp-port must be set, or nothing can be probed");
    }

    let weight = i32::try_from(args.weight).context("Weight out of range")?;

    let server = db::servers::NewServer {
        name,
        host,
        imap_port: args.imap_port,
        pop3_port: args.pop3_port,
        lmtp_port: args.lmtp_port,
        weight,
        comment: args.comment.as_deref(),
    };
    let id = db::servers::insert_server(pool, &server).await?;

    println!("✅ Registered server {} (id {})", name, id);
    println!("   Host:  {}", host);
    println!("   Ports: {}", format_ports(args.imap_port, args.pop3_port, args.lmtp_port));
    println!("   Weight: {}", args.weight);
    println!(
        "\n💡 The server starts offline; it takes logins after {} clean probe round(s).",
        rise
    );
    Ok(())
}

/// Remove a backend and its assignments
async fn remove_server(pool: &Pool, args: &ServerNameArgs) -> Result<()> {
    match db::servers::delete_server(pool, &args.name).await? {
        Some(affinity_dropped) => {
            println!(
                "🗑  Removed server {} ({} assignment(s) dropped with it)",
                args.name, affinity_dropped
            );
            Ok(())
        }
        None => bail!("No such server: {}", args.name),
    }
}

/// Change a backend's administrative state
async fn set_state(pool: &Pool, args: &ServerNameArgs, state: ServerState) -> Result<()> {
    if !db::servers::set_server_state(pool, &args.name, state).await? {
        bail!("No such server: {}", args.name);
    }
    println!("✅ Server {} is now {}", args.name, state);
    match state {
        ServerState::Active => {
            println!("   New logins land here again once it is online.");
        }
        ServerState::Draining => {
            println!("   Existing users stay; no new users are assigned.");
        }
        ServerState::Disabled => {
            println!("   Takes no logins; the daemon re-homes its users on the next maintenance pass.");
        }
    }
    Ok(())
}

/// Change a backend's weight
async fn set_weight(pool: &Pool, args: &ServerSetWeightArgs) -> Result<()> {
    let weight = i32::try_from(args.weight).context("Weight out of range")?;
    if !db::servers::set_server_weight(pool, &args.name, weight).await? {
        bail!("No such server: {}", args.name);
    }
    println!("✅ Server {} weight set to {}", args.name, weight);
    if weight == 0 {
        println!("   Weight 0 stops new assignments; existing users stay put.");
    }
    Ok(())
}

/// List all registered backends
async fn list_servers(pool: &Pool) -> Result<()> {
    let servers = db::servers::list_servers(pool).await?;

    if servers.is_empty() {
        println!("No servers registered");
        println!("\n💡 Add one: dovecot-loadbalancer server add --name mx1 --host 10.0.0.11");
        return Ok(());
    }

    println!("📋 Registered Servers ({}):\n", servers.len());
    println!(
        "{:<4} {:<16} {:<22} {:<14} {:<9} {:<7} {:>6} {:>6}  {}",
        "ID", "NAME", "HOST", "PORTS", "STATE", "ONLINE", "WEIGHT", "SESS", "LAST SEEN"
    );
    println!("{}", "-".repeat(100));

    for server in &servers {
        let online = if server.online { "yes" } else { "NO" };
        let last_seen = server
            .last_seen
            .map(|t| format!("{} ago", format_duration(age_secs(t))))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<4} {:<16} {:<22} {:<14} {:<9} {:<7} {:>6} {:>6}  {}",
            server.id,
            server.name,
            server.host,
            format_ports(server.imap_port, server.pop3_port, server.lmtp_port),
            server.state.as_str(),
            online,
            server.weight,
            server.sessions,
            last_seen
        );
        if let Some(comment) = &server.comment {
            println!("     └ {}", comment);
        }
    }

    Ok(())
}

/// Compact port display, e.g. "143/110" or "143/-/24"
fn format_ports(imap: u16, pop3: u16, lmtp: Option<u16>) -> String {
    let imap = if imap == 0 { "-".to_string() } else { imap.to_string() };
    let pop3 = if pop3 == 0 { "-".to_string() } else { pop3.to_string() };
    match lmtp {
        Some(port) => format!("{}/{}/{}", imap, pop3, port),
        None => format!("{}/{}", imap, pop3),
    }
}

/// Validate a server name
fn is_valid_server_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_server_names() {
        assert!(is_valid_server_name("mx1"));
        assert!(is_valid_server_name("mail-01.example.com"));
        assert!(is_valid_server_name("0backup"));

        assert!(!is_valid_server_name(""));
        assert!(!is_valid_server_name("-leading-dash"));
        assert!(!is_valid_server_name("has space"));
        assert!(!is_valid_server_name(&"x".repeat(65)));
    }

    #[test]
    fn test_format_ports() {
        assert_eq!(format_ports(143, 110, None), "143/110");
        assert_eq!(format_ports(143, 110, Some(24)), "143/110/24");
        assert_eq!(format_ports(0, 110, None), "-/110");
        assert_eq!(format_ports(143, 0, Some(24)), "143/-/24");
    }
}
