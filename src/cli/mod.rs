//! Command-line interface for dovecot-loadbalancer
//!
//! Provides main commands:
//! - `run` - Run the monitoring daemon
//! - `init` - Write a starter configuration file
//! - `schema` - Print or apply the database schema
//! - `server` - Register and manage backend Dovecot servers
//! - `user` - Inspect, pin, and evict user assignments
//! - `route` - Dry-run the routing decision for one or more users
//! - `status` - Show lease, policy, and server health
//! - `check` - Probe every registered server once and report
//!
//! Routing itself happens inside PostgreSQL; every command here talks
//! to the same database the Dovecot proxies query, so the utility works
//! from any host that can reach it, daemon running or not.

mod check;
mod init;
mod route;
mod schema;
mod server;
mod status;
mod user;

pub use check::run_check;
pub use init::run_init;
pub use route::run_route;
pub use schema::run_schema;
pub use server::run_server;
pub use status::run_status;
pub use user::run_user;

use crate::config::{self, Config, DEFAULT_CONFIG_PATH};
use crate::db;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deadpool_postgres::Pool;
use std::path::{Path, PathBuf};

/// dovecot-loadbalancer - load balancing and failover for Dovecot IMAP/POP3
#[derive(Parser, Debug)]
#[command(name = "dovecot-loadbalancer")]
#[command(author, version = crate::VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitoring daemon (typically called by systemd)
    Run(RunArgs),

    /// Write a starter configuration file
    Init(InitArgs),

    /// Print the database schema, or apply it with --apply
    Schema(SchemaArgs),

    /// Register and manage backend Dovecot servers
    Server(ServerArgs),

    /// Inspect, pin, and evict user assignments
    User(UserArgs),

    /// Show which server one or more users would be routed to
    Route(RouteArgs),

    /// Show lease, policy, and server health
    Status(StatusArgs),

    /// Probe every registered server once and report
    Check(CheckArgs),
}

/// Arguments for run command (daemon mode)
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stay in the foreground. The daemon never forks; the flag exists
    /// for init-script compatibility.
    #[arg(long, default_value_t = false)]
    pub foreground: bool,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Node ID to write into the configuration (random if omitted)
    #[arg(long)]
    pub node_id: Option<String>,
}

/// Arguments for schema command
#[derive(Parser, Debug)]
pub struct SchemaArgs {
    /// Apply the schema to the configured database instead of printing it
    #[arg(long, default_value_t = false)]
    pub apply: bool,
}

/// Arguments for server command
#[derive(Parser, Debug)]
pub struct ServerArgs {
    #[command(subcommand)]
    pub action: ServerAction,
}

/// Server subcommands
#[derive(Subcommand, Debug)]
pub enum ServerAction {
    /// Register a backend Dovecot server
    Add(ServerAddArgs),

    /// Remove a server and every assignment that points at it
    Remove(ServerNameArgs),

    /// Mark a server active (takes logins again)
    Enable(ServerNameArgs),

    /// Mark a server disabled (takes no logins, users get re-homed)
    Disable(ServerNameArgs),

    /// Mark a server draining (existing users stay, no new assignments)
    Drain(ServerNameArgs),

    /// Change a server's load-balancing weight
    SetWeight(ServerSetWeightArgs),

    /// List all registered servers
    List,
}

/// Arguments for adding a server
#[derive(Parser, Debug)]
pub struct ServerAddArgs {
    /// Unique server name (e.g. mx1)
    #[arg(long)]
    pub name: String,

    /// Hostname or IP address the Dovecot proxies connect to
    #[arg(long)]
    pub host: String,

    /// IMAP port (0 disables the IMAP probe)
    #[arg(long, default_value_t = 143)]
    pub imap_port: u16,

    /// POP3 port (0 disables the POP3 probe)
    #[arg(long, default_value_t = 110)]
    pub pop3_port: u16,

    /// LMTP port (probed only when set)
    #[arg(long)]
    pub lmtp_port: Option<u16>,

    /// Weight for load balancing (higher = more users)
    #[arg(long, default_value_t = 100)]
    pub weight: u32,

    /// Optional free-form comment
    #[arg(long)]
    pub comment: Option<String>,
}

/// Arguments for commands addressing a server by name
#[derive(Parser, Debug)]
pub struct ServerNameArgs {
    /// Server name
    #[arg(long)]
    pub name: String,
}

/// Arguments for set-weight
#[derive(Parser, Debug)]
pub struct ServerSetWeightArgs {
    /// Server name
    #[arg(long)]
    pub name: String,

    /// New weight (0 stops new assignments without draining)
    #[arg(long)]
    pub weight: u32,
}

/// Arguments for user command
#[derive(Parser, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub action: UserAction,
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Show a user's current assignment
    Lookup(UsernameArgs),

    /// Pin a user to their current server, or to --server
    Pin(UserPinArgs),

    /// Clear a user's pin (assignment stays, expiry applies again)
    Unpin(UsernameArgs),

    /// Drop a user's assignment entirely (fresh placement on next login)
    Evict(UsernameArgs),
}

/// Arguments for commands addressing a user
#[derive(Parser, Debug)]
pub struct UsernameArgs {
    /// Login username as Dovecot sees it
    #[arg(long)]
    pub username: String,
}

/// Arguments for pinning a user
#[derive(Parser, Debug)]
pub struct UserPinArgs {
    /// Login username as Dovecot sees it
    #[arg(long)]
    pub username: String,

    /// Pin to this server instead of the current assignment
    #[arg(long)]
    pub server: Option<String>,
}

/// Arguments for route command
#[derive(Parser, Debug)]
pub struct RouteArgs {
    /// Usernames to resolve
    #[arg(required = true)]
    pub usernames: Vec<String>,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format (text or json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Arguments for check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Override the configured probe timeout
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Parse command line arguments
pub fn parse() -> Cli {
    Cli::parse()
}

/// Load the configuration and open a database pool for a one-shot
/// command. Pings once so connection problems surface immediately
/// instead of on the first query.
pub(crate) async fn open(config_path: &Path) -> Result<(Config, Pool)> {
    let config = config::load_from_path(config_path)?;
    let pool = db::build_pool(&config.database)?;
    db::ping(&pool)
        .await
        .with_context(|| format!("Database {} is unreachable", config.database.host))?;
    Ok((config, pool))
}
