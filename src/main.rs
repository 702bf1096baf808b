//! dovecot-loadbalancer - load balancing and high availability for Dovecot
//!
//! Defines and monitors backend Dovecot servers in PostgreSQL and keeps
//! the routing data the Dovecot proxies consult on every login.
//!
//! # Architecture
//!
//! This is not a traffic proxy. Dovecot's own proxy feature calls the
//! `lb_proxy_host()` SQL function per login; the daemon feeds that
//! function by probing IMAP/POP3/LMTP, publishing online/offline
//! transitions, and maintaining user-to-server affinity. Multiple
//! daemons may run against the same database; a single-row lease
//! elects the one that publishes.
//!
//! # Usage
//!
//! ```bash
//! # Write a starter config
//! dovecot-loadbalancer init
//!
//! # Create tables, the overview, and the routing function
//! dovecot-loadbalancer schema --apply
//!
//! # Register backend servers
//! dovecot-loadbalancer server add --name mx1 --host 10.0.0.11
//!
//! # Check status
//! dovecot-loadbalancer status
//!
//! # Run the daemon
//! dovecot-loadbalancer run
//! ```

use anyhow::Result;
use dovecot_loadbalancer::cli::{self, Cli, Commands};
use dovecot_loadbalancer::{config, logging, scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    logging::init(cli.verbose);

    match &cli.command {
        Commands::Run(args) => {
            run_daemon(&cli, args).await?;
        }
        Commands::Init(args) => {
            cli::run_init(&cli.config, args).await?;
        }
        Commands::Schema(args) => {
            cli::run_schema(&cli.config, args).await?;
        }
        Commands::Server(args) => {
            cli::run_server(&cli.config, args).await?;
        }
        Commands::User(args) => {
            cli::run_user(&cli.config, args).await?;
        }
        Commands::Route(args) => {
            cli::run_route(&cli.config, args).await?;
        }
        Commands::Status(args) => {
            cli::run_status(&cli.config, args).await?;
        }
        Commands::Check(args) => {
            cli::run_check(&cli.config, args).await?;
        }
    }

    Ok(())
}

/// Run the monitoring daemon
async fn run_daemon(cli: &Cli, _args: &cli::RunArgs) -> Result<()> {
    let config = config::load_from_path(&cli.config)?;
    scheduler::run(config, cli.config.clone()).await
}
