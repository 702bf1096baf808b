//! Init command - write a starter configuration file
//!
//! Produces a commented config with every section present so operators
//! edit values instead of guessing section names. The file is written
//! mode 0600 because it usually ends up carrying the database password.

use super::InitArgs;
use anyhow::{bail, Context, Result};
use rand::Rng;
use std::fs;
use std::path::Path;
use tracing::info;

/// Run the init command
pub async fn run_init(config_path: &Path, args: &InitArgs) -> Result<()> {
    println!("🔧 Initializing dovecot-loadbalancer configuration...\n");

    if config_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory {}", parent.display())
        })?;
    }

    let node_id = args.node_id.clone().unwrap_or_else(generate_node_id);
    println!("📋 Node ID: {}", node_id);

    let content = sample_config(&node_id);
    fs::write(config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(config_path, fs::Permissions::from_mode(0o600))?;
    }
    println!("💾 Saved configuration to {}", config_path.display());

    println!("\n{}", "=".repeat(60));
    println!("✅ Configuration written\n");
    println!("📋 Next Steps:");
    println!("   1. Edit the [database] section:");
    println!("      sudoedit {}", config_path.display());
    println!("   2. Create the schema:");
    println!("      dovecot-loadbalancer schema --apply");
    println!("   3. Register your Dovecot servers:");
    println!("      dovecot-loadbalancer server add --name mx1 --host 10.0.0.11");
    println!("   4. Point the Dovecot proxy passdb at lb_proxy_host()");
    println!("      (see the SQL snippet in the README)");
    println!("   5. Start the daemon:");
    println!("      systemctl start dovecot-loadbalancer\n");

    info!("Configuration written: {}", config_path.display());

    Ok(())
}

/// Generate a random node ID
fn generate_node_id() -> String {
    let n: u32 = rand::thread_rng().gen();
    format!("lb-{:08x}", n)
}

/// Generate configuration file content
fn sample_config(node_id: &str) -> String {
    format!(
        r#"# dovecot-loadbalancer configuration
# Generated by dovecot-loadbalancer init

[node]
# Must be unique per daemon instance; shows up as the lease holder.
id = "{node_id}"
# Lower number = preferred lease holder after a failure.
priority = 10

[database]
host = "127.0.0.1"
port = 5432
dbname = "dovecot_lb"
user = "dovecot_lb"
# password = "change-me"
connect_timeout_secs = 5
pool_size = 4

[health]
probe_interval_secs = 10
probe_timeout_secs = 5
# Consecutive good rounds before a server is published online.
rise = 2
# Consecutive bad rounds before a server is published offline.
fall = 3
jitter_secs = 2

[balancer]
# least-sessions, weighted, or user-hash
policy = "least-sessions"
# Idle unpinned assignments expire after this long. 0 keeps them forever.
sticky_ttl_secs = 604800
# Users on a dead server are re-homed once it has been offline this long.
rehome_grace_secs = 300
maintenance_interval_secs = 60

[failover]
lease_duration_secs = 30
renew_interval_secs = 10
takeover_jitter_secs = 5

[daemon]
# pid_file = "/run/dovecot-loadbalancer.pid"
"#,
        node_id = node_id,
    )
}
