//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::Config;
use crate::balance::Policy;
use anyhow::{bail, Result};

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_node(config)?;
    validate_database(config)?;
    validate_health(config)?;
    validate_balancer(config)?;
    validate_failover(config)?;
    Ok(())
}

/// Validate a reloaded configuration against the running one.
///
/// The database target and the node identity are fixed for the lifetime
/// of the process; a reload changing either is rejected.
pub fn validate_reload(current: &Config, next: &Config) -> Result<()> {
    validate(next)?;

    if next.node.id != current.node.id {
        bail!(
            "node.id cannot change across reloads ({} -> {})",
            current.node.id,
            next.node.id
        );
    }

    let a = &current.database;
    let b = &next.database;
    if a.host != b.host || a.port != b.port || a.dbname != b.dbname || a.user != b.user {
        bail!("database target cannot change across reloads (restart the daemon instead)");
    }

    Ok(())
}

fn validate_node(config: &Config) -> Result<()> {
    if config.node.id.is_empty() {
        bail!("node.id cannot be empty");
    }
    if config.node.id.len() > 64 {
        bail!("node.id too long (max 64 chars)");
    }
    Ok(())
}

fn validate_database(config: &Config) -> Result<()> {
    if config.database.port == 0 {
        bail!("database.port cannot be 0");
    }
    if config.database.pool_size == 0 {
        bail!("database.pool_size must be at least 1");
    }
    Ok(())
}

fn validate_health(config: &Config) -> Result<()> {
    if config.health.rise == 0 {
        bail!("health.rise must be at least 1");
    }
    if config.health.fall == 0 {
        bail!("health.fall must be at least 1");
    }
    if config.health.probe_timeout_secs >= config.health.probe_interval_secs {
        bail!(
            "health.probe_timeout_secs ({}) must be less than health.probe_interval_secs ({})",
            config.health.probe_timeout_secs,
            config.health.probe_interval_secs
        );
    }
    Ok(())
}

fn validate_balancer(config: &Config) -> Result<()> {
    if config.balancer.policy.parse::<Policy>().is_err() {
        bail!(
            "Unknown balancer.policy: {} (use 'least-sessions', 'weighted' or 'user-hash')",
            config.balancer.policy
        );
    }
    Ok(())
}

fn validate_failover(config: &Config) -> Result<()> {
    if config.failover.renew_interval_secs >= config.failover.lease_duration_secs {
        bail!(
            "failover.renew_interval_secs ({}) must be less than failover.lease_duration_secs ({})",
            config.failover.renew_interval_secs,
            config.failover.lease_duration_secs
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str("[node]\nid = \"lb1\"\n").unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        validate(&base_config()).unwrap();
    }

    #[test]
    fn test_empty_node_id_rejected() {
        let mut config = base_config();
        config.node.id = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_probe_timeout_must_undercut_interval() {
        let mut config = base_config();
        config.health.probe_timeout_secs = 10;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut config = base_config();
        config.balancer.policy = "round-robin".to_string();
        let err = validate(&config).unwrap_err();
        assert!(format!("{}", err).contains("round-robin"));
    }

    #[test]
    fn test_renew_must_undercut_lease() {
        let mut config = base_config();
        config.failover.renew_interval_secs = 30;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_reload_keeps_node_and_database() {
        let current = base_config();

        let mut next = base_config();
        next.health.probe_interval_secs = 30;
        validate_reload(&current, &next).unwrap();

        let mut next = base_config();
        next.node.id = "lb2".to_string();
        assert!(validate_reload(&current, &next).is_err());

        let mut next = base_config();
        next.database.host = "10.0.0.9".to_string();
        assert!(validate_reload(&current, &next).is_err());
    }
}
