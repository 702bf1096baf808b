//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dovecot-loadbalancer/config.toml";

/// Load, parse and validate config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    super::validate(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str("[node]\nid = \"lb1\"\n").unwrap();
        assert_eq!(config.node.id, "lb1");
        assert_eq!(config.node.priority, 10);
        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.dbname, "dovecot_lb");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.health.probe_interval_secs, 10);
        assert_eq!(config.health.rise, 2);
        assert_eq!(config.health.fall, 3);
        assert_eq!(config.balancer.policy, "least-sessions");
        assert_eq!(config.balancer.sticky_ttl_secs, 604_800);
        assert_eq!(config.failover.lease_duration_secs, 30);
        assert!(config.daemon.pid_file.is_none());
        super::super::validate(&config).unwrap();
    }

    #[test]
    fn test_missing_node_id_rejected() {
        let result: Result<Config, _> = toml::from_str("[database]\nhost = \"db1\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[node]\nid = \"lb1\"\npriority = 3\n\n[health]\nrise = 1\n",
        )
        .unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.node.id, "lb1");
        assert_eq!(config.node.priority, 3);
        assert_eq!(config.health.rise, 1);
        // Untouched sections still default.
        assert_eq!(config.health.fall, 3);
    }

    #[test]
    fn test_load_missing_file_has_path_in_error() {
        let err = load_from_path(Path::new("/nonexistent/dlb.toml")).unwrap_err();
        assert!(format!("{}", err).contains("/nonexistent/dlb.toml"));
    }
}
