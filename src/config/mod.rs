//! Configuration loading and validation
//!
//! Handles TOML configuration parsing with strict validation.
//! No runtime mutation - a SIGHUP reload swaps in a freshly loaded
//! and validated `Config`.

pub mod file;
mod validation;

pub use file::{load_from_path, DEFAULT_CONFIG_PATH};
pub use validation::{validate, validate_reload};

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Node identity and failover priority
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (lease holder name)
    pub id: String,
    /// Failover priority (lower = preferred active node)
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    10
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub dbname: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            dbname: default_db_name(),
            user: default_db_user(),
            password: None,
            connect_timeout_secs: default_connect_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_name() -> String {
    "dovecot_lb".to_string()
}
fn default_db_user() -> String {
    "dovecot_lb".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_pool_size() -> usize {
    4
}

/// Dovecot service probing settings
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Seconds between probe rounds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Per-connection probe timeout
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Consecutive successful rounds before a server is published online
    #[serde(default = "default_rise")]
    pub rise: u32,
    /// Consecutive failed rounds before a server is published offline
    #[serde(default = "default_fall")]
    pub fall: u32,
    /// Random spread added to the probe interval
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            rise: default_rise(),
            fall: default_fall(),
            jitter_secs: default_jitter(),
        }
    }
}

fn default_probe_interval() -> u64 {
    10
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_rise() -> u32 {
    2
}
fn default_fall() -> u32 {
    3
}
fn default_jitter() -> u64 {
    2
}

/// Placement policy and affinity maintenance settings
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Placement policy: "least-sessions", "weighted" or "user-hash"
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Affinity rows idle longer than this are expired (0 disables expiry)
    #[serde(default = "default_sticky_ttl")]
    pub sticky_ttl_secs: u64,
    /// How long a server must be offline before its users are re-homed
    #[serde(default = "default_rehome_grace")]
    pub rehome_grace_secs: u64,
    /// Seconds between maintenance passes
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            sticky_ttl_secs: default_sticky_ttl(),
            rehome_grace_secs: default_rehome_grace(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_policy() -> String {
    "least-sessions".to_string()
}
fn default_sticky_ttl() -> u64 {
    604_800
}
fn default_rehome_grace() -> u64 {
    300
}
fn default_maintenance_interval() -> u64 {
    60
}

/// Active/standby lease settings
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// Lease lifetime; a lease unrenewed past this is up for takeover
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,
    /// Seconds between renewals by the active node
    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: u64,
    /// Random spread before a contested takeover attempt
    #[serde(default = "default_takeover_jitter")]
    pub takeover_jitter_secs: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration(),
            renew_interval_secs: default_renew_interval(),
            takeover_jitter_secs: default_takeover_jitter(),
        }
    }
}

fn default_lease_duration() -> u64 {
    30
}
fn default_renew_interval() -> u64 {
    10
}
fn default_takeover_jitter() -> u64 {
    5
}

/// Process-level settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// PID file written on startup and removed on shutdown
    pub pid_file: Option<PathBuf>,
}
