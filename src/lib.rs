//! Dovecot Load-Balancer library crate
//!
//! Core components for load-balancing and high-availability of backend
//! Dovecot servers. The balancer is not a traffic proxy: Dovecot front-ends
//! resolve the proxy destination for every login through a SQL lookup, and
//! this crate maintains the PostgreSQL tables and routing function those
//! lookups read.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface (daemon and control utility)
//! - [`config`] - Configuration loading and validation
//! - [`db`] - PostgreSQL schema, queries and connection pooling
//! - [`health`] - IMAP/POP3/LMTP service probing and rise/fall tracking
//! - [`balance`] - Placement policies and routing resolution
//! - [`failover`] - Active/standby role around the database lease
//! - [`scheduler`] - Async task orchestration
//! - [`state`] - Runtime state management
//! - [`logging`] - Tracing subscriber setup
//! - [`util`] - Time formatting, jitter helpers

// Allow common stylistic patterns used throughout the codebase.
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod balance;
pub mod cli;
pub mod config;
pub mod db;
pub mod failover;
pub mod health;
pub mod logging;
pub mod scheduler;
pub mod state;
pub mod util;

/// Reported version: the VERSION build environment variable when set,
/// otherwise the Cargo package version.
pub const VERSION: &str = env!("DLB_VERSION");
