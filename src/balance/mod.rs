//! Placement policies and routing resolution
//!
//! The Rust side of the selection logic that `lb_proxy_host` implements
//! in SQL. Both sides must pick the same way: Dovecot assigns users on
//! first contact through the SQL function, the daemon re-homes users
//! with the code here.

pub mod policy;
pub mod resolve;

pub use policy::{candidates, select, user_hash_key, Policy};
pub use resolve::{resolve, Resolution};
