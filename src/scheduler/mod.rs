//! Task scheduling and main loops
//!
//! Orchestrates all async tasks: probing, lease keeping, maintenance,
//! signal handling. All tokio::spawn calls live here.

mod loops;

pub use loops::run;
