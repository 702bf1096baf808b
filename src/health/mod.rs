//! Dovecot service probing
//!
//! Health is judged by real protocol exchanges, not bare TCP connects:
//! each probe reads the service greeting and says goodbye properly so
//! backend logs stay clean. Per-round results feed rise/fall trackers
//! that turn noisy probes into stable online/offline transitions.

pub mod probe;
pub mod tracker;

pub use probe::{probe_all, probe_server, probe_service, ProbeOutcome, RoundReport, ServiceKind};
pub use tracker::{ProbeTracker, Verdict};
