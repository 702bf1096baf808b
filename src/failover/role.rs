//! Node role

/// Which hat this daemon instance wears right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the lease: publishes health, runs maintenance
    Active,
    /// Probes quietly, ready to take over
    Standby,
}
