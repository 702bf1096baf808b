//! Active/standby coordination
//!
//! Redundant daemon instances arbitrate through the single `lb_lease`
//! database row instead of talking to each other. Exactly one holder
//! publishes health and runs maintenance; everyone else probes quietly
//! with warm trackers, ready to take over.
//!
//! Expiry arithmetic happens in SQL on the database clock, so nodes
//! need not agree on time. A missing lease row is claimed immediately;
//! an expired one only after a priority-scaled delay, so the preferred
//! node wins contested takeovers.

pub mod role;

pub use role::Role;

use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// This node's view of the lease
#[derive(Debug)]
pub struct FailoverState {
    node_id: String,
    priority: u32,
    role: Role,
    /// Last successful acquire/renew on the local clock
    last_renewed: Option<Instant>,
}

impl FailoverState {
    pub fn new(node_id: String, priority: u32) -> Self {
        Self {
            node_id,
            priority,
            role: Role::Standby,
            last_renewed: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.role == Role::Active
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Apply a reloaded priority; renewals carry it to the lease row
    /// on their next pass
    pub fn set_priority(&mut self, priority: u32) {
        if priority != self.priority {
            info!(
                "Failover priority changed from {} to {}",
                self.priority, priority
            );
            self.priority = priority;
        }
    }

    /// The lease CAS succeeded. Returns true when this was a takeover
    /// rather than a routine renewal.
    pub fn record_renewal(&mut self) -> bool {
        self.last_renewed = Some(Instant::now());
        if self.role == Role::Standby {
            info!("Lease acquired, node {} is now active", self.node_id);
            self.role = Role::Active;
            return true;
        }
        false
    }

    /// The lease CAS was rejected: another node holds an unexpired
    /// lease. Returns true when that demotes us.
    pub fn record_rejection(&mut self) -> bool {
        if self.role == Role::Active {
            warn!("Lease taken over by another node, stepping down to standby");
            self.role = Role::Standby;
            return true;
        }
        false
    }

    /// The lease could not be reached at all. An active node that has
    /// not renewed within a full lease duration must assume the lease
    /// expired under it. Returns true when that demotes us.
    pub fn record_error(&mut self, lease_duration: Duration) -> bool {
        if self.role != Role::Active {
            return false;
        }
        let stale = match self.last_renewed {
            Some(at) => at.elapsed() >= lease_duration,
            None => true,
        };
        if stale {
            warn!(
                "No successful lease renewal within {}s, stepping down to standby",
                lease_duration.as_secs()
            );
            self.role = Role::Standby;
            return true;
        }
        false
    }

    /// Delay before a contested takeover attempt. Priority scales the
    /// base so lower-priority-number nodes try first; jitter spreads
    /// nodes of equal priority.
    pub fn takeover_delay(&self, jitter_secs: u64) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=jitter_secs.saturating_mul(1000));
        Duration::from_secs(u64::from(self.priority)) + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_standby_and_takes_over_once() {
        let mut state = FailoverState::new("lb1".to_string(), 10);
        assert_eq!(state.role(), Role::Standby);
        assert!(state.record_renewal());
        assert!(state.is_active());
        assert!(!state.record_renewal());
    }

    #[test]
    fn test_rejection_demotes_only_active() {
        let mut state = FailoverState::new("lb1".to_string(), 10);
        assert!(!state.record_rejection());
        state.record_renewal();
        assert!(state.record_rejection());
        assert_eq!(state.role(), Role::Standby);
    }

    #[test]
    fn test_error_demotes_after_lease_duration() {
        let mut state = FailoverState::new("lb1".to_string(), 10);
        state.record_renewal();
        assert!(!state.record_error(Duration::from_secs(3600)));
        assert!(state.is_active());
        assert!(state.record_error(Duration::ZERO));
        assert_eq!(state.role(), Role::Standby);
    }

    #[test]
    fn test_takeover_delay_orders_by_priority() {
        let low = FailoverState::new("lb1".to_string(), 1);
        let high = FailoverState::new("lb2".to_string(), 10);
        for _ in 0..20 {
            // Max jitter (2s) cannot close the 9s priority gap.
            assert!(low.takeover_delay(2) < high.takeover_delay(2));
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let state = FailoverState::new("lb1".to_string(), 3);
        assert_eq!(state.takeover_delay(0), Duration::from_secs(3));
    }

    #[test]
    fn test_extreme_jitter_does_not_panic() {
        let state = FailoverState::new("lb1".to_string(), 1);
        assert!(state.takeover_delay(u64::MAX) >= Duration::from_secs(1));
    }

    #[test]
    fn test_reloaded_priority_reaches_takeover_delay() {
        let mut state = FailoverState::new("lb1".to_string(), 10);
        state.set_priority(2);
        assert_eq!(state.priority(), 2);
        assert_eq!(state.takeover_delay(0), Duration::from_secs(2));
    }
}
