//! Runtime state model

use crate::db::ServerRow;
use crate::failover::Role;
use crate::health::ProbeTracker;
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

/// Shared runtime state
#[derive(Debug)]
pub struct RuntimeState {
    /// Current role (active or standby)
    pub role: Role,
    /// Rise/fall tracker per server id
    pub trackers: HashMap<i32, ProbeTracker>,
    /// Server list from the last successful registry read; probing
    /// falls back to this while the database is unreachable
    pub servers: Vec<ServerRow>,
    /// Last completed probe round
    pub last_round: Option<SystemTime>,
    /// Probe rounds completed since startup
    pub rounds_completed: u64,
    /// Health transitions published since startup
    pub transitions_published: u64,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            role: Role::Standby,
            trackers: HashMap::new(),
            servers: Vec::new(),
            last_round: None,
            rounds_completed: 0,
            transitions_published: 0,
        }
    }

    /// Tracker for a server, seeded from its published state on first
    /// sight so a daemon restart does not republish the database's own
    /// contents back at it
    pub fn tracker_mut(&mut self, server: &ServerRow, rise: u32, fall: u32) -> &mut ProbeTracker {
        let tracker = self
            .trackers
            .entry(server.id)
            .or_insert_with(|| ProbeTracker::seeded(rise, fall, server.online));
        // Re-threading every round is what makes a SIGHUP threshold
        // change reach servers already being tracked.
        tracker.set_thresholds(rise, fall);
        tracker
    }

    /// Drop trackers for servers that left the registry
    pub fn prune_trackers(&mut self) {
        let ids: HashSet<i32> = self.servers.iter().map(|s| s.id).collect();
        self.trackers.retain(|id, _| ids.contains(id));
    }

    /// Corrections `(id, name, online, latency)` for servers whose
    /// published `online` flag disagrees with what the tracker
    /// announced. Trackers latch on the verdict, not the write, so a
    /// publish lost to a database hiccup shows up here until repaired.
    pub fn published_drift(&self, servers: &[ServerRow]) -> Vec<(i32, String, bool, Option<i32>)> {
        servers
            .iter()
            .filter_map(|server| {
                let believed = self.trackers.get(&server.id)?.published()?;
                if believed == server.online {
                    return None;
                }
                let latency = if believed { server.latency_ms } else { None };
                Some((server.id, server.name.clone(), believed, latency))
            })
            .collect()
    }

    pub fn record_round(&mut self) {
        self.last_round = Some(SystemTime::now());
        self.rounds_completed += 1;
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ServerState;
    use crate::health::Verdict;

    fn server(id: i32, online: bool) -> ServerRow {
        ServerRow {
            id,
            name: format!("mx{}", id),
            host: format!("10.0.0.{}", id),
            imap_port: 143,
            pop3_port: 110,
            lmtp_port: None,
            weight: 100,
            state: ServerState::Active,
            online,
            latency_ms: None,
            last_seen: None,
            comment: None,
            sessions: 0,
        }
    }

    #[test]
    fn test_tracker_seeded_from_published_state() {
        let mut state = RuntimeState::new();
        let row = server(1, true);
        let tracker = state.tracker_mut(&row, 2, 3);
        assert_eq!(tracker.published(), Some(true));
    }

    #[test]
    fn test_prune_drops_departed_servers() {
        let mut state = RuntimeState::new();
        let one = server(1, false);
        let two = server(2, false);
        state.tracker_mut(&one, 2, 3);
        state.tracker_mut(&two, 2, 3);

        state.servers = vec![one];
        state.prune_trackers();
        assert!(state.trackers.contains_key(&1));
        assert!(!state.trackers.contains_key(&2));
    }

    #[test]
    fn test_tracker_thresholds_follow_reload() {
        let mut state = RuntimeState::new();
        let row = server(1, true);
        state.tracker_mut(&row, 2, 5).record(false);
        state.tracker_mut(&row, 2, 5).record(false);
        // fall lowered mid-streak applies on the next round
        assert_eq!(state.tracker_mut(&row, 2, 3).record(false), Verdict::GoesOffline);
    }

    #[test]
    fn test_published_drift_after_missed_write() {
        let mut state = RuntimeState::new();
        let row = server(1, true);

        assert_eq!(state.tracker_mut(&row, 2, 2).record(false), Verdict::Unchanged);
        assert_eq!(state.tracker_mut(&row, 2, 2).record(false), Verdict::GoesOffline);
        // Later rounds stay quiet even though nothing was written.
        assert_eq!(state.tracker_mut(&row, 2, 2).record(false), Verdict::Unchanged);

        // The row still carries the stale flag; drift has the repair.
        let drift = state.published_drift(&[row.clone()]);
        assert_eq!(drift, vec![(1, "mx1".to_string(), false, None)]);

        // Once the write lands there is nothing left to correct.
        let mut repaired = row;
        repaired.online = false;
        assert!(state.published_drift(&[repaired]).is_empty());
    }

    #[test]
    fn test_published_drift_going_online_keeps_row_latency() {
        let mut state = RuntimeState::new();
        let mut row = server(1, false);
        row.latency_ms = Some(12);
        assert_eq!(state.tracker_mut(&row, 1, 3).record(true), Verdict::GoesOnline);
        assert_eq!(
            state.published_drift(&[row]),
            vec![(1, "mx1".to_string(), true, Some(12))]
        );
    }

    #[test]
    fn test_published_drift_skips_unseen_servers() {
        let state = RuntimeState::new();
        assert!(state.published_drift(&[server(1, true)]).is_empty());
    }
}
