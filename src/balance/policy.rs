//! Placement policies

use crate::db::{ServerRow, ServerState};
use anyhow::bail;
use md5::{Digest, Md5};
use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Placement policy for first-contact assignment and re-homing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Lowest sessions-to-weight ratio
    LeastSessions,
    /// Weight-proportional random pick
    Weighted,
    /// Deterministic username hash over cumulative weights
    UserHash,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::LeastSessions => "least-sessions",
            Policy::Weighted => "weighted",
            Policy::UserHash => "user-hash",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "least-sessions" => Ok(Policy::LeastSessions),
            "weighted" => Ok(Policy::Weighted),
            "user-hash" => Ok(Policy::UserHash),
            other => bail!("Unknown policy: {}", other),
        }
    }
}

/// Servers eligible for new assignments
pub fn candidates(servers: &[ServerRow]) -> Vec<&ServerRow> {
    servers
        .iter()
        .filter(|s| s.state == ServerState::Active && s.online && s.weight > 0)
        .collect()
}

/// Pick a server for a user from the candidate set
pub fn select<'a>(
    policy: Policy,
    candidates: &[&'a ServerRow],
    username: &str,
) -> Option<&'a ServerRow> {
    if candidates.is_empty() {
        return None;
    }
    match policy {
        Policy::LeastSessions => least_sessions(candidates),
        Policy::Weighted => weighted(candidates),
        Policy::UserHash => user_hash(candidates, username),
    }
}

/// First 32 bits of md5(username).
///
/// Must match the SQL side's
/// `('x' || substr(md5(u), 1, 8))::bit(32)::bigint`.
pub fn user_hash_key(username: &str) -> u32 {
    let digest = Md5::digest(username.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// Lowest sessions/weight ratio, compared as cross products to stay in
// integers. Ties break on lowest id, like the SQL ORDER BY.
fn least_sessions<'a>(candidates: &[&'a ServerRow]) -> Option<&'a ServerRow> {
    candidates.iter().copied().min_by(|a, b| {
        let lhs = i128::from(a.sessions) * i128::from(b.weight.max(1));
        let rhs = i128::from(b.sessions) * i128::from(a.weight.max(1));
        lhs.cmp(&rhs).then(a.id.cmp(&b.id))
    })
}

// Weight-proportional pick: maximize random()^(1/weight), the same
// exponential sampling the SQL side uses.
fn weighted<'a>(candidates: &[&'a ServerRow]) -> Option<&'a ServerRow> {
    let mut rng = rand::thread_rng();
    candidates
        .iter()
        .copied()
        .map(|server| {
            let r: f64 = rng.gen_range(0.0..1.0);
            (server, r.powf(1.0 / f64::from(server.weight.max(1))))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(server, _)| server)
}

// Hash reduced modulo total weight, walked over cumulative weights in
// id order. Stable while the candidate set and weights are unchanged.
fn user_hash<'a>(candidates: &[&'a ServerRow], username: &str) -> Option<&'a ServerRow> {
    let mut ordered: Vec<&ServerRow> = candidates.to_vec();
    ordered.sort_by_key(|server| server.id);

    let total: u64 = ordered.iter().map(|server| server.weight as u64).sum();
    if total == 0 {
        return None;
    }
    let hash = u64::from(user_hash_key(username)) % total;

    let mut edge = 0u64;
    for server in ordered {
        edge += server.weight as u64;
        if hash < edge {
            return Some(server);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: i32, weight: i32, sessions: i64) -> ServerRow {
        ServerRow {
            id,
            name: format!("mx{}", id),
            host: format!("10.0.0.{}", id),
            imap_port: 143,
            pop3_port: 110,
            lmtp_port: None,
            weight,
            state: ServerState::Active,
            online: true,
            latency_ms: None,
            last_seen: None,
            comment: None,
            sessions,
        }
    }

    #[test]
    fn test_policy_parse_round_trip() {
        for policy in [Policy::LeastSessions, Policy::Weighted, Policy::UserHash] {
            assert_eq!(policy.as_str().parse::<Policy>().unwrap(), policy);
        }
        assert!("round-robin".parse::<Policy>().is_err());
    }

    #[test]
    fn test_user_hash_key_matches_md5_prefix() {
        // RFC 1321 test vectors: md5("") = d41d8cd9..., md5("a") =
        // 0cc175b9..., md5("abc") = 90015098...
        assert_eq!(user_hash_key(""), 0xd41d8cd9);
        assert_eq!(user_hash_key("a"), 0x0cc175b9);
        assert_eq!(user_hash_key("abc"), 0x90015098);
    }

    #[test]
    fn test_candidates_filter() {
        let mut draining = server(2, 100, 0);
        draining.state = ServerState::Draining;
        let mut offline = server(3, 100, 0);
        offline.online = false;
        let zero_weight = server(4, 0, 0);
        let servers = vec![server(1, 100, 0), draining, offline, zero_weight];

        let pool = candidates(&servers);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, 1);
    }

    #[test]
    fn test_least_sessions_picks_lowest_ratio() {
        // 10/200 = 0.05 beats 6/100 = 0.06 despite more sessions.
        let servers = vec![server(1, 200, 10), server(2, 100, 6)];
        let pool = candidates(&servers);
        let picked = select(Policy::LeastSessions, &pool, "jdoe").unwrap();
        assert_eq!(picked.id, 1);
    }

    #[test]
    fn test_least_sessions_tie_breaks_on_id() {
        let servers = vec![server(2, 100, 5), server(1, 100, 5)];
        let pool = candidates(&servers);
        let picked = select(Policy::LeastSessions, &pool, "jdoe").unwrap();
        assert_eq!(picked.id, 1);
    }

    #[test]
    fn test_user_hash_is_deterministic() {
        let servers = vec![server(1, 100, 0), server(2, 100, 0), server(3, 100, 0)];
        let pool = candidates(&servers);
        let first = select(Policy::UserHash, &pool, "jdoe").unwrap().id;
        for _ in 0..5 {
            assert_eq!(select(Policy::UserHash, &pool, "jdoe").unwrap().id, first);
        }
    }

    #[test]
    fn test_user_hash_walks_cumulative_weights() {
        // Weights 1+1, so the pick is key % 2 walked in id order.
        // user_hash_key("a") is odd, user_hash_key("abc") is even.
        let servers = vec![server(1, 1, 0), server(2, 1, 0)];
        let pool = candidates(&servers);
        assert_eq!(select(Policy::UserHash, &pool, "abc").unwrap().id, 1);
        assert_eq!(select(Policy::UserHash, &pool, "a").unwrap().id, 2);
    }

    #[test]
    fn test_weighted_single_candidate() {
        let servers = vec![server(7, 50, 0)];
        let pool = candidates(&servers);
        for _ in 0..10 {
            assert_eq!(select(Policy::Weighted, &pool, "jdoe").unwrap().id, 7);
        }
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        assert!(select(Policy::LeastSessions, &[], "jdoe").is_none());
    }
}
