//! Routing resolution
//!
//! The in-process rendition of `lb_proxy_host`'s decision order, used
//! by the `route` preview and by maintenance re-homing. Reads only;
//! the SQL function is what writes affinity on login.

use crate::balance::policy::{candidates, select, Policy};
use crate::db::affinity::AffinityRow;
use crate::db::{ServerRow, ServerState};

/// Where a login would land and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Existing affinity honored
    Sticky { server_name: String, host: String },
    /// Pinned to a server that cannot take logins
    PinnedUnavailable { server_name: String },
    /// No usable affinity; policy picks this server
    Fresh { server_name: String, host: String },
    /// Nothing usable; Dovecot will fail the login
    NoCandidate,
}

/// Decide a username against an already-fetched server list
pub fn resolve(
    policy: Policy,
    servers: &[ServerRow],
    affinity: Option<&AffinityRow>,
    username: &str,
) -> Resolution {
    if let Some(row) = affinity {
        match servers.iter().find(|s| s.id == row.server_id) {
            Some(server) => {
                if server.online
                    && matches!(server.state, ServerState::Active | ServerState::Draining)
                {
                    return Resolution::Sticky {
                        server_name: server.name.clone(),
                        host: server.host.clone(),
                    };
                }
                if row.pinned {
                    return Resolution::PinnedUnavailable {
                        server_name: server.name.clone(),
                    };
                }
            }
            // Server vanished between the two reads.
            None if row.pinned => {
                return Resolution::PinnedUnavailable {
                    server_name: row.server_name.clone(),
                }
            }
            None => {}
        }
    }

    let pool = candidates(servers);
    match select(policy, &pool, username) {
        Some(server) => Resolution::Fresh {
            server_name: server.name.clone(),
            host: server.host.clone(),
        },
        None => Resolution::NoCandidate,
    }
}
