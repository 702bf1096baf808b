//! Service probes

use crate::db::ServerRow;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Cap on the greeting read; real greetings fit in a fraction of this
const MAX_GREETING_BYTES: u64 = 1024;

/// Dovecot services this daemon knows how to greet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Imap,
    Pop3,
    Lmtp,
}

impl ServiceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Imap => "imap",
            ServiceKind::Pop3 => "pop3",
            ServiceKind::Lmtp => "lmtp",
        }
    }

    /// Whether a greeting line announces a usable service
    pub fn greeting_ok(&self, line: &str) -> bool {
        match self {
            ServiceKind::Imap => line.starts_with("* OK") || line.starts_with("* PREAUTH"),
            ServiceKind::Pop3 => line.starts_with("+OK"),
            ServiceKind::Lmtp => line.starts_with("220"),
        }
    }

    /// Whether a greeting line announces the server is turning
    /// connections away. Dovecot greets with `* BYE` when shedding
    /// load, which is a refusal rather than a malformed greeting.
    pub fn greeting_refused(&self, line: &str) -> bool {
        matches!(self, ServiceKind::Imap) && line.starts_with("* BYE")
    }

    /// Parting command sent before close
    fn farewell(&self) -> &'static [u8] {
        match self {
            ServiceKind::Imap => b"a1 LOGOUT\r\n",
            ServiceKind::Pop3 | ServiceKind::Lmtp => b"QUIT\r\n",
        }
    }
}

/// Result of probing one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Service greeted correctly
    Ok { rtt: Duration },
    /// Connection failed or was dropped before the greeting
    Refused { error: String },
    /// No connection or greeting within the timeout
    Timeout,
    /// Connected, but the greeting was not the expected one
    BadGreeting { line: String },
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok { .. })
    }
}

/// One server's probe round across its configured services
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub server_id: i32,
    pub server_name: String,
    pub outcomes: Vec<(ServiceKind, u16, ProbeOutcome)>,
}

impl RoundReport {
    /// A round is healthy only when every configured service answered.
    /// A server with no probeable services counts as healthy.
    pub fn healthy(&self) -> bool {
        self.outcomes.iter().all(|(_, _, outcome)| outcome.is_ok())
    }

    /// Worst round-trip across the round's services
    pub fn latency_ms(&self) -> Option<i32> {
        self.outcomes
            .iter()
            .filter_map(|(_, _, outcome)| match outcome {
                ProbeOutcome::Ok { rtt } => Some(rtt.as_millis() as i32),
                _ => None,
            })
            .max()
    }
}

/// Services configured for a server (ports > 0 / present)
pub fn services(server: &ServerRow) -> Vec<(ServiceKind, u16)> {
    let mut list = Vec::new();
    if server.imap_port > 0 {
        list.push((ServiceKind::Imap, server.imap_port));
    }
    if server.pop3_port > 0 {
        list.push((ServiceKind::Pop3, server.pop3_port));
    }
    if let Some(port) = server.lmtp_port {
        list.push((ServiceKind::Lmtp, port));
    }
    list
}

/// Probe one service; the timeout covers connect and greeting together
pub async fn probe_service(
    host: &str,
    port: u16,
    kind: ServiceKind,
    limit: Duration,
) -> ProbeOutcome {
    match timeout(limit, probe_inner(host, port, kind)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::Timeout,
    }
}

async fn probe_inner(host: &str, port: u16, kind: ServiceKind) -> ProbeOutcome {
    let started = Instant::now();

    let mut stream = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => {
            return ProbeOutcome::Refused {
                error: e.to_string(),
            }
        }
    };

    let mut line = String::new();
    {
        // The cap keeps a backend streaming junk without a newline
        // from ballooning the buffer until the timeout fires.
        let mut reader = BufReader::new((&mut stream).take(MAX_GREETING_BYTES));
        match reader.read_line(&mut line).await {
            Ok(0) => {
                return ProbeOutcome::Refused {
                    error: "connection closed before greeting".to_string(),
                }
            }
            Ok(_) => {}
            Err(e) => {
                return ProbeOutcome::Refused {
                    error: e.to_string(),
                }
            }
        }
    }
    let rtt = started.elapsed();

    let greeting = line.trim_end();
    if kind.greeting_refused(greeting) {
        return ProbeOutcome::Refused {
            error: greeting.to_string(),
        };
    }
    if !kind.greeting_ok(greeting) {
        return ProbeOutcome::BadGreeting {
            line: greeting.to_string(),
        };
    }

    // Best effort; the verdict is already in.
    let _ = stream.write_all(kind.farewell()).await;

    ProbeOutcome::Ok { rtt }
}

/// Probe every configured service of one server, sequentially
pub async fn probe_server(server: &ServerRow, limit: Duration) -> RoundReport {
    let mut outcomes = Vec::new();
    for (kind, port) in services(server) {
        let outcome = probe_service(&server.host, port, kind, limit).await;
        if !outcome.is_ok() {
            debug!(
                "Probe {} {} on {}:{} failed: {:?}",
                server.name,
                kind.name(),
                server.host,
                port,
                outcome
            );
        }
        outcomes.push((kind, port, outcome));
    }
    RoundReport {
        server_id: server.id,
        server_name: server.name.clone(),
        outcomes,
    }
}

/// Probe all servers concurrently; reports come back ordered by id
pub async fn probe_all(servers: &[ServerRow], limit: Duration) -> Vec<RoundReport> {
    let mut set = JoinSet::new();
    for server in servers {
        let server = server.clone();
        set.spawn(async move { probe_server(&server, limit).await });
    }

    let mut reports = Vec::with_capacity(servers.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => warn!("Probe task failed: {}", e),
        }
    }
    reports.sort_by_key(|report| report.server_id);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ServerState;

    fn server(imap: u16, pop3: u16, lmtp: Option<u16>) -> ServerRow {
        ServerRow {
            id: 1,
            name: "mx1".to_string(),
            host: "192.0.2.1".to_string(),
            imap_port: imap,
            pop3_port: pop3,
            lmtp_port: lmtp,
            weight: 100,
            state: ServerState::Active,
            online: false,
            latency_ms: None,
            last_seen: None,
            comment: None,
            sessions: 0,
        }
    }

    #[test]
    fn test_imap_greetings() {
        let kind = ServiceKind::Imap;
        assert!(kind.greeting_ok("* OK [CAPABILITY IMAP4rev1] Dovecot ready."));
        assert!(kind.greeting_ok("* PREAUTH [CAPABILITY IMAP4rev1] Logged in."));
        assert!(!kind.greeting_ok("+OK Dovecot ready."));
    }

    #[test]
    fn test_imap_bye_is_a_refusal() {
        let kind = ServiceKind::Imap;
        assert!(kind.greeting_refused("* BYE Too many connections."));
        assert!(!kind.greeting_ok("* BYE Too many connections."));
        assert!(!kind.greeting_refused("* OK Dovecot ready."));
        assert!(!ServiceKind::Pop3.greeting_refused("-ERR busy"));
    }

    #[test]
    fn test_pop3_greetings() {
        let kind = ServiceKind::Pop3;
        assert!(kind.greeting_ok("+OK Dovecot ready."));
        assert!(!kind.greeting_ok("-ERR Service unavailable"));
    }

    #[test]
    fn test_lmtp_greetings() {
        let kind = ServiceKind::Lmtp;
        assert!(kind.greeting_ok("220 mx1.example.org Dovecot ready."));
        assert!(!kind.greeting_ok("421 mx1.example.org Service shutting down"));
    }

    #[test]
    fn test_services_skip_zero_ports() {
        let list = services(&server(143, 0, Some(24)));
        assert_eq!(list, vec![(ServiceKind::Imap, 143), (ServiceKind::Lmtp, 24)]);
        assert!(services(&server(0, 0, None)).is_empty());
    }

    #[test]
    fn test_round_health_and_latency() {
        let report = RoundReport {
            server_id: 1,
            server_name: "mx1".to_string(),
            outcomes: vec![
                (
                    ServiceKind::Imap,
                    143,
                    ProbeOutcome::Ok {
                        rtt: Duration::from_millis(12),
                    },
                ),
                (
                    ServiceKind::Pop3,
                    110,
                    ProbeOutcome::Ok {
                        rtt: Duration::from_millis(40),
                    },
                ),
            ],
        };
        assert!(report.healthy());
        assert_eq!(report.latency_ms(), Some(40));

        let report = RoundReport {
            server_id: 1,
            server_name: "mx1".to_string(),
            outcomes: vec![(ServiceKind::Imap, 143, ProbeOutcome::Timeout)],
        };
        assert!(!report.healthy());
        assert_eq!(report.latency_ms(), None);

        // No configured services counts as healthy.
        let report = RoundReport {
            server_id: 1,
            server_name: "mx1".to_string(),
            outcomes: vec![],
        };
        assert!(report.healthy());
    }
}
