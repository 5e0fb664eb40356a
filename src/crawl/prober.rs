use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;

use super::daemon::DaemonClient;
use crate::models::{FeeInfo, NodeInfo};

/// Result of one probe against a node.
///
/// Each field is `Some` only if the corresponding sub-operation
/// succeeded; the merge step never overwrites registry state from a
/// `None`.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub info: Option<NodeInfo>,
    pub fee_info: Option<FeeInfo>,
    pub peers: Option<Vec<String>>,
    pub reverse_names: Option<Vec<String>>,
}

impl ProbeOutcome {
    /// The probe-level error condition: only a failed peer-list fetch
    /// flags the node.
    pub fn peer_fetch_failed(&self) -> bool {
        self.peers.is_none()
    }
}

/// Abstracts the probe operation so scheduler tests can run with a mock
/// implementation.
pub(crate) trait Probe {
    async fn probe(&self, host: &str, port: u16) -> ProbeOutcome;
}

/// Best-effort prober issuing the four sub-operations concurrently.
///
/// Never fails outward; a failing sub-operation logs and resolves with
/// no update. Round-trips are bounded by the HTTP client's and the
/// resolver's configured timeouts.
#[derive(Clone)]
pub struct Prober {
    client: Client,
    resolver: TokioAsyncResolver,
}

impl Prober {
    pub fn new(client: Client, resolver: TokioAsyncResolver) -> Self {
        Prober { client, resolver }
    }

    async fn fetch_info(&self, daemon: &DaemonClient<'_>, host: &str, port: u16) -> Option<NodeInfo> {
        match daemon.get_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!("Failed to get info from {}:{}, reason: {}", host, port, e);
                None
            }
        }
    }

    async fn fetch_fee(&self, daemon: &DaemonClient<'_>, host: &str, port: u16) -> Option<FeeInfo> {
        match daemon.get_fee().await {
            Ok(fee_info) => Some(fee_info),
            Err(e) => {
                tracing::debug!("Failed to get fee info from {}:{}, reason: {}", host, port, e);
                None
            }
        }
    }

    async fn fetch_peers(
        &self,
        daemon: &DaemonClient<'_>,
        host: &str,
        port: u16,
    ) -> Option<Vec<String>> {
        match daemon.get_peers().await {
            Ok(peers) => Some(peers),
            Err(e) => {
                tracing::debug!("Failed to get peers from {}:{}, reason: {}", host, port, e);
                None
            }
        }
    }

    async fn reverse_lookup(&self, host: &str) -> Option<Vec<String>> {
        let ip: IpAddr = match host.parse() {
            Ok(ip) => ip,
            Err(_) => {
                tracing::debug!("Skipping reverse lookup for non-address host {}", host);
                return None;
            }
        };
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => Some(
                lookup
                    .iter()
                    .map(|name| name.to_string().trim_end_matches('.').to_string())
                    .collect(),
            ),
            Err(e) => {
                tracing::debug!("Failed reverse lookup for {}, reason: {}", host, e);
                None
            }
        }
    }
}

impl Probe for Prober {
    async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        let daemon = DaemonClient::new(&self.client, host, port);

        let (info, fee_info, peers, reverse_names) = tokio::join!(
            self.fetch_info(&daemon, host, port),
            self.fetch_fee(&daemon, host, port),
            self.fetch_peers(&daemon, host, port),
            self.reverse_lookup(host),
        );

        ProbeOutcome {
            info,
            fee_info,
            peers,
            reverse_names,
        }
    }
}
