use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Slot holding the most recently published stats snapshot.
///
/// The aggregator builds a fresh snapshot off to the side and swaps the
/// inner `Arc` in one write; readers clone the `Arc` and never observe a
/// half-built snapshot.
pub type SnapshotSlot = Arc<RwLock<Arc<StatsSnapshot>>>;

/// Application state shared across API handlers
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SnapshotSlot,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            snapshot: Arc::new(RwLock::new(Arc::new(StatsSnapshot::default()))),
        }
    }
}

/// Bootstrap node list as published at the configured JSON URL
#[derive(Debug, Clone, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<NodeListEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeListEntry {
    pub url: String,
    pub port: u16,
}

/// General daemon info as returned by the node's `/getinfo` call.
///
/// Every field is optional; daemons across forks disagree on which of
/// these they report and unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub height: Option<u64>,
    pub network_height: Option<u64>,
    pub difficulty: Option<u64>,
    pub hashrate: Option<u64>,
    pub tx_count: Option<u64>,
    pub tx_pool_size: Option<u64>,
    pub incoming_connections_count: Option<u64>,
    pub outgoing_connections_count: Option<u64>,
    pub white_peerlist_size: Option<u64>,
    pub grey_peerlist_size: Option<u64>,
    pub last_known_block_index: Option<u64>,
    pub major_version: Option<u32>,
    pub synced: Option<bool>,
    pub version: Option<String>,
    pub status: Option<String>,
}

/// Fee policy as returned by the node's `/fee` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeInfo {
    pub address: Option<String>,
    pub amount: Option<u64>,
    pub status: Option<String>,
}

/// Connected-peer list as returned by the node's `/getpeers` call
#[derive(Debug, Clone, Deserialize)]
pub struct PeerListResponse {
    #[serde(default)]
    pub peers: Vec<String>,
    pub status: Option<String>,
}

/// Response entry from the geo IP batch API
#[derive(Debug, Clone, Deserialize)]
pub struct GeoApiResponse {
    pub status: String,
    #[serde(rename = "countryCode")]
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Resolved location for a host
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Per-node map marker derived from the registry at aggregation time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub name: String,
    pub host: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub valid: bool,
    #[serde(rename = "rDNS")]
    pub reverse_names: Vec<String>,
    pub peers: usize,
    pub peers_known_by: usize,
    pub fee: Option<u64>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

/// One endpoint of a directed arc, with its location snapshotted at
/// aggregation time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArcEndpoint {
    pub host: String,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Directed edge between two geolocated nodes derived from an observed
/// peer relationship
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArcEdge {
    pub origin: ArcEndpoint,
    pub destination: ArcEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramEntry {
    pub key: String,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub node_count: u64,
    pub valid_count: u64,
    pub invalid_count: u64,
}

/// Raw merged per-node detail backing the node API endpoint.
///
/// Fee fields first so that info fields win when both carry a key with
/// the same name (e.g. `status`).
#[derive(Debug, Clone, Serialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub fee_info: Option<FeeInfo>,
    #[serde(flatten)]
    pub info: Option<NodeInfo>,
}

/// Geography/topology snapshot rebuilt wholesale on each aggregation run
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub markers: Vec<Marker>,
    pub arcs: HashMap<String, Vec<ArcEdge>>,
    pub region_histogram: Vec<HistogramEntry>,
    pub country_histogram: Vec<HistogramEntry>,
    pub global: GlobalStats,
    pub nodes: HashMap<String, NodeDetail>,
}
