use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time;

use super::geo::GeoCache;
use super::peer_host;
use super::registry::{SharedRegistry, TrackedNode};
use crate::models::{
    ArcEdge, ArcEndpoint, GeoInfo, GlobalStats, HistogramEntry, Marker, NodeDetail, SnapshotSlot,
    StatsSnapshot,
};

/// Derives a geography/topology snapshot from the registry on a fixed
/// timer, independent of crawl cadence.
pub struct StatsAggregator {
    registry: SharedRegistry,
    snapshot: SnapshotSlot,
    client: Client,
    geo: GeoCache,
    interval: Duration,
}

impl StatsAggregator {
    pub fn new(
        registry: SharedRegistry,
        snapshot: SnapshotSlot,
        client: Client,
        interval: Duration,
    ) -> Self {
        StatsAggregator {
            registry,
            snapshot,
            client,
            geo: GeoCache::new(),
            interval,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }

    async fn refresh(&mut self) {
        let nodes = self.registry.lock().snapshot_nodes();

        let mut hosts: HashSet<String> = nodes.iter().map(|node| node.host.clone()).collect();
        for node in &nodes {
            for peer in &node.peers {
                if let Some(host) = peer_host(peer) {
                    hosts.insert(host.to_string());
                }
            }
        }
        self.geo.resolve_missing(&self.client, hosts).await;

        let snapshot = build_snapshot(&nodes, &self.geo);
        tracing::debug!(
            "Publishing stats snapshot: {} markers, {} nodes",
            snapshot.markers.len(),
            snapshot.global.node_count
        );
        *self.snapshot.write() = Arc::new(snapshot);
    }
}

/// Dampened, always-positive marker size derived from the peer count.
pub fn bubble_radius(peer_count: usize) -> f64 {
    (peer_count as f64).powf(0.05).max(0.5)
}

/// Per-host arc set, deduplicated by ordered endpoint pair while keeping
/// insertion order.
#[derive(Debug, Default)]
struct ArcBucket {
    seen: HashSet<(String, String)>,
    edges: Vec<ArcEdge>,
}

impl ArcBucket {
    fn insert(&mut self, edge: ArcEdge) {
        let pair = (edge.origin.host.clone(), edge.destination.host.clone());
        if self.seen.insert(pair) {
            self.edges.push(edge);
        }
    }
}

fn endpoint(host: &str, geo: &GeoInfo) -> ArcEndpoint {
    ArcEndpoint {
        host: host.to_string(),
        country: geo.country.clone(),
        latitude: geo.latitude,
        longitude: geo.longitude,
    }
}

fn bucket_label(value: &Option<String>) -> String {
    match value {
        Some(label) if !label.is_empty() => label.clone(),
        _ => "unknown".to_string(),
    }
}

fn sorted_histogram(counts: HashMap<String, u64>) -> Vec<HistogramEntry> {
    let mut entries: Vec<HistogramEntry> = counts
        .into_iter()
        .map(|(key, value)| HistogramEntry { key, value })
        .collect();
    entries.sort_by(|a, b| b.value.cmp(&a.value));
    entries
}

/// Build a snapshot from the current node set and resolved locations.
///
/// Nodes that fail geolocation are excluded from markers and arcs but
/// still count into the "unknown" histogram buckets and the global
/// valid/invalid totals.
pub fn build_snapshot(nodes: &[TrackedNode], geo: &GeoCache) -> StatsSnapshot {
    let mut details: HashMap<String, NodeDetail> = HashMap::new();
    let mut buckets: HashMap<String, ArcBucket> = HashMap::new();

    for node in nodes {
        details.insert(
            node.host.clone(),
            NodeDetail {
                fee_info: node.fee_info.clone(),
                info: node.info.clone(),
            },
        );

        let Some(origin_geo) = geo.lookup(&node.host) else {
            tracing::debug!("Failed geo lookup: {}", node.host);
            continue;
        };
        buckets.entry(node.host.clone()).or_default();

        for peer in &node.peers {
            let Some(peer_hostname) = peer_host(peer) else {
                continue;
            };
            let Some(destination_geo) = geo.lookup(peer_hostname) else {
                tracing::debug!("Failed geo peer lookup: {} from {}", peer_hostname, node.host);
                continue;
            };

            let edge = ArcEdge {
                origin: endpoint(&node.host, origin_geo),
                destination: endpoint(peer_hostname, destination_geo),
            };
            // Record the edge under both endpoints' buckets; the peer only
            // gains a reverse edge of its own if it reports this node back.
            buckets
                .entry(node.host.clone())
                .or_default()
                .insert(edge.clone());
            buckets
                .entry(peer_hostname.to_string())
                .or_default()
                .insert(edge);
        }
    }

    let mut markers = Vec::new();
    let mut region_counts: HashMap<String, u64> = HashMap::new();
    let mut country_counts: HashMap<String, u64> = HashMap::new();
    let mut valid_count = 0u64;
    let mut invalid_count = 0u64;

    for node in nodes {
        let peer_count = node.peers.len();
        let valid = peer_count > 0;
        if valid {
            valid_count += 1;
        } else {
            invalid_count += 1;
        }

        match geo.lookup(&node.host) {
            Some(node_geo) => {
                let peers_known_by = buckets
                    .get(&node.host)
                    .map(|bucket| bucket.edges.len())
                    .unwrap_or(0);
                markers.push(Marker {
                    name: node.name.clone(),
                    host: node.host.clone(),
                    latitude: node_geo.latitude,
                    longitude: node_geo.longitude,
                    radius: bubble_radius(peer_count),
                    valid,
                    reverse_names: node.reverse_names.clone(),
                    peers: peer_count,
                    peers_known_by,
                    fee: node.fee_info.as_ref().and_then(|fee| fee.amount),
                    region: node_geo.region.clone(),
                    country: node_geo.country.clone(),
                    city: node_geo.city.clone(),
                    last_seen: node.last_update,
                    first_seen: node.first_seen,
                });
                *region_counts.entry(bucket_label(&node_geo.region)).or_insert(0) += 1;
                *country_counts.entry(bucket_label(&node_geo.country)).or_insert(0) += 1;
            }
            None => {
                *region_counts.entry("unknown".to_string()).or_insert(0) += 1;
                *country_counts.entry("unknown".to_string()).or_insert(0) += 1;
            }
        }
    }

    markers.sort_by(|a, b| b.radius.partial_cmp(&a.radius).unwrap_or(Ordering::Equal));

    let arcs = buckets
        .into_iter()
        .map(|(host, bucket)| (host, bucket.edges))
        .collect();

    StatsSnapshot {
        markers,
        arcs,
        region_histogram: sorted_histogram(region_counts),
        country_histogram: sorted_histogram(country_counts),
        global: GlobalStats {
            node_count: nodes.len() as u64,
            valid_count,
            invalid_count,
        },
        nodes: details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(host: &str, peers: Vec<&str>) -> TrackedNode {
        let now = Utc::now();
        TrackedNode {
            name: format!("{}:11898", host),
            host: host.to_string(),
            port: 11898,
            iteration: 1,
            first_seen: now,
            last_update: now,
            last_change: now,
            error: false,
            info: None,
            fee_info: None,
            peers: peers.into_iter().map(|p| p.to_string()).collect(),
            reverse_names: Vec::new(),
        }
    }

    fn geo(country: &str, region: &str, lat: f64, lon: f64) -> GeoInfo {
        GeoInfo {
            country: Some(country.to_string()),
            region: Some(region.to_string()),
            city: None,
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn radius_is_dampened_and_floored() {
        assert_eq!(bubble_radius(0), 0.5);
        assert!((bubble_radius(32) - 1.189_207_115).abs() < 1e-6);
        assert!(bubble_radius(1000) > bubble_radius(32));
    }

    #[test]
    fn markers_and_histograms_are_sorted_descending() {
        let nodes = vec![
            node("1.1.1.1", vec![]),
            node("2.2.2.2", vec!["1.1.1.1:11898"]),
            node("3.3.3.3", vec!["1.1.1.1:11898", "2.2.2.2:11898"]),
        ];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));
        cache.insert("2.2.2.2".to_string(), Some(geo("US", "CA", 37.8, -122.4)));
        cache.insert("3.3.3.3".to_string(), Some(geo("DE", "BE", 52.5, 13.4)));

        let snapshot = build_snapshot(&nodes, &cache);

        assert_eq!(snapshot.markers.len(), 3);
        for pair in snapshot.markers.windows(2) {
            assert!(pair[0].radius >= pair[1].radius);
        }
        for pair in snapshot.country_histogram.windows(2) {
            assert!(pair[0].value >= pair[1].value);
        }
        for pair in snapshot.region_histogram.windows(2) {
            assert!(pair[0].value >= pair[1].value);
        }
        assert_eq!(snapshot.country_histogram[0].key, "US");
        assert_eq!(snapshot.country_histogram[0].value, 2);
    }

    #[test]
    fn geolocation_misses_count_into_the_unknown_bucket() {
        let nodes = vec![node("1.1.1.1", vec!["2.2.2.2:11898"]), node("9.9.9.9", vec![])];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));
        cache.insert("2.2.2.2".to_string(), None);
        cache.insert("9.9.9.9".to_string(), None);

        let snapshot = build_snapshot(&nodes, &cache);

        assert_eq!(snapshot.markers.len(), 1);
        assert_eq!(snapshot.global.node_count, 2);
        assert_eq!(snapshot.global.valid_count, 1);
        assert_eq!(snapshot.global.invalid_count, 1);
        let unknown = snapshot
            .country_histogram
            .iter()
            .find(|entry| entry.key == "unknown")
            .unwrap();
        assert_eq!(unknown.value, 1);
        // Node detail is kept even for nodes without a location.
        assert!(snapshot.nodes.contains_key("9.9.9.9"));
    }

    #[test]
    fn edges_land_in_both_buckets_without_a_synthetic_reverse() {
        let nodes = vec![node("1.1.1.1", vec!["2.2.2.2:11898"]), node("2.2.2.2", vec![])];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));
        cache.insert("2.2.2.2".to_string(), Some(geo("DE", "BE", 52.5, 13.4)));

        let snapshot = build_snapshot(&nodes, &cache);

        let origin_bucket = &snapshot.arcs["1.1.1.1"];
        let destination_bucket = &snapshot.arcs["2.2.2.2"];
        assert_eq!(origin_bucket.len(), 1);
        assert_eq!(destination_bucket.len(), 1);
        assert_eq!(origin_bucket[0], destination_bucket[0]);
        assert_eq!(origin_bucket[0].origin.host, "1.1.1.1");
        assert_eq!(origin_bucket[0].destination.host, "2.2.2.2");
    }

    #[test]
    fn mutual_peers_produce_both_directed_edges() {
        let nodes = vec![
            node("1.1.1.1", vec!["2.2.2.2:11898"]),
            node("2.2.2.2", vec!["1.1.1.1:11898"]),
        ];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));
        cache.insert("2.2.2.2".to_string(), Some(geo("DE", "BE", 52.5, 13.4)));

        let snapshot = build_snapshot(&nodes, &cache);

        for host in ["1.1.1.1", "2.2.2.2"] {
            let bucket = &snapshot.arcs[host];
            assert_eq!(bucket.len(), 2);
            assert!(bucket
                .iter()
                .any(|edge| edge.origin.host == "1.1.1.1" && edge.destination.host == "2.2.2.2"));
            assert!(bucket
                .iter()
                .any(|edge| edge.origin.host == "2.2.2.2" && edge.destination.host == "1.1.1.1"));
        }

        // peersKnownBy reflects the node's own bucket size.
        let marker = snapshot
            .markers
            .iter()
            .find(|marker| marker.host == "1.1.1.1")
            .unwrap();
        assert_eq!(marker.peers_known_by, 2);
    }

    #[test]
    fn duplicate_peer_entries_are_deduplicated_per_ordered_pair() {
        let nodes = vec![node(
            "1.1.1.1",
            vec!["2.2.2.2:11898", "2.2.2.2:11899", "2.2.2.2:11898"],
        )];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));
        cache.insert("2.2.2.2".to_string(), Some(geo("DE", "BE", 52.5, 13.4)));

        let snapshot = build_snapshot(&nodes, &cache);
        assert_eq!(snapshot.arcs["1.1.1.1"].len(), 1);
        assert_eq!(snapshot.arcs["2.2.2.2"].len(), 1);
    }

    #[test]
    fn geolocated_node_without_peers_gets_an_empty_bucket() {
        let nodes = vec![node("1.1.1.1", vec![])];
        let mut cache = GeoCache::new();
        cache.insert("1.1.1.1".to_string(), Some(geo("US", "CA", 34.0, -118.2)));

        let snapshot = build_snapshot(&nodes, &cache);
        assert!(snapshot.arcs["1.1.1.1"].is_empty());
    }
}
