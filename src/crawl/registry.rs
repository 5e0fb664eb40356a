use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::prober::ProbeOutcome;
use super::scheduler::CrawlTask;
use crate::models::{FeeInfo, NodeInfo};

pub type SharedRegistry = Arc<Mutex<NodeRegistry>>;

/// Last-known state of a discovered node.
///
/// Owned exclusively by the [`NodeRegistry`]; mutated only through the
/// scheduler's completion step and the seeder's TTL sweep.
#[derive(Debug, Clone)]
pub struct TrackedNode {
    /// Display name, the canonical `"host:port"` key.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Crawl generation in which this node was last scheduled.
    pub iteration: u64,
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the most recent probe attempt, success or failure.
    pub last_update: DateTime<Utc>,
    /// Kept at the first-probe time; not advanced on later updates.
    pub last_change: DateTime<Utc>,
    /// True if the most recent probe's peer-list fetch failed.
    pub error: bool,
    pub info: Option<NodeInfo>,
    pub fee_info: Option<FeeInfo>,
    /// Peer addresses from the last successful peer-list fetch.
    pub peers: Vec<String>,
    pub reverse_names: Vec<String>,
}

impl TrackedNode {
    fn new(task: &CrawlTask, now: DateTime<Utc>) -> Self {
        TrackedNode {
            name: task.id.clone(),
            host: task.host.clone(),
            port: task.port,
            iteration: task.iteration,
            first_seen: now,
            last_update: now,
            last_change: now,
            error: false,
            info: None,
            fee_info: None,
            peers: Vec::new(),
            reverse_names: Vec::new(),
        }
    }
}

/// Merge a probe outcome into a tracked node.
///
/// Only sub-results that succeeded overwrite; a failed peer-list fetch
/// flags the node but never reverts previously retrieved data.
pub fn merge_probe(node: &mut TrackedNode, outcome: &ProbeOutcome, now: DateTime<Utc>) {
    node.last_update = now;

    if let Some(info) = &outcome.info {
        node.info = Some(info.clone());
    }
    if let Some(fee_info) = &outcome.fee_info {
        node.fee_info = Some(fee_info.clone());
    }
    if let Some(names) = &outcome.reverse_names {
        node.reverse_names = names.clone();
    }
    match &outcome.peers {
        Some(peers) => {
            node.peers = peers.clone();
            node.error = false;
        }
        None => node.error = true,
    }
}

/// In-memory map of node identity to last-known state; owns TTL eviction.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, TrackedNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TrackedNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackedNode> {
        self.nodes.get_mut(id)
    }

    /// True if this node has already been scheduled in the given crawl
    /// generation.
    pub fn is_scheduled(&self, id: &str, iteration: u64) -> bool {
        self.nodes
            .get(id)
            .map(|node| node.iteration == iteration)
            .unwrap_or(false)
    }

    /// Create the entry if absent and stamp it with the task's iteration.
    ///
    /// Called when a task passes the dedup filter, which is what makes a
    /// duplicate submission in the same generation rejectable before the
    /// first probe completes.
    pub fn mark_scheduled(&mut self, task: &CrawlTask) {
        let now = Utc::now();
        let node = self
            .nodes
            .entry(task.id.clone())
            .or_insert_with(|| TrackedNode::new(task, now));
        node.iteration = task.iteration;
    }

    /// Merge a completed probe into the node's entry, creating it if absent.
    pub fn record_outcome(&mut self, task: &CrawlTask, outcome: &ProbeOutcome) {
        let now = Utc::now();
        let node = self
            .nodes
            .entry(task.id.clone())
            .or_insert_with(|| TrackedNode::new(task, now));
        node.iteration = task.iteration;
        merge_probe(node, outcome, now);
    }

    /// Remove every node whose last probe attempt is older than `ttl`.
    /// Returns the removed ids.
    pub fn sweep_stale(&mut self, ttl: Duration) -> Vec<String> {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(ttl.as_secs() as i64);

        let stale: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| now - node.last_update > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.nodes.remove(id);
        }
        stale
    }

    /// Clone the current node set for aggregation.
    pub fn snapshot_nodes(&self) -> Vec<TrackedNode> {
        self.nodes.values().cloned().collect()
    }
}
