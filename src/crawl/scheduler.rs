use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use super::peer_host;
use super::prober::{Probe, ProbeOutcome};
use super::registry::SharedRegistry;

/// Unit of crawl work; exists only inside the scheduler's queue.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    /// Canonical `"host:port"` registry key.
    pub id: String,
    pub iteration: u64,
    pub host: String,
    pub port: u16,
}

impl CrawlTask {
    pub fn new(host: String, port: u16, iteration: u64) -> Self {
        CrawlTask {
            id: format!("{}:{}", host, port),
            iteration,
            host,
            port,
        }
    }
}

/// Lifecycle points observed by the scheduler, consumed by logging only.
#[derive(Debug)]
pub enum CrawlEvent<'a> {
    Accepted(&'a CrawlTask),
    Filtered(&'a CrawlTask),
    Started(&'a CrawlTask),
    Finished { task: &'a CrawlTask, peer_count: usize },
    Failed(&'a CrawlTask),
    Empty,
    Drained,
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: CrawlEvent<'_>);
}

/// Production sink; forwards scheduler events to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Accepted(task) => tracing::debug!("Task accepted: {}", task.id),
            CrawlEvent::Filtered(task) => {
                tracing::debug!("Filtered duplicate task: {} (iteration {})", task.id, task.iteration)
            }
            CrawlEvent::Started(task) => tracing::debug!("Task started: {}", task.id),
            CrawlEvent::Finished { task, peer_count } => {
                tracing::info!("Task finished: {} ({} peers)", task.id, peer_count)
            }
            CrawlEvent::Failed(task) => tracing::info!("Task failed: {}", task.id),
            CrawlEvent::Empty => tracing::info!("Queue is empty"),
            CrawlEvent::Drained => tracing::info!("Queue is drained"),
        }
    }
}

/// Bounded-concurrency crawl queue with submission-time deduplication.
///
/// Registry mutation happens only in [`CrawlScheduler::complete`], the
/// single task-completion continuation, so probe results never race.
pub struct CrawlScheduler {
    registry: SharedRegistry,
    queue: VecDeque<CrawlTask>,
    concurrency: usize,
    rpc_port: u16,
    events: Arc<dyn EventSink>,
}

impl CrawlScheduler {
    pub fn new(
        registry: SharedRegistry,
        concurrency: usize,
        rpc_port: u16,
        events: Arc<dyn EventSink>,
    ) -> Self {
        CrawlScheduler {
            registry,
            queue: VecDeque::new(),
            concurrency,
            rpc_port,
            events,
        }
    }

    /// Number of tasks waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Submit a task unless this node was already scheduled in the task's
    /// crawl generation. Rejection is silent.
    pub fn submit(&mut self, task: CrawlTask) {
        {
            let mut registry = self.registry.lock();
            if registry.is_scheduled(&task.id, task.iteration) {
                self.events.record(CrawlEvent::Filtered(&task));
                return;
            }
            registry.mark_scheduled(&task);
        }
        self.events.record(CrawlEvent::Accepted(&task));
        self.queue.push_back(task);
    }

    /// Dispatch queued tasks with at most `concurrency` probes in flight,
    /// merging each completion and fanning out discovered peers, until the
    /// queue and the in-flight set are both empty.
    pub async fn drain<P: Probe>(&mut self, prober: &P) {
        let mut in_flight = FuturesUnordered::new();
        let mut announced_empty = false;

        loop {
            while in_flight.len() < self.concurrency {
                match self.queue.pop_front() {
                    Some(task) => {
                        self.events.record(CrawlEvent::Started(&task));
                        in_flight.push(async move {
                            let outcome = prober.probe(&task.host, task.port).await;
                            (task, outcome)
                        });
                    }
                    None => break,
                }
            }

            if self.queue.is_empty() {
                if !announced_empty && !in_flight.is_empty() {
                    self.events.record(CrawlEvent::Empty);
                    announced_empty = true;
                }
            } else {
                announced_empty = false;
            }

            match in_flight.next().await {
                Some((task, outcome)) => self.complete(task, outcome),
                None => break,
            }
        }

        self.events.record(CrawlEvent::Drained);
    }

    /// Merge a finished probe into the registry and fan out its peers as
    /// new tasks in the same crawl generation, with the RPC port override.
    fn complete(&mut self, task: CrawlTask, outcome: ProbeOutcome) {
        {
            let mut registry = self.registry.lock();
            registry.record_outcome(&task, &outcome);
            tracing::debug!("Node count: {}", registry.len());
        }

        if outcome.peer_fetch_failed() {
            self.events.record(CrawlEvent::Failed(&task));
        } else {
            self.events.record(CrawlEvent::Finished {
                task: &task,
                peer_count: outcome.peers.as_ref().map(|peers| peers.len()).unwrap_or(0),
            });
        }

        if let Some(peers) = &outcome.peers {
            for peer in peers {
                match peer_host(peer) {
                    Some(host) => {
                        self.submit(CrawlTask::new(host.to_string(), self.rpc_port, task.iteration));
                    }
                    None => tracing::warn!("Skipping malformed peer address: {:?}", peer),
                }
            }
        }
    }
}
