use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use tokio::time;

use super::registry::SharedRegistry;
use super::scheduler::{CrawlScheduler, CrawlTask};
use crate::error::AppError;
use crate::models::NodeList;

/// Abstracts the bootstrap list fetch so seeder tests can run with a
/// scripted implementation.
pub(crate) trait BootstrapSource {
    async fn fetch(&self) -> Result<NodeList, AppError>;
}

/// Fetches the bootstrap node list from the configured JSON URL.
/// Compressed response bodies are decompressed transparently.
pub struct HttpBootstrapSource {
    client: Client,
    url: String,
}

impl HttpBootstrapSource {
    pub fn new(client: Client, url: String) -> Self {
        HttpBootstrapSource { client, url }
    }
}

impl BootstrapSource for HttpBootstrapSource {
    async fn fetch(&self) -> Result<NodeList, AppError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Seeds the crawl queue from the bootstrap node list.
///
/// Owns the crawl generation counter; a new iteration starts on every
/// successful seed and fan-out tasks inherit it from their discoverer.
pub struct Seeder<S> {
    source: S,
    resolver: TokioAsyncResolver,
    registry: SharedRegistry,
    node_ttl: Duration,
    retry_delay: Duration,
    iteration: u64,
}

impl<S: BootstrapSource> Seeder<S> {
    pub fn new(
        source: S,
        resolver: TokioAsyncResolver,
        registry: SharedRegistry,
        node_ttl: Duration,
        retry_delay: Duration,
    ) -> Self {
        Seeder {
            source,
            resolver,
            registry,
            node_ttl,
            retry_delay,
            iteration: 0,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Start a new crawl generation: fetch the bootstrap list (retrying
    /// forever on failure), evict stale registry entries, then submit one
    /// task per resolved bootstrap address.
    pub async fn seed(&mut self, scheduler: &mut CrawlScheduler) {
        let list = loop {
            match self.source.fetch().await {
                Ok(list) => break list,
                Err(e) => {
                    tracing::warn!("Error fetching bootstrap node list, retrying: {}", e);
                    time::sleep(self.retry_delay).await;
                }
            }
        };
        tracing::info!("Updated network node list. Total: {}", list.nodes.len());

        {
            let mut registry = self.registry.lock();
            let removed = registry.sweep_stale(self.node_ttl);
            tracing::info!("Removing stale nodes: {} {:?}", removed.len(), removed);
        }

        self.iteration += 1;

        for entry in &list.nodes {
            match self.resolve(&entry.url).await {
                Ok(addresses) => {
                    for address in addresses {
                        scheduler.submit(CrawlTask::new(
                            address.to_string(),
                            entry.port,
                            self.iteration,
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to resolve bootstrap host {}: {}", entry.url, e);
                }
            }
        }

        tracing::info!(
            "Seeded {} tasks for iteration {}",
            scheduler.pending(),
            self.iteration
        );
    }

    /// Resolve a bootstrap hostname to all its addresses. IP literals
    /// short-circuit the resolver.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, AppError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let lookup = self.resolver.lookup_ip(host).await?;
        Ok(lookup.iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::registry::NodeRegistry;
    use crate::crawl::scheduler::LogSink;
    use crate::models::NodeListEntry;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Source failing a scripted number of times before succeeding.
    struct FlakySource {
        remaining_failures: AtomicUsize,
        fetches: AtomicUsize,
        list: NodeList,
    }

    impl FlakySource {
        fn new(failures: usize, list: NodeList) -> Self {
            FlakySource {
                remaining_failures: AtomicUsize::new(failures),
                fetches: AtomicUsize::new(0),
                list,
            }
        }
    }

    impl BootstrapSource for FlakySource {
        async fn fetch(&self) -> Result<NodeList, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Request("connection refused".to_string()));
            }
            Ok(self.list.clone())
        }
    }

    fn bootstrap_list() -> NodeList {
        NodeList {
            nodes: vec![
                NodeListEntry {
                    url: "1.2.3.4".to_string(),
                    port: 11898,
                },
                NodeListEntry {
                    url: "5.6.7.8".to_string(),
                    port: 11898,
                },
            ],
        }
    }

    fn harness(
        source: FlakySource,
    ) -> (Seeder<FlakySource>, CrawlScheduler, SharedRegistry) {
        let registry = Arc::new(Mutex::new(NodeRegistry::new()));
        let resolver = crate::crawl::build_resolver(&[], Duration::from_secs(1));
        let seeder = Seeder::new(
            source,
            resolver,
            registry.clone(),
            Duration::from_secs(3600),
            Duration::from_millis(1),
        );
        let scheduler =
            CrawlScheduler::new(registry.clone(), 25, 11898, Arc::new(LogSink));
        (seeder, scheduler, registry)
    }

    #[tokio::test]
    async fn seed_submits_one_task_per_bootstrap_address() {
        let (mut seeder, mut scheduler, registry) =
            harness(FlakySource::new(0, bootstrap_list()));

        seeder.seed(&mut scheduler).await;

        assert_eq!(seeder.iteration(), 1);
        assert_eq!(scheduler.pending(), 2);
        let registry = registry.lock();
        assert_eq!(registry.get("1.2.3.4:11898").unwrap().iteration, 1);
        assert_eq!(registry.get("5.6.7.8:11898").unwrap().iteration, 1);
    }

    #[tokio::test]
    async fn seed_retries_until_the_fetch_succeeds() {
        let (mut seeder, mut scheduler, _registry) =
            harness(FlakySource::new(2, bootstrap_list()));

        seeder.seed(&mut scheduler).await;

        // Two failed attempts produce no extra iteration increments.
        assert_eq!(seeder.source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(seeder.iteration(), 1);
        assert_eq!(scheduler.pending(), 2);
    }

    #[tokio::test]
    async fn sweep_runs_before_the_new_iteration_is_seeded() {
        let (mut seeder, mut scheduler, registry) =
            harness(FlakySource::new(0, bootstrap_list()));

        seeder.seed(&mut scheduler).await;
        registry.lock().get_mut("1.2.3.4:11898").unwrap().last_update =
            chrono::Utc::now() - chrono::Duration::seconds(7200);

        seeder.seed(&mut scheduler).await;

        // The stale entry was evicted and immediately re-seeded fresh.
        let registry = registry.lock();
        let node = registry.get("1.2.3.4:11898").unwrap();
        assert_eq!(node.iteration, 2);
        assert!(node.peers.is_empty());
    }
}
