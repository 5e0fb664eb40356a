//! Crawl worker: scheduler, prober, seeder and stats aggregation, run as
//! one supervised unit.

mod daemon;
mod geo;
mod prober;
mod registry;
mod scheduler;
mod seeder;
mod stats;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::time;

use crate::cli::Cli;
use crate::error::AppError;
use crate::models::AppState;
use prober::Prober;
use registry::NodeRegistry;
use scheduler::{CrawlScheduler, LogSink};
use seeder::{HttpBootstrapSource, Seeder};
use stats::StatsAggregator;

const WORKER_RESTART_DELAY: Duration = Duration::from_secs(5);
const SEED_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Host part of a `"host:port"` peer address, verbatim.
pub(crate) fn peer_host(peer: &str) -> Option<&str> {
    peer.split(':').next().filter(|host| !host.is_empty())
}

fn create_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("nodemap/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Request(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn build_resolver(servers: &[IpAddr], timeout: Duration) -> TokioAsyncResolver {
    let nameservers = NameServerConfigGroup::from_ips_clear(servers, 53, true);
    let mut options = ResolverOpts::default();
    options.timeout = timeout;
    TokioAsyncResolver::tokio(
        ResolverConfig::from_parts(None, Vec::new(), nameservers),
        options,
    )
}

/// Run the crawl worker under supervision: any termination, panics
/// included, spawns a replacement after a fixed delay. Crawl state is not
/// persisted across restarts; the snapshot slot keeps serving the last
/// published snapshot until the new worker replaces it.
pub async fn run_supervised(state: AppState, cli: Cli) {
    loop {
        let worker = tokio::spawn(run_worker(state.clone(), cli.clone()));
        match worker.await {
            Ok(()) => tracing::error!("Crawl worker exited, spawning replacement..."),
            Err(e) => tracing::error!("Crawl worker died: {}, spawning replacement...", e),
        }
        time::sleep(WORKER_RESTART_DELAY).await;
    }
}

/// One worker lifetime: a fresh registry, the seed/drain/reseed crawl
/// loop, and the stats timer, multiplexed on a single task.
async fn run_worker(state: AppState, cli: Cli) {
    let client = match create_http_client(cli.probe_timeout()) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("{}", e);
            return;
        }
    };
    let resolver = build_resolver(&cli.dns_servers, cli.probe_timeout());
    let registry = Arc::new(Mutex::new(NodeRegistry::new()));

    let prober = Prober::new(client.clone(), resolver.clone());
    let source = HttpBootstrapSource::new(client.clone(), cli.node_list_url.clone());
    let mut seeder = Seeder::new(
        source,
        resolver,
        registry.clone(),
        cli.node_ttl(),
        SEED_RETRY_DELAY,
    );
    let mut scheduler = CrawlScheduler::new(
        registry.clone(),
        cli.max_concurrent_probes,
        cli.rpc_port,
        Arc::new(LogSink),
    );
    let aggregator = StatsAggregator::new(
        registry,
        state.snapshot.clone(),
        client,
        cli.stats_interval(),
    );

    let reseed_delay = cli.reseed_delay();
    let crawl = async move {
        loop {
            seeder.seed(&mut scheduler).await;
            scheduler.drain(&prober).await;
            tracing::info!("Reseeding queue in {} seconds", reseed_delay.as_secs());
            time::sleep(reseed_delay).await;
        }
    };

    tokio::join!(crawl, aggregator.run());
}

#[cfg(test)]
mod tests {
    use super::peer_host;

    #[test]
    fn peer_host_takes_the_host_part_verbatim() {
        assert_eq!(peer_host("1.2.3.4:11898"), Some("1.2.3.4"));
        assert_eq!(peer_host("node.example.com:80"), Some("node.example.com"));
        assert_eq!(peer_host("1.2.3.4"), Some("1.2.3.4"));
        assert_eq!(peer_host(":11898"), None);
        assert_eq!(peer_host(""), None);
    }
}
