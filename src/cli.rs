use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

/// Command-line interface for the nodemap crawler
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "nodemap",
    about = "Crawls the gossip topology of a CryptoNote-style network and serves a geography snapshot",
    version
)]
pub struct Cli {
    /// Address to bind the web server to
    #[clap(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to run the web server on
    #[clap(short, long, default_value = "8080")]
    pub port: u16,

    /// URL of the bootstrap node list JSON
    #[clap(
        long,
        env("NODE_LIST_URL"),
        default_value = "https://raw.githubusercontent.com/turtlecoin/turtlecoin-nodes-json/master/turtlecoin-nodes.json"
    )]
    pub node_list_url: String,

    /// Timeout for node probes and DNS lookups in seconds
    #[clap(long, default_value = "10")]
    pub probe_timeout: u64,

    /// Interval between stats aggregation runs in seconds
    #[clap(long, default_value = "15")]
    pub stats_interval: u64,

    /// Seconds without a probe update before a node is evicted
    #[clap(long, default_value = "3600")]
    pub node_ttl: u64,

    /// The maximum number of concurrent probes
    #[clap(long, default_value = "25")]
    pub max_concurrent_probes: usize,

    /// RPC port substituted for every peer discovered through fan-out
    #[clap(long, default_value = "11898")]
    pub rpc_port: u16,

    /// Delay between a queue drain and the next reseed in seconds
    #[clap(long, default_value = "60")]
    pub reseed_delay: u64,

    /// DNS resolver addresses, comma separated
    #[clap(long, default_value = "8.8.8.8,8.8.4.4", value_delimiter = ',')]
    pub dns_servers: Vec<IpAddr>,
}

impl Cli {
    /// Get the probe timeout as a Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    /// Get the stats interval as a Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval)
    }

    /// Get the node TTL as a Duration
    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.node_ttl)
    }

    /// Get the reseed delay as a Duration
    pub fn reseed_delay(&self) -> Duration {
        Duration::from_secs(self.reseed_delay)
    }
}
