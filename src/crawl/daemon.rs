use reqwest::Client;

use crate::error::AppError;
use crate::models::{FeeInfo, NodeInfo, PeerListResponse};

/// Read-only client for a node's daemon RPC surface.
///
/// Three calls, no writes: general info, fee policy, connected peers.
pub struct DaemonClient<'a> {
    client: &'a Client,
    base: String,
}

impl<'a> DaemonClient<'a> {
    pub fn new(client: &'a Client, host: &str, port: u16) -> Self {
        DaemonClient {
            client,
            base: format!("http://{}:{}", host, port),
        }
    }

    pub async fn get_info(&self) -> Result<NodeInfo, AppError> {
        let response = self
            .client
            .get(format!("{}/getinfo", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn get_fee(&self) -> Result<FeeInfo, AppError> {
        let response = self
            .client
            .get(format!("{}/fee", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn get_peers(&self) -> Result<Vec<String>, AppError> {
        let response = self
            .client
            .get(format!("{}/getpeers", self.base))
            .send()
            .await?
            .error_for_status()?;
        let body: PeerListResponse = response.json().await?;
        Ok(body.peers)
    }
}
