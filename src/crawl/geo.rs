use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::Client;
use tokio::time;

use crate::error::AppError;
use crate::models::{GeoApiResponse, GeoInfo};

const GEO_BATCH_URL: &str = "http://ip-api.com/batch?fields=status,countryCode,region,city,lat,lon";
// IP-API allows up to 100 IPs per batch
const GEO_BATCH_SIZE: usize = 100;
const GEO_BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Memoized host locations, negative results included.
///
/// A host is looked up at most once per worker lifetime; a batch that
/// fails outright leaves its hosts unresolved so the next aggregation
/// run retries them.
#[derive(Debug, Default)]
pub struct GeoCache {
    entries: HashMap<String, Option<GeoInfo>>,
}

impl GeoCache {
    pub fn new() -> Self {
        GeoCache {
            entries: HashMap::new(),
        }
    }

    /// Location for a host, `None` when unresolved or lookup failed.
    pub fn lookup(&self, host: &str) -> Option<&GeoInfo> {
        self.entries.get(host).and_then(|entry| entry.as_ref())
    }

    pub fn insert(&mut self, host: String, geo: Option<GeoInfo>) {
        self.entries.insert(host, geo);
    }

    /// Resolve every host not yet in the cache through the batch geo API.
    pub async fn resolve_missing(&mut self, client: &Client, hosts: HashSet<String>) {
        let pending: Vec<String> = hosts
            .into_iter()
            .filter(|host| !self.entries.contains_key(host))
            .collect();
        if pending.is_empty() {
            return;
        }
        tracing::debug!("Resolving {} new host locations", pending.len());

        let chunk_count = pending.chunks(GEO_BATCH_SIZE).count();
        for (i, chunk) in pending.chunks(GEO_BATCH_SIZE).enumerate() {
            match fetch_geo_batch(client, chunk).await {
                Ok(results) => {
                    for (host, geo) in chunk.iter().zip(results) {
                        if geo.is_none() {
                            tracing::debug!("Failed geo lookup: {}", host);
                        }
                        self.insert(host.clone(), geo);
                    }
                }
                Err(e) => {
                    tracing::debug!("Geo batch lookup failed: {}", e);
                }
            }

            // Pause between batches to respect the API's rate limit.
            if i + 1 < chunk_count {
                time::sleep(GEO_BATCH_PAUSE).await;
            }
        }
    }
}

async fn fetch_geo_batch(
    client: &Client,
    hosts: &[String],
) -> Result<Vec<Option<GeoInfo>>, AppError> {
    let batch_request: Vec<serde_json::Value> = hosts
        .iter()
        .map(|host| serde_json::json!({ "query": host }))
        .collect();

    let response = client
        .post(GEO_BATCH_URL)
        .json(&batch_request)
        .send()
        .await?
        .error_for_status()?;
    let entries: Vec<GeoApiResponse> = response.json().await?;

    Ok(entries.into_iter().map(into_geo_info).collect())
}

fn into_geo_info(entry: GeoApiResponse) -> Option<GeoInfo> {
    if entry.status != "success" {
        return None;
    }
    let latitude = entry.lat?;
    let longitude = entry.lon?;
    Some(GeoInfo {
        country: entry.country_code,
        region: entry.region,
        city: entry.city,
        latitude,
        longitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_api_entries_map_to_none() {
        let miss = GeoApiResponse {
            status: "fail".to_string(),
            country_code: None,
            region: None,
            city: None,
            lat: None,
            lon: None,
        };
        assert_eq!(into_geo_info(miss), None);

        let hit = GeoApiResponse {
            status: "success".to_string(),
            country_code: Some("DE".to_string()),
            region: Some("BE".to_string()),
            city: Some("Berlin".to_string()),
            lat: Some(52.52),
            lon: Some(13.405),
        };
        let geo = into_geo_info(hit).unwrap();
        assert_eq!(geo.country.as_deref(), Some("DE"));
        assert_eq!(geo.latitude, 52.52);
    }

    #[test]
    fn negative_results_are_cached() {
        let mut cache = GeoCache::new();
        cache.insert("1.2.3.4".to_string(), None);
        assert!(cache.lookup("1.2.3.4").is_none());
        assert!(!cache.entries.contains_key("5.6.7.8"));
        assert!(cache.entries.contains_key("1.2.3.4"));
    }
}
