// Poll client for the dashboard backend's /api/data endpoint
use crate::kb_models::{DashboardPayload, DirectionGroup, KBError, Result};
use log::{debug, info};
use std::time::Duration;

/// Source of dashboard payloads. One call per poll tick; either a payload or an error.
#[allow(async_fn_in_trait)]
pub trait ArrivalFeed {
    async fn fetch(&self, direction: DirectionGroup) -> Result<DashboardPayload>;
}

pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeed {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(KBError::ConfigError("Base URL must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KBError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFeed { client, base_url })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/data", self.base_url)
    }
}

impl ArrivalFeed for HttpFeed {
    async fn fetch(&self, direction: DirectionGroup) -> Result<DashboardPayload> {
        let url = self.endpoint();
        debug!("GET {}?direction_group={}", url, direction);

        let response = self
            .client
            .get(&url)
            .query(&[("direction_group", direction.as_str())])
            .send()
            .await
            .map_err(|e| KBError::NetworkError(format!("Failed to fetch bus data: {}", e)))?;

        if !response.status().is_success() {
            return Err(KBError::NetworkError(format!("API returned error: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KBError::NetworkError(format!("Failed to read response: {}", e)))?;

        let payload = DashboardPayload::parse(&body)?;
        info!(
            "Fetched {} route groups, {} buses ({})",
            payload.routes_bus_data.as_ref().map(|r| r.len()).unwrap_or(0),
            payload.bus_count(),
            direction
        );
        Ok(payload)
    }
}
