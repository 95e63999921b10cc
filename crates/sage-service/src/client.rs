//! HTTP client side of the shim: posts records to a peer agent.

use anyhow::{anyhow, Result};

use sage_proto::api::{HealthResponse, MessageResponse, WireRecord};

pub struct ShimClient {
    http: reqwest::Client,
    base_url: String,
}

impl ShimClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn post_record(&self, record: &WireRecord) -> Result<MessageResponse> {
        let response = self
            .http
            .post(format!("{}/sage/message", self.base_url))
            .json(record)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("peer rejected record ({status}): {body}"));
        }
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        Ok(self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
