//! HTTP status fetcher.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ProbeError, StatusFetcher, StatusReport};
use crate::store::{MachineStatus, Target};

/// Fetches status over HTTP with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpStatusFetcher {
    /// Build a fetcher whose requests all give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    fn request_error(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, ProbeError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        serde_json::from_slice(&body).map_err(|e| ProbeError::Decode(e.to_string()))
    }
}

/// Endpoints without a scheme are requested over plain HTTP.
pub fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_status(&self, target: &Target) -> Result<StatusReport, ProbeError> {
        let response = self
            .client
            .post(normalize_url(&target.endpoint))
            .json(&json!({ "server": target.name }))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let body = self.read_json(response).await?;
        StatusReport::from_json(body)
    }

    async fn fetch_fleet(&self, endpoint: &str) -> Result<Vec<MachineStatus>, ProbeError> {
        let response = self
            .client
            .get(normalize_url(endpoint))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let body = self.read_json(response).await?;
        serde_json::from_value(body).map_err(|e| ProbeError::Decode(e.to_string()))
    }
}
