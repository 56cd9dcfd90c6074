//! JSON-over-HTTP client for the Docker Engine API.
//!
//! Speaks to the daemon at the configured endpoint (`DOCKER_HOST` with
//! `tcp://` normalized to `http://`). Only the read endpoints backing
//! [`SwarmApi`](super::SwarmApi) are implemented.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::models::{Network, Node, Service, Task};
use super::SwarmApi;
use crate::error::{OperatorError, Result};

const API_VERSION: &str = "v1.43";

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerApi {
    base_url: String,
    http: reqwest::Client,
}

impl DockerApi {
    /// Connect to the daemon at `endpoint`, e.g. `http://localhost:2375`.
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OperatorError::Http(e.to_string()))?;

        Ok(Self {
            base_url: format!("{}/{}", endpoint.trim_end_matches('/'), API_VERSION),
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| OperatorError::Observe(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OperatorError::Observe(format!(
                "{url}: HTTP {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| OperatorError::Observe(format!("{url}: decode: {e}")))
    }
}

#[async_trait]
impl SwarmApi for DockerApi {
    async fn service(&self, name: &str) -> Result<Service> {
        let filters = serde_json::json!({"name": [name]}).to_string();
        let services: Vec<Service> = self
            .get_json("/services", &[("filters", filters)])
            .await?;

        // The name filter is a prefix match; require an exact hit.
        let mut matches: Vec<Service> = services
            .into_iter()
            .filter(|s| s.spec.name == name)
            .collect();

        match matches.len() {
            0 => Err(OperatorError::ServiceNotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(OperatorError::AmbiguousService(name.to_string())),
        }
    }

    async fn service_tasks(&self, service_id: &str) -> Result<Vec<Task>> {
        let filters = serde_json::json!({"service": [service_id]}).to_string();
        self.get_json("/tasks", &[("filters", filters)]).await
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        self.get_json("/nodes", &[]).await
    }

    async fn network(&self, name: &str) -> Result<Network> {
        self.get_json(&format!("/networks/{name}"), &[]).await
    }
}
