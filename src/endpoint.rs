//! Endpoint acquisition (spec §4.G / §5): asks the control-plane service for
//! a rendezvous endpoint before the pool supervisor starts dialing it.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::EndpointError;

/// The rendezvous endpoint handed back by the control-plane service.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    pub host: Option<String>,
    pub port: u16,
    pub secret_key: String,
    pub max_conn_count: i64,
}

/// Ask the control-plane service at `base_url` for an endpoint bound to
/// `local_port`, optionally authenticating with `api_key` (spec §4.G step 1,
/// §6's `--api-key`/`TNNLR_API_KEY`).
pub async fn acquire_endpoint(
    client: &reqwest::Client,
    base_url: &str,
    local_port: u16,
    api_key: Option<&str>,
) -> Result<Endpoint, EndpointError> {
    let mut request = client
        .post(base_url)
        .json(&serde_json::json!({ "port": local_port }));
    if let Some(api_key) = api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(EndpointError::Status(status));
    }

    response.json::<Endpoint>().await.map_err(EndpointError::Decode)
}

/// Acquire an endpoint, retrying up to `retries` additional times with
/// `retry_delay` between attempts (spec §6's `--retry`/`--retry-delay`).
/// Returns the last error if every attempt fails.
pub async fn acquire_endpoint_with_retry(
    client: &reqwest::Client,
    base_url: &str,
    local_port: u16,
    api_key: Option<&str>,
    retries: u32,
    retry_delay: Duration,
) -> Result<Endpoint, EndpointError> {
    let mut attempt = 0;
    loop {
        match acquire_endpoint(client, base_url, local_port, api_key).await {
            Ok(endpoint) => {
                info!(url = %endpoint.url, "acquired endpoint");
                return Ok(endpoint);
            }
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %e, "failed to acquire endpoint, retrying");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
