//! reqwest-backed health probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};

use super::errors::HealthCheckError;
use super::model::{ProbeOutcome, ProbeTarget};
use super::traits::HealthProbe;
use crate::providers::ProviderAuth;

/// Client-level ceiling; each request also carries the provider's own timeout.
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues a GET against the provider's probe URL.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CLIENT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let mut request = self.client.get(&target.url).timeout(target.timeout);

        match &target.auth {
            ProviderAuth::None => {}
            ProviderAuth::Header { header_name, key } => {
                request = request.header(header_name.as_str(), key.as_str());
            }
            ProviderAuth::QueryParam { param_name, key } => {
                request = request.query(&[(param_name.as_str(), key.as_str())]);
            }
        }

        debug!("Health probe: GET {} ({})", target.url, target.provider_id);

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ProbeOutcome::Failed(HealthCheckError::Timeout {
                    timeout_ms: target.timeout.as_millis() as u64,
                });
            }
            Err(e) => return ProbeOutcome::Failed(HealthCheckError::Transport(e.to_string())),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = response.status();
        if status.is_success() {
            ProbeOutcome::Healthy {
                response_time_ms: elapsed_ms,
            }
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            ProbeOutcome::RateLimited
        } else {
            ProbeOutcome::Failed(HealthCheckError::Status {
                status: status.as_u16(),
            })
        }
    }
}
