use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const MODELS_PATH: &str = "/v1/models";
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// What a check of the engine's OpenAI-compatible API found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineReachability {
    /// Engine is not running.
    Offline,
    /// Running, but the models endpoint failed or rejected the key.
    Unhealthy,
    Healthy { latency: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Offline,
    Unconfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub state: HealthState,
    pub latency_ms: Option<u64>,
}

/// Per-provider health, keyed by provider name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub checked_at: DateTime<Utc>,
    pub providers: BTreeMap<String, HealthStatus>,
}

impl ProviderHealth {
    /// Combine which providers are linked with what the engine check saw.
    ///
    /// A stopped engine makes every provider offline. Otherwise unlinked
    /// providers are unconfigured and linked ones follow the check.
    pub fn assess<I>(linked: I, engine: EngineReachability) -> Self
    where
        I: IntoIterator<Item = (&'static str, bool)>,
    {
        let providers = linked
            .into_iter()
            .map(|(name, linked)| {
                let status = match engine {
                    EngineReachability::Offline => HealthStatus {
                        state: HealthState::Offline,
                        latency_ms: None,
                    },
                    _ if !linked => HealthStatus {
                        state: HealthState::Unconfigured,
                        latency_ms: None,
                    },
                    EngineReachability::Unhealthy => HealthStatus {
                        state: HealthState::Degraded,
                        latency_ms: None,
                    },
                    EngineReachability::Healthy { latency } => HealthStatus {
                        state: HealthState::Healthy,
                        latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
                    },
                };
                (name.to_string(), status)
            })
            .collect();
        Self {
            checked_at: Utc::now(),
            providers,
        }
    }

    pub fn get(&self, provider: &str) -> Option<&HealthStatus> {
        self.providers.get(provider)
    }
}

/// `GET {base_url}/v1/models` with the client API key. Returns the round
/// trip time of a successful response.
pub async fn check_models(base_url: &str, api_key: Option<&str>) -> Result<Duration, ProxyError> {
    let http = Client::builder()
        .timeout(CHECK_TIMEOUT)
        .build()
        .map_err(|e| ProxyError::Health(e.to_string()))?;
    let mut request = http.get(format!("{}{MODELS_PATH}", base_url.trim_end_matches('/')));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        request = request.bearer_auth(key);
    }

    let started = Instant::now();
    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::Health(e.to_string()))?;
    let latency = started.elapsed();
    let status = response.status();
    if !status.is_success() {
        return Err(ProxyError::Health(format!("HTTP {status}")));
    }
    Ok(latency)
}
