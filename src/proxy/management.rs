use crate::config::ProxySettings;
use crate::error::ProxyError;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const MANAGEMENT_PREFIX: &str = "/v0/management";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Authorization page handed out by the engine for one OAuth attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUrl {
    pub url: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct AuthStatusBody {
    #[serde(default)]
    status: String,
}

/// Client for the engine's local management API.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: Client,
    base_url: String,
    key: String,
}

impl ManagementClient {
    pub fn new(base_url: &str, key: &str) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    pub fn for_settings(settings: &ProxySettings) -> Self {
        Self::new(
            &format!("http://127.0.0.1:{}", settings.port),
            &settings.management_key,
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{MANAGEMENT_PREFIX}/{path}", self.base_url))
            .header("X-Management-Key", &self.key)
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response, ProxyError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Management(format!("{what}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Management(format!(
                "{what}: HTTP {status}: {}",
                body.trim()
            )));
        }
        Ok(response)
    }

    /// Set one runtime-adjustable engine setting.
    pub async fn put_value(&self, key: &str, value: Value) -> Result<(), ProxyError> {
        let builder = self.request(Method::PUT, key).json(&json!({ "value": value }));
        self.send(builder, key).await?;
        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> Result<Value, ProxyError> {
        let response = self.send(self.request(Method::GET, key), key).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ProxyError::Management(format!("{key}: invalid response: {e}")))
    }

    pub async fn set_oauth_excluded_models(
        &self,
        provider: &str,
        models: &[String],
    ) -> Result<(), ProxyError> {
        let builder = self
            .request(Method::PATCH, "oauth-excluded-models")
            .json(&json!({ "provider": provider, "models": models }));
        self.send(builder, "oauth-excluded-models").await?;
        Ok(())
    }

    pub async fn delete_oauth_excluded_models(&self, provider: &str) -> Result<(), ProxyError> {
        let builder = self
            .request(Method::DELETE, "oauth-excluded-models")
            .query(&[("provider", provider)]);
        self.send(builder, "oauth-excluded-models").await?;
        Ok(())
    }

    /// Ask the engine to start an OAuth flow. `endpoint` is the provider's
    /// `*-auth-url` path.
    pub async fn auth_url(&self, endpoint: &str) -> Result<AuthUrl, ProxyError> {
        let builder = self
            .request(Method::GET, endpoint)
            .query(&[("is_webui", "true")]);
        let response = self.send(builder, endpoint).await?;
        let auth: AuthUrl = response
            .json()
            .await
            .map_err(|e| ProxyError::Management(format!("{endpoint}: invalid response: {e}")))?;
        if auth.url.is_empty() {
            return Err(ProxyError::Management(format!("{endpoint}: no url in response")));
        }
        Ok(auth)
    }

    /// `true` once the engine has stored credentials for `state`.
    ///
    /// A non-success status means the flow is still in progress.
    pub async fn auth_status(&self, state: &str) -> Result<bool, ProxyError> {
        let response = self
            .request(Method::GET, "get-auth-status")
            .query(&[("state", state)])
            .send()
            .await
            .map_err(|e| ProxyError::Management(format!("get-auth-status: {e}")))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body: AuthStatusBody = response
            .json()
            .await
            .map_err(|e| ProxyError::Management(format!("get-auth-status: invalid response: {e}")))?;
        Ok(body.status == "ok")
    }

    /// Push every setting the engine accepts without a restart.
    ///
    /// Each key is attempted; the last failure is returned.
    pub async fn sync_hot_settings(&self, settings: &ProxySettings) -> Result<(), ProxyError> {
        let values = [
            ("max-retry-interval", json!(settings.max_retry_interval)),
            ("logs-max-total-size-mb", json!(settings.logs_max_total_size_mb)),
            (
                "ampcode/force-model-mappings",
                json!(settings.force_model_mappings),
            ),
            (
                "usage-statistics-enabled",
                json!(settings.usage_stats_enabled),
            ),
        ];

        let mut last_error = None;
        for (key, value) in values {
            if let Err(e) = self.put_value(key, value).await {
                tracing::warn!(key, "failed to push engine setting: {e}");
                last_error = Some(e);
            }
        }
        for (provider, models) in &settings.oauth_excluded_models {
            let result = if models.is_empty() {
                self.delete_oauth_excluded_models(provider).await
            } else {
                self.set_oauth_excluded_models(provider, models).await
            };
            if let Err(e) = result {
                tracing::warn!(%provider, "failed to push excluded models: {e}");
                last_error = Some(e);
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}
