//! Edge cache provider API client
//!
//! Maps the purge operations onto the provider's authenticated HTTP API:
//!
//! - `POST {base}/zones/{zone}/purge_cache` with `purge_everything`, `files`,
//!   `tags` or `prefixes`
//! - `GET {base}/user/tokens/verify`
//!
//! The client is stateless per call and never retries.

use crate::config::PurgeConfig;
use crate::error::{PurgeError, Result};
use crate::models::{ApiErrorDetail, ApiResponse, PurgeBody, PurgeKind, PurgeOutcome};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider's documented limit on items per purge request
pub const MAX_ITEMS_PER_REQUEST: usize = 30;

/// Operations offered by an edge cache provider
///
/// The coordinator only talks to this trait, so tests can substitute a
/// recording implementation for the HTTP client.
#[async_trait]
pub trait PurgeApi: Send + Sync {
    /// Purge every cached object in the zone
    async fn purge_everything(&self) -> Result<PurgeOutcome>;

    /// Purge specific URLs; fails with `InvalidInput` above the item limit
    async fn purge_urls(&self, urls: &[String]) -> Result<PurgeOutcome>;

    /// Purge by cache tag
    async fn purge_tags(&self, tags: &[String]) -> Result<PurgeOutcome>;

    /// Purge by URL prefix
    async fn purge_prefixes(&self, prefixes: &[String]) -> Result<PurgeOutcome>;

    /// Check that the configured token is valid
    async fn verify_token(&self) -> Result<PurgeOutcome>;
}

/// HTTP client for the provider API, authenticated with an API token
pub struct EdgeCacheClient {
    http: Client,
    api_token: String,
    zone_id: String,
    base_url: String,
    enabled: bool,
    item_limit: usize,
}

impl EdgeCacheClient {
    /// Create a client with explicit credentials and the default timeout
    pub fn new(
        api_token: impl Into<String>,
        zone_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(api_token, zone_id, base_url, Duration::from_secs(30))
    }

    /// Create a client with a custom transport timeout
    pub fn with_timeout(
        api_token: impl Into<String>,
        zone_id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PurgeError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(EdgeCacheClient {
            http,
            api_token: api_token.into(),
            zone_id: zone_id.into(),
            base_url: base_url.into(),
            enabled: true,
            item_limit: MAX_ITEMS_PER_REQUEST,
        })
    }

    /// Create a client from configuration
    pub fn from_config(config: &PurgeConfig) -> Result<Self> {
        Ok(Self::with_timeout(
            config.api_token.clone(),
            config.zone_id.clone(),
            config.api_base_url.clone(),
            config.request_timeout(),
        )?
        .with_enabled(config.enabled))
    }

    /// Toggle the administrative kill switch
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Override the per-request item limit (for plans with a higher cap)
    pub fn with_item_limit(mut self, item_limit: usize) -> Self {
        self.item_limit = item_limit.max(1);
        self
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn item_limit(&self) -> usize {
        self.item_limit
    }

    fn purge_endpoint(&self) -> String {
        format!("/zones/{}/purge_cache", self.zone_id)
    }

    /// Apply the short circuits, then issue a `purge_cache` request
    async fn purge(&self, body: PurgeBody) -> Result<PurgeOutcome> {
        let kind = body.kind();

        if !self.enabled {
            info!("Cloudflare purge is disabled. Skipping purge {}.", kind);
            return Ok(PurgeOutcome::disabled());
        }

        if kind != PurgeKind::Everything {
            if body.is_empty() {
                warn!("No items provided for purge {}.", kind);
                return Ok(PurgeOutcome::empty());
            }
            if body.len() > self.item_limit {
                return Err(PurgeError::InvalidInput(format!(
                    "purge {} received {} items, the provider accepts at most {} per request",
                    kind,
                    body.len(),
                    self.item_limit
                )));
            }
        }

        match &body {
            PurgeBody::PurgeEverything(_) => {
                info!("Purging all cached content for zone {}", self.zone_id)
            }
            PurgeBody::Files(urls) => info!("Purging {} URLs from cache: {:?}", urls.len(), urls),
            PurgeBody::Tags(tags) => info!("Purging content by tags: {:?}", tags),
            PurgeBody::Prefixes(prefixes) => {
                info!("Purging content by prefixes: {:?}", prefixes)
            }
        }

        let endpoint = self.purge_endpoint();
        let response = self.send(Method::POST, &endpoint, Some(&body)).await?;
        Ok(PurgeOutcome::from_result(response.result))
    }

    /// Send one request and decode the response envelope
    ///
    /// # Returns
    /// * `Ok(ApiResponse)` for a 2xx response with `success: true`
    /// * `Err(PurgeError::Transport)` if the provider could not be reached
    /// * `Err(PurgeError::Provider)` for any other response
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&PurgeBody>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);
        debug!("Sending {} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", url, e);
            PurgeError::Transport(e.to_string())
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            warn!("Failed to read response body from {}: {}", url, e);
            PurgeError::Transport(format!("Failed to read response body: {}", e))
        })?;
        debug!("Received response from {}: status={}", url, status);

        let decoded: ApiResponse = match serde_json::from_slice(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Undecodable response from {}: status={}, error={}", url, status, e);
                return Err(PurgeError::undecodable(
                    Some(status.as_u16()),
                    &String::from_utf8_lossy(&bytes),
                ));
            }
        };

        if status.is_success() && decoded.success {
            return Ok(decoded);
        }

        let mut errors = decoded.errors;
        if errors.is_empty() {
            errors.push(ApiErrorDetail {
                code: 0,
                message: format!("request failed with HTTP {}", status.as_u16()),
            });
        }
        warn!("Provider rejected request to {}: status={}, errors={:?}", url, status, errors);
        Err(PurgeError::provider(Some(status.as_u16()), errors))
    }
}

#[async_trait]
impl PurgeApi for EdgeCacheClient {
    async fn purge_everything(&self) -> Result<PurgeOutcome> {
        self.purge(PurgeBody::PurgeEverything(true)).await
    }

    async fn purge_urls(&self, urls: &[String]) -> Result<PurgeOutcome> {
        self.purge(PurgeBody::Files(urls.to_vec())).await
    }

    async fn purge_tags(&self, tags: &[String]) -> Result<PurgeOutcome> {
        self.purge(PurgeBody::Tags(tags.to_vec())).await
    }

    async fn purge_prefixes(&self, prefixes: &[String]) -> Result<PurgeOutcome> {
        self.purge(PurgeBody::Prefixes(prefixes.to_vec())).await
    }

    async fn verify_token(&self) -> Result<PurgeOutcome> {
        if !self.enabled {
            info!("Cloudflare purge is disabled. Skipping token verification.");
            return Ok(PurgeOutcome::disabled());
        }

        let response = self.send(Method::GET, "/user/tokens/verify", None).await?;
        Ok(PurgeOutcome::from_result(response.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> EdgeCacheClient {
        // Port 9 (discard) on localhost: any accidental request fails fast
        EdgeCacheClient::new("token", "zone", "http://127.0.0.1:9").unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert!(client.is_enabled());
        assert_eq!(client.zone_id(), "zone");
        assert_eq!(client.item_limit(), MAX_ITEMS_PER_REQUEST);
        assert_eq!(client.purge_endpoint(), "/zones/zone/purge_cache");
    }

    #[test]
    fn test_from_config() {
        let mut config = PurgeConfig::default();
        config.api_token = "t".to_string();
        config.zone_id = "z".to_string();
        config.enabled = false;
        let client = EdgeCacheClient::from_config(&config).unwrap();
        assert!(!client.is_enabled());
        assert_eq!(client.zone_id(), "z");
    }

    #[tokio::test]
    async fn test_empty_inputs_short_circuit() {
        let client = test_client();
        assert!(client.purge_urls(&[]).await.unwrap().is_empty());
        assert!(client.purge_tags(&[]).await.unwrap().is_empty());
        assert!(client.purge_prefixes(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_short_circuits_everything() {
        let client = test_client().with_enabled(false);
        let urls = vec!["https://x.com/a".to_string()];
        assert!(client.purge_everything().await.unwrap().is_disabled());
        assert!(client.purge_urls(&urls).await.unwrap().is_disabled());
        assert!(client.purge_tags(&[]).await.unwrap().is_disabled());
        assert!(client.verify_token().await.unwrap().is_disabled());
    }

    #[tokio::test]
    async fn test_over_limit_is_invalid_input() {
        let client = test_client().with_item_limit(2);
        let urls: Vec<String> = (0..3).map(|i| format!("https://x.com/{}", i)).collect();
        match client.purge_urls(&urls).await {
            Err(PurgeError::InvalidInput(msg)) => assert!(msg.contains("at most 2")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }
}
