//! HTTP PURGE trigger endpoint
//!
//! Lets other services request purges over HTTP, following the usual CDN
//! PURGE conventions. Every request is handed to the [`PurgeCoordinator`], so
//! triggered purges are deduplicated and debounced like change events.
//!
//! Supported requests:
//! - `PURGE /path/to/page` - purge one URL
//! - `PURGE /*` with `X-Purge-All: true` - purge everything
//! - `PURGE /path` with `X-Purge-Pattern: prefix` - purge by prefix
//! - `PURGE /` with `X-Purge-Tags: a,b` - purge by cache tag
//! - `GET /pending` - URLs waiting for the debounce timer
//! - `GET /metrics` - Prometheus metrics

use crate::coordinator::PurgeCoordinator;
use crate::error::{PurgeError, Result};
use crate::models::build_full_url;
use crate::purge_metrics::PurgeMetrics;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// PURGE request handler
pub struct PurgeHandler {
    coordinator: PurgeCoordinator,
    /// Public site URL; when empty the request's Host header is used
    site_url: String,
    /// Optional auth token; requests must present it when set
    auth_token: Option<String>,
    metrics: Option<Arc<PurgeMetrics>>,
}

/// PURGE response body
#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    /// True when the purge was queued rather than dispatched
    pub queued: bool,
    /// Number of items sent to the provider (0 when queued)
    pub purged_count: usize,
    pub url: Option<String>,
    pub message: String,
}

enum Target {
    Everything,
    Url(String),
    Prefix(String),
    Tags(Vec<String>),
}

impl PurgeHandler {
    /// Create a new PURGE handler
    pub fn new(coordinator: PurgeCoordinator, site_url: impl Into<String>) -> Self {
        Self {
            coordinator,
            site_url: site_url.into(),
            auth_token: None,
            metrics: None,
        }
    }

    /// Require `Authorization: Bearer <token>` or `X-Purge-Token: <token>`
    pub fn with_auth(mut self, auth_token: String) -> Self {
        self.auth_token = Some(auth_token);
        self
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<PurgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle HTTP PURGE request
    pub async fn handle_purge<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>> {
        if req.method().as_str() != "PURGE" {
            return self.error_response(StatusCode::METHOD_NOT_ALLOWED, "Only PURGE method is allowed");
        }

        if let Err(reason) = self.check_auth(&req) {
            if let Some(metrics) = &self.metrics {
                metrics.record_auth_failure(reason);
            }
            return self.error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid or missing authentication token",
            );
        }

        let target = match self.target(&req) {
            Ok(target) => target,
            Err(e) => return self.error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        let (result, url) = match target {
            Target::Everything => {
                info!("Purge everything requested over HTTP");
                let result = self
                    .coordinator
                    .purge_everything(None)
                    .await
                    .map(|outcome| outcome.map(|_| 0));
                (result, None)
            }
            Target::Url(url) => {
                info!("Purge requested over HTTP for URL: {}", url);
                let result = self
                    .coordinator
                    .request_purge([url.clone()], None)
                    .await
                    .map(|report| report.map(|r| r.item_count));
                (result, Some(url))
            }
            Target::Prefix(prefix) => {
                info!("Purge requested over HTTP for prefix: {}", prefix);
                let result = self
                    .coordinator
                    .purge_prefixes([prefix.clone()], None)
                    .await
                    .map(|report| report.map(|r| r.item_count));
                (result, Some(prefix))
            }
            Target::Tags(tags) => {
                info!("Purge requested over HTTP for tags: {:?}", tags);
                let result = self
                    .coordinator
                    .purge_tags(tags, None)
                    .await
                    .map(|report| report.map(|r| r.item_count));
                (result, None)
            }
        };

        match result {
            Ok(Some(purged_count)) => self.json_response(
                StatusCode::OK,
                &PurgeResponse {
                    success: true,
                    queued: false,
                    purged_count,
                    url,
                    message: "Purge completed".to_string(),
                },
            ),
            Ok(None) => self.json_response(
                StatusCode::ACCEPTED,
                &PurgeResponse {
                    success: true,
                    queued: true,
                    purged_count: 0,
                    url,
                    message: "Purge queued".to_string(),
                },
            ),
            Err(e) => {
                warn!("Triggered purge failed: {}", e);
                let status = match e {
                    PurgeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                self.error_response(status, &format!("Failed to purge cache: {}", e))
            }
        }
    }

    /// Work out what the request asks to purge
    fn target<B>(&self, req: &Request<B>) -> Result<Target> {
        let header = |name: &str| req.headers().get(name).and_then(|h| h.to_str().ok());

        if header("x-purge-all").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false) {
            return Ok(Target::Everything);
        }

        if let Some(tags) = header("x-purge-tags") {
            let tags: Vec<String> = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if tags.is_empty() {
                return Err(PurgeError::InvalidInput("X-Purge-Tags is empty".to_string()));
            }
            return Ok(Target::Tags(tags));
        }

        let path = req.uri().path();
        let host = header("host").unwrap_or("localhost");

        match header("x-purge-pattern") {
            Some("prefix") => {
                // Prefixes are matched without a scheme, e.g. "www.example.com/blog"
                let base = if self.site_url.is_empty() {
                    host.to_string()
                } else {
                    strip_scheme(&self.site_url).trim_end_matches('/').to_string()
                };
                Ok(Target::Prefix(format!("{}{}", base, path)))
            }
            Some(other) => Err(PurgeError::InvalidInput(format!(
                "Unsupported purge pattern: {}",
                other
            ))),
            None => {
                let url = if self.site_url.is_empty() {
                    let scheme = if header("x-forwarded-proto") == Some("https") {
                        "https"
                    } else {
                        "http"
                    };
                    format!("{}://{}{}", scheme, host, path)
                } else {
                    build_full_url(&self.site_url, path)
                };
                Ok(Target::Url(url))
            }
        }
    }

    /// Check authentication, returning the failure reason label
    fn check_auth<B>(&self, req: &Request<B>) -> std::result::Result<(), &'static str> {
        let Some(expected) = self.auth_token.as_deref() else {
            return Ok(());
        };

        let bearer = req
            .headers()
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));
        let token_header = req
            .headers()
            .get("x-purge-token")
            .and_then(|h| h.to_str().ok());

        match (bearer, token_header) {
            (None, None) => Err("missing_token"),
            (bearer, token) if bearer == Some(expected) || token == Some(expected) => Ok(()),
            _ => Err("invalid_token"),
        }
    }

    /// Build JSON response
    fn json_response(&self, status: StatusCode, body: &PurgeResponse) -> Result<Response<Full<Bytes>>> {
        let json = serde_json::to_string(body)?;

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache, no-store, must-revalidate")
            .body(Full::new(Bytes::from(json)))
            .map_err(|e| PurgeError::Internal(format!("Failed to build response: {}", e)))
    }

    /// Build error response
    fn error_response(&self, status: StatusCode, message: &str) -> Result<Response<Full<Bytes>>> {
        let response = PurgeResponse {
            success: false,
            queued: false,
            purged_count: 0,
            url: None,
            message: message.to_string(),
        };

        self.json_response(status, &response)
    }

    /// Route one request of the trigger server
    pub async fn route<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let result = if method.as_str() == "PURGE" {
            self.handle_purge(req).await
        } else if method == Method::GET && path == "/pending" {
            let body = serde_json::json!({
                "pending": self.coordinator.pending_urls(),
                "state": format!("{:?}", self.coordinator.state()),
            });
            Ok(plain_response(StatusCode::OK, "application/json", body.to_string()))
        } else if method == Method::GET && path == "/metrics" {
            encode_metrics()
        } else {
            self.error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        };

        result.unwrap_or_else(|e| {
            error!("{} {} failed: {}", method, path, e);
            plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                format!("Error: {}", e),
            )
        })
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted.map_err(|e| {
                    PurgeError::Internal(format!("Failed to accept connection: {}", e))
                })?,
                _ = &mut shutdown => {
                    info!("Purge trigger endpoint shutting down");
                    return Ok(());
                }
            };

            let io = TokioIo::new(stream);
            let handler = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.route(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Connection error from {}: {}", peer_addr, err);
                }
            });
        }
    }
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

fn plain_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static(content_type));
    response
}

fn encode_metrics() -> Result<Response<Full<Bytes>>> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| PurgeError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .map_err(|e| PurgeError::Internal(format!("Failed to build response: {}", e)))
}
