//! Prometheus metrics for purge operations

use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics for purge operations
#[derive(Clone)]
pub struct PurgeMetrics {
    /// Purge requests accepted by the coordinator
    pub purge_requests_total: Arc<CounterVec>,

    /// Provider calls by result (success/failure)
    pub provider_calls_total: Arc<CounterVec>,

    /// Items sent to the provider
    pub purge_items_total: Arc<CounterVec>,

    /// Duration of provider calls
    pub purge_duration_seconds: Arc<HistogramVec>,

    /// URLs currently waiting for the debounce timer
    pub pending_urls: Arc<IntGauge>,

    /// Detached dispatches that failed
    pub background_failures_total: Arc<CounterVec>,

    /// Trigger endpoint authentication failures
    pub auth_failures_total: Arc<CounterVec>,
}

impl PurgeMetrics {
    /// Create metrics registered in the process-wide default registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(prometheus::default_registry())
    }

    /// Create metrics with custom registry
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let purge_requests_total = CounterVec::new(
            Opts::new(
                "edge_purge_requests_total",
                "Total number of purge requests accepted by the coordinator",
            ),
            &["operation"], // operation: urls, tags, prefixes, everything
        )?;
        registry.register(Box::new(purge_requests_total.clone()))?;

        let provider_calls_total = CounterVec::new(
            Opts::new(
                "edge_purge_provider_calls_total",
                "Total number of provider API calls by result",
            ),
            &["operation", "result"], // result: success, failure
        )?;
        registry.register(Box::new(provider_calls_total.clone()))?;

        let purge_items_total = CounterVec::new(
            Opts::new(
                "edge_purge_items_total",
                "Total number of items sent to the provider",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(purge_items_total.clone()))?;

        let purge_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "edge_purge_duration_seconds",
                "Duration of provider purge calls in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(purge_duration_seconds.clone()))?;

        let pending_urls = IntGauge::new(
            "edge_purge_pending_urls",
            "Number of URLs waiting for the debounce timer",
        )?;
        registry.register(Box::new(pending_urls.clone()))?;

        let background_failures_total = CounterVec::new(
            Opts::new(
                "edge_purge_background_failures_total",
                "Total number of failed background purge dispatches",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(background_failures_total.clone()))?;

        let auth_failures_total = CounterVec::new(
            Opts::new(
                "edge_purge_trigger_auth_failures_total",
                "Total number of purge trigger authentication failures",
            ),
            &["reason"], // reason: missing_token, invalid_token
        )?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        Ok(Self {
            purge_requests_total: Arc::new(purge_requests_total),
            provider_calls_total: Arc::new(provider_calls_total),
            purge_items_total: Arc::new(purge_items_total),
            purge_duration_seconds: Arc::new(purge_duration_seconds),
            pending_urls: Arc::new(pending_urls),
            background_failures_total: Arc::new(background_failures_total),
            auth_failures_total: Arc::new(auth_failures_total),
        })
    }

    /// Record a purge request
    pub fn record_request(&self, operation: &str) {
        self.purge_requests_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record one provider call
    pub fn record_provider_call(&self, operation: &str, success: bool, items: usize, duration_secs: f64) {
        let result = if success { "success" } else { "failure" };
        self.provider_calls_total
            .with_label_values(&[operation, result])
            .inc();
        if success {
            self.purge_items_total
                .with_label_values(&[operation])
                .inc_by(items as f64);
        }
        self.purge_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Update the pending URL gauge
    pub fn set_pending(&self, count: usize) {
        self.pending_urls.set(count as i64);
    }

    /// Record a failed background dispatch
    pub fn record_background_failure(&self, operation: &str) {
        self.background_failures_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record authentication failure
    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures_total
            .with_label_values(&[reason])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_with_registry() {
        let registry = Registry::new();
        let metrics = PurgeMetrics::with_registry(&registry).unwrap();

        metrics.record_request("urls");
        metrics.record_provider_call("urls", true, 3, 0.02);
        metrics.record_provider_call("urls", false, 2, 0.5);
        metrics.set_pending(4);
        metrics.record_background_failure("urls");
        metrics.record_auth_failure("invalid_token");

        assert_eq!(metrics.purge_requests_total.with_label_values(&["urls"]).get(), 1.0);
        assert_eq!(
            metrics.provider_calls_total.with_label_values(&["urls", "failure"]).get(),
            1.0
        );
        assert_eq!(metrics.purge_items_total.with_label_values(&["urls"]).get(), 3.0);
        assert_eq!(metrics.pending_urls.get(), 4);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = PurgeMetrics::with_registry(&registry).unwrap();
        assert!(PurgeMetrics::with_registry(&registry).is_err());
    }
}
