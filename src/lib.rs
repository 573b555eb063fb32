//! Edge Purge
//!
//! Keeps an edge cache (Cloudflare) consistent with a content store by
//! turning content change events into as few purge API calls as possible.
//!
//! # Overview
//!
//! A change to a piece of content invalidates its own public URL and often a
//! handful of listing pages that show it. Edge Purge resolves those URLs,
//! collapses requests arriving within a short window into one deduplicated
//! set, and sends it to the provider in batches that respect the provider's
//! per-request item limit.
//!
//! # Architecture
//!
//! - [`EdgeCacheClient`]: authenticated client for the provider purge API,
//!   behind the [`PurgeApi`] trait
//! - [`PurgeCoordinator`]: deduplicating, debouncing, batching front end
//! - [`ChangeAdapter`]: maps entity save/delete events to purge requests,
//!   expanding configured URL dependencies
//! - [`PurgeHandler`]: HTTP `PURGE` trigger endpoint
//! - [`PurgeMetrics`]: Prometheus metrics for all of the above
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_purge::{EdgeCacheClient, PurgeConfig, PurgeCoordinator};
//! use std::sync::Arc;
//!
//! # async fn run() -> edge_purge::Result<()> {
//! let config = PurgeConfig::from_file("edge_purge.yaml")?;
//! let client = EdgeCacheClient::from_config(&config)?;
//! let coordinator = PurgeCoordinator::from_config(Arc::new(client), &config);
//!
//! // Queued behind the debounce timer, merged with other requests
//! coordinator
//!     .request_purge(["https://www.example.com/blog/post-1/"], None)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! api_token: "..."
//! zone_id: "..."
//! purge_batch_size: 30        # provider accepts at most 30 items per call
//! purge_delay_seconds: 2      # debounce window for background purges
//! background_purge: true
//! site_url: "https://www.example.com"
//! url_dependencies:
//!   blog.post: ["/blog/", "/"]
//! ```
//!
//! Every option can also be set with a `CLOUDFLARE_`-prefixed environment
//! variable. See [`PurgeConfig`].

pub mod adapter;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod purge_handler; // HTTP PURGE method handler
pub mod purge_metrics; // Prometheus metrics for purge operations

// Re-export commonly used types
pub use adapter::{ChangeAdapter, ChangeBus, ChangeObserver, Entity, EventSource, Registration};
pub use client::{EdgeCacheClient, PurgeApi, MAX_ITEMS_PER_REQUEST};
pub use config::{PurgeConfig, TriggerConfig};
pub use coordinator::{CoordinatorSettings, CoordinatorState, PurgeCoordinator};
pub use error::{PurgeError, Result};
pub use models::{
    ApiErrorDetail, BackgroundFailure, DependencyMap, PurgeKind, PurgeOutcome, PurgeReport,
};
pub use purge_handler::{PurgeHandler, PurgeResponse};
pub use purge_metrics::PurgeMetrics;
