//! Configuration management for edge cache purging
//!
//! Settings are read from a YAML file, from `CLOUDFLARE_`-prefixed
//! environment variables, or both (environment wins). Keys accept either the
//! snake_case field name or the upper-case option name, so `purge_batch_size`
//! and `PURGE_BATCH_SIZE` are equivalent in a file.

use crate::client::MAX_ITEMS_PER_REQUEST;
use crate::error::{PurgeError, Result};
use crate::models::DependencyMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "CLOUDFLARE_";

/// Longest accepted debounce delay (one day)
pub const MAX_PURGE_DELAY_SECONDS: f64 = 86_400.0;

/// Configuration for the purge client, coordinator and adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeConfig {
    /// API token sent as a bearer credential
    #[serde(default, alias = "API_TOKEN")]
    pub api_token: String,

    /// Zone whose cache is purged
    #[serde(default, alias = "ZONE_ID")]
    pub zone_id: String,

    /// Base endpoint of the provider API
    #[serde(default = "default_api_base_url", alias = "API_BASE_URL")]
    pub api_base_url: String,

    /// When false every purge call short-circuits with the "disabled" outcome
    #[serde(default = "default_true", alias = "ENABLED")]
    pub enabled: bool,

    /// Maximum number of items per provider request (default: 30)
    #[serde(default = "default_batch_size", alias = "PURGE_BATCH_SIZE")]
    pub purge_batch_size: usize,

    /// Debounce delay before a background purge is dispatched (default: 0)
    #[serde(default, alias = "PURGE_DELAY_SECONDS")]
    pub purge_delay_seconds: f64,

    /// Whether purge requests are queued by default (default: true)
    #[serde(default = "default_true", alias = "BACKGROUND_PURGE")]
    pub background_purge: bool,

    /// Verbose logging in the command-line tool
    #[serde(default, alias = "DEBUG")]
    pub debug: bool,

    /// Entity type identifier -> paths purged whenever that type changes
    #[serde(default, alias = "URL_DEPENDENCIES")]
    pub url_dependencies: DependencyMap,

    /// Public site URL used to expand paths into full URLs
    #[serde(default, alias = "SITE_URL")]
    pub site_url: String,

    /// Transport timeout for provider requests (default: 30)
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: u64,

    /// HTTP trigger endpoint configuration (optional)
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
}

/// Configuration for the HTTP PURGE trigger endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    /// Whether to serve the endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind (default: "127.0.0.1:8081")
    #[serde(default = "default_trigger_address")]
    pub address: String,

    /// Authentication token for purge requests (optional)
    /// If not set, purge requests will not require authentication
    pub auth_token: Option<String>,

    /// Whether to record Prometheus metrics (default: true)
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_trigger_address(),
            auth_token: None,
            enable_metrics: default_true(),
        }
    }
}

impl TriggerConfig {
    /// Parsed bind address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            PurgeError::Config(format!(
                "Invalid trigger address '{}': {}",
                self.address, e
            ))
        })
    }
}

// Default value functions for serde
fn default_api_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    MAX_ITEMS_PER_REQUEST
}

fn default_request_timeout() -> u64 {
    30
}

fn default_trigger_address() -> String {
    "127.0.0.1:8081".to_string()
}

impl Default for PurgeConfig {
    fn default() -> Self {
        PurgeConfig {
            api_token: String::new(),
            zone_id: String::new(),
            api_base_url: default_api_base_url(),
            enabled: default_true(),
            purge_batch_size: default_batch_size(),
            purge_delay_seconds: 0.0,
            background_purge: default_true(),
            debug: false,
            url_dependencies: DependencyMap::default(),
            site_url: String::new(),
            request_timeout_seconds: default_request_timeout(),
            trigger: None,
        }
    }
}

impl PurgeConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(PurgeConfig)` if loading and validation succeed
    /// * `Err(PurgeError::Config)` if the file cannot be read or is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PurgeError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: PurgeConfig = serde_yaml::from_str(content).map_err(|e| {
            PurgeError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults plus `CLOUDFLARE_*` variables
    pub fn from_env() -> Result<Self> {
        let mut config = PurgeConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override fields from an arbitrary variable lookup
    ///
    /// `lookup` receives the full variable name, e.g. `CLOUDFLARE_ZONE_ID`.
    /// `URL_DEPENDENCIES` is expected as a JSON object of string arrays.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("API_TOKEN") {
            self.api_token = value;
        }
        if let Some(value) = var("ZONE_ID") {
            self.zone_id = value;
        }
        if let Some(value) = var("API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some(value) = var("ENABLED") {
            self.enabled = parse_bool("ENABLED", &value)?;
        }
        if let Some(value) = var("PURGE_BATCH_SIZE") {
            self.purge_batch_size = parse_number("PURGE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = var("PURGE_DELAY_SECONDS") {
            self.purge_delay_seconds = parse_number("PURGE_DELAY_SECONDS", &value)?;
        }
        if let Some(value) = var("BACKGROUND_PURGE") {
            self.background_purge = parse_bool("BACKGROUND_PURGE", &value)?;
        }
        if let Some(value) = var("DEBUG") {
            self.debug = parse_bool("DEBUG", &value)?;
        }
        if let Some(value) = var("URL_DEPENDENCIES") {
            self.url_dependencies = serde_json::from_str(&value).map_err(|e| {
                PurgeError::Config(format!("Invalid {}URL_DEPENDENCIES: {}", ENV_PREFIX, e))
            })?;
        }
        if let Some(value) = var("SITE_URL") {
            self.site_url = value;
        }
        if let Some(value) = var("REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = parse_number("REQUEST_TIMEOUT_SECONDS", &value)?;
        }

        self.validate()
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - purge_batch_size must be between 1 and the provider's per-request limit
    /// - purge_delay_seconds must be between 0 and one day
    /// - api_base_url must be an http(s) URL
    /// - request_timeout_seconds must be > 0
    /// - trigger address must parse when the trigger is enabled
    pub fn validate(&self) -> Result<()> {
        if self.purge_batch_size == 0 || self.purge_batch_size > MAX_ITEMS_PER_REQUEST {
            return Err(PurgeError::Config(format!(
                "purge_batch_size must be between 1 and {}, got {}",
                MAX_ITEMS_PER_REQUEST, self.purge_batch_size
            )));
        }

        if !(0.0..=MAX_PURGE_DELAY_SECONDS).contains(&self.purge_delay_seconds) {
            return Err(PurgeError::Config(format!(
                "purge_delay_seconds must be between 0 and {}, got {}",
                MAX_PURGE_DELAY_SECONDS, self.purge_delay_seconds
            )));
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(PurgeError::Config(format!(
                "api_base_url must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }

        if self.request_timeout_seconds == 0 {
            return Err(PurgeError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(trigger) = &self.trigger {
            if trigger.enabled {
                trigger.socket_addr()?;
            }
        }

        Ok(())
    }

    /// Check that the credentials needed for a real provider call are set
    pub fn require_credentials(&self) -> Result<()> {
        if self.api_token.is_empty() {
            return Err(PurgeError::Config(format!(
                "{}API_TOKEN is not configured",
                ENV_PREFIX
            )));
        }
        if self.zone_id.is_empty() {
            return Err(PurgeError::Config(format!(
                "{}ZONE_ID is not configured",
                ENV_PREFIX
            )));
        }
        Ok(())
    }

    /// Debounce delay as a Duration, clamped to the accepted range
    pub fn purge_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.purge_delay_seconds.min(MAX_PURGE_DELAY_SECONDS))
            .unwrap_or(Duration::ZERO)
    }

    /// Transport timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PurgeError::Config(format!(
            "{}{} must be a boolean, got '{}'",
            ENV_PREFIX, name, other
        ))),
    }
}

fn parse_number<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        PurgeError::Config(format!("{}{} is invalid: {}", ENV_PREFIX, name, e))
    })
}
