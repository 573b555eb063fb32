//! Error types for the edge purge crate

use crate::models::ApiErrorDetail;
use thiserror::Error;

/// Result type alias for purge operations
pub type Result<T> = std::result::Result<T, PurgeError>;

/// Error types that can occur while purging the edge cache
#[derive(Error, Debug, Clone)]
pub enum PurgeError {
    /// The provider could not be reached at all (DNS, refused connection,
    /// transport timeout). There is no response body to decode.
    #[error("Network error: {0}")]
    Transport(String),

    /// The provider answered with `success: false` or a non-2xx status.
    #[error("Cloudflare API error: {}", join_messages(.errors))]
    Provider {
        status: Option<u16>,
        errors: Vec<ApiErrorDetail>,
    },

    /// A caller broke a contract the coordinator is supposed to enforce.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An entity's URL could not be derived. Only ever logged.
    #[error("Could not resolve URL: {0}")]
    Resolution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A failure inside the crate itself: building or encoding an HTTP
    /// response, accepting a trigger connection, or a non-batchable operation
    /// reaching the batch path.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_messages(errors: &[ApiErrorDetail]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for PurgeError {
    fn from(err: serde_json::Error) -> Self {
        PurgeError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for PurgeError {
    fn from(err: reqwest::Error) -> Self {
        PurgeError::Transport(err.to_string())
    }
}

impl PurgeError {
    /// Build a provider error from a decoded error list
    pub fn provider(status: Option<u16>, errors: Vec<ApiErrorDetail>) -> Self {
        PurgeError::Provider { status, errors }
    }

    /// Build a provider error for a body that could not be decoded
    ///
    /// The provider's error list is replaced by a single synthetic entry
    /// (code 0) carrying the raw body, or the status text when the body is
    /// empty.
    pub fn undecodable(status: Option<u16>, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            match status {
                Some(code) => format!("HTTP {}", code),
                None => "empty response body".to_string(),
            }
        } else {
            body.trim().to_string()
        };
        PurgeError::Provider {
            status,
            errors: vec![ApiErrorDetail { code: 0, message }],
        }
    }

    /// Provider-reported sub-errors, empty for every other kind
    pub fn errors(&self) -> &[ApiErrorDetail] {
        match self {
            PurgeError::Provider { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PurgeError::Transport(_) => "transport",
            PurgeError::Provider { .. } => "provider",
            PurgeError::InvalidInput(_) => "invalid_input",
            PurgeError::Resolution(_) => "resolution",
            PurgeError::Config(_) => "config",
            PurgeError::Serialization(_) => "serialization",
            PurgeError::Internal(_) => "internal",
        }
    }

    /// Determine if a later attempt could plausibly succeed
    ///
    /// Nothing in this crate retries; the classification is exposed for
    /// callers that want to apply their own policy.
    ///
    /// Returns true for:
    /// - transport failures
    /// - provider 5xx responses and 429 rate limiting
    pub fn is_transient(&self) -> bool {
        match self {
            PurgeError::Transport(_) => true,
            PurgeError::Provider { status, .. } => {
                matches!(status, Some(429) | Some(500..=599))
            }
            PurgeError::InvalidInput(_) => false,
            PurgeError::Resolution(_) => false,
            PurgeError::Config(_) => false,
            PurgeError::Serialization(_) => false,
            PurgeError::Internal(_) => false,
        }
    }

    /// Process exit code for the command-line tool
    pub fn exit_code(&self) -> i32 {
        match self {
            PurgeError::Config(_) => 2,
            PurgeError::InvalidInput(_) => 3,
            _ => 1,
        }
    }
}
