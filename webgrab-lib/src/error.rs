//! Error handling for fetch operations.
//!
//! This module defines a single error type that covers all the different
//! ways grabbing can fail, from bad caller input to transport failures and
//! problems with the external collaborators (Tor, headless browser).

use std::time::Duration;
use thiserror::Error;

/// Main error type for webgrab operations.
///
/// Single-item operations return these directly. Batch operations only
/// return them for argument validation; per-URL failures inside a batch
/// are downgraded to warnings.
#[derive(Debug, Clone, Error)]
pub enum GrabError {
    /// A parameter has an unusable value (zero timeout, empty URL, ...)
    #[error("Invalid argument '{param}': {reason}")]
    InvalidArgument { param: String, reason: String },

    /// The target is not something the network path can fetch
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Network-level failure, or a 5xx status that survived every retry
    #[error("{}", format_transport(.url, .message, .status))]
    Transport {
        url: String,
        message: String,
        status: Option<u16>,
    },

    /// An operation exceeded its time budget
    #[error("Timeout after {duration:?} during: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// An optional collaborator (tor binary, SOCKS support, browser) is absent
    #[error("Missing dependency '{dependency}': {hint}")]
    DependencyMissing { dependency: String, hint: String },

    /// Something else already holds a resource we need (usually the SOCKS port)
    #[error("Resource conflict on {resource}: {message}")]
    ResourceConflict { resource: String, message: String },

    /// The anonymizing proxy process misbehaved
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// The headless browser failed to render a page
    #[error("Render error for '{url}': {message}")]
    Render { url: String, message: String },

    /// Configuration errors (invalid settings, unparsable files)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Local file I/O errors
    #[error("File error at '{path}': {message}")]
    File { path: String, message: String },

    /// Generic internal errors that don't fit other categories
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn format_transport(url: &str, message: &str, status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("Transport error for '{}' (HTTP {}): {}", url, code, message),
        None => format!("Transport error for '{}': {}", url, message),
    }
}

impl GrabError {
    /// Create a new invalid argument error.
    pub fn invalid_argument<P: Into<String>, R: Into<String>>(param: P, reason: R) -> Self {
        Self::InvalidArgument {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid target error.
    pub fn invalid_target<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Reject a filesystem path handed to the network fetch path.
    pub fn local_path<T: Into<String>>(target: T) -> Self {
        Self::invalid_target(
            target,
            "looks like a local path; use read_local() for local files",
        )
    }

    /// Create a new transport error.
    pub fn transport<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new transport error carrying the last HTTP status seen.
    pub fn transport_with_status<U: Into<String>, M: Into<String>>(
        url: U,
        message: M,
        status: u16,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a new missing dependency error.
    pub fn dependency_missing<D: Into<String>, H: Into<String>>(dependency: D, hint: H) -> Self {
        Self::DependencyMissing {
            dependency: dependency.into(),
            hint: hint.into(),
        }
    }

    /// Create a new resource conflict error.
    pub fn resource_conflict<R: Into<String>, M: Into<String>>(resource: R, message: M) -> Self {
        Self::ResourceConflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a new proxy process error.
    pub fn proxy<M: Into<String>>(message: M) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create a new render error.
    pub fn render<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Render {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::File {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Translate a reqwest failure for `url`, keeping timeouts distinct.
    pub fn from_reqwest(url: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("HTTP request to {}", url), timeout)
        } else if err.is_connect() {
            Self::transport(url, format!("Connection failed: {}", err))
        } else if let Some(status) = err.status() {
            Self::transport_with_status(url, err.to_string(), status.as_u16())
        } else {
            Self::transport(url, format!("HTTP request failed: {}", err))
        }
    }

    /// Check if this error suggests the request should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Transport { status: None, .. }
                | Self::Transport {
                    status: Some(500..=599),
                    ..
                }
        )
    }

    /// Whether this is the rejection of a local path on the network path.
    pub fn is_local_path_rejection(&self) -> bool {
        matches!(self, Self::InvalidTarget { reason, .. } if reason.contains("read_local"))
    }

    /// HTTP status carried by a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GrabError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::from_reqwest(&url, err, Duration::from_secs(30))
    }
}

impl From<serde_json::Error> for GrabError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON parsing failed: {}", err))
    }
}

impl From<std::io::Error> for GrabError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {}", err))
    }
}

impl From<toml::de::Error> for GrabError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("Failed to parse TOML configuration: {}", err))
    }
}
