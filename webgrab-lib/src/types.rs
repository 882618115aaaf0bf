//! Core data types for fetching.
//!
//! This module defines the configuration and per-call option structures
//! used throughout the library.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Number of concurrent workers used for plain HTTP batches.
pub const DEFAULT_THREAD_LIMIT: usize = 800;

/// Number of concurrent workers used when pages are rendered in a browser.
pub const DEFAULT_JS_THREAD_LIMIT: usize = 30;

/// Upper bound on retries accepted for a single request.
pub const MAX_RETRIES: u32 = 100;

/// Configuration shared by every operation of a `Grabber`.
///
/// Per-call behavior is taken from [`FetchOptions`] and [`BatchOptions`],
/// which are seeded from this configuration by `Grabber::fetch_options()`
/// and `Grabber::batch_options()`.
///
/// Deserialized configurations start from the defaults; durations are not
/// serialized and always keep their default values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// Timeout for each individual request
    /// Default: 5 seconds
    #[serde(skip)]
    pub timeout: Duration,

    /// How many times a request is retried on 5xx or connection failures
    /// Default: 5
    pub retries: u32,

    /// Fixed pause between retries
    /// Default: 100 milliseconds
    #[serde(skip)]
    pub retry_backoff: Duration,

    /// Headers sent with every request
    pub headers: HashMap<String, String>,

    /// Maximum number of batch workers in flight
    /// Default: 800
    pub thread_limit: usize,

    /// Pause between successive worker launches
    /// Default: none
    #[serde(skip)]
    pub time_rest: Duration,

    /// Domains with more URLs than this get a dedicated session
    /// Default: 2
    pub session_cutoff: usize,

    /// URLs handled by one worker
    /// Default: 10
    pub chunk_size: usize,

    /// Chunk size multiplier for high-volume domains
    /// Default: 10
    pub chunk_multiplier: usize,

    /// Whether per-URL batch failures are reported as warnings
    /// Default: true
    pub warnings: bool,

    /// Settings for the managed Tor process
    pub tor: TorConfig,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 5,
            retry_backoff: Duration::from_millis(100),
            headers: HashMap::new(),
            thread_limit: DEFAULT_THREAD_LIMIT,
            time_rest: Duration::ZERO,
            session_cutoff: 2,
            chunk_size: 10,
            chunk_multiplier: 10,
            warnings: true,
            tor: TorConfig::default(),
        }
    }
}

impl GrabConfig {
    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count, capped at [`MAX_RETRIES`].
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(MAX_RETRIES);
        self
    }

    /// Set the pause between retries.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Add a default header.
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the worker limit. Zero is bumped to one.
    pub fn with_thread_limit(mut self, limit: usize) -> Self {
        self.thread_limit = limit.max(1);
        self
    }

    /// Set the pause between worker launches.
    pub fn with_time_rest(mut self, rest: Duration) -> Self {
        self.time_rest = rest;
        self
    }

    /// Set the partitioning parameters used by batches.
    pub fn with_partitioning(mut self, cutoff: usize, chunk_size: usize, multiplier: usize) -> Self {
        self.session_cutoff = cutoff;
        self.chunk_size = chunk_size.max(1);
        self.chunk_multiplier = multiplier.max(1);
        self
    }

    /// Enable or disable batch warnings.
    pub fn with_warnings(mut self, enabled: bool) -> Self {
        self.warnings = enabled;
        self
    }

    /// Replace the Tor settings.
    pub fn with_tor(mut self, tor: TorConfig) -> Self {
        self.tor = tor;
        self
    }
}

/// Settings for the locally spawned Tor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// Explicit path to the tor executable
    pub binary: Option<PathBuf>,

    /// Where bundled tor archives are installed
    pub dependencies_dir: PathBuf,

    /// Address the SOCKS listener binds to
    pub socks_host: String,

    /// Port of the SOCKS listener
    /// Default: 9050
    pub socks_port: u16,

    /// How long to wait for the bootstrap marker
    /// Default: 90 seconds
    #[serde(skip)]
    pub bootstrap_timeout: Duration,

    /// Extra command line arguments passed to tor
    pub extra_args: Vec<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            binary: None,
            dependencies_dir: default_dependencies_dir(),
            socks_host: "127.0.0.1".to_string(),
            socks_port: 9050,
            bootstrap_timeout: Duration::from_secs(90),
            extra_args: Vec::new(),
        }
    }
}

impl TorConfig {
    /// Proxy URL used by the HTTP client (remote DNS resolution).
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}:{}", self.socks_host, self.socks_port)
    }

    /// Proxy address handed to the headless browser.
    pub fn browser_proxy(&self) -> String {
        format!("socks5://{}:{}", self.socks_host, self.socks_port)
    }
}

/// Default location for installed tor dependencies.
///
/// `$XDG_DATA_HOME/webgrab/tor`, then `~/.local/share/webgrab/tor`, then the
/// system temp directory.
pub fn default_dependencies_dir() -> PathBuf {
    if let Some(data) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(data).join("webgrab").join("tor");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("webgrab")
            .join("tor");
    }
    std::env::temp_dir().join("webgrab").join("tor")
}

/// Options for a single fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Route the request through the anonymizing transport
    pub use_proxy: bool,

    /// Retries on 5xx statuses and connection failures
    pub retries: u32,

    /// Render the page in a headless browser instead of a plain GET
    pub enable_js: bool,

    /// Per-call timeout
    pub timeout: Duration,

    /// Extra headers; these win over any injected proxy headers
    pub headers: HashMap<String, String>,

    /// Query parameters appended to the URL
    pub query: Vec<(String, String)>,

    /// Explicit proxy URL, overriding Tor and the proxy list
    pub proxy: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&GrabConfig::default())
    }
}

impl From<&GrabConfig> for FetchOptions {
    fn from(config: &GrabConfig) -> Self {
        Self {
            use_proxy: false,
            retries: config.retries,
            enable_js: false,
            timeout: config.timeout,
            headers: HashMap::new(),
            query: Vec::new(),
            proxy: None,
        }
    }
}

impl FetchOptions {
    pub fn with_proxy(mut self, enabled: bool) -> Self {
        self.use_proxy = enabled;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_js(mut self, enabled: bool) -> Self {
        self.enable_js = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_explicit_proxy<P: Into<String>>(mut self, proxy: P) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Options for a batch fetch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Options applied to every URL of the batch
    pub fetch: FetchOptions,

    /// Maximum number of workers in flight
    pub thread_limit: usize,

    /// Pause between successive worker launches
    pub time_rest: Duration,

    /// Domains with more URLs than this get a dedicated session
    pub cutoff: usize,

    /// URLs per worker for ordinary domains
    pub chunk_size: usize,

    /// Chunk size multiplier for high-volume domains
    pub multiplier: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&GrabConfig::default())
    }
}

impl From<&GrabConfig> for BatchOptions {
    fn from(config: &GrabConfig) -> Self {
        Self {
            fetch: FetchOptions::from(config),
            thread_limit: config.thread_limit,
            time_rest: config.time_rest,
            cutoff: config.session_cutoff,
            chunk_size: config.chunk_size,
            multiplier: config.chunk_multiplier,
        }
    }
}

impl BatchOptions {
    pub fn with_fetch(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_thread_limit(mut self, limit: usize) -> Self {
        self.thread_limit = limit;
        self
    }

    pub fn with_time_rest(mut self, rest: Duration) -> Self {
        self.time_rest = rest;
        self
    }

    pub fn with_partitioning(mut self, cutoff: usize, chunk_size: usize, multiplier: usize) -> Self {
        self.cutoff = cutoff;
        self.chunk_size = chunk_size;
        self.multiplier = multiplier;
        self
    }

    /// Switch the batch to browser rendering, lowering the worker limit to
    /// [`DEFAULT_JS_THREAD_LIMIT`] when it is still above it.
    pub fn rendered(mut self) -> Self {
        self.fetch.enable_js = true;
        self.thread_limit = self.thread_limit.min(DEFAULT_JS_THREAD_LIMIT);
        self
    }
}

/// How a local file is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Decode the contents with the requested encoding
    Text,
    /// Return the raw bytes
    Binary,
}

/// How a local file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or truncate
    Write,
    /// Create or append
    Append,
}

impl std::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadMode::Text => write!(f, "r"),
            ReadMode::Binary => write!(f, "rb"),
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Write => write!(f, "w"),
            WriteMode::Append => write!(f, "a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_deserializes_over_defaults() {
        let config: GrabConfig =
            serde_json::from_str(r#"{"retries": 3, "tor": {"socks_port": 9150}}"#).unwrap();
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.thread_limit, DEFAULT_THREAD_LIMIT);
        assert_eq!(config.tor.socks_port, 9150);
        assert_eq!(config.tor.bootstrap_timeout, Duration::from_secs(90));

        // A serialized config reads back with the same values
        let text = serde_json::to_string(&config).unwrap();
        let again: GrabConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(again.retries, 3);
        assert_eq!(again.tor.proxy_url(), "socks5h://127.0.0.1:9150");
    }

    #[test]
    fn test_batch_options_follow_config() {
        let config = GrabConfig::default()
            .with_thread_limit(12)
            .with_partitioning(4, 3, 5)
            .with_retries(2);
        let opts = BatchOptions::from(&config);
        assert_eq!(opts.thread_limit, 12);
        assert_eq!((opts.cutoff, opts.chunk_size, opts.multiplier), (4, 3, 5));
        assert_eq!(opts.fetch.retries, 2);
    }

    #[test]
    fn test_config_builders_clamp() {
        let config = GrabConfig::default()
            .with_thread_limit(0)
            .with_retries(10_000)
            .with_partitioning(0, 0, 0);
        assert_eq!(config.thread_limit, 1);
        assert_eq!(config.retries, MAX_RETRIES);
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.chunk_multiplier, 1);
    }

    #[test]
    fn test_rendered_lowers_thread_limit() {
        let opts = BatchOptions::default().rendered();
        assert!(opts.fetch.enable_js);
        assert_eq!(opts.thread_limit, DEFAULT_JS_THREAD_LIMIT);

        let small = BatchOptions::default().with_thread_limit(4).rendered();
        assert_eq!(small.thread_limit, 4);
    }

    #[test]
    fn test_tor_proxy_urls() {
        let tor = TorConfig {
            socks_port: 9150,
            ..Default::default()
        };
        assert_eq!(tor.proxy_url(), "socks5h://127.0.0.1:9150");
        assert_eq!(tor.browser_proxy(), "socks5://127.0.0.1:9150");
    }
}
