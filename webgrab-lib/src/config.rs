//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `WG_*`
//! environment variables and merging them with proper precedence rules:
//! built-in defaults, then config files (XDG < global < local < `WG_CONFIG`),
//! then environment variables.

use crate::error::GrabError;
use crate::types::{GrabConfig, MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loaded from TOML files.
///
/// Every field is optional so partial files can be layered on top of each
/// other.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Default request and batch settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Tor process settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor: Option<TorFileConfig>,

    /// Headers sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Default values for request and batch behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Per-request timeout ("5s", "500ms", "2m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Pause between retries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_limit: Option<usize>,

    /// Pause between worker launches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_rest: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cutoff: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_multiplier: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<bool>,
}

/// Tor settings as written in config files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TorFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which files are used
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed and validated configuration.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, GrabError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GrabError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            GrabError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        if self.verbose {
            tracing::info!(path = %path.display(), "loaded configuration file");
        }
        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// Unreadable or invalid discovered files are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, GrabError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping configuration file"),
            }
        }

        if self.verbose && loaded_files.len() > 1 {
            tracing::info!(
                files = ?loaded_files,
                "multiple config files found, later ones take precedence"
            );
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./webgrab.toml", "./.webgrab.toml"]
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".webgrab.toml", "webgrab.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("webgrab").join("config.toml");
        path.exists().then_some(path)
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower), Some(higher)) => Some(DefaultsConfig {
                    timeout: higher.timeout.or(lower.timeout),
                    retries: higher.retries.or(lower.retries),
                    retry_backoff: higher.retry_backoff.or(lower.retry_backoff),
                    thread_limit: higher.thread_limit.or(lower.thread_limit),
                    time_rest: higher.time_rest.or(lower.time_rest),
                    session_cutoff: higher.session_cutoff.or(lower.session_cutoff),
                    chunk_size: higher.chunk_size.or(lower.chunk_size),
                    chunk_multiplier: higher.chunk_multiplier.or(lower.chunk_multiplier),
                    warnings: higher.warnings.or(lower.warnings),
                }),
                (lower, higher) => higher.or(lower),
            },
            tor: match (lower.tor, higher.tor) {
                (Some(lower), Some(higher)) => Some(TorFileConfig {
                    binary: higher.binary.or(lower.binary),
                    dependencies_dir: higher.dependencies_dir.or(lower.dependencies_dir),
                    socks_host: higher.socks_host.or(lower.socks_host),
                    socks_port: higher.socks_port.or(lower.socks_port),
                    bootstrap_timeout: higher.bootstrap_timeout.or(lower.bootstrap_timeout),
                    extra_args: higher.extra_args.or(lower.extra_args),
                }),
                (lower, higher) => higher.or(lower),
            },
            headers: match (lower.headers, higher.headers) {
                (Some(mut lower), Some(higher)) => {
                    lower.extend(higher);
                    Some(lower)
                }
                (lower, higher) => higher.or(lower),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), GrabError> {
        if let Some(defaults) = &config.defaults {
            for (name, value) in [
                ("timeout", &defaults.timeout),
                ("retry_backoff", &defaults.retry_backoff),
                ("time_rest", &defaults.time_rest),
            ] {
                if let Some(text) = value {
                    if parse_duration_string(text).is_none() {
                        return Err(GrabError::config(format!(
                            "Invalid {} '{}'. Use a format like '500ms', '5s', '2m'",
                            name, text
                        )));
                    }
                }
            }

            if let Some(timeout) = defaults.timeout.as_deref().and_then(parse_duration_string) {
                if timeout.is_zero() {
                    return Err(GrabError::config("timeout must be greater than zero"));
                }
            }

            if let Some(retries) = defaults.retries {
                if retries > MAX_RETRIES {
                    return Err(GrabError::config(format!(
                        "retries must be at most {}",
                        MAX_RETRIES
                    )));
                }
            }

            for (name, value) in [
                ("thread_limit", defaults.thread_limit),
                ("chunk_size", defaults.chunk_size),
                ("chunk_multiplier", defaults.chunk_multiplier),
            ] {
                if value == Some(0) {
                    return Err(GrabError::config(format!("{} must be at least 1", name)));
                }
            }
        }

        if let Some(tor) = &config.tor {
            if tor.socks_port == Some(0) {
                return Err(GrabError::config("tor socks_port cannot be 0"));
            }
            if let Some(text) = &tor.bootstrap_timeout {
                if parse_duration_string(text).is_none() {
                    return Err(GrabError::config(format!(
                        "Invalid bootstrap_timeout '{}'",
                        text
                    )));
                }
            }
        }

        if let Some(headers) = &config.headers {
            if headers.keys().any(|name| name.trim().is_empty()) {
                return Err(GrabError::config("header names cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Environment variable configuration.
///
/// Values set via `WG_*` environment variables; invalid values are logged
/// and ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub thread_limit: Option<usize>,
    pub time_rest: Option<Duration>,
    pub chunk_size: Option<usize>,
    pub cutoff: Option<usize>,
    pub multiplier: Option<usize>,
    pub warnings: Option<bool>,
    pub tor_path: Option<PathBuf>,
    pub tor_port: Option<u16>,
    pub config: Option<PathBuf>,
}

/// Load configuration from the process environment.
pub fn load_env_config(verbose: bool) -> EnvConfig {
    env_config_from(|key| env::var(key).ok(), verbose)
}

/// Build an [`EnvConfig`] from an arbitrary variable lookup.
pub fn env_config_from<F>(lookup: F, verbose: bool) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| {
        let value = lookup(key).filter(|v| !v.trim().is_empty())?;
        if verbose {
            tracing::info!("Using {}={}", key, value);
        }
        Some(value)
    };

    EnvConfig {
        timeout: read("WG_TIMEOUT").and_then(|v| {
            parse_duration_string(&v)
                .filter(|d| !d.is_zero())
                .or_else(|| reject("WG_TIMEOUT", &v, "use a format like '5s', '500ms'"))
        }),
        retries: read("WG_RETRIES").and_then(|v| match v.trim().parse::<u32>() {
            Ok(n) if n <= MAX_RETRIES => Some(n),
            _ => reject("WG_RETRIES", &v, "must be 0-100"),
        }),
        thread_limit: read("WG_THREAD_LIMIT").and_then(|v| parse_positive("WG_THREAD_LIMIT", &v)),
        time_rest: read("WG_TIME_REST").and_then(|v| {
            parse_duration_string(&v).or_else(|| reject("WG_TIME_REST", &v, "use a format like '50ms'"))
        }),
        chunk_size: read("WG_CHUNK_SIZE").and_then(|v| parse_positive("WG_CHUNK_SIZE", &v)),
        cutoff: read("WG_CUTOFF").and_then(|v| {
            v.trim()
                .parse::<usize>()
                .ok()
                .or_else(|| reject("WG_CUTOFF", &v, "must be a number"))
        }),
        multiplier: read("WG_MULTIPLIER").and_then(|v| parse_positive("WG_MULTIPLIER", &v)),
        warnings: read("WG_WARNINGS").and_then(|v| {
            parse_bool(&v).or_else(|| reject("WG_WARNINGS", &v, "use true/false"))
        }),
        tor_path: read("WG_TOR_PATH").map(PathBuf::from),
        tor_port: read("WG_TOR_PORT").and_then(|v| match v.trim().parse::<u16>() {
            Ok(port) if port > 0 => Some(port),
            _ => reject("WG_TOR_PORT", &v, "must be 1-65535"),
        }),
        config: read("WG_CONFIG").map(PathBuf::from),
    }
}

fn reject<T>(key: &str, value: &str, hint: &str) -> Option<T> {
    tracing::warn!("Invalid {}='{}', {}", key, value, hint);
    None
}

fn parse_positive(key: &str, value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => reject(key, value, "must be at least 1"),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a duration string like "500ms", "5s", "2m".
///
/// A bare number is taken as seconds.
pub fn parse_duration_string(text: &str) -> Option<Duration> {
    let text = text.trim().to_lowercase();

    if let Some(ms) = text.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = text.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(m) = text.strip_suffix('m') {
        m.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        text.parse::<u64>().ok().map(Duration::from_secs)
    }
}

impl GrabConfig {
    /// Load the configuration from files and the environment.
    ///
    /// Built-in defaults, then discovered config files, then the file named
    /// by `WG_CONFIG`, then `WG_*` variables.
    pub fn load() -> Result<Self, GrabError> {
        let manager = ConfigManager::new(false);
        let env_config = load_env_config(false);
        Self::load_with(&manager, &env_config)
    }

    /// Load using an explicit manager and environment snapshot.
    pub fn load_with(manager: &ConfigManager, env_config: &EnvConfig) -> Result<Self, GrabError> {
        let mut files = manager.discover_and_load()?;
        if let Some(path) = &env_config.config {
            let explicit = manager.load_file(path)?;
            files = manager.merge_configs(files, explicit);
        }

        Ok(Self::default()
            .apply_file_config(&files)
            .apply_env_config(env_config))
    }

    /// Overlay values from a (validated) file configuration.
    pub fn apply_file_config(mut self, file: &FileConfig) -> Self {
        if let Some(defaults) = &file.defaults {
            let duration = |v: &Option<String>| v.as_deref().and_then(parse_duration_string);

            if let Some(timeout) = duration(&defaults.timeout) {
                self.timeout = timeout;
            }
            if let Some(retries) = defaults.retries {
                self = self.with_retries(retries);
            }
            if let Some(backoff) = duration(&defaults.retry_backoff) {
                self.retry_backoff = backoff;
            }
            if let Some(limit) = defaults.thread_limit {
                self = self.with_thread_limit(limit);
            }
            if let Some(rest) = duration(&defaults.time_rest) {
                self.time_rest = rest;
            }
            let cutoff = defaults.session_cutoff.unwrap_or(self.session_cutoff);
            let chunk_size = defaults.chunk_size.unwrap_or(self.chunk_size);
            let multiplier = defaults.chunk_multiplier.unwrap_or(self.chunk_multiplier);
            self = self.with_partitioning(cutoff, chunk_size, multiplier);
            if let Some(warnings) = defaults.warnings {
                self.warnings = warnings;
            }
        }

        if let Some(tor) = &file.tor {
            if tor.binary.is_some() {
                self.tor.binary = tor.binary.clone();
            }
            if let Some(dir) = &tor.dependencies_dir {
                self.tor.dependencies_dir = dir.clone();
            }
            if let Some(host) = &tor.socks_host {
                self.tor.socks_host = host.clone();
            }
            if let Some(port) = tor.socks_port {
                self.tor.socks_port = port;
            }
            if let Some(timeout) = tor.bootstrap_timeout.as_deref().and_then(parse_duration_string) {
                self.tor.bootstrap_timeout = timeout;
            }
            if let Some(args) = &tor.extra_args {
                self.tor.extra_args = args.clone();
            }
        }

        if let Some(headers) = &file.headers {
            self.headers
                .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        self
    }

    /// Overlay values from environment variables.
    pub fn apply_env_config(mut self, env_config: &EnvConfig) -> Self {
        if let Some(timeout) = env_config.timeout {
            self.timeout = timeout;
        }
        if let Some(retries) = env_config.retries {
            self = self.with_retries(retries);
        }
        if let Some(limit) = env_config.thread_limit {
            self = self.with_thread_limit(limit);
        }
        if let Some(rest) = env_config.time_rest {
            self.time_rest = rest;
        }
        let cutoff = env_config.cutoff.unwrap_or(self.session_cutoff);
        let chunk_size = env_config.chunk_size.unwrap_or(self.chunk_size);
        let multiplier = env_config.multiplier.unwrap_or(self.chunk_multiplier);
        self = self.with_partitioning(cutoff, chunk_size, multiplier);
        if let Some(warnings) = env_config.warnings {
            self.warnings = warnings;
        }
        if let Some(path) = &env_config.tor_path {
            self.tor.binary = Some(path.clone());
        }
        if let Some(port) = env_config.tor_port {
            self.tor.socks_port = port;
        }
        self
    }
}
