//! Tor process management.
//!
//! The anonymizing transport is an external `tor` executable spawned as a
//! child process. Readiness is detected by scraping its log output for the
//! `Bootstrapped 100%` marker; a bind failure on the SOCKS port is reported
//! as a resource conflict.

use crate::error::GrabError;
use crate::types::TorConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const TOR_EXE: &str = if cfg!(windows) { "tor.exe" } else { "tor" };

/// How long a SOCKS port probe may take.
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Endpoint reporting the caller's public IP and its location.
pub const IP_INFO_URL: &str = "http://ip-api.com/json";

/// Public identity as seen by the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorIdentity {
    /// Whether the lookup went through tor
    #[serde(default)]
    pub tor_enabled: bool,
    /// Public IP address
    #[serde(rename = "query")]
    pub ip: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, rename = "regionName")]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// An anonymizing proxy whose exit identity can be changed on demand.
#[async_trait]
pub trait AnonymizingProxy: Send + Sync {
    /// Whether the proxy is up and bootstrapped.
    fn status(&self) -> bool;

    /// Whether the running proxy was started by this handle.
    fn is_managed(&self) -> bool;

    /// Proxy URL for the HTTP client.
    fn proxy_url(&self) -> String;

    /// Proxy address for the headless browser.
    fn browser_proxy(&self) -> String;

    /// Whether anything is listening on the proxy port.
    async fn port_in_use(&self) -> bool;

    /// Start the proxy and wait until it is usable.
    async fn start(&mut self) -> Result<(), GrabError>;

    /// Stop the proxy and wait for it to exit.
    async fn stop(&mut self) -> Result<(), GrabError>;

    /// Get a fresh exit identity.
    async fn rotate(&mut self) -> Result<(), GrabError> {
        self.stop().await?;
        self.start().await
    }
}

/// What a line of tor output tells us about startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    Bootstrapped,
    BindConflict,
    Other,
}

/// Classify one line of tor output.
///
/// Matching ignores case and whitespace, so `Bootstrapped 100%` and
/// `bootstrapped100%` are the same marker.
pub fn classify_log_line(line: &str) -> LogEvent {
    let compact: String = line
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    if compact.contains("bootstrapped100%") {
        LogEvent::Bootstrapped
    } else if compact.contains("addressalreadyinuse") || compact.contains("couldnotbind") {
        LogEvent::BindConflict
    } else {
        LogEvent::Other
    }
}

/// A `tor` child process.
pub struct TorProcess {
    config: TorConfig,
    child: Option<Child>,
    drain: Option<JoinHandle<()>>,
    running: bool,
}

impl TorProcess {
    pub fn new(config: TorConfig) -> Self {
        Self {
            config,
            child: None,
            drain: None,
            running: false,
        }
    }

    pub fn config(&self) -> &TorConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.config.socks_host, self.config.socks_port)
    }

    /// Find the tor executable.
    ///
    /// Looks at the configured path, then the dependencies directory, then
    /// `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `DependencyMissing` when no executable is found.
    pub fn locate_binary(&self) -> Result<PathBuf, GrabError> {
        if let Some(binary) = &self.config.binary {
            if binary.is_file() {
                return Ok(binary.clone());
            }
            return Err(GrabError::dependency_missing(
                "tor",
                format!("configured tor binary {} does not exist", binary.display()),
            ));
        }

        if let Some(installed) = self.installed_binary() {
            return Ok(installed);
        }

        which::which(TOR_EXE).map_err(|_| {
            GrabError::dependency_missing(
                "tor",
                "install tor, put it on PATH, or call load_dependencies() with a tor bundle",
            )
        })
    }

    fn installed_binary(&self) -> Option<PathBuf> {
        let dir = &self.config.dependencies_dir;
        [dir.join("tor").join(TOR_EXE), dir.join(TOR_EXE)]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    /// Install tor from a bundled `.tar.gz` archive or a bare executable.
    ///
    /// Archives are unpacked into the dependencies directory; a bare
    /// executable is copied to `<dependencies_dir>/tor/`.
    ///
    /// # Returns
    ///
    /// Path of the installed executable.
    ///
    /// # Errors
    ///
    /// Returns `File` errors for unreadable sources and `DependencyMissing`
    /// when the archive holds no tor executable.
    pub fn load_dependencies(&self, source: &Path) -> Result<PathBuf, GrabError> {
        let path_str = source.display().to_string();
        if !source.is_file() {
            return Err(GrabError::file_error(&path_str, "file not found"));
        }

        let dir = &self.config.dependencies_dir;
        fs::create_dir_all(dir).map_err(|e| GrabError::file_error(dir.display().to_string(), e.to_string()))?;

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            let archive = File::open(source).map_err(|e| GrabError::file_error(&path_str, e.to_string()))?;
            let decoder = flate2::read::GzDecoder::new(archive);
            tar::Archive::new(decoder)
                .unpack(dir)
                .map_err(|e| GrabError::file_error(&path_str, format!("failed to unpack: {}", e)))?;
            info!(archive = %path_str, target = %dir.display(), "unpacked tor bundle");
        } else {
            let target_dir = dir.join("tor");
            fs::create_dir_all(&target_dir)
                .map_err(|e| GrabError::file_error(target_dir.display().to_string(), e.to_string()))?;
            let target = target_dir.join(TOR_EXE);
            fs::copy(source, &target).map_err(|e| GrabError::file_error(&path_str, e.to_string()))?;
            info!(binary = %target.display(), "installed tor binary");
        }

        let installed = self.installed_binary().ok_or_else(|| {
            GrabError::dependency_missing("tor", format!("{} does not contain a tor executable", path_str))
        })?;
        make_executable(&installed)?;
        Ok(installed)
    }

    async fn wait_for_bootstrap<R>(lines: &mut Lines<R>, endpoint: &str) -> Result<(), GrabError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match classify_log_line(&line) {
                    LogEvent::Bootstrapped => return Ok(()),
                    LogEvent::BindConflict => {
                        return Err(GrabError::resource_conflict(endpoint, line.trim()))
                    }
                    LogEvent::Other => debug!(target: "webgrab_lib::tor", "{}", line),
                },
                Ok(None) => return Err(GrabError::proxy("tor exited before finishing bootstrap")),
                Err(e) => return Err(GrabError::proxy(format!("failed to read tor output: {}", e))),
            }
        }
    }
}

#[async_trait]
impl AnonymizingProxy for TorProcess {
    fn status(&self) -> bool {
        self.running
    }

    fn is_managed(&self) -> bool {
        self.child.is_some()
    }

    fn proxy_url(&self) -> String {
        self.config.proxy_url()
    }

    fn browser_proxy(&self) -> String {
        self.config.browser_proxy()
    }

    async fn port_in_use(&self) -> bool {
        let addr = self.endpoint();
        matches!(
            tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn start(&mut self) -> Result<(), GrabError> {
        if self.running {
            self.stop().await?;
        }

        let endpoint = self.endpoint();
        if self.port_in_use().await {
            return Err(GrabError::resource_conflict(
                &endpoint,
                "another process is already listening on the SOCKS port",
            ));
        }

        let binary = self.locate_binary()?;
        info!(binary = %binary.display(), endpoint = %endpoint, "starting tor");

        let mut child = Command::new(&binary)
            .arg("--SocksPort")
            .arg(&endpoint)
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GrabError::proxy(format!("failed to spawn {}: {}", binary.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GrabError::internal("tor stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let waited = tokio::time::timeout(
            self.config.bootstrap_timeout,
            Self::wait_for_bootstrap(&mut lines, &endpoint),
        )
        .await;
        let outcome = match waited {
            Ok(result) => result,
            Err(_) => Err(GrabError::timeout("tor bootstrap", self.config.bootstrap_timeout)),
        };

        if let Err(e) = outcome {
            let _ = child.kill().await;
            return Err(e);
        }

        // Keep reading so tor never blocks on a full pipe
        self.drain = Some(tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "webgrab_lib::tor", "{}", line);
            }
        }));
        self.child = Some(child);
        self.running = true;
        info!(endpoint = %endpoint, "tor bootstrapped");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), GrabError> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|e| GrabError::proxy(format!("failed to stop tor: {}", e)))?;
            info!("tor stopped");
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        self.running = false;
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), GrabError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| GrabError::file_error(path.display().to_string(), e.to_string()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), GrabError> {
    Ok(())
}
