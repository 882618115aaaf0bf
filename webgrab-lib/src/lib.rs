//! # Webgrab Library
//!
//! A library for fetching web resources one at a time or in bulk.
//!
//! Bulk fetches are deduplicated, grouped by domain and spread over a
//! bounded pool of async workers, reusing a dedicated HTTP session for
//! domains that receive many requests. Requests can be routed through Tor
//! (with identity rotation every N requests) or a list of HTTP proxies, and
//! pages can be rendered in a headless browser.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webgrab_lib::Grabber;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     webgrab_lib::init();
//!
//!     let grabber = Grabber::new()?;
//!     let response = grabber
//!         .get("https://example.com/", &grabber.fetch_options())
//!         .await?;
//!     println!("{} {}", response, response.text()?.len());
//!
//!     let results = grabber
//!         .get_batch(
//!             vec!["https://example.com/a", "https://example.com/b"],
//!             &grabber.batch_options(),
//!         )
//!         .await?;
//!     println!("{} fetched, {} warnings", results.len(), grabber.warnings().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Batch fetching**: deduplication, domain-aware partitioning, bounded concurrency
//! - **Retries**: 500/502/503/504 and connection failures, fixed backoff
//! - **Tor transport**: managed `tor` process with identity rotation (`socks` feature)
//! - **JavaScript rendering**: headless Chrome (`js` feature)
//! - **Configurable**: TOML config files and `WG_*` environment variables

// Re-export main public API types and functions
// This makes them available as webgrab_lib::TypeName
pub use concurrent::{generate_partitions, group_by_domain, DomainGroups, Partition};
pub use config::{load_env_config, ConfigManager, EnvConfig, FileConfig};
pub use error::GrabError;
pub use grabber::{BatchResults, Grabber, GrabberBuilder};
pub use local::{read_local, write_local, write_local_bytes, Encoding, LocalContent};
pub use proxies::{ProxyEntry, ProxyList};
pub use render::PageRenderer;
pub use response::Response;
pub use rotation::RotationCounter;
pub use scan::{parse_range, scan_host, scan_range};
pub use tor::{AnonymizingProxy, TorIdentity, TorProcess, IP_INFO_URL};
pub use types::{BatchOptions, FetchOptions, GrabConfig, ReadMode, TorConfig, WriteMode};
pub use utils::{dedup_urls, extract_authority, is_local_path};
pub use warning::MAX_WARNINGS;

#[cfg(feature = "js")]
pub use render::ChromeRenderer;

// Internal modules - these are not part of the public API
mod concurrent;
mod config;
mod error;
mod grabber;
mod local;
mod proxies;
mod render;
mod response;
mod rotation;
mod scan;
mod session;
mod tor;
mod types;
mod utils;
mod warning;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, GrabError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Initialize logging.
///
/// Installs a `tracing` subscriber that honors `RUST_LOG` and defaults to
/// `webgrab_lib=info`. Calling it more than once, or after the application
/// installed its own subscriber, is a no-op.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("webgrab_lib=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        features: get_enabled_features(),
    }
}

/// Information about the library build and features
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub features: Vec<&'static str>,
}

/// Get list of enabled features at compile time
#[allow(clippy::vec_init_then_push)]
fn get_enabled_features() -> Vec<&'static str> {
    let mut features = Vec::new();

    #[cfg(feature = "socks")]
    features.push("socks");

    #[cfg(feature = "js")]
    features.push("js");

    features
}
