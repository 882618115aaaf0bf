//! Utility functions for target classification and validation.
//!
//! This module contains helper functions for URL validation, local path
//! detection, authority extraction and input deduplication used
//! throughout the library.

use crate::error::GrabError;
use crate::types::{BatchOptions, FetchOptions, MAX_RETRIES};
use regex::Regex;
use std::collections::HashSet;
use url::Url;

lazy_static::lazy_static! {
    static ref DRIVE_LETTER: Regex = Regex::new(r"^[A-Za-z]:").expect("static regex");
}

/// Prefixes that mark a target as a filesystem path.
const LOCAL_PREFIXES: [&str; 5] = ["./", "../", "/", "~/", "file://"];

/// Check whether a target looks like a filesystem path.
///
/// Relative (`./`, `../`), absolute (`/`), home (`~/`), `file://` URLs and
/// Windows drive letters (`C:`) count as local.
pub fn is_local_path(target: &str) -> bool {
    let target = target.trim();
    LOCAL_PREFIXES.iter().any(|p| target.starts_with(p))
        || target.starts_with(".\\")
        || DRIVE_LETTER.is_match(target)
}

/// Validate a target for the network fetch path.
///
/// # Errors
///
/// - `InvalidArgument` for an empty target
/// - `InvalidTarget` for local paths, unparsable URLs and non-http(s) schemes
pub fn validate_url(target: &str) -> Result<Url, GrabError> {
    let trimmed = target.trim();

    if trimmed.is_empty() {
        return Err(GrabError::invalid_argument("url", "URL cannot be empty"));
    }

    if is_local_path(trimmed) {
        return Err(GrabError::local_path(trimmed));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| GrabError::invalid_target(trimmed, format!("malformed URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(GrabError::invalid_target(
                trimmed,
                format!("unsupported scheme '{}', URL must start with http", other),
            ))
        }
    }

    if url.host_str().is_none() {
        return Err(GrabError::invalid_target(trimmed, "URL has no host"));
    }

    Ok(url)
}

/// Extract the authority (scheme + host + port) used as the grouping key.
///
/// Unparsable inputs fall back to the raw text up to the first `/` after
/// the scheme so they still land in exactly one group.
pub fn extract_authority(target: &str) -> String {
    if let Ok(url) = Url::parse(target) {
        if let Some(host) = url.host_str() {
            return match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            };
        }
    }

    match target.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or_default();
            format!("{}://{}", scheme, host)
        }
        None => target.split('/').next().unwrap_or_default().to_string(),
    }
}

/// Remove repeated URLs, keeping the first occurrence of each.
pub fn dedup_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(Into::into)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// File name used when a download has no explicit destination.
///
/// Takes the last non-empty path segment; returns `None` when it carries no
/// file extension.
pub fn filename_from_url(target: &str) -> Option<String> {
    let path = match Url::parse(target) {
        Ok(url) => url.path().to_string(),
        Err(_) => target.to_string(),
    };
    let name = path.rsplit('/').find(|s| !s.is_empty())?;
    if name.contains('.') {
        Some(name.to_string())
    } else {
        None
    }
}

/// Validate the shape of single-fetch options.
pub fn validate_fetch_options(opts: &FetchOptions) -> Result<(), GrabError> {
    if opts.timeout.is_zero() {
        return Err(GrabError::invalid_argument(
            "timeout",
            "timeout must be greater than zero",
        ));
    }

    if opts.retries > MAX_RETRIES {
        return Err(GrabError::invalid_argument(
            "retries",
            format!("retries must be at most {}", MAX_RETRIES),
        ));
    }

    if opts.enable_js && (!opts.headers.is_empty() || !opts.query.is_empty()) {
        return Err(GrabError::invalid_argument(
            "enable_js",
            "headers and query parameters are not supported for rendered pages",
        ));
    }

    Ok(())
}

/// Validate the shape of batch options.
pub fn validate_batch_options(opts: &BatchOptions) -> Result<(), GrabError> {
    validate_fetch_options(&opts.fetch)?;

    if opts.thread_limit == 0 {
        return Err(GrabError::invalid_argument(
            "thread_limit",
            "thread_limit must be at least 1",
        ));
    }

    if opts.chunk_size == 0 {
        return Err(GrabError::invalid_argument(
            "chunk_size",
            "chunk_size must be at least 1",
        ));
    }

    if opts.multiplier == 0 {
        return Err(GrabError::invalid_argument(
            "multiplier",
            "multiplier must be at least 1",
        ));
    }

    Ok(())
}
