//! Plain HTTP proxy list.
//!
//! An alternative to Tor for anonymized requests: a list of `ip:port` HTTP
//! proxies, either supplied by the caller or pulled from a free-proxy API,
//! from which a random entry is picked per request.

use crate::error::GrabError;
use rand::seq::SliceRandom;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Free-proxy endpoint returning one `ip:port` per line.
pub const PROXYSCRAPE_URL: &str = "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all";

/// One HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEntry {
    pub host: IpAddr,
    pub port: u16,
}

impl ProxyEntry {
    /// Parse `ip:port`, optionally prefixed with `http://`.
    pub fn parse(input: &str) -> Result<Self, GrabError> {
        let trimmed = input.trim();
        let bare = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        let bad = || GrabError::invalid_argument("proxies", format!("'{}' is not ip:port", input));

        let (host, port) = bare.rsplit_once(':').ok_or_else(bad)?;
        let host = host.trim_matches(|c| c == '[' || c == ']');
        Ok(Self {
            host: host.parse().map_err(|_| bad())?,
            port: port.parse().map_err(|_| bad())?,
        })
    }

    /// Proxy URL for the HTTP client.
    pub fn url(&self) -> String {
        match self.host {
            IpAddr::V4(ip) => format!("http://{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("http://[{}]:{}", ip, self.port),
        }
    }
}

/// Thread-safe list of proxies to choose from.
#[derive(Debug, Clone, Default)]
pub struct ProxyList {
    entries: Arc<Mutex<Vec<ProxyEntry>>>,
}

impl ProxyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with caller-supplied proxies.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on the first entry that is not `ip:port`;
    /// the current list is left untouched in that case.
    pub fn set<S: AsRef<str>>(&self, proxies: &[S]) -> Result<usize, GrabError> {
        let parsed = proxies
            .iter()
            .map(|p| ProxyEntry::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.replace(parsed))
    }

    fn replace(&self, entries: Vec<ProxyEntry>) -> usize {
        let count = entries.len();
        if let Ok(mut current) = self.entries.lock() {
            *current = entries;
        }
        count
    }

    /// Pull a fresh list from the free-proxy API.
    ///
    /// Lines that don't parse are skipped.
    pub async fn update(&self, client: &reqwest::Client, source: &str) -> Result<usize, GrabError> {
        let response = client
            .get(source)
            .send()
            .await
            .map_err(|e| GrabError::transport(source, e.to_string()))?;
        if !response.status().is_success() {
            return Err(GrabError::transport_with_status(
                source,
                "proxy list request failed",
                response.status().as_u16(),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| GrabError::transport(source, e.to_string()))?;

        let entries = parse_proxy_lines(&body);
        tracing::info!(count = entries.len(), "refreshed proxy list");
        Ok(self.replace(entries))
    }

    /// A random entry, if any.
    pub fn random(&self) -> Option<ProxyEntry> {
        let entries = self.entries.lock().ok()?;
        entries.choose(&mut rand::thread_rng()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<ProxyEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Parse a newline separated `ip:port` list, skipping junk.
pub fn parse_proxy_lines(body: &str) -> Vec<ProxyEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains(':'))
        .filter_map(|line| ProxyEntry::parse(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_entry() {
        let entry = ProxyEntry::parse("10.0.0.1:8080").unwrap();
        assert_eq!(entry.port, 8080);
        assert_eq!(entry.url(), "http://10.0.0.1:8080");
        assert_eq!(ProxyEntry::parse("http://10.0.0.1:3128").unwrap().port, 3128);
        assert_eq!(ProxyEntry::parse("[::1]:8080").unwrap().url(), "http://[::1]:8080");
        assert!(ProxyEntry::parse("10.0.0.1").is_err());
        assert!(ProxyEntry::parse("proxy.example:80").is_err());
        assert!(ProxyEntry::parse("10.0.0.1:99999").is_err());
    }

    #[test]
    fn test_set_is_all_or_nothing() {
        let list = ProxyList::new();
        assert_eq!(list.set(&["10.0.0.1:80", "10.0.0.2:81"]).unwrap(), 2);
        assert!(list.set(&["10.0.0.3:80", "junk"]).is_err());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_random_picks_from_list() {
        let list = ProxyList::new();
        assert!(list.random().is_none());
        list.set(&["10.0.0.1:80", "10.0.0.2:81"]).unwrap();
        let pick = list.random().unwrap();
        assert!(list.entries().contains(&pick));
    }

    #[test]
    fn test_parse_proxy_lines_skips_junk() {
        let body = "10.0.0.1:80\r\n\n<html>\n10.0.0.2:8080\nnot:a:proxy\n";
        let entries = parse_proxy_lines(body);
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_update_from_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:80\n5.6.7.8:3128\n"))
            .mount(&server)
            .await;

        let list = ProxyList::new();
        let count = list
            .update(&reqwest::Client::new(), &format!("{}/proxies", server.uri()))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(list.len(), 2);
    }
}
