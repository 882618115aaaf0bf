//! HTTP client pool.
//!
//! Keeps one shared `reqwest::Client` for ordinary traffic and a dedicated
//! client per high-volume authority, each per proxy route. Clients are
//! internally pooled and cheap to clone, so workers take a clone and drop
//! the lock immediately.

use crate::error::GrabError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Idle connections kept per host by a dedicated per-domain client.
const DEDICATED_IDLE_PER_HOST: usize = 64;

/// Identifies one pooled client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Authority for a dedicated client, `None` for the shared one
    pub domain: Option<String>,
    /// Proxy URL the client is routed through
    pub proxy: Option<String>,
}

impl SessionKey {
    pub fn shared(proxy: Option<String>) -> Self {
        Self {
            domain: None,
            proxy,
        }
    }

    pub fn dedicated<D: Into<String>>(domain: D, proxy: Option<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            proxy,
        }
    }
}

/// Lazily built clients keyed by [`SessionKey`].
#[derive(Debug, Clone)]
pub struct SessionPool {
    clients: Arc<Mutex<HashMap<SessionKey, reqwest::Client>>>,
    default_headers: HeaderMap,
    connect_timeout: Duration,
}

impl SessionPool {
    /// Create a pool whose clients send `headers` with every request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a header name or value is not valid HTTP.
    pub fn new(
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, GrabError> {
        Ok(Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            default_headers: build_header_map(headers)?,
            connect_timeout,
        })
    }

    /// Get the client for `key`, building it on first use.
    pub fn client(&self, key: &SessionKey) -> Result<reqwest::Client, GrabError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| GrabError::internal("session pool lock poisoned"))?;

        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        let client = self.build(key)?;
        tracing::debug!(
            domain = key.domain.as_deref().unwrap_or("<shared>"),
            proxy = key.proxy.as_deref().unwrap_or("<direct>"),
            "created HTTP session"
        );
        clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    /// Drop every client routed through a proxy.
    ///
    /// Used after an identity rotation so no connection to the old circuit
    /// is reused.
    pub fn drop_proxied(&self) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.retain(|key, _| key.proxy.is_none());
        }
    }

    /// Drop every client.
    pub fn clear(&self) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.clear();
        }
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, key: &SessionKey) -> Result<reqwest::Client, GrabError> {
        let mut builder = reqwest::Client::builder()
            .default_headers(self.default_headers.clone())
            .connect_timeout(self.connect_timeout);

        if key.domain.is_some() {
            builder = builder.pool_max_idle_per_host(DEDICATED_IDLE_PER_HOST);
        }

        if let Some(proxy_url) = &key.proxy {
            builder = builder.proxy(build_proxy(proxy_url)?);
        }

        builder
            .build()
            .map_err(|e| GrabError::internal(format!("Failed to create HTTP client: {}", e)))
    }
}

fn build_proxy(proxy_url: &str) -> Result<reqwest::Proxy, GrabError> {
    if proxy_url.starts_with("socks") && !cfg!(feature = "socks") {
        return Err(GrabError::dependency_missing(
            "socks",
            "rebuild webgrab-lib with the 'socks' feature to route through a SOCKS proxy",
        ));
    }

    reqwest::Proxy::all(proxy_url)
        .map_err(|e| GrabError::invalid_argument("proxy", format!("'{}': {}", proxy_url, e)))
}

/// Convert a plain header map into a reqwest one.
pub fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, GrabError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GrabError::invalid_argument("headers", format!("bad header name '{}'", name)))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            GrabError::invalid_argument("headers", format!("bad value for header '{}'", name))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> SessionPool {
        SessionPool::new(&HashMap::new(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_clients_are_reused_per_key() {
        let pool = pool();
        pool.client(&SessionKey::shared(None)).unwrap();
        pool.client(&SessionKey::shared(None)).unwrap();
        pool.client(&SessionKey::dedicated("https://a.test", None)).unwrap();
        pool.client(&SessionKey::dedicated("https://a.test", None)).unwrap();
        pool.client(&SessionKey::dedicated("https://b.test", None)).unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_drop_proxied_keeps_direct_clients() {
        let pool = pool();
        pool.client(&SessionKey::shared(None)).unwrap();
        pool.client(&SessionKey::shared(Some("http://10.0.0.1:8080".into())))
            .unwrap();
        assert_eq!(pool.len(), 2);
        pool.drop_proxied();
        assert_eq!(pool.len(), 1);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_bad_proxy_rejected() {
        let err = pool()
            .client(&SessionKey::shared(Some("::not a proxy::".into())))
            .unwrap_err();
        assert!(matches!(err, GrabError::InvalidArgument { .. }));
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(SessionPool::new(&headers, Duration::from_secs(1)).is_err());
    }
}
