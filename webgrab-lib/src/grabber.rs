//! The main fetching context.
//!
//! A [`Grabber`] owns everything that used to be process-wide state: the
//! HTTP session pool, the Tor handle, the rotation counter, the renderer,
//! the proxy list and the warning sink. It is cheap to clone; clones share
//! all of it.

use crate::concurrent::{dispatch, generate_partitions, group_by_domain, WorkItem, WorkResult};
use crate::error::GrabError;
use crate::local::write_local_bytes;
use crate::proxies::{ProxyList, PROXYSCRAPE_URL};
use crate::render::{default_renderer, renderer_missing, PageRenderer};
use crate::response::Response;
use crate::rotation::RotationCounter;
use crate::session::{build_header_map, SessionKey, SessionPool};
use crate::tor::{AnonymizingProxy, TorIdentity, TorProcess, IP_INFO_URL};
use crate::types::{BatchOptions, FetchOptions, GrabConfig, WriteMode};
use crate::utils::{
    dedup_urls, filename_from_url, validate_batch_options, validate_fetch_options, validate_url,
};
use crate::warning::WarningSink;
use reqwest::Method;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// URL → response, or `None` when fetching it failed.
pub type BatchResults = HashMap<String, Option<Response>>;

/// Statuses that are retried.
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Headers sent through Tor so requests look like an ordinary browser.
const TOR_HEADERS: [(&str, &str); 4] = [
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Referer", "https://www.google.com"),
];

/// Connect timeout for pooled clients; request timeouts are set per call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the requests of one call are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Direct,
    Tor { proxy: String, browser: String },
    ProxyList,
    Explicit(String),
}

/// Request body.
#[derive(Debug, Clone)]
enum Payload {
    Empty,
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

struct Inner {
    config: GrabConfig,
    sessions: SessionPool,
    proxy: tokio::sync::Mutex<Box<dyn AnonymizingProxy>>,
    /// Set while tor is meant to be running for this grabber
    tor_requested: AtomicBool,
    rotation: Mutex<Option<RotationCounter>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    proxies: ProxyList,
    warnings: WarningSink,
}

/// Builder for a [`Grabber`] with non-default collaborators.
pub struct GrabberBuilder {
    config: GrabConfig,
    renderer: Option<Arc<dyn PageRenderer>>,
    proxy: Option<Box<dyn AnonymizingProxy>>,
}

impl GrabberBuilder {
    pub fn new(config: GrabConfig) -> Self {
        Self {
            config,
            renderer: default_renderer(),
            proxy: None,
        }
    }

    /// Use a custom page renderer for `enable_js` fetches.
    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Use a custom anonymizing proxy instead of a local tor process.
    pub fn proxy_backend(mut self, proxy: Box<dyn AnonymizingProxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Build the grabber.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configured default headers are not
    /// valid HTTP headers.
    pub fn build(self) -> Result<Grabber, GrabError> {
        let sessions = SessionPool::new(&self.config.headers, CONNECT_TIMEOUT)?;
        let proxy: Box<dyn AnonymizingProxy> = match self.proxy {
            Some(proxy) => proxy,
            None => Box::new(TorProcess::new(self.config.tor.clone())),
        };

        Ok(Grabber {
            inner: Arc::new(Inner {
                sessions,
                proxy: tokio::sync::Mutex::new(proxy),
                tor_requested: AtomicBool::new(false),
                rotation: Mutex::new(None),
                renderer: self.renderer,
                proxies: ProxyList::new(),
                warnings: WarningSink::new(self.config.warnings),
                config: self.config,
            }),
        })
    }
}

/// Fetching context.
///
/// # Example
///
/// ```rust,no_run
/// use webgrab_lib::Grabber;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let grabber = Grabber::new()?;
///     let opts = grabber.batch_options();
///     let results = grabber
///         .get_batch(vec!["https://example.com/", "https://example.org/"], &opts)
///         .await?;
///     for (url, response) in &results {
///         match response {
///             Some(res) => println!("{} -> {}", url, res),
///             None => println!("{} failed", url),
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Grabber {
    inner: Arc<Inner>,
}

impl Grabber {
    /// Create a grabber with default configuration.
    pub fn new() -> Result<Self, GrabError> {
        Self::with_config(GrabConfig::default())
    }

    /// Create a grabber with custom configuration.
    pub fn with_config(config: GrabConfig) -> Result<Self, GrabError> {
        GrabberBuilder::new(config).build()
    }

    /// Start building a grabber with custom collaborators.
    pub fn builder(config: GrabConfig) -> GrabberBuilder {
        GrabberBuilder::new(config)
    }

    pub fn config(&self) -> &GrabConfig {
        &self.inner.config
    }

    /// Single-fetch options seeded from the configuration.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::from(&self.inner.config)
    }

    /// Batch options seeded from the configuration.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::from(&self.inner.config)
    }

    /// Fetch a single URL.
    ///
    /// 5xx statuses (500, 502, 503, 504), connection failures and timeouts
    /// are retried up to `opts.retries` times. With `enable_js` the page is
    /// rendered in the headless browser and returned as a synthetic 200.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for bad options or an empty URL
    /// - `InvalidTarget` for local paths and non-http(s) URLs
    /// - `Transport` / `Timeout` when the request fails for good
    /// - `DependencyMissing` for `enable_js` without a renderer
    pub async fn get(&self, url: &str, opts: &FetchOptions) -> Result<Response, GrabError> {
        self.request(Method::GET, url, Payload::Empty, opts).await
    }

    /// Send a HEAD request.
    pub async fn head(&self, url: &str, opts: &FetchOptions) -> Result<Response, GrabError> {
        self.request(Method::HEAD, url, Payload::Empty, opts).await
    }

    /// Send a POST request with a raw body. POSTs are never retried.
    pub async fn post<B: Into<Vec<u8>>>(
        &self,
        url: &str,
        body: B,
        opts: &FetchOptions,
    ) -> Result<Response, GrabError> {
        self.request(Method::POST, url, Payload::Bytes(body.into()), opts)
            .await
    }

    /// Send a POST request with a JSON body. POSTs are never retried.
    pub async fn post_json<T: serde::Serialize>(
        &self,
        url: &str,
        body: &T,
        opts: &FetchOptions,
    ) -> Result<Response, GrabError> {
        let value = serde_json::to_value(body)?;
        self.request(Method::POST, url, Payload::Json(value), opts)
            .await
    }

    /// Send a PUT request.
    pub async fn put<B: Into<Vec<u8>>>(
        &self,
        url: &str,
        body: B,
        opts: &FetchOptions,
    ) -> Result<Response, GrabError> {
        self.request(Method::PUT, url, Payload::Bytes(body.into()), opts)
            .await
    }

    /// Send a PATCH request. PATCHes are never retried.
    pub async fn patch<B: Into<Vec<u8>>>(
        &self,
        url: &str,
        body: B,
        opts: &FetchOptions,
    ) -> Result<Response, GrabError> {
        self.request(Method::PATCH, url, Payload::Bytes(body.into()), opts)
            .await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, url: &str, opts: &FetchOptions) -> Result<Response, GrabError> {
        self.request(Method::DELETE, url, Payload::Empty, opts).await
    }

    /// Send an OPTIONS request.
    pub async fn options(&self, url: &str, opts: &FetchOptions) -> Result<Response, GrabError> {
        self.request(Method::OPTIONS, url, Payload::Empty, opts)
            .await
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        opts: &FetchOptions,
    ) -> Result<Response, GrabError> {
        validate_fetch_options(opts)?;
        let target = validate_url(url)?;
        if opts.enable_js && method != Method::GET {
            return Err(GrabError::invalid_argument(
                "enable_js",
                "only GET requests can be rendered",
            ));
        }

        let route = self.resolve_route(opts).await?;
        let result = self
            .send(&method, target.as_str(), &payload, opts, &route, None)
            .await;
        self.record_requests(1).await;
        result
    }

    /// Fetch many URLs concurrently.
    ///
    /// Duplicates are fetched once. Every distinct URL gets an entry in the
    /// result: `Some` on success, `None` when the fetch failed, in which
    /// case a warning is recorded instead of failing the call.
    ///
    /// Malformed URLs and local paths are per-URL failures too: they get a
    /// `None` entry and a warning while the rest of the batch runs.
    ///
    /// # Errors
    ///
    /// Only for invalid options, before any request is sent, or when no
    /// anonymizing transport is available for `use_proxy`.
    pub async fn get_batch<I, S>(&self, urls: I, opts: &BatchOptions) -> Result<BatchResults, GrabError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_batch_options(opts)?;
        let urls = dedup_urls(urls);
        self.run_batch(Method::GET, urls, HashMap::new(), opts).await
    }

    /// POST a raw body to each URL concurrently.
    ///
    /// `bodies` pairs up with `urls` by position. Like every POST, nothing
    /// is retried. Failures are reported as in [`Grabber::get_batch`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the lists differ in length, a URL repeats or
    /// rendering is requested, plus every error of [`Grabber::get_batch`].
    pub async fn post_batch<U, B>(
        &self,
        urls: &[U],
        bodies: &[B],
        opts: &BatchOptions,
    ) -> Result<BatchResults, GrabError>
    where
        U: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let payloads = bodies
            .iter()
            .map(|body| Payload::Bytes(body.as_ref().to_vec()))
            .collect();
        self.post_payloads(urls, payloads, opts).await
    }

    /// POST a JSON body to each URL concurrently.
    ///
    /// Same pairing and failure rules as [`Grabber::post_batch`].
    pub async fn post_json_batch<U, T>(
        &self,
        urls: &[U],
        bodies: &[T],
        opts: &BatchOptions,
    ) -> Result<BatchResults, GrabError>
    where
        U: AsRef<str>,
        T: serde::Serialize,
    {
        let payloads = bodies
            .iter()
            .map(|body| serde_json::to_value(body).map(Payload::Json))
            .collect::<Result<Vec<_>, _>>()?;
        self.post_payloads(urls, payloads, opts).await
    }

    async fn post_payloads<U: AsRef<str>>(
        &self,
        urls: &[U],
        payloads: Vec<Payload>,
        opts: &BatchOptions,
    ) -> Result<BatchResults, GrabError> {
        validate_batch_options(opts)?;
        if opts.fetch.enable_js {
            return Err(GrabError::invalid_argument(
                "enable_js",
                "only GET requests can be rendered",
            ));
        }
        if urls.len() != payloads.len() {
            return Err(GrabError::invalid_argument(
                "bodies",
                format!("got {} URLs but {} bodies", urls.len(), payloads.len()),
            ));
        }

        let mut ordered = Vec::with_capacity(urls.len());
        let mut by_url = HashMap::with_capacity(urls.len());
        for (url, payload) in urls.iter().zip(payloads) {
            let url = url.as_ref().to_string();
            if by_url.insert(url.clone(), payload).is_some() {
                return Err(GrabError::invalid_argument(
                    "urls",
                    format!("'{}' appears more than once", url),
                ));
            }
            ordered.push(url);
        }

        self.run_batch(Method::POST, ordered, by_url, opts).await
    }

    /// Validate, partition and dispatch distinct URLs.
    ///
    /// `payloads` holds the body per URL; URLs without one are sent empty.
    async fn run_batch(
        &self,
        method: Method,
        urls: Vec<String>,
        payloads: HashMap<String, Payload>,
        opts: &BatchOptions,
    ) -> Result<BatchResults, GrabError> {
        let mut results = BatchResults::with_capacity(urls.len());
        let mut targets = Vec::with_capacity(urls.len());
        for url in urls {
            match validate_url(&url) {
                Ok(_) => targets.push(url),
                Err(e) => {
                    self.inner.warnings.warn(format!("Skipping {}: {}", url, e));
                    results.insert(url, None);
                }
            }
        }
        if targets.is_empty() {
            return Ok(results);
        }

        let route = Arc::new(self.resolve_route(&opts.fetch).await?);
        let groups = Arc::new(group_by_domain(&targets));
        let partitions = generate_partitions(&groups, opts.cutoff, opts.chunk_size, opts.multiplier);
        debug!(
            method = %method,
            urls = targets.len(),
            skipped = results.len(),
            domains = groups.domain_count(),
            partitions = partitions.len(),
            "dispatching batch"
        );

        let grabber = self.clone();
        let fetch_opts = Arc::new(opts.fetch.clone());
        let payloads = Arc::new(payloads);
        let outcomes = dispatch(
            groups,
            partitions,
            opts.cutoff,
            opts.thread_limit,
            opts.time_rest,
            move |item: WorkItem| {
                let grabber = grabber.clone();
                let method = method.clone();
                let opts = Arc::clone(&fetch_opts);
                let route = Arc::clone(&route);
                let payload = payloads.get(&item.url).cloned().unwrap_or(Payload::Empty);
                async move {
                    let domain = item.high_volume.then_some(item.domain.as_str());
                    grabber
                        .send(&method, &item.url, &payload, &opts, &route, domain)
                        .await
                }
            },
        )
        .await;

        results.extend(self.collect_outcomes(&targets, outcomes));
        self.record_requests(targets.len() as u64).await;
        Ok(results)
    }

    fn collect_outcomes(&self, urls: &[String], outcomes: Vec<WorkResult>) -> BatchResults {
        let mut results = BatchResults::with_capacity(urls.len());
        for (url, outcome) in outcomes {
            let response = match outcome {
                Ok(response) => Some(response),
                Err(e) => {
                    self.inner.warnings.warn(format!("Failed to fetch {}: {}", url, e));
                    None
                }
            };
            results.insert(url, response);
        }

        for url in urls {
            if !results.contains_key(url) {
                self.inner
                    .warnings
                    .warn(format!("Failed to fetch {}: worker did not finish", url));
                results.insert(url.clone(), None);
            }
        }
        results
    }

    /// Download a URL to a file.
    ///
    /// Without an explicit path the last URL path segment is used as the
    /// file name. Either way the name must carry an extension.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a missing file name, `Transport` with the
    /// status for anything but 200, plus every error of [`Grabber::get`].
    pub async fn download(
        &self,
        url: &str,
        path: Option<&Path>,
        opts: &FetchOptions,
    ) -> Result<PathBuf, GrabError> {
        let target = download_target(url, path)?;
        let response = self.get(url, opts).await?;
        if response.status != 200 {
            return Err(GrabError::transport_with_status(
                url,
                "download failed",
                response.status,
            ));
        }
        write_local_bytes(&target, &response.body, WriteMode::Write)?;
        info!(url, path = %target.display(), bytes = response.body.len(), "downloaded");
        Ok(target)
    }

    /// Download many URLs concurrently.
    ///
    /// `filenames` pairs up with `urls` by position. Failed downloads are
    /// reported as warnings; the written paths are returned.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the lists differ in length or a file name has
    /// no extension, plus every error of [`Grabber::get_batch`].
    pub async fn download_batch<U, P>(
        &self,
        urls: &[U],
        filenames: &[P],
        opts: &BatchOptions,
    ) -> Result<Vec<PathBuf>, GrabError>
    where
        U: AsRef<str>,
        P: AsRef<Path>,
    {
        if urls.len() != filenames.len() {
            return Err(GrabError::invalid_argument(
                "filenames",
                format!(
                    "got {} URLs but {} file names",
                    urls.len(),
                    filenames.len()
                ),
            ));
        }
        let targets = urls
            .iter()
            .zip(filenames)
            .map(|(url, name)| download_target(url.as_ref(), Some(name.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;

        let results = self
            .get_batch(urls.iter().map(|u| u.as_ref().to_string()), opts)
            .await?;

        let mut written = Vec::with_capacity(targets.len());
        for (url, target) in urls.iter().zip(targets) {
            let url = url.as_ref();
            match results.get(url).and_then(Option::as_ref) {
                Some(response) if response.status == 200 => {
                    match write_local_bytes(&target, &response.body, WriteMode::Write) {
                        Ok(()) => written.push(target),
                        Err(e) => self.inner.warnings.warn(format!("Failed to save {}: {}", url, e)),
                    }
                }
                Some(response) => self.inner.warnings.warn(format!(
                    "Failed to download {}: HTTP {}",
                    url, response.status
                )),
                // Already warned by the batch
                None => {}
            }
        }
        Ok(written)
    }

    async fn resolve_route(&self, opts: &FetchOptions) -> Result<Route, GrabError> {
        if let Some(proxy) = &opts.proxy {
            return Ok(Route::Explicit(proxy.clone()));
        }
        if !opts.use_proxy {
            return Ok(Route::Direct);
        }

        {
            let proxy = self.inner.proxy.lock().await;
            if proxy.status() {
                return Ok(Route::Tor {
                    proxy: proxy.proxy_url(),
                    browser: proxy.browser_proxy(),
                });
            }
        }

        // Tor was requested but is down: report it instead of switching transports
        if self.inner.tor_requested.load(Ordering::SeqCst) || self.rotation_status() {
            return Err(GrabError::proxy(
                "tor was started for this grabber but is not running; call start_tor() to restart it or stop_tor() to use the proxy list",
            ));
        }

        if self.inner.proxies.is_empty() {
            self.update_proxies().await?;
        }
        if self.inner.proxies.is_empty() {
            return Err(GrabError::proxy(
                "no anonymizing transport available: tor is not running and the proxy list is empty",
            ));
        }
        Ok(Route::ProxyList)
    }

    fn proxy_for(&self, route: &Route, browser: bool) -> Option<String> {
        match route {
            Route::Direct => None,
            Route::Tor { proxy, .. } if !browser => Some(proxy.clone()),
            Route::Tor { browser, .. } => Some(browser.clone()),
            Route::ProxyList => self.inner.proxies.random().map(|entry| entry.url()),
            Route::Explicit(proxy) => Some(proxy.clone()),
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        payload: &Payload,
        opts: &FetchOptions,
        route: &Route,
        session_domain: Option<&str>,
    ) -> Result<Response, GrabError> {
        if opts.enable_js {
            return self.render(url, opts, route).await;
        }

        let proxy = self.proxy_for(route, false);
        let key = session_key(route, proxy, session_domain);
        let client = self.inner.sessions.client(&key)?;

        // Caller headers win over injected ones
        let mut headers: HashMap<String, String> = HashMap::new();
        if matches!(route, Route::Tor { .. }) {
            for (name, value) in TOR_HEADERS {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        for (name, value) in &opts.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }
        let headers = build_header_map(&headers)?;

        let idempotent = *method != Method::POST && *method != Method::PATCH;
        let max_attempts = if idempotent { opts.retries + 1 } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut builder = client
                .request(method.clone(), url)
                .timeout(opts.timeout)
                .headers(headers.clone());
            if !opts.query.is_empty() {
                builder = builder.query(&opts.query);
            }
            builder = match payload {
                Payload::Empty => builder,
                Payload::Bytes(bytes) => builder.body(bytes.clone()),
                Payload::Json(value) => builder.json(value),
            };

            let outcome = match builder.send().await {
                Ok(res) => Response::from_reqwest(res).await,
                Err(e) => Err(GrabError::from_reqwest(url, e, opts.timeout)),
            };

            match outcome {
                Ok(res) if idempotent && RETRY_STATUSES.contains(&res.status) => {
                    if attempt >= max_attempts {
                        return Err(GrabError::transport_with_status(
                            url,
                            format!("giving up after {} attempt(s)", attempt),
                            res.status,
                        ));
                    }
                    debug!(url, status = res.status, attempt, "retrying");
                }
                Ok(res) => return Ok(res),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(url, error = %e, attempt, "retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.inner.config.retry_backoff).await;
        }
    }

    async fn render(&self, url: &str, opts: &FetchOptions, route: &Route) -> Result<Response, GrabError> {
        let renderer = self.inner.renderer.clone().ok_or_else(renderer_missing)?;
        let proxy = self.proxy_for(route, true);
        let html = renderer.render(url, proxy.as_deref(), opts.timeout).await?;
        Ok(Response::rendered(url, html))
    }

    async fn record_requests(&self, requests: u64) {
        let due = match self.inner.rotation.lock() {
            Ok(mut rotation) => rotation
                .as_mut()
                .map(|counter| counter.record(requests))
                .unwrap_or(false),
            Err(_) => false,
        };

        if due {
            if let Err(e) = self.rotate_identity().await {
                // Tor is down now; stop counting until the caller restarts it
                self.disable_rotation();
                self.inner.sessions.drop_proxied();
                warn!(error = %e, "proxy identity rotation failed, rotation disabled");
            }
        }
    }

    async fn rotate_identity(&self) -> Result<(), GrabError> {
        let mut proxy = self.inner.proxy.lock().await;
        proxy.rotate().await?;
        self.inner.sessions.drop_proxied();
        info!("rotated proxy identity");
        Ok(())
    }

    fn rotation_guard(&self) -> Result<std::sync::MutexGuard<'_, Option<RotationCounter>>, GrabError> {
        self.inner
            .rotation
            .lock()
            .map_err(|_| GrabError::internal("rotation lock poisoned"))
    }

    /// Rotate the proxy identity every `requests_per_rotation` requests.
    ///
    /// Starts tor if it isn't running yet.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a zero threshold
    /// - `ResourceConflict` when a proxy this grabber doesn't manage
    ///   already holds the SOCKS port
    /// - any error from starting tor
    pub async fn enable_rotation(&self, requests_per_rotation: u64) -> Result<(), GrabError> {
        let counter = RotationCounter::new(requests_per_rotation)?;

        {
            let mut proxy = self.inner.proxy.lock().await;
            if !proxy.status() {
                if proxy.port_in_use().await {
                    return Err(GrabError::resource_conflict(
                        proxy.proxy_url(),
                        "a proxy not started by webgrab already holds the port; stop it before enabling rotation",
                    ));
                }
                proxy.start().await?;
            }
        }

        self.inner.tor_requested.store(true, Ordering::SeqCst);
        *self.rotation_guard()? = Some(counter);
        info!(requests_per_rotation, "proxy rotation enabled");
        Ok(())
    }

    /// Stop rotating the proxy identity. Tor keeps running.
    pub fn disable_rotation(&self) {
        if let Ok(mut rotation) = self.inner.rotation.lock() {
            if rotation.take().is_some() {
                info!("proxy rotation disabled");
            }
        }
    }

    /// Whether rotation is enabled.
    pub fn rotation_status(&self) -> bool {
        self.inner
            .rotation
            .lock()
            .map(|rotation| rotation.is_some())
            .unwrap_or(false)
    }

    /// Start tor if it isn't running.
    pub async fn start_tor(&self) -> Result<(), GrabError> {
        let mut proxy = self.inner.proxy.lock().await;
        if !proxy.status() {
            proxy.start().await?;
        }
        self.inner.tor_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop tor. Also disables rotation.
    ///
    /// Afterwards `use_proxy` requests fall back to the proxy list again.
    pub async fn stop_tor(&self) -> Result<(), GrabError> {
        self.disable_rotation();
        self.inner.tor_requested.store(false, Ordering::SeqCst);
        let mut proxy = self.inner.proxy.lock().await;
        proxy.stop().await?;
        self.inner.sessions.drop_proxied();
        Ok(())
    }

    /// Whether tor is running.
    pub async fn tor_status(&self) -> bool {
        self.inner.proxy.lock().await.status()
    }

    /// Public IP address and location the network currently sees.
    ///
    /// Goes through tor when it is running, directly otherwise.
    pub async fn tor_identity(&self) -> Result<TorIdentity, GrabError> {
        self.tor_identity_from(IP_INFO_URL).await
    }

    /// Like [`Grabber::tor_identity`] with a custom ip-api compatible endpoint.
    pub async fn tor_identity_from(&self, source: &str) -> Result<TorIdentity, GrabError> {
        let tor_enabled = self.tor_status().await;
        let opts = self.fetch_options().with_proxy(tor_enabled);
        let response = self.get(source, &opts).await?;
        let mut identity: TorIdentity = response.json()?;
        identity.tor_enabled = tor_enabled;
        info!(
            tor = tor_enabled,
            ip = %identity.ip,
            country = identity.country.as_deref().unwrap_or("-"),
            "public identity"
        );
        Ok(identity)
    }

    /// Install tor from a bundled archive or binary.
    pub fn load_tor_dependencies(&self, source: &Path) -> Result<PathBuf, GrabError> {
        TorProcess::new(self.inner.config.tor.clone()).load_dependencies(source)
    }

    /// Replace the proxy list with `ip:port` entries.
    pub fn set_proxies<S: AsRef<str>>(&self, proxies: &[S]) -> Result<usize, GrabError> {
        let count = self.inner.proxies.set(proxies)?;
        self.inner.sessions.drop_proxied();
        Ok(count)
    }

    /// Refresh the proxy list from the free-proxy API.
    pub async fn update_proxies(&self) -> Result<usize, GrabError> {
        self.update_proxies_from(PROXYSCRAPE_URL).await
    }

    /// Refresh the proxy list from a custom `ip:port`-per-line source.
    pub async fn update_proxies_from(&self, source: &str) -> Result<usize, GrabError> {
        let client = self.inner.sessions.client(&SessionKey::shared(None))?;
        let count = self.inner.proxies.update(&client, source).await?;
        self.inner.sessions.drop_proxied();
        Ok(count)
    }

    /// The proxy list.
    pub fn proxies(&self) -> &ProxyList {
        &self.inner.proxies
    }

    /// Drop every cached session, closing their pooled connections.
    ///
    /// Returns the number of sessions dropped.
    pub fn reset_sessions(&self) -> usize {
        let dropped = self.inner.sessions.len();
        self.inner.sessions.clear();
        tracing::debug!(dropped, "cleared session pool");
        dropped
    }

    /// Turn batch warnings on or off.
    pub fn set_warnings(&self, enabled: bool) {
        self.inner.warnings.set_enabled(enabled);
    }

    /// Warnings recorded so far, at most the latest [`MAX_WARNINGS`](crate::MAX_WARNINGS).
    pub fn warnings(&self) -> Vec<String> {
        self.inner.warnings.messages()
    }

    /// Drain recorded warnings.
    pub fn take_warnings(&self) -> Vec<String> {
        self.inner.warnings.take()
    }
}

/// Pick the pooled client for one request.
///
/// Proxy-list requests pick a random proxy each time, so they always use
/// the shared client of that proxy instead of a per-domain one.
fn session_key(route: &Route, proxy: Option<String>, domain: Option<&str>) -> SessionKey {
    match domain {
        Some(domain) if *route != Route::ProxyList => SessionKey::dedicated(domain, proxy),
        _ => SessionKey::shared(proxy),
    }
}

fn download_target(url: &str, path: Option<&Path>) -> Result<PathBuf, GrabError> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(filename_from_url(url).ok_or_else(|| {
            GrabError::invalid_argument(
                "filename",
                format!("cannot derive a file name with an extension from '{}'", url),
            )
        })?),
    };

    if target.extension().is_none() {
        return Err(GrabError::invalid_argument(
            "filename",
            format!("'{}' has no file extension", target.display()),
        ));
    }
    Ok(target)
}
