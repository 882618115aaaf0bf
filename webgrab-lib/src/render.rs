//! JavaScript rendering through a headless browser.
//!
//! Rendering is an optional collaborator: the [`PageRenderer`] trait is
//! always available, the Chrome-backed implementation only with the `js`
//! feature.

use crate::error::GrabError;
use async_trait::async_trait;
use std::time::Duration;

/// Loads a page in a browser and returns the rendered document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `url` and return the resulting HTML.
    ///
    /// `proxy` is a browser proxy address such as `socks5://127.0.0.1:9050`.
    async fn render(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<String, GrabError>;
}

/// Renderer used when none is configured.
pub fn default_renderer() -> Option<std::sync::Arc<dyn PageRenderer>> {
    #[cfg(feature = "js")]
    {
        Some(std::sync::Arc::new(chrome::ChromeRenderer::new()))
    }
    #[cfg(not(feature = "js"))]
    {
        None
    }
}

/// Error returned when rendering is requested without a renderer.
pub fn renderer_missing() -> GrabError {
    GrabError::dependency_missing(
        "headless browser",
        "enable the 'js' feature or install a renderer with Grabber::builder(config).renderer(..)",
    )
}

#[cfg(feature = "js")]
pub use chrome::ChromeRenderer;

#[cfg(feature = "js")]
mod chrome {
    use super::PageRenderer;
    use crate::error::GrabError;
    use async_trait::async_trait;
    use headless_chrome::{Browser, LaunchOptions};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Headless Chrome renderer.
    ///
    /// One browser is launched per proxy route and reused across renders;
    /// every render gets its own tab.
    #[derive(Clone, Default)]
    pub struct ChromeRenderer {
        browsers: Arc<Mutex<HashMap<Option<String>, Browser>>>,
    }

    impl ChromeRenderer {
        pub fn new() -> Self {
            Self::default()
        }

        fn browser(&self, proxy: Option<&str>) -> Result<Browser, String> {
            let mut browsers = self
                .browsers
                .lock()
                .map_err(|_| "browser registry lock poisoned".to_string())?;
            let key = proxy.map(str::to_string);
            if let Some(browser) = browsers.get(&key) {
                return Ok(browser.clone());
            }

            let options = LaunchOptions::default_builder()
                .headless(true)
                .proxy_server(proxy)
                .build()
                .map_err(|e| format!("invalid launch options: {}", e))?;
            let browser = Browser::new(options).map_err(|e| format!("failed to launch browser: {}", e))?;
            tracing::info!(proxy = proxy.unwrap_or("<direct>"), "launched headless browser");
            browsers.insert(key, browser.clone());
            Ok(browser)
        }

        fn render_blocking(&self, url: &str, proxy: Option<&str>, timeout: Duration) -> Result<String, String> {
            let browser = self.browser(proxy)?;
            let tab = browser.new_tab().map_err(|e| e.to_string())?;
            tab.set_default_timeout(timeout);
            let html = tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .and_then(|tab| tab.get_content())
                .map_err(|e| e.to_string());
            let _ = tab.close(true);
            html
        }
    }

    #[async_trait]
    impl PageRenderer for ChromeRenderer {
        async fn render(
            &self,
            url: &str,
            proxy: Option<&str>,
            timeout: Duration,
        ) -> Result<String, GrabError> {
            let renderer = self.clone();
            let target = url.to_string();
            let proxy = proxy.map(str::to_string);

            tokio::task::spawn_blocking(move || {
                renderer.render_blocking(&target, proxy.as_deref(), timeout)
            })
            .await
            .map_err(|e| GrabError::render(url, format!("render task failed: {}", e)))?
            .map_err(|message| GrabError::render(url, message))
        }
    }
}
