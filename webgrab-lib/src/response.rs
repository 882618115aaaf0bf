//! Owned HTTP response snapshots.

use crate::error::GrabError;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// A fully read HTTP response.
///
/// The body is buffered so responses can be moved between tasks and kept in
/// batch result maps. Header names are lower-cased and every value of a
/// repeated header is kept in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: HashMap<String, Vec<String>>,
    /// Raw (already decompressed) body
    pub body: Vec<u8>,
    /// True when the body came from the headless browser
    pub rendered: bool,
}

impl Response {
    /// Build a response from its parts.
    pub fn new(
        url: String,
        status: u16,
        headers: HashMap<String, Vec<String>>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url,
            status,
            headers,
            body,
            rendered: false,
        }
    }

    /// Wrap HTML produced by the headless browser.
    ///
    /// The browser does not report the document's HTTP status, so rendered
    /// pages always carry a synthetic 200.
    pub fn rendered(url: &str, html: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            vec!["text/html; charset=utf-8".to_string()],
        );
        Self {
            url: url.to_string(),
            status: 200,
            headers,
            body: html.into_bytes(),
            rendered: true,
        }
    }

    /// Read a reqwest response to the end.
    pub async fn from_reqwest(res: reqwest::Response) -> Result<Self, GrabError> {
        let url = res.url().to_string();
        let status = res.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in res.headers() {
            // Non-ASCII values are kept lossily rather than dropped
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| GrabError::transport(&url, format!("Failed to read body: {}", e)))?;
        Ok(Self::new(url, status, headers, body.to_vec()))
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, GrabError> {
        String::from_utf8(self.body.clone()).map_err(|_| {
            GrabError::transport_with_status(
                &self.url,
                "response body is not valid UTF-8",
                self.status,
            )
        })
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GrabError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_all(name).first().map(String::as_str)
    }

    /// Every value of a header, such as repeated `Set-Cookie` lines.
    pub fn header_all(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Charset declared in the content type, defaulting to utf-8.
    pub fn encoding(&self) -> String {
        self.header("content-type")
            .and_then(|ct| {
                ct.split(';')
                    .find(|part| part.trim().starts_with("charset="))
                    .and_then(|part| part.trim().strip_prefix("charset="))
                    .map(|cs| cs.trim_matches('"').trim().to_ascii_lowercase())
            })
            .unwrap_or_else(|| "utf-8".to_string())
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Response [{}]>", self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_content_type(ct: &str) -> Response {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), vec![ct.to_string()]);
        Response::new("http://a.test/".to_string(), 200, headers, b"{\"ok\":true}".to_vec())
    }

    #[test]
    fn test_rendered_response_is_synthetic_200() {
        let res = Response::rendered("http://a.test/page", "<html></html>".to_string());
        assert_eq!(res.status, 200);
        assert!(res.rendered);
        assert_eq!(res.text().unwrap(), "<html></html>");
        assert_eq!(res.to_string(), "<Response [200]>");
    }

    #[test]
    fn test_encoding_from_content_type() {
        assert_eq!(
            with_content_type("text/html; charset=\"ISO-8859-1\"").encoding(),
            "iso-8859-1"
        );
        assert_eq!(with_content_type("application/json").encoding(), "utf-8");
    }

    #[test]
    fn test_json_and_header_lookup() {
        let res = with_content_type("application/json");
        let value: serde_json::Value = res.json().unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(res.header("Content-Type"), Some("application/json"));
        assert!(res.is_success());
    }

    #[test]
    fn test_repeated_headers_are_kept() {
        let mut headers = HashMap::new();
        headers.insert(
            "set-cookie".to_string(),
            vec!["a=1".to_string(), "b=2".to_string()],
        );
        let res = Response::new("http://a.test/".to_string(), 200, headers, Vec::new());
        assert_eq!(res.header("Set-Cookie"), Some("a=1"));
        assert_eq!(res.header_all("set-cookie"), ["a=1", "b=2"]);
        assert!(res.header_all("x-missing").is_empty());
    }
}
