//! HTTP transport used by the resolver and the identifier systems
use crate::config::HttpConfig;
use crate::error::{IdError, IdResult};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Head,
    Get,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Follow redirects inside the transport (metadata fetches) or not
    /// (resolution chain hops)
    pub follow_redirects: bool,
    /// Read the response body; chain hops only need status and headers
    pub read_body: bool,
}

impl HttpRequest {
    /// Single hop of a resolution chain
    pub fn hop(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            follow_redirects: false,
            read_body: false,
        }
    }

    /// Plain GET whose body will be consumed
    pub fn fetch(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            headers: Vec::new(),
            follow_redirects: true,
            read_body: true,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Response as seen by the resolver, retained as a progenitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Final URL of the response
    pub url: String,
    pub status: u16,
    /// Header names are lowercase
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn new(url: &str, status: u16) -> Self {
        Self {
            url: url.to_string(),
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 3xx carrying a Location header
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.header("location").is_some()
    }

    /// Location header resolved against the response URL
    pub fn next_url(&self) -> IdResult<Option<String>> {
        let Some(location) = self.header("location") else {
            return Ok(None);
        };
        let base = url::Url::parse(&self.url)
            .map_err(|e| IdError::Resolution(format!("Invalid URL {}: {}", self.url, e)))?;
        let next = base
            .join(location)
            .map_err(|e| IdError::Resolution(format!("Invalid Location {}: {}", location, e)))?;
        Ok(Some(next.to_string()))
    }

    pub fn json(&self) -> IdResult<serde_json::Value> {
        let body = self.body.as_deref().unwrap_or_default();
        Ok(serde_json::from_slice(body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.body.as_deref().unwrap_or_default()).into_owned()
    }
}

/// Failures below HTTP, no status was received
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Other(String),
}

/// Sends requests; implemented over reqwest and by scripted test doubles
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest backed transport
#[derive(Clone)]
pub struct ReqwestTransport {
    /// Never follows redirects, used for chain hops
    hop_client: reqwest::Client,
    /// Follows redirects, used for metadata and data fetches
    fetch_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> IdResult<Self> {
        let build = |policy: reqwest::redirect::Policy| {
            let mut builder = reqwest::Client::builder()
                .user_agent(&config.user_agent)
                .redirect(policy);
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            builder
                .build()
                .map_err(|e| IdError::Configuration(format!("Failed to create HTTP client: {}", e)))
        };

        Ok(Self {
            hop_client: build(reqwest::redirect::Policy::none())?,
            fetch_client: build(reqwest::redirect::Policy::limited(config.max_redirects))?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = if request.follow_redirects {
            &self.fetch_client
        } else {
            &self.hop_client
        };
        let method = match request.method {
            Method::Head => reqwest::Method::HEAD,
            Method::Get => reqwest::Method::GET,
        };

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!("{} {}", request.method.as_str(), request.url);
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_http_request(request.method.as_str(), None);
                return Err(classify_reqwest_error(e));
            }
        };

        let url = response.url().to_string();
        let status = response.status().as_u16();
        metrics::record_http_request(request.method.as_str(), Some(status));
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        // an unread body is dropped with the response, nothing is buffered
        let body = if request.read_body {
            Some(
                response
                    .bytes()
                    .await
                    .map_err(classify_reqwest_error)?
                    .to_vec(),
            )
        } else {
            None
        };

        Ok(HttpResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_location_resolution() {
        let resp = HttpResponse::new("https://example.org/a/b", 302).with_header("Location", "../c");
        assert!(resp.is_redirect());
        assert_eq!(resp.next_url().unwrap().as_deref(), Some("https://example.org/c"));
    }

    #[test]
    fn test_redirect_requires_location() {
        let resp = HttpResponse::new("https://example.org/", 301);
        assert!(!resp.is_redirect());
        assert_eq!(resp.next_url().unwrap(), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = HttpResponse::new("https://example.org/", 200).with_header("Content-Type", "text/html");
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("text/html"));
    }
}
