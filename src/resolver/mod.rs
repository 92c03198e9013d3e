//! Resolution chain resolver
//!
//! Follows the redirect chain of an actionable identifier hop by hop.
//!
//! Each hop:
//! 1. HEAD without following redirects
//! 2. GET (body not read) for remotes with broken HEAD support
//! 3. GET with a browser User-Agent for remotes that block unknown clients
//! 4. GET with scoped credentials from the header selector, if any
//!
//! The first attempt with a status below 400 is accepted. If none succeeds
//! the last response becomes the (failing) hop; nothing is retried beyond that.

pub mod transport;

pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

use crate::error::{IdError, IdResult};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Picks extra headers (usually credentials) for a network location
pub type HeaderSelector = Arc<dyn Fn(&str) -> Option<Vec<(String, String)>> + Send + Sync>;

/// One element of a resolution chain
#[derive(Debug, Clone, PartialEq)]
pub enum ChainLink {
    /// A hop together with the response that produced it
    Hop { uri: String, response: HttpResponse },
    /// The chain ended in an unresolved failure
    Unresolved,
}

impl ChainLink {
    pub fn uri(&self) -> Option<&str> {
        match self {
            ChainLink::Hop { uri, .. } => Some(uri),
            ChainLink::Unresolved => None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ChainLink::Hop { response, .. } => Some(response),
            ChainLink::Unresolved => None,
        }
    }
}

/// Ordered, append-only sequence of hops
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionChain {
    links: Vec<ChainLink>,
}

impl ResolutionChain {
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// False when the chain ends in [`ChainLink::Unresolved`]
    pub fn is_resolved(&self) -> bool {
        !matches!(self.links.last(), Some(ChainLink::Unresolved) | None)
    }

    /// Last hop that carries a response
    pub fn last_hop(&self) -> Option<(&str, &HttpResponse)> {
        self.links.iter().rev().find_map(|link| match link {
            ChainLink::Hop { uri, response } => Some((uri.as_str(), response)),
            ChainLink::Unresolved => None,
        })
    }

    /// Terminal URI of a cleanly resolved chain
    pub fn terminal_uri(&self) -> Option<&str> {
        match self.links.last() {
            Some(ChainLink::Hop { uri, .. }) => Some(uri),
            _ => None,
        }
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.links.iter().filter_map(ChainLink::uri)
    }
}

/// Redirect following resolver
#[derive(Clone)]
pub struct ChainResolver {
    transport: Arc<dyn Transport>,
    browser_user_agent: String,
    max_hops: usize,
    header_selector: Option<HeaderSelector>,
}

impl ChainResolver {
    pub fn new(transport: Arc<dyn Transport>, browser_user_agent: &str, max_hops: usize) -> Self {
        Self {
            transport,
            browser_user_agent: browser_user_agent.to_string(),
            max_hops,
            header_selector: None,
        }
    }

    /// Install scoped per-network-location headers for the last fallback step
    pub fn with_header_selector(mut self, selector: HeaderSelector) -> Self {
        self.header_selector = Some(selector);
        self
    }

    /// Follow the chain starting at `actionable`
    ///
    /// With `raise_on_final` a terminal status >= 400 is classified and
    /// returned as an error; without it the chain gets a trailing
    /// [`ChainLink::Unresolved`] instead.
    pub async fn resolve(&self, actionable: &str, raise_on_final: bool) -> IdResult<ResolutionChain> {
        let mut links = Vec::new();
        let mut url = actionable.to_string();

        loop {
            let response = self.send_hop(&url, links.is_empty()).await?;
            let next = if response.is_redirect() {
                response.next_url()?
            } else {
                None
            };
            let status = response.status;
            let uri = response.url.clone();
            links.push(ChainLink::Hop {
                uri: uri.clone(),
                response,
            });

            match next {
                Some(next) => {
                    if links.len() >= self.max_hops {
                        return Err(IdError::Resolution(format!(
                            "Gave up on {} after {} redirects",
                            actionable,
                            links.len()
                        )));
                    }
                    debug!("{} {} -> {}", status, uri, next);
                    url = next;
                }
                None => {
                    if status >= 400 {
                        if raise_on_final {
                            return Err(IdError::from_status(status, &uri));
                        }
                        links.push(ChainLink::Unresolved);
                    }
                    break;
                }
            }
        }

        Ok(ResolutionChain { links })
    }

    /// Run the fallback protocol for a single hop
    async fn send_hop(&self, url: &str, first: bool) -> IdResult<HttpResponse> {
        let head = self
            .transport
            .send(&HttpRequest::hop(Method::Head, url))
            .await
            .map_err(|e| connection_error(url, first, e))?;
        if head.status < 400 {
            return Ok(head);
        }

        let mut last = head;

        if let Some(response) = self.try_fallback(HttpRequest::hop(Method::Get, url)).await {
            if response.status < 400 {
                info!("{} has non-conformant HEAD support ({} on HEAD)", url, last.status);
                metrics::record_head_rescue("get");
                return Ok(response);
            }
            last = response;
        }

        let browser = HttpRequest::hop(Method::Get, url).header("User-Agent", &self.browser_user_agent);
        if let Some(response) = self.try_fallback(browser).await {
            if response.status < 400 {
                info!("{} only answers browser user agents", url);
                metrics::record_head_rescue("browser");
                return Ok(response);
            }
            last = response;
        }

        let scoped = self
            .header_selector
            .as_ref()
            .and_then(|select| netloc(url).and_then(|loc| select(&loc)));
        if let Some(headers) = scoped {
            warn!("Retrying {} with scoped credentials while resolving a public identifier", url);
            let request = HttpRequest::hop(Method::Get, url).headers(headers);
            if let Some(response) = self.try_fallback(request).await {
                if response.status < 400 {
                    metrics::record_head_rescue("credentials");
                    return Ok(response);
                }
                last = response;
            }
        }

        Ok(last)
    }

    /// Fallback attempts keep the previous failing response when the
    /// connection itself fails
    async fn try_fallback(&self, request: HttpRequest) -> Option<HttpResponse> {
        match self.transport.send(&request).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!("Fallback {} {} failed: {}", request.method.as_str(), request.url, e);
                None
            }
        }
    }
}

fn connection_error(url: &str, first: bool, e: TransportError) -> IdError {
    if first {
        IdError::CouldNotReach(format!("{}: {}", url, e))
    } else {
        IdError::Inbetween {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// `host[:port]` of a URL
pub fn netloc(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Abort `future` after `duration` with [`IdError::CouldNotReach`]
pub async fn with_timeout<T, F>(duration: Duration, what: &str, future: F) -> IdResult<T>
where
    F: Future<Output = IdResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(IdError::CouldNotReach(format!(
            "{} (no answer within {:?})",
            what, duration
        ))),
    }
}
