//! Scripted transport for unit tests
use crate::config::Config;
use crate::context::Context;
use crate::resolver::{HttpRequest, HttpResponse, Method, Transport, TransportError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

enum Reply {
    Response(HttpResponse),
    Fail(TransportError),
}

struct Route {
    method: Method,
    url: String,
    when_header: Option<(String, String)>,
    reply: Reply,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        if self.method != request.method || self.url != request.url {
            return false;
        }
        match &self.when_header {
            Some((name, value)) => request
                .headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(name) && v == value),
            None => true,
        }
    }
}

/// Answers requests from a fixed script and counts them
///
/// Unscripted requests get a 404. Header conditioned routes win over plain
/// ones for the same method and URL.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Vec<Route>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, method: Method, url: &str, response: HttpResponse) -> Self {
        self.routes.push(Route {
            method,
            url: url.to_string(),
            when_header: None,
            reply: Reply::Response(response),
        });
        self
    }

    pub(crate) fn on_with_header(
        mut self,
        method: Method,
        url: &str,
        header: (&str, &str),
        response: HttpResponse,
    ) -> Self {
        self.routes.push(Route {
            method,
            url: url.to_string(),
            when_header: Some((header.0.to_string(), header.1.to_string())),
            reply: Reply::Response(response),
        });
        self
    }

    pub(crate) fn fail(mut self, method: Method, url: &str, error: TransportError) -> Self {
        self.routes.push(Route {
            method,
            url: url.to_string(),
            when_header: None,
            reply: Reply::Fail(error),
        });
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, method: Method, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let route = self
            .routes
            .iter()
            .filter(|route| route.matches(request))
            .max_by_key(|route| route.when_header.is_some());

        match route.map(|r| &r.reply) {
            Some(Reply::Response(response)) => Ok(response.clone()),
            Some(Reply::Fail(error)) => Err(error.clone()),
            None => Ok(HttpResponse::new(&request.url, 404)),
        }
    }
}

/// JSON response helper
pub(crate) fn json_response(url: &str, status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(url, status)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
}

/// Context over a scripted transport and a cache rooted at `root`
pub(crate) fn context(transport: &Arc<ScriptedTransport>, root: &Path) -> Arc<Context> {
    let config = Config::with_cache_root(root);
    Arc::new(Context::with_transport(&config, transport.clone()).unwrap())
}

/// Same as [`context`] with a protocols.io token configured
pub(crate) fn token_context(transport: &Arc<ScriptedTransport>, root: &Path, token: &str) -> Arc<Context> {
    let mut config = Config::with_cache_root(root);
    config.credentials.protocols_io_token = Some(token.to_string());
    Arc::new(Context::with_transport(&config, transport.clone()).unwrap())
}
