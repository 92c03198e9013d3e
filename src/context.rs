/// Resolution context and dependency injection
use crate::{
    cache::DiskCache,
    config::{Config, Credentials},
    error::{IdError, IdResult},
    resolver::{ChainResolver, HeaderSelector, HttpRequest, HttpResponse, ReqwestTransport, Transport},
};
use std::sync::Arc;
use tracing::debug;

/// Network location that receives the protocols.io bearer token
pub const PROTOCOLS_IO_NETLOC: &str = "www.protocols.io";

/// Shared services handed to every stream
pub struct Context {
    pub transport: Arc<dyn Transport>,
    pub resolver: ChainResolver,
    pub cache: DiskCache,
    pub credentials: Credentials,
}

impl Context {
    /// Build a context over the reqwest transport
    pub fn new(config: &Config) -> IdResult<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(&config.http)?);
        Self::with_transport(config, transport)
    }

    /// Build a context over an arbitrary transport
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> IdResult<Self> {
        config.validate()?;
        let cache = DiskCache::new(&config.cache)?;

        let mut resolver = ChainResolver::new(
            transport.clone(),
            &config.http.browser_user_agent,
            config.http.max_redirects,
        );
        if let Some(selector) = protocols_io_selector(&config.credentials) {
            resolver = resolver.with_header_selector(selector);
        }

        debug!("cache root {}", cache.root().display());

        Ok(Self {
            transport,
            resolver,
            cache,
            credentials: config.credentials.clone(),
        })
    }

    /// Send a single request, mapping transport failures to [`IdError::CouldNotReach`]
    pub async fn send(&self, request: &HttpRequest) -> IdResult<HttpResponse> {
        self.transport
            .send(request)
            .await
            .map_err(|e| IdError::CouldNotReach(format!("{}: {}", request.url, e)))
    }

    /// Bearer header for protocols.io, or a configuration error without a token
    pub fn protocols_io_auth(&self) -> IdResult<(String, String)> {
        self.credentials
            .protocols_io_token
            .as_ref()
            .map(|token| bearer(token))
            .ok_or_else(|| {
                IdError::Configuration("IDSTREAM_PROTOCOLS_IO_TOKEN is not set".to_string())
            })
    }
}

fn bearer(token: &str) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {}", token))
}

fn protocols_io_selector(credentials: &Credentials) -> Option<HeaderSelector> {
    let token = credentials.protocols_io_token.clone()?;
    Some(Arc::new(move |netloc: &str| {
        (netloc == PROTOCOLS_IO_NETLOC).then(|| vec![bearer(&token)])
    }))
}
