//! Configuration management for idstream
use crate::error::{IdError, IdResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_USER_AGENT: &str = concat!("idstream/", env!("CARGO_PKG_VERSION"));
/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "idstream=info";
const DEFAULT_BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub credentials: Credentials,
    pub logging: LoggingConfig,
}

/// Disk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory holding one folder per cache namespace
    pub root: PathBuf,
    /// Create the root when it does not exist
    pub create: bool,
}

/// HTTP behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Sent when a remote rejects unrecognized clients
    pub browser_user_agent: String,
    /// Transport level timeout, `None` blocks until the remote answers
    pub timeout: Option<Duration>,
    /// Maximum number of hops followed in one resolution chain
    pub max_redirects: usize,
}

/// API credentials handed to identifier systems
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub protocols_io_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "protocols_io_token",
                &self.protocols_io_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./cache"),
            create: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            browser_user_agent: DEFAULT_BROWSER_USER_AGENT.to_string(),
            timeout: None,
            max_redirects: 30,
        }
    }
}

impl Config {
    /// Configuration rooted at a given cache directory, everything else default
    pub fn with_cache_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheConfig {
                root: root.into(),
                create: true,
            },
            http: HttpConfig::default(),
            credentials: Credentials::default(),
            logging: LoggingConfig {
                level: DEFAULT_LOG_FILTER.to_string(),
            },
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> IdResult<Self> {
        dotenv::dotenv().ok();

        let root = env::var("IDSTREAM_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| CacheConfig::default().root);
        let create = env::var("IDSTREAM_CACHE_CREATE")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .map_err(|_| IdError::Configuration("IDSTREAM_CACHE_CREATE must be a bool".to_string()))?;

        let user_agent =
            env::var("IDSTREAM_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
        let browser_user_agent = env::var("IDSTREAM_BROWSER_USER_AGENT")
            .unwrap_or_else(|_| DEFAULT_BROWSER_USER_AGENT.to_string());

        let timeout = match env::var("IDSTREAM_HTTP_TIMEOUT_SECS") {
            Ok(secs) => Some(Duration::from_secs(secs.parse().map_err(|_| {
                IdError::Configuration("IDSTREAM_HTTP_TIMEOUT_SECS must be an integer".to_string())
            })?)),
            Err(_) => None,
        };
        let max_redirects = env::var("IDSTREAM_MAX_REDIRECTS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| IdError::Configuration("IDSTREAM_MAX_REDIRECTS must be an integer".to_string()))?;

        let protocols_io_token = env::var("IDSTREAM_PROTOCOLS_IO_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        let config = Config {
            cache: CacheConfig { root, create },
            http: HttpConfig {
                user_agent,
                browser_user_agent,
                timeout,
                max_redirects,
            },
            credentials: Credentials { protocols_io_token },
            logging: LoggingConfig { level: log_level },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> IdResult<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(IdError::Configuration("User agent cannot be empty".to_string()));
        }

        if self.http.max_redirects == 0 {
            return Err(IdError::Configuration(
                "Redirect limit must be at least 1".to_string(),
            ));
        }

        if !self.cache.create && !self.cache.root.exists() {
            return Err(IdError::Configuration(format!(
                "Cache root does not exist: {}",
                self.cache.root.display()
            )));
        }

        self.logging.env_filter()?;

        Ok(())
    }
}

impl LoggingConfig {
    /// Tracing filter for the configured level directives
    pub fn env_filter(&self) -> IdResult<EnvFilter> {
        EnvFilter::try_new(&self.level).map_err(|e| {
            IdError::Configuration(format!("Invalid log filter {:?}: {}", self.level, e))
        })
    }
}
