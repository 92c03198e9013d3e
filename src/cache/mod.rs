//! Content addressed disk cache with failure cooldown
//!
//! Each call is keyed by a hash of its resolved arguments. Entries live at
//! `<root>/<namespace>/<hex digest>` as JSON. A fetch routine may return a
//! cooldown record instead of a value: it is persisted like any other
//! entry, but callers see "no result", so a persistently failing remote is
//! asked once and then served from disk until the entry is invalidated.

use crate::config::CacheConfig;
use crate::error::{IdError, IdResult};
use crate::metrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, error, warn};

/// Reserved field marking a cached failure
pub const COOLDOWN_FIELD: &str = "__idstream.cache_cooldown";

/// Name of the pair holding the cached function's name
const FUNCTION_ARG: &str = "____fn";
/// Name of the pair holding the receiver's type
const RECEIVER_ARG: &str = "self";

/// Sequence number making temporary file names unique within the process
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A resolved argument of a cached call
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Seq(Vec<ArgValue>),
    Map(Vec<(String, ArgValue)>),
    /// A type standing in for an instance (the receiver)
    Type(&'static str),
    None,
}

impl ArgValue {
    /// Fixed rank used to order values of different types
    fn rank(&self) -> u8 {
        match self {
            ArgValue::Bool(_) => 0,
            ArgValue::Int(_) => 1,
            ArgValue::Float(_) => 2,
            ArgValue::Bytes(_) => 3,
            ArgValue::Str(_) => 4,
            ArgValue::Seq(_) => 5,
            ArgValue::Map(_) => 6,
            ArgValue::Type(_) => 7,
            ArgValue::None => 8,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{:?}", x),
            ArgValue::Bytes(b) => write!(f, "b'{}'", hex::encode(b)),
            ArgValue::Str(s) => f.write_str(s),
            ArgValue::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            ArgValue::Map(entries) => {
                let mut entries: Vec<_> = entries.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                f.write_str("{")?;
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            ArgValue::Type(name) => write!(f, "<type {}>", name),
            ArgValue::None => f.write_str("None"),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Str(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Str(s)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Bool(b)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        ArgValue::Int(i as i128)
    }
}

impl From<u64> for ArgValue {
    fn from(i: u64) -> Self {
        ArgValue::Int(i as i128)
    }
}

impl From<f64> for ArgValue {
    fn from(x: f64) -> Self {
        ArgValue::Float(x)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ArgValue::None)
    }
}

/// Key of one cached call
#[derive(Debug, Clone)]
pub struct CacheKey {
    namespace: String,
    pairs: Vec<(String, ArgValue)>,
}

impl CacheKey {
    /// Key for `function`, stored under `namespace`
    pub fn new(namespace: &str, function: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pairs: vec![(FUNCTION_ARG.to_string(), ArgValue::from(function))],
        }
    }

    /// Hash the receiver by its type, not its state
    pub fn receiver<T: ?Sized>(self) -> Self {
        self.arg(RECEIVER_ARG, ArgValue::Type(std::any::type_name::<T>()))
    }

    pub fn arg(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.pairs.push((name.to_string(), value.into()));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Hex SHA-256 over the pairs sorted by (name, type rank, value)
    pub fn digest(&self) -> String {
        let mut pairs: Vec<(&str, u8, String)> = self
            .pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.rank(), v.to_string()))
            .collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        for (i, (name, _, value)) in pairs.iter().enumerate() {
            if i > 0 {
                hasher.update([0x02]);
            }
            hasher.update(name.as_bytes());
            hasher.update([0x01]);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Diagnostic context of a cached failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cooldown {
    /// HTTP status of the failing response
    pub status: Option<u16>,
    /// System specific error code
    pub code: Option<i64>,
    pub message: String,
}

impl Cooldown {
    pub fn new(status: Option<u16>, code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Serialized form, a normal record carrying the reserved field
    pub fn into_record(self) -> Value {
        serde_json::json!({
            COOLDOWN_FIELD: self.message.clone(),
            "status": self.status,
            "code": self.code,
            "message": self.message,
        })
    }

    pub fn from_record(value: &Value) -> Option<Self> {
        let reason = value.get(COOLDOWN_FIELD)?;
        Some(Self {
            status: value
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
            code: value.get("code").and_then(Value::as_i64),
            message: reason.as_str().unwrap_or_default().to_string(),
        })
    }
}

/// Outcome of a cached call
#[derive(Debug, Clone)]
pub struct Cached {
    /// `None` for a missing result or an active cooldown
    pub value: Option<Value>,
    pub path: PathBuf,
    /// Served from disk without calling the fetch routine
    pub hit: bool,
    pub cooldown: Option<Cooldown>,
}

/// Disk backed cache
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open the cache root, creating it when the configuration allows
    pub fn new(config: &CacheConfig) -> IdResult<Self> {
        if !config.root.exists() {
            if !config.create {
                return Err(IdError::Configuration(format!(
                    "Cache base folder does not exist: {}",
                    config.root.display()
                )));
            }
            std::fs::create_dir_all(&config.root)?;
        }

        Ok(Self {
            root: config.root.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.namespace()).join(key.digest())
    }

    /// Read an entry; unreadable entries are removed and reported as misses
    pub async fn read(&self, key: &CacheKey) -> IdResult<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IdError::Cache(format!("Failed to read {}: {}", path.display(), e))),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!("deserializing from {}", path.display());
                Ok(Some(value))
            }
            Err(e) => {
                error!("Corrupted cache entry {}: {}", path.display(), e);
                if let Err(e) = fs::remove_file(&path).await {
                    warn!("Failed to remove corrupted entry {}: {}", path.display(), e);
                }
                Ok(None)
            }
        }
    }

    /// Write an entry through a temporary file and an atomic rename
    pub async fn write(&self, key: &CacheKey, value: &Value) -> IdResult<PathBuf> {
        let path = self.path_for(key);
        let dir = self.root.join(key.namespace());
        fs::create_dir_all(&dir).await.map_err(|e| {
            IdError::Cache(format!("Failed to create cache directory {}: {}", dir.display(), e))
        })?;

        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{}.{}.{}.tmp", key.digest(), std::process::id(), seq));
        let bytes = serde_json::to_vec(value)?;
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| IdError::Cache(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| IdError::Cache(format!("Failed to move {} into place: {}", path.display(), e)))?;

        Ok(path)
    }

    /// Remove an entry, returns whether one existed
    pub async fn invalidate(&self, key: &CacheKey) -> IdResult<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("invalidated {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IdError::Cache(format!("Failed to delete {}: {}", path.display(), e))),
        }
    }

    /// Memoize `fetch` under `key`
    ///
    /// With `refresh` the stored entry is ignored but the fresh result
    /// (value or new cooldown) is still written back.
    pub async fn cached<F, Fut>(&self, key: &CacheKey, refresh: bool, fetch: F) -> IdResult<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IdResult<Option<Value>>>,
    {
        let namespace = key.namespace().to_string();
        let mut path = self.path_for(key);
        let stored = if refresh {
            metrics::record_cache_lookup(&namespace, "refresh");
            None
        } else {
            self.read(key).await?
        };

        let (output, hit) = match stored {
            Some(value) => (Some(value), true),
            None => {
                let value = fetch().await?;
                if let Some(value) = &value {
                    path = self.write(key, value).await?;
                }
                (value, false)
            }
        };

        let cooldown = output.as_ref().and_then(Cooldown::from_record);
        if let Some(cooldown) = cooldown {
            if hit {
                debug!("currently in cooldown for {} due to {}", path.display(), cooldown.message);
            } else {
                warn!("entering cooldown for {} due to {}", path.display(), cooldown.message);
            }
            metrics::record_cache_lookup(&namespace, "cooldown");
            return Ok(Cached {
                value: None,
                path,
                hit,
                cooldown: Some(cooldown),
            });
        }

        if !refresh {
            metrics::record_cache_lookup(&namespace, if hit { "hit" } else { "miss" });
        }

        Ok(Cached {
            value: output,
            path,
            hit,
            cooldown: None,
        })
    }
}
