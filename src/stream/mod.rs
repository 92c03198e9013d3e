//! Streams
//!
//! A [`Stream`] is a live handle bound to one identifier. Metadata, data,
//! the dereference chain and checksums are fetched lazily and kept for the
//! lifetime of the instance. Every fetch leaves its artifacts in the
//! stream's [`ProgenitorLedger`].

pub mod progenitor;

pub use progenitor::{Progenitor, ProgenitorKind, ProgenitorLedger, StreamRef};

use crate::cache::CacheKey;
use crate::context::Context;
use crate::error::{ErrorKind, IdError, IdResult};
use crate::identifier::{Identifier, IdentifierSystem};
use crate::resolver::{HttpResponse, ResolutionChain};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Everything a system's fetch routine may touch
pub struct Fetch<'a, S: IdentifierSystem> {
    pub ctx: &'a Context,
    pub identifier: &'a Identifier<S>,
    /// Bypass the cache read path
    pub refresh: bool,
    pub ledger: &'a mut ProgenitorLedger,
}

/// Result of one network fetch inside a cached call
pub struct Fetched {
    pub value: Option<Value>,
    pub response: Option<HttpResponse>,
}

impl Fetched {
    pub fn new(value: Option<Value>, response: HttpResponse) -> Self {
        Self {
            value,
            response: Some(response),
        }
    }
}

impl<'a, S: IdentifierSystem> Fetch<'a, S> {
    /// Run `produce` through the disk cache
    ///
    /// The entry is keyed by the function name, the system type and `key`.
    /// The response that produced a fresh value and the cache file are both
    /// recorded as progenitors.
    pub async fn cached<F, Fut>(
        &mut self,
        namespace: &str,
        function: &str,
        key: &str,
        produce: F,
    ) -> IdResult<Option<Value>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = IdResult<Fetched>> + Send,
    {
        let key = CacheKey::new(namespace, function)
            .receiver::<S>()
            .arg("identifier", key);

        let mut response = None;
        let slot = &mut response;
        let cached = self
            .ctx
            .cache
            .cached(&key, self.refresh, move || async move {
                let fetched = produce().await?;
                *slot = fetched.response;
                Ok(fetched.value)
            })
            .await?;

        if let Some(response) = response {
            self.ledger
                .record(ProgenitorKind::HttpResponse, Progenitor::Response(response));
        }
        if cached.hit || cached.path.exists() {
            self.ledger
                .record(ProgenitorKind::CachePath, Progenitor::CachePath(cached.path));
        }

        Ok(cached.value)
    }

    pub fn record(&mut self, kind: ProgenitorKind, progenitor: Progenitor) {
        self.ledger.record(kind, progenitor);
    }
}

/// Fetch contract of an identifier system
///
/// Field accessors receive the metadata record produced by
/// [`System::fetch_metadata`].
#[async_trait]
pub trait System: IdentifierSystem + Clone + Default {
    /// `Ok(None)` means "no result", e.g. an active cooldown
    async fn fetch_metadata(&self, fetch: Fetch<'_, Self>) -> IdResult<Option<Value>>;

    async fn fetch_data(&self, fetch: Fetch<'_, Self>) -> IdResult<Option<Vec<u8>>> {
        Err(IdError::DoesNotDereferenceToData(fetch.identifier.to_string()))
    }

    /// Identifier that the metadata record names itself by
    fn bound_identifier(&self, _metadata: &Value) -> Option<String> {
        None
    }

    /// Field that changes whenever the record changes
    fn freshness(&self, _metadata: &Value) -> Option<String> {
        None
    }

    fn checksum_extras(&self, _metadata: &Value) -> Vec<String> {
        Vec::new()
    }

    fn label(&self, _metadata: &Value) -> Option<String> {
        None
    }

    fn category(&self, _metadata: &Value) -> Option<String> {
        None
    }

    fn synonyms(&self, _metadata: &Value) -> Vec<String> {
        Vec::new()
    }

    fn description(&self, _metadata: &Value) -> Option<String> {
        None
    }
}

/// Entry returned by [`Stream::progenitor`]
pub enum Lineage<'a, S: System> {
    /// Level zero, the stream itself
    Origin(&'a Stream<S>),
    Recorded(ProgenitorKind, &'a Progenitor),
}

/// Error entry of a degraded record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

/// Plain description of a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub system: &'static str,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RecordError>,
}

/// Identifier bound handle
///
/// Not meant to be shared: every accessor that may fetch takes `&mut self`.
pub struct Stream<S: System> {
    ctx: Arc<Context>,
    system: S,
    identifier: Identifier<S>,
    metadata: Option<Option<Value>>,
    data: Option<Option<Vec<u8>>>,
    chain: Option<ResolutionChain>,
    checksums: HashMap<&'static str, Vec<u8>>,
    ledger: ProgenitorLedger,
}

impl<S: System> Stream<S> {
    pub fn new(ctx: Arc<Context>, raw: &str) -> IdResult<Self> {
        Self::with_system(ctx, S::default(), raw)
    }

    /// Stream over a configured system value
    pub fn with_system(ctx: Arc<Context>, system: S, raw: &str) -> IdResult<Self> {
        let identifier = Identifier::new(raw)?;
        Ok(Self::build(ctx, system, identifier))
    }

    pub fn from_identifier(ctx: Arc<Context>, identifier: Identifier<S>) -> Self {
        Self::build(ctx, S::default(), identifier)
    }

    /// Reinterpret another stream's identifier under this system
    pub fn coerce<T: System>(source: &Stream<T>) -> IdResult<Self> {
        Self::new(source.ctx.clone(), source.identifier.as_str())
    }

    /// Stream from an embedded record carrying an `id` field
    pub fn from_json(ctx: Arc<Context>, blob: Value) -> IdResult<Self> {
        let raw = blob
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| IdError::MalformedIdentifier {
                system: S::NAME,
                raw: blob.to_string(),
            })?
            .to_string();
        let mut stream = Self::new(ctx, &raw)?;
        stream
            .ledger
            .record(ProgenitorKind::EmbeddedBlob, Progenitor::Blob(blob));
        Ok(stream)
    }

    fn build(ctx: Arc<Context>, system: S, identifier: Identifier<S>) -> Self {
        Self {
            ctx,
            system,
            identifier,
            metadata: None,
            data: None,
            chain: None,
            checksums: HashMap::new(),
            ledger: ProgenitorLedger::default(),
        }
    }

    pub fn identifier(&self) -> &Identifier<S> {
        &self.identifier
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn ledger(&self) -> &ProgenitorLedger {
        &self.ledger
    }

    pub fn stream_ref(&self) -> StreamRef {
        StreamRef {
            system: S::NAME,
            identifier: self.identifier.to_string(),
        }
    }

    /// Metadata record, fetched on first access
    pub async fn metadata(&mut self) -> IdResult<Option<&Value>> {
        if self.metadata.is_none() {
            let loaded = self.load_metadata(false).await?;
            self.metadata = Some(loaded);
        }
        Ok(self.metadata.as_ref().and_then(Option::as_ref))
    }

    /// Drop the memoized metadata and chain, then fetch past the cache
    pub async fn refresh_metadata(&mut self) -> IdResult<Option<&Value>> {
        self.metadata = None;
        self.chain = None;
        self.checksums.clear();
        self.ledger.reset_fetched();
        let loaded = self.load_metadata(true).await?;
        Ok(self.metadata.insert(loaded).as_ref())
    }

    /// Data payload, fetched on first access
    pub async fn data(&mut self) -> IdResult<Option<&[u8]>> {
        if self.data.is_none() {
            let loaded = self.load_data(false).await?;
            self.data = Some(loaded);
        }
        Ok(self.data.as_ref().and_then(|d| d.as_deref()))
    }

    pub async fn refresh_data(&mut self) -> IdResult<Option<&[u8]>> {
        self.data = None;
        self.chain = None;
        self.ledger.reset_fetched();
        let loaded = self.load_data(true).await?;
        Ok(self.data.insert(loaded).as_deref())
    }

    async fn load_metadata(&mut self, refresh: bool) -> IdResult<Option<Value>> {
        debug!("fetching metadata for {}", self.identifier);
        let fetch = Fetch {
            ctx: self.ctx.as_ref(),
            identifier: &self.identifier,
            refresh,
            ledger: &mut self.ledger,
        };
        self.system.fetch_metadata(fetch).await
    }

    async fn load_data(&mut self, refresh: bool) -> IdResult<Option<Vec<u8>>> {
        debug!("fetching data for {}", self.identifier);
        let fetch = Fetch {
            ctx: self.ctx.as_ref(),
            identifier: &self.identifier,
            refresh,
            ledger: &mut self.ledger,
        };
        self.system.fetch_data(fetch).await
    }

    /// Resolution chain of the actionable form
    ///
    /// Never raises for a failing terminal status; the chain ends in
    /// [`crate::resolver::ChainLink::Unresolved`] instead. Connection
    /// failures still raise.
    pub async fn dereference_chain(&mut self) -> IdResult<&ResolutionChain> {
        let chain = match self.chain.take() {
            Some(chain) => chain,
            None => {
                self.ctx
                    .resolver
                    .resolve(&self.identifier.actionable(), false)
                    .await?
            }
        };
        Ok(&*self.chain.insert(chain))
    }

    /// Terminal URI of the chain, raising the classified failure if unresolved
    pub async fn dereference(&mut self) -> IdResult<String> {
        let chain = self.dereference_chain().await?;
        if let Some(uri) = chain.terminal_uri() {
            return Ok(uri.to_string());
        }
        match chain.last_hop() {
            Some((uri, response)) => Err(IdError::from_status(response.status, uri)),
            None => Err(IdError::Resolution(format!(
                "Empty resolution chain for {}",
                self.identifier
            ))),
        }
    }

    /// Dereference into a stream of system `T`
    pub async fn dereference_as<T: System>(&mut self) -> IdResult<Stream<T>> {
        let uri = self.dereference().await?;
        let response = self
            .chain
            .as_ref()
            .and_then(|chain| chain.last_hop())
            .map(|(_, response)| response.clone());

        let mut target = Stream::<T>::new(self.ctx.clone(), &uri)?;
        target
            .ledger
            .record(ProgenitorKind::ConvertedFrom, Progenitor::Stream(self.stream_ref()));
        if let Some(response) = response {
            target
                .ledger
                .record(ProgenitorKind::HttpResponse, Progenitor::Response(response));
        }
        self.ledger
            .record(ProgenitorKind::ConvertedTo, Progenitor::Stream(target.stream_ref()));

        Ok(target)
    }

    /// Headers of the terminal response
    pub async fn headers(&mut self) -> IdResult<Vec<(String, String)>> {
        self.dereference().await?;
        let chain = self.dereference_chain().await?;
        Ok(chain
            .last_hop()
            .map(|(_, response)| response.headers.clone())
            .unwrap_or_default())
    }

    /// Identity of the record under hash function `D`
    ///
    /// Covers the identifier, the identifier bound in the metadata, the
    /// freshness field and any system extras. The value is a snapshot taken
    /// at the first computation after the latest metadata load and does not
    /// follow later remote changes until metadata is refreshed.
    pub async fn checksum<D: Digest>(&mut self) -> IdResult<Vec<u8>> {
        let name = std::any::type_name::<D>();
        if let Some(sum) = self.checksums.get(name) {
            return Ok(sum.clone());
        }

        let metadata = self.metadata().await?.cloned();
        let metadata = metadata.ok_or_else(|| {
            IdError::Resolution(format!("No metadata found for {}", self.identifier))
        })?;

        let mut hasher = D::new();
        hasher.update(self.identifier.checksum::<D>());
        if let Some(bound) = self.system.bound_identifier(&metadata) {
            let bound = Identifier::<S>::new(&bound)?;
            hasher.update(bound.checksum::<D>());
        }
        if let Some(fresh) = self.system.freshness(&metadata) {
            hasher.update(fresh.as_bytes());
        }
        for extra in self.system.checksum_extras(&metadata) {
            hasher.update(extra.as_bytes());
        }

        let sum = hasher.finalize().to_vec();
        self.checksums.insert(name, sum.clone());
        Ok(sum)
    }

    /// `0` is the stream itself, `n` the n-th most recent ledger entry
    pub fn progenitor(&self, level: usize) -> IdResult<Lineage<'_, S>> {
        if level == 0 {
            return Ok(Lineage::Origin(self));
        }
        self.ledger
            .nth_recent(level)
            .map(|(kind, progenitor)| Lineage::Recorded(*kind, progenitor))
            .ok_or_else(|| IdError::ProgenitorNotFound(format!("level {}", level)))
    }

    pub fn progenitor_of(&self, kind: ProgenitorKind) -> IdResult<&Progenitor> {
        self.ledger.get(kind)
    }

    pub async fn label(&mut self) -> IdResult<Option<String>> {
        let metadata = self.metadata().await?.cloned();
        Ok(metadata.and_then(|m| self.system.label(&m)))
    }

    /// Label, or the identifier itself when the remote fails
    pub async fn label_safe(&mut self) -> IdResult<String> {
        match self.label().await {
            Ok(Some(label)) => Ok(label),
            Ok(None) => Ok(self.identifier.to_string()),
            Err(e) if e.is_remote() => {
                debug!("no label for {}: {}", self.identifier, e);
                Ok(self.identifier.to_string())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn synonyms(&mut self) -> IdResult<Vec<String>> {
        let metadata = self.metadata().await?.cloned();
        Ok(metadata.map(|m| self.system.synonyms(&m)).unwrap_or_default())
    }

    /// Plain record of the stream; never fails, degrades to an error list
    pub async fn as_record(&mut self, include_description: bool) -> Record {
        let mut record = Record {
            kind: "identifier",
            system: S::NAME,
            id: self.identifier.to_string(),
            label: None,
            category: None,
            synonyms: Vec::new(),
            description: None,
            errors: Vec::new(),
        };

        match self.metadata().await.map(|m| m.cloned()) {
            Ok(Some(metadata)) => {
                record.label = self.system.label(&metadata);
                record.category = self.system.category(&metadata);
                record.synonyms = self.system.synonyms(&metadata);
                if include_description {
                    record.description = self.system.description(&metadata);
                }
            }
            Ok(None) => record.errors.push(RecordError {
                message: "No metadata found.".to_string(),
                kind: None,
            }),
            Err(e) => {
                debug!("metadata for {} failed: {}", self.identifier, e);
                record.errors.push(RecordError {
                    message: e.to_string(),
                    kind: Some(e.kind()),
                });
            }
        }

        record
    }
}

impl<S: System> PartialEq for Stream<S> {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl<S: System> Eq for Stream<S> {}

impl<S: System> Hash for Stream<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "stream".hash(state);
        self.identifier.hash(state);
    }
}

/// A stream names its identifier's referent, it is not the identifier
impl<S: System> PartialEq<Identifier<S>> for Stream<S> {
    fn eq(&self, _other: &Identifier<S>) -> bool {
        false
    }
}

impl<S: System> PartialEq<Stream<S>> for Identifier<S> {
    fn eq(&self, _other: &Stream<S>) -> bool {
        false
    }
}

impl<S: System> fmt::Debug for Stream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("identifier", &self.identifier)
            .field("metadata_loaded", &self.metadata.is_some())
            .field("progenitors", &self.ledger.len())
            .finish()
    }
}

impl<S: System> fmt::Display for Stream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.identifier, f)
    }
}
