//! Progenitor ledger: provenance of a stream's current state
use crate::error::{IdError, IdResult};
use crate::resolver::HttpResponse;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Provenance tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgenitorKind {
    HttpResponse,
    CachePath,
    ConvertedFrom,
    ConvertedTo,
    EmbeddedBlob,
}

impl ProgenitorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ProgenitorKind::HttpResponse => "http-response",
            ProgenitorKind::CachePath => "cache-path",
            ProgenitorKind::ConvertedFrom => "converted-from",
            ProgenitorKind::ConvertedTo => "converted-to",
            ProgenitorKind::EmbeddedBlob => "embedded-blob",
        }
    }

    /// Kinds produced by fetching, cleared when a fetch is forced
    fn is_fetched(&self) -> bool {
        matches!(
            self,
            ProgenitorKind::HttpResponse | ProgenitorKind::CachePath | ProgenitorKind::EmbeddedBlob
        )
    }
}

impl fmt::Display for ProgenitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Name of another stream, without holding the stream itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRef {
    pub system: &'static str,
    pub identifier: String,
}

/// Artifact that produced part of a stream's state
#[derive(Debug, Clone, PartialEq)]
pub enum Progenitor {
    Response(HttpResponse),
    CachePath(PathBuf),
    Stream(StreamRef),
    Blob(Value),
}

/// Tag to artifact map, one entry per tag, ordered by recency
#[derive(Debug, Clone, Default)]
pub struct ProgenitorLedger {
    entries: Vec<(ProgenitorKind, Progenitor)>,
}

impl ProgenitorLedger {
    /// Record an artifact, replacing any previous entry with the same tag
    pub fn record(&mut self, kind: ProgenitorKind, progenitor: Progenitor) {
        self.entries.retain(|(k, _)| *k != kind);
        self.entries.push((kind, progenitor));
    }

    pub fn get(&self, kind: ProgenitorKind) -> IdResult<&Progenitor> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p)
            .ok_or_else(|| IdError::ProgenitorNotFound(kind.tag().to_string()))
    }

    /// `n`-th most recent entry, `1` being the latest
    pub fn nth_recent(&self, n: usize) -> Option<&(ProgenitorKind, Progenitor)> {
        if n == 0 || n > self.entries.len() {
            return None;
        }
        self.entries.get(self.entries.len() - n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ProgenitorKind, Progenitor)> {
        self.entries.iter()
    }

    /// Drop fetch artifacts; conversion links survive
    pub fn reset_fetched(&mut self) {
        self.entries.retain(|(k, _)| !k.is_fetched());
    }

    /// Recorded `converted-from` stream of a given system
    pub fn converted_from(&self, system: &str) -> Option<&StreamRef> {
        match self.get(ProgenitorKind::ConvertedFrom) {
            Ok(Progenitor::Stream(source)) if source.system == system => Some(source),
            _ => None,
        }
    }
}
