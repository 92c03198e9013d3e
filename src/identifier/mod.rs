//! Identifiers
//!
//! An [`Identifier`] is an immutable, validated canonical value. The rules
//! for a particular identifier system (grammar, normalization, actionable
//! form) come from its [`IdentifierSystem`] implementation; the value type
//! itself never hard-codes a grammar.

pub mod codec;

pub use codec::{PiecewiseCodec, Regime};

use crate::error::{IdError, IdResult};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

/// Classification of the body that governs an identifier system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    /// URI based systems (RFC 3986 and friends)
    Ietf,
    /// ISO standardized systems (DOI, ISNI based ORCID)
    Iso,
    /// Registries run by a single organization
    Independent,
}

/// Rules of one identifier system
///
/// Implementors are zero sized marker types; everything here is static so
/// that an [`Identifier<S>`] carries nothing but its canonical string.
pub trait IdentifierSystem: Send + Sync + 'static {
    /// Human readable system name, also used in errors and records
    const NAME: &'static str;
    const FAMILY: Family;

    /// Grammar every canonical string must match
    fn canonical_grammar() -> &'static Regex;

    /// Loose grammar for the local (curie-like) form, if the system has one
    fn local_grammar() -> Option<&'static Regex> {
        None
    }

    /// Map any accepted rendering onto the canonical string
    ///
    /// Must be idempotent: `normalize(normalize(x)) == normalize(x)`.
    fn normalize(raw: &str) -> String;

    /// Checks beyond the grammar (check digits and the like)
    fn validate(_canonical: &str) -> bool {
        true
    }

    /// Local rendering of a canonical string
    fn local_form(_canonical: &str) -> Option<String> {
        None
    }

    /// Resolver usable form of a canonical string
    fn actionable(canonical: &str) -> String {
        canonical.to_string()
    }

    /// Digest of the canonical string
    fn checksum<D: Digest>(canonical: &str) -> Vec<u8> {
        D::digest(canonical.as_bytes()).to_vec()
    }
}

/// A validated identifier of system `S`
pub struct Identifier<S: IdentifierSystem> {
    canonical: String,
    _system: PhantomData<fn() -> S>,
}

impl<S: IdentifierSystem> Identifier<S> {
    /// Normalize and validate raw input
    pub fn new(raw: &str) -> IdResult<Self> {
        let canonical = S::normalize(raw);
        if !S::canonical_grammar().is_match(&canonical) || !S::validate(&canonical) {
            return Err(IdError::MalformedIdentifier {
                system: S::NAME,
                raw: raw.to_string(),
            });
        }

        Ok(Self {
            canonical,
            _system: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn system_name(&self) -> &'static str {
        S::NAME
    }

    pub fn family(&self) -> Family {
        S::FAMILY
    }

    /// Local rendering, falling back to the canonical string
    pub fn local(&self) -> String {
        S::local_form(&self.canonical).unwrap_or_else(|| self.canonical.clone())
    }

    pub fn actionable(&self) -> String {
        S::actionable(&self.canonical)
    }

    /// Digest of the canonical string under hash function `D`
    pub fn checksum<D: Digest>(&self) -> Vec<u8> {
        S::checksum::<D>(&self.canonical)
    }
}

impl<S: IdentifierSystem> Clone for Identifier<S> {
    fn clone(&self) -> Self {
        Self {
            canonical: self.canonical.clone(),
            _system: PhantomData,
        }
    }
}

impl<S: IdentifierSystem> PartialEq for Identifier<S> {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl<S: IdentifierSystem> Eq for Identifier<S> {}

impl<S: IdentifierSystem> Hash for Identifier<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        S::NAME.hash(state);
        self.canonical.hash(state);
    }
}

impl<S: IdentifierSystem> PartialOrd for Identifier<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: IdentifierSystem> Ord for Identifier<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl<S: IdentifierSystem> fmt::Debug for Identifier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", S::NAME, self.canonical)
    }
}

impl<S: IdentifierSystem> fmt::Display for Identifier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl<S: IdentifierSystem> FromStr for Identifier<S> {
    type Err = IdError;

    fn from_str(s: &str) -> IdResult<Self> {
        Self::new(s)
    }
}

impl<S: IdentifierSystem> Serialize for Identifier<S> {
    fn serialize<Se: Serializer>(&self, serializer: Se) -> Result<Se::Ok, Se::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de, S: IdentifierSystem> Deserialize<'de> for Identifier<S> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}
