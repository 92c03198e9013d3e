//! idstream - persistent identifier resolution
//!
//! Identifiers from different systems (DOI, ORCID, ROR, RRID, protocols.io,
//! plain URIs) are normalized into typed [`Identifier`] values. A [`Stream`]
//! binds one identifier to a shared [`Context`] and fetches its metadata and
//! data on demand, follows its redirect chain, records where every value
//! came from and caches remote results on disk with a cooldown for
//! failures.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod identifier;
pub mod metrics;
pub mod resolver;
pub mod stream;
pub mod systems;

#[cfg(test)]
mod testing;

pub use cache::{CacheKey, Cooldown, DiskCache};
pub use config::Config;
pub use context::Context;
pub use error::{ErrorKind, IdError, IdResult};
pub use identifier::{Family, Identifier, IdentifierSystem};
pub use resolver::{ChainResolver, ResolutionChain};
pub use stream::{Fetch, Fetched, Progenitor, ProgenitorKind, Record, Stream, System};
pub use systems::{detect, AnyStream};
