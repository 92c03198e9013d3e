//! Unified error types for identifier resolution
//!
//! Every failure surfaced by a stream, the resolver or the cache is one of
//! these kinds. HTTP statuses are classified through [`IdError::from_status`].

use serde::Serialize;
use thiserror::Error;

/// Main error type for idstream
#[derive(Error, Debug)]
pub enum IdError {
    /// Local misconfiguration (missing credential, missing cache root)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The index or remote could not be reached at all
    #[error("Could not reach {0}")]
    CouldNotReach(String),

    /// A connection failed midway through a resolution chain
    #[error("Connection failed between hops at {url}: {message}")]
    Inbetween { url: String, message: String },

    /// Input does not match the identifier grammar
    #[error("{raw:?} is not a well formed {system} identifier")]
    MalformedIdentifier { system: &'static str, raw: String },

    /// The identifier structurally has no data referent
    #[error("{0} does not dereference to data")]
    DoesNotDereferenceToData(String),

    /// HTTP 404 at the terminal hop
    #[error("Identifier does not exist: {0}")]
    IdDoesNotExist(String),

    /// HTTP 410
    #[error("Identifier used to exist: {0}")]
    UsedToExist(String),

    /// HTTP 403
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// HTTP 429
    #[error("Access limit reached: {0}")]
    AccessLimit(String),

    /// HTTP >= 500 and other transient remote conditions
    #[error("Remote error {status}: {url}")]
    Remote { status: u16, url: String },

    /// Any other resolution failure (other 4xx, redirect loops)
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A numeric codec met a slug or id it has no regime for
    #[error("Not yet characterized: {0}")]
    NotYetCharacterized(String),

    /// Ledger lookup for a provenance tag that was never recorded
    #[error("No progenitor recorded for {0}")]
    ProgenitorNotFound(String),

    /// Cache storage errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed set of error kinds, used in degraded records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ConfigurationError,
    CouldNotReachError,
    InbetweenError,
    MalformedIdentifierError,
    IdentifierDoesNotDereferenceToDataError,
    IdDoesNotExistError,
    UsedToExistError,
    NotAuthorizedError,
    AccessLimitError,
    RemoteError,
    ResolutionError,
    NotYetCharacterizedError,
    ProgenitorNotFoundError,
    LocalError,
}

impl IdError {
    /// Classify a terminal HTTP failure status
    ///
    /// Callers only pass statuses >= 400; anything below is treated as a
    /// generic resolution failure since it was not expected to fail.
    pub fn from_status(status: u16, url: &str) -> Self {
        let url = url.to_string();
        match status {
            404 => IdError::IdDoesNotExist(url),
            410 => IdError::UsedToExist(url),
            403 => IdError::NotAuthorized(url),
            429 => IdError::AccessLimit(url),
            s if s >= 500 => IdError::Remote { status: s, url },
            s => IdError::Resolution(format!("status {} at {}", s, url)),
        }
    }

    /// Whether the error belongs to the remote error family
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            IdError::IdDoesNotExist(_)
                | IdError::UsedToExist(_)
                | IdError::NotAuthorized(_)
                | IdError::AccessLimit(_)
                | IdError::Remote { .. }
        )
    }

    /// Whether retrying later might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IdError::Remote { .. }
                | IdError::AccessLimit(_)
                | IdError::Inbetween { .. }
                | IdError::CouldNotReach(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IdError::Configuration(_) => ErrorKind::ConfigurationError,
            IdError::CouldNotReach(_) => ErrorKind::CouldNotReachError,
            IdError::Inbetween { .. } => ErrorKind::InbetweenError,
            IdError::MalformedIdentifier { .. } => ErrorKind::MalformedIdentifierError,
            IdError::DoesNotDereferenceToData(_) => {
                ErrorKind::IdentifierDoesNotDereferenceToDataError
            }
            IdError::IdDoesNotExist(_) => ErrorKind::IdDoesNotExistError,
            IdError::UsedToExist(_) => ErrorKind::UsedToExistError,
            IdError::NotAuthorized(_) => ErrorKind::NotAuthorizedError,
            IdError::AccessLimit(_) => ErrorKind::AccessLimitError,
            IdError::Remote { .. } => ErrorKind::RemoteError,
            IdError::Resolution(_) => ErrorKind::ResolutionError,
            IdError::NotYetCharacterized(_) => ErrorKind::NotYetCharacterizedError,
            IdError::ProgenitorNotFound(_) => ErrorKind::ProgenitorNotFoundError,
            IdError::Cache(_) | IdError::Serialization(_) | IdError::Io(_) => {
                ErrorKind::LocalError
            }
        }
    }
}

/// Result type alias for idstream operations
pub type IdResult<T> = Result<T, IdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let url = "https://example.org/x";
        assert_eq!(IdError::from_status(404, url).kind(), ErrorKind::IdDoesNotExistError);
        assert_eq!(IdError::from_status(410, url).kind(), ErrorKind::UsedToExistError);
        assert_eq!(IdError::from_status(403, url).kind(), ErrorKind::NotAuthorizedError);
        assert_eq!(IdError::from_status(429, url).kind(), ErrorKind::AccessLimitError);
        assert_eq!(IdError::from_status(500, url).kind(), ErrorKind::RemoteError);
        assert_eq!(IdError::from_status(503, url).kind(), ErrorKind::RemoteError);
        assert_eq!(IdError::from_status(400, url).kind(), ErrorKind::ResolutionError);
        assert_eq!(IdError::from_status(401, url).kind(), ErrorKind::ResolutionError);
    }

    #[test]
    fn test_remote_family() {
        assert!(IdError::from_status(404, "u").is_remote());
        assert!(IdError::from_status(429, "u").is_remote());
        assert!(IdError::from_status(502, "u").is_remote());
        assert!(!IdError::from_status(400, "u").is_remote());
        assert!(!IdError::CouldNotReach("u".to_string()).is_remote());
        assert!(!IdError::DoesNotDereferenceToData("u".to_string()).is_remote());
    }

    #[test]
    fn test_transient() {
        assert!(IdError::from_status(503, "u").is_transient());
        assert!(IdError::from_status(429, "u").is_transient());
        assert!(!IdError::from_status(404, "u").is_transient());
        assert!(!IdError::from_status(410, "u").is_transient());
    }
}
