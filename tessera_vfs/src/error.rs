use thiserror::Error;

use crate::uri::Scheme;

/// An error raised by the virtual filesystem or one of its backends.
///
/// Every variant corresponds to a distinct failure category so that callers
/// can dispatch on the kind of failure without parsing messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VfsError {
    /// The URI could not be parsed or normalised.
    #[error("invalid URI `{uri}`: {reason}")]
    InvalidUri {
        /// The offending URI string.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The URI scheme is not one of the recognised schemes.
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    /// The scheme is recognised but no backend was registered for it.
    #[error("no backend registered for {0} URIs; the backend may be compiled out")]
    BackendDisabled(Scheme),
    /// A move between two different backends was requested.
    #[error("cannot move `{from}` to `{to}`; cross-backend moves are not supported")]
    CrossBackendMove {
        /// Source URI.
        from: String,
        /// Destination URI.
        to: String,
    },
    /// One or more shards of a parallel read failed.
    ///
    /// Wraps the first underlying failure.
    #[error("parallel read failed")]
    ParallelRead(#[source] Box<VfsError>),
    /// An IO error from a local filesystem backend.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An object store request failed.
    #[error("object store error: {0}")]
    ObjectStore(String),
    /// An HDFS request failed.
    #[error("hdfs error: {0}")]
    Hdfs(String),
    /// The backend does not implement the requested operation.
    #[error("operation `{op}` is not supported by the {backend} backend")]
    Unsupported {
        /// Name of the operation.
        op: &'static str,
        /// Name of the backend.
        backend: &'static str,
    },
    /// A task submitted to the thread pool panicked.
    #[error("a thread pool task panicked")]
    TaskPanicked,
    /// A configuration option could not be parsed.
    #[error("invalid configuration value `{value}` for `{key}`")]
    Config {
        /// The configuration key.
        key: String,
        /// The rejected value.
        value: String,
    },
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for VfsError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<&str> for VfsError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}
