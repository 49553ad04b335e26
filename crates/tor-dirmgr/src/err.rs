//! The error types returned by this crate.

use std::path::PathBuf;
use std::sync::Arc;

use retry_error::RetryError;
use tor_error::{ErrorKind, HasKind};

/// A result type specialized to this crate's error type.
pub type Result<T> = std::result::Result<T, DirMgrError>;

/// An error produced while acquiring, validating, or caching directory
/// documents.
///
/// These variants correspond to the error kinds enumerated in the
/// design (`ParseError`, `SignatureIncomplete`, `SignatureBad`,
/// `IOError`, `IntegrityError`, `ProtocolViolation`); clock skew is
/// reported as an event rather than an error, since it never aborts
/// an operation.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DirMgrError {
    /// The bytes we tried to parse were not a well-formed document.
    #[error("could not parse {doc}: {source}")]
    ParseError {
        /// What we were trying to parse.
        doc: &'static str,
        /// The underlying parse error.
        #[source]
        source: Arc<tor_netdoc::Error>,
    },

    /// A consensus did not have enough good signatures to install, but
    /// might once more certificates arrive.
    #[error("consensus is not sufficiently signed (yet)")]
    SignatureIncomplete,

    /// A consensus can never become signed even with more certificates.
    #[error("consensus signatures cannot be satisfied")]
    SignatureBad,

    /// A filesystem operation (open, write, rename) failed.
    #[error("I/O error on {path}: {source}")]
    IoError {
        /// The path we were operating on.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A cache rebuild's sanity check failed: the cache is corrupt.
    #[error("cache integrity check failed: {0}")]
    CacheCorruption(&'static str),

    /// A cache's configured directory failed a permissions check.
    #[error("unsafe directory permissions: {0}")]
    FilesystemMistrust(#[from] fs_mistrust::Error),

    /// A remote party sent us something we didn't ask for.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A field of the configuration was invalid.
    #[error("bad configuration: {0}")]
    BadConfig(#[from] tor_config::ConfigBuildError),

    /// A single attempt to fetch a directory resource failed.
    #[error("could not fetch directory resource: {0}")]
    FetchFailed(#[from] tor_dirclient::Error),

    /// Every attempt to fetch a resource failed.
    #[error("unable to fetch directory resource: {0}")]
    AllFetchesFailed(#[source] RetryError<Arc<DirMgrError>>),

    /// An invariant of this crate was violated.
    #[error("internal error: {0}")]
    Bug(#[from] tor_error::Bug),
}

impl HasKind for DirMgrError {
    fn kind(&self) -> ErrorKind {
        match self {
            DirMgrError::ParseError { .. }
            | DirMgrError::ProtocolViolation(_)
            | DirMgrError::SignatureBad
            | DirMgrError::SignatureIncomplete => ErrorKind::TorProtocolViolation,
            DirMgrError::CacheCorruption(_) => ErrorKind::CacheCorrupted,
            DirMgrError::IoError { .. }
            | DirMgrError::FilesystemMistrust(_)
            | DirMgrError::BadConfig(_)
            | DirMgrError::FetchFailed(_)
            | DirMgrError::AllFetchesFailed(_) => ErrorKind::Other,
            DirMgrError::Bug(_) => ErrorKind::Internal,
        }
    }
}

impl DirMgrError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn from_io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DirMgrError::IoError {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
