//! The error taxonomy shared by the codec, the compiler adapter, and the
//! cross-runtime pipeline.

use std::fmt;
use std::path::PathBuf;

/// The standard result type for core Kiln operations.
pub type KilnResult<T> = Result<T, KilnError>;

/// Errors surfaced by the core stages.
///
/// None of these are retried: a rejected cache or a missing runtime is a
/// terminal failure for the request that produced it. No partial cache blob
/// is ever returned alongside an error.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    /// The bytes are not a cache blob, even after attempting decompression.
    #[error("invalid cache format: {reason}")]
    InvalidCacheFormat {
        /// Description of what failed to match.
        reason: String,
    },

    /// The engine's own acceptance check refused the (patched) cache blob.
    #[error("invalid or incompatible cached data for '{filename}' (cache rejected)")]
    CacheRejected {
        /// The filename the unit was being instantiated for.
        filename: String,
    },

    /// The alternate engine executable is missing or is not a regular file.
    #[error("cannot find runtime at '{}'", path.display())]
    RuntimeNotFound {
        /// The path that was checked.
        path: PathBuf,
    },

    /// Spawning or talking to the alternate runtime failed.
    #[error("runtime subprocess failed: {reason}")]
    SubprocessFailure {
        /// Description of the failure.
        reason: String,
        /// The underlying stream or spawn error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The engine's compile primitive rejected the source.
    #[error("compile error: {0}")]
    Compile(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A filesystem operation in a surrounding component failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl KilnError {
    /// Creates an [`KilnError::InvalidCacheFormat`] with the given reason.
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidCacheFormat {
            reason: reason.into(),
        }
    }

    /// Wraps an engine compile failure without interpreting it.
    pub fn compile(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Compile(Box::new(err))
    }

    /// Creates a [`KilnError::SubprocessFailure`].
    pub fn subprocess(reason: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::SubprocessFailure {
            reason: reason.into(),
            source,
        }
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCacheFormat { .. } => ErrorKind::InvalidCacheFormat,
            Self::CacheRejected { .. } => ErrorKind::CacheRejected,
            Self::RuntimeNotFound { .. } => ErrorKind::RuntimeNotFound,
            Self::SubprocessFailure { .. } => ErrorKind::SubprocessFailure,
            Self::Compile(_) => ErrorKind::CompileError,
            Self::Io { .. } => ErrorKind::IoError,
        }
    }
}

/// The kind of a [`KilnError`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`KilnError::InvalidCacheFormat`].
    InvalidCacheFormat,
    /// See [`KilnError::CacheRejected`].
    CacheRejected,
    /// See [`KilnError::RuntimeNotFound`].
    RuntimeNotFound,
    /// See [`KilnError::SubprocessFailure`].
    SubprocessFailure,
    /// See [`KilnError::Compile`].
    CompileError,
    /// See [`KilnError::Io`].
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidCacheFormat => "InvalidCacheFormat",
            ErrorKind::CacheRejected => "CacheRejected",
            ErrorKind::RuntimeNotFound => "RuntimeNotFound",
            ErrorKind::SubprocessFailure => "SubprocessFailure",
            ErrorKind::CompileError => "CompileError",
            ErrorKind::IoError => "IOError",
        };
        f.write_str(name)
    }
}
