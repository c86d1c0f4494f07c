//! Error types for module loading.

use std::path::PathBuf;

use kiln_common::KilnError;
use kiln_engine::EngineError;

/// Errors that can occur while loading modules or running blobs.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Decoding or validating a blob failed.
    #[error(transparent)]
    Cache(#[from] KilnError),

    /// The engine failed to compile or run a unit.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A `require` request did not resolve to a file.
    #[error("cannot find module '{request}' from '{}'", from.display())]
    ModuleNotFound {
        /// The requested id.
        request: String,
        /// The directory the request was resolved against.
        from: PathBuf,
    },

    /// No handler is registered for the file's extension.
    #[error("no module handler registered for '{}'", path.display())]
    NoHandler {
        /// The resolved file.
        path: PathBuf,
    },

    /// A module file evaluated to something other than its wrapper function.
    #[error("'{}' did not evaluate to a module wrapper function", path.display())]
    NotAModule {
        /// The module file.
        path: PathBuf,
    },

    /// Reading a module file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl LoaderError {
    /// Returns the cache-layer error, if this is one.
    pub fn as_cache_error(&self) -> Option<&KilnError> {
        match self {
            LoaderError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_display_transparently() {
        let err: LoaderError = KilnError::CacheRejected {
            filename: "app.xxc".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid or incompatible cached data for 'app.xxc' (cache rejected)"
        );
        assert!(err.as_cache_error().is_some());
    }

    #[test]
    fn module_not_found_display() {
        let err = LoaderError::ModuleNotFound {
            request: "./missing".to_string(),
            from: PathBuf::from("/srv/app"),
        };
        assert_eq!(
            err.to_string(),
            "cannot find module './missing' from '/srv/app'"
        );
    }
}
