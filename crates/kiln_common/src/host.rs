//! Capability traits for the host scripting engine.
//!
//! The codec and the compiler adapter never reach into an engine directly.
//! They see two narrow capabilities: compile a source string into a cache
//! blob, and instantiate a unit from a placeholder source plus a cache blob.
//! Any embedded engine can stand behind these traits.

use crate::format::FormatVersion;

/// The engine's opaque "produce a cache blob for this source" primitive.
pub trait Compile {
    /// The error produced when the source is rejected (e.g. a syntax error).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compiles `source` and returns the serialized cache blob.
    fn produce_cache(&self, source: &str) -> Result<Vec<u8>, Self::Error>;

    /// Wraps `source` in the engine's module-function envelope.
    fn wrap_module(&self, source: &str) -> String;

    /// The header layout version of the blobs this engine produces and accepts.
    fn format_version(&self) -> FormatVersion;
}

/// Outcome of an instantiate-with-cache request.
#[derive(Debug)]
pub struct Instantiated<U> {
    /// The instantiated unit. When the cache was rejected this is an inert
    /// stand-in the caller discards.
    pub unit: U,
    /// Whether the engine refused the supplied cache.
    pub cache_rejected: bool,
}

/// The engine's opaque "instantiate a unit from source plus cache" primitive.
pub trait InstantiateWithCache {
    /// The loadable unit handed back to the caller.
    type Unit;
    /// The error produced when the engine cannot produce any unit at all.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Instantiates a unit for `filename` from `placeholder_source` and `cache`.
    fn instantiate(
        &self,
        placeholder_source: &str,
        cache: &[u8],
        filename: &str,
    ) -> Result<Instantiated<Self::Unit>, Self::Error>;
}
