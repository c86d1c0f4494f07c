//! Extension-keyed module handlers.

use std::path::Path;

use crate::error::LoaderError;
use crate::loader::{compiled_handler, source_handler, Loader};
use crate::module::Module;

/// Extension of compiled files.
pub const COMPILED_EXTENSION: &str = "xxc";

/// Extension of plain source files.
pub const SOURCE_EXTENSION: &str = "js";

/// Populates `module.exports` from the file at `module.filename()`.
pub type Handler = fn(&Loader, &Module) -> Result<(), LoaderError>;

/// Maps file extensions to handlers.
///
/// Registration order is the order extensions are tried when a `require`
/// request names a file without its extension.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    handlers: Vec<(String, Handler)>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the compiled-file and source-file handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(COMPILED_EXTENSION, compiled_handler);
        registry.register(SOURCE_EXTENSION, source_handler);
        registry
    }

    /// Registers `handler` for `extension` (with or without a leading dot),
    /// replacing any earlier handler for it.
    pub fn register(&mut self, extension: &str, handler: Handler) {
        let extension = extension.trim_start_matches('.');
        match self.handlers.iter_mut().find(|(ext, _)| ext == extension) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((extension.to_string(), handler)),
        }
    }

    /// Returns the handler for `extension`.
    pub fn handler(&self, extension: &str) -> Option<Handler> {
        let extension = extension.trim_start_matches('.');
        self.handlers
            .iter()
            .find(|(ext, _)| ext == extension)
            .map(|(_, h)| *h)
    }

    /// Returns the handler for `path`'s extension.
    pub fn handler_for(&self, path: &Path) -> Option<Handler> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.handler(e))
    }

    /// Registered extensions in resolution order.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(ext, _)| ext.as_str())
    }
}
