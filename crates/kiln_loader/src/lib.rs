//! Loading compiled files and running cache blobs.
//!
//! A [`Loader`] owns an engine and a [`ModuleRegistry`] mapping file
//! extensions to handlers. The `.xxc` handler validates a compiled file,
//! evaluates it to the module wrapper function, and calls the wrapper with
//! the module's `exports`, `require`, `module`, `__filename`, `__dirname`,
//! `process`, and `global`.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod module;
pub mod registry;

pub use error::LoaderError;
pub use loader::Loader;
pub use module::Module;
pub use registry::{Handler, ModuleRegistry, COMPILED_EXTENSION, SOURCE_EXTENSION};
