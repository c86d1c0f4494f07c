//! Parsing and validation of `kiln.toml` configuration files.
//!
//! This crate reads the project configuration and produces a strongly-typed
//! [`KilnConfig`]: compile defaults, engine identity overrides, named
//! alternate runtimes, and the log level.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE};
pub use resolve::resolve_runtime;
pub use types::*;
