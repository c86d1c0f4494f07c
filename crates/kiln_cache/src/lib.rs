//! Cache blob codec and compiler adapter.
//!
//! This crate recognizes, reconciles, and validates serialized bytecode
//! caches produced by a host engine, and turns source units into cache blobs.
//! It talks to the engine only through the [`Compile`](kiln_common::Compile)
//! and [`InstantiateWithCache`](kiln_common::InstantiateWithCache) traits.

#![warn(missing_docs)]

pub mod blob;
pub mod codec;
pub mod compiler;
pub mod compress;
pub mod placeholder;

pub use blob::{decode_source_length, patch_with, recognize};
pub use codec::{CacheCodec, REFERENCE_SOURCE};
pub use compiler::{compile, CompileOptions};
pub use compress::{compress, decompress};
pub use placeholder::build_placeholder_source;
