//! Shared foundational types used across the Kiln bytecode-cache toolchain.
//!
//! This crate provides the cache blob header layouts, the error taxonomy shared
//! by every stage, the transient [`SourceUnit`], 32-bit fingerprints, and the
//! two capability traits through which the rest of the workspace talks to a
//! host scripting engine.

#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod hash;
pub mod host;
pub mod source;

pub use error::{ErrorKind, KilnError, KilnResult};
pub use format::{
    FormatVersion, HeaderLayout, MAGIC_MARKER, MAX_INFLATED_LEN, MAX_SOURCE_LENGTH,
    MIN_RECOGNIZABLE_LEN,
};
pub use hash::Fingerprint;
pub use host::{Compile, Instantiated, InstantiateWithCache};
pub use source::SourceUnit;
