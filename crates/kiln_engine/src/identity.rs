//! Build identity and process-wide engine flags.
//!
//! A cache blob is stamped with two identities: the *line* (the bytecode
//! format generation, which decides structural compatibility) and the
//! *build* (a particular binary on that line). Two builds of one line emit
//! identical payloads but different build-flag words, so a blob from a
//! sibling build is rejected until its flag words are patched.

use std::sync::OnceLock;

use kiln_common::{FormatVersion, Fingerprint};

use crate::error::EngineError;

/// The engine line this crate implements.
pub const ENGINE_LINE: &str = "1.0";

/// The default build name, derived from the crate version.
pub const DEFAULT_BUILD: &str = concat!("kiln-", env!("CARGO_PKG_VERSION"));

/// Identifies the engine binary that produced a cache blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BuildIdentity {
    /// The bytecode line. Blobs from another line never load.
    pub line: String,
    /// The build on that line.
    pub build: String,
}

impl BuildIdentity {
    /// Creates an identity.
    pub fn new(line: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            build: build.into(),
        }
    }

    /// The identity of this binary.
    pub fn current() -> Self {
        Self::new(ENGINE_LINE, DEFAULT_BUILD)
    }

    /// The header version hash: depends on the line only.
    pub fn version_hash(&self) -> Fingerprint {
        Fingerprint::from_parts(&[b"line", self.line.as_bytes()])
    }

    /// The build-flag words for `format`, one per flag field of its layout.
    pub fn flag_words(&self, flags: EngineFlags, format: FormatVersion) -> Vec<u32> {
        let bits = [flags.bits()];
        (0..format.layout().build_flags.len())
            .map(|i| {
                let word: &[u8] = if i == 0 { b"flags" } else { b"snapshot" };
                Fingerprint::from_parts(&[
                    word,
                    self.line.as_bytes(),
                    self.build.as_bytes(),
                    &bits,
                ])
                .value()
            })
            .collect()
    }
}

impl Default for BuildIdentity {
    fn default() -> Self {
        Self::current()
    }
}

/// Compilation flags that affect what a cache blob contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineFlags {
    /// Defer compiling function bodies until their first call. Deferred
    /// bodies are recompiled from the script source, so a script restored
    /// from a cache with placeholder source cannot run them.
    pub lazy_compilation: bool,
    /// Drop lazily compiled bodies after each call instead of keeping them.
    pub flush_bytecode: bool,
}

impl EngineFlags {
    /// Flags for producing self-contained cache blobs: everything compiled
    /// up front and nothing flushed.
    pub fn code_cache() -> Self {
        Self {
            lazy_compilation: false,
            flush_bytecode: false,
        }
    }

    fn bits(self) -> u8 {
        u8::from(self.lazy_compilation) | (u8::from(self.flush_bytecode) << 1)
    }
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self {
            lazy_compilation: true,
            flush_bytecode: true,
        }
    }
}

static GLOBAL_FLAGS: OnceLock<EngineFlags> = OnceLock::new();

/// Sets the process-wide engine flags. Must run before any engine is created.
///
/// Setting the same flags twice is a no-op; setting different ones fails.
pub fn initialize(flags: EngineFlags) -> Result<(), EngineError> {
    let set = GLOBAL_FLAGS.get_or_init(|| flags);
    if *set == flags {
        Ok(())
    } else {
        Err(EngineError::AlreadyInitialized)
    }
}

/// Returns the process-wide engine flags, or the defaults if never set.
pub fn global_flags() -> EngineFlags {
    GLOBAL_FLAGS.get().copied().unwrap_or_default()
}
