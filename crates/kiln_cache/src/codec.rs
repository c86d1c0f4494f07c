//! Reconciling cache blobs against the consuming engine build.
//!
//! A blob produced by a sibling build of the same engine line carries that
//! build's flag words. [`CacheCodec::patch`] overwrites them with the words of
//! a reference blob compiled in process, after which the consuming engine's
//! acceptance check passes as long as the payload itself is compatible.

use std::cell::OnceCell;

use kiln_common::{
    Compile, HeaderLayout, InstantiateWithCache, KilnError, KilnResult, MAX_SOURCE_LENGTH,
};
use tracing::{debug, warn};

use crate::blob::{decode_source_length, patch_with, recognize};
use crate::compress::decompress;
use crate::placeholder::build_placeholder_source;

/// Source of the reference blob whose flag words are patched in.
pub const REFERENCE_SOURCE: &str = "\"ಠ_ಠ\"";

/// Decodes, patches, and validates cache blobs for one engine.
pub struct CacheCodec<'e, E> {
    engine: &'e E,
    reference: OnceCell<Vec<u8>>,
}

impl<'e, E> CacheCodec<'e, E>
where
    E: Compile + InstantiateWithCache,
{
    /// Creates a codec for `engine`.
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            reference: OnceCell::new(),
        }
    }

    /// The header layout of the engine's format version.
    pub fn layout(&self) -> &'static HeaderLayout {
        self.engine.format_version().layout()
    }

    /// Returns the raw blob in `bytes`, decompressing if it is not
    /// recognized as-is.
    pub fn decode(&self, bytes: &[u8]) -> KilnResult<Vec<u8>> {
        let blob = if recognize(bytes) {
            bytes.to_vec()
        } else {
            debug!(bytes = bytes.len(), "blob not recognized, trying decompression");
            let inflated = decompress(bytes)?;
            if !recognize(&inflated) {
                return Err(KilnError::invalid_format(
                    "bytes are neither a cache blob nor a compressed cache blob",
                ));
            }
            inflated
        };
        let layout = self.layout();
        if blob.len() < layout.header_len {
            return Err(KilnError::invalid_format(format!(
                "blob is {} bytes, shorter than the {}-byte {} header",
                blob.len(),
                layout.header_len,
                layout.version
            )));
        }
        Ok(blob)
    }

    /// The blob the current engine produces for [`REFERENCE_SOURCE`].
    pub fn reference_blob(&self) -> KilnResult<&[u8]> {
        if let Some(blob) = self.reference.get() {
            return Ok(blob);
        }
        let blob = <E as Compile>::produce_cache(self.engine, REFERENCE_SOURCE)
            .map_err(KilnError::compile)?;
        Ok(self.reference.get_or_init(|| blob))
    }

    /// Overwrites the build-flag words of `blob` with the current build's.
    pub fn patch(&self, blob: &mut [u8]) -> KilnResult<()> {
        let reference = self.reference_blob()?;
        patch_with(blob, reference, self.layout())?;
        debug!(
            words = self.layout().build_flags.len(),
            "patched build flags from reference blob"
        );
        Ok(())
    }

    /// Decodes, patches, and instantiates a unit from `bytes`.
    pub fn validate(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> KilnResult<<E as InstantiateWithCache>::Unit> {
        let mut blob = self.decode(bytes)?;
        self.patch(&mut blob)?;
        self.instantiate(&blob, filename)
    }

    /// Like [`validate`](Self::validate) but leaves the build-flag words as
    /// they are.
    pub fn validate_unpatched(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> KilnResult<<E as InstantiateWithCache>::Unit> {
        let blob = self.decode(bytes)?;
        self.instantiate(&blob, filename)
    }

    fn instantiate(
        &self,
        blob: &[u8],
        filename: &str,
    ) -> KilnResult<<E as InstantiateWithCache>::Unit> {
        let length = decode_source_length(blob, self.layout())?;
        if length > MAX_SOURCE_LENGTH {
            return Err(KilnError::invalid_format(format!(
                "blob declares a source of {length} units, above the {MAX_SOURCE_LENGTH} limit"
            )));
        }
        let placeholder = build_placeholder_source(length);
        let outcome = self
            .engine
            .instantiate(&placeholder, blob, filename)
            .map_err(KilnError::compile)?;
        if outcome.cache_rejected {
            warn!(filename, source_length = length, "engine rejected cache blob");
            return Err(KilnError::CacheRejected {
                filename: filename.to_string(),
            });
        }
        debug!(filename, source_length = length, "cache blob accepted");
        Ok(outcome.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use kiln_common::{ErrorKind, FormatVersion, SourceUnit};
    use kiln_engine::{source_length, BuildIdentity, Engine, EngineFlags, ENGINE_LINE};

    const SCENARIO_A: &str = "console.log('hi');43;";

    fn engine() -> Engine {
        Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache())
    }

    fn sibling() -> Engine {
        Engine::with_flags(
            BuildIdentity::new(ENGINE_LINE, "sibling-build"),
            EngineFlags::code_cache(),
        )
    }

    fn blob_for(engine: &Engine, src: &str, compress: bool) -> Vec<u8> {
        compile(engine, &SourceUnit::script(src), CompileOptions { compress }).unwrap()
    }

    #[test]
    fn scenario_a_roundtrip_returns_last_value() {
        let engine = engine();
        engine.capture_console();
        let blob = blob_for(&engine, SCENARIO_A, false);
        let codec = CacheCodec::new(&engine);
        let script = codec.validate(&blob, "a.xxc").unwrap();
        let value = engine.run_in_this_context(&script).unwrap();
        assert_eq!(value.as_number(), Some(43.0));
        assert_eq!(engine.take_console(), vec!["hi"]);
    }

    #[test]
    fn scenario_b_compressed_blob_is_detected() {
        let engine = engine();
        engine.capture_console();
        let packed = blob_for(&engine, SCENARIO_A, true);
        assert!(!recognize(&packed));
        let codec = CacheCodec::new(&engine);
        let script = codec.validate(&packed, "b.xxc").unwrap();
        assert_eq!(
            engine.run_in_this_context(&script).unwrap().as_number(),
            Some(43.0)
        );
        assert_eq!(engine.take_console(), vec!["hi"]);
    }

    #[test]
    fn scenario_d_sibling_blob_needs_patch() {
        let foreign = blob_for(&sibling(), SCENARIO_A, false);
        let engine = engine();
        engine.capture_console();
        let codec = CacheCodec::new(&engine);

        let err = codec.validate_unpatched(&foreign, "d.xxc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheRejected);
        assert!(err.to_string().contains("d.xxc"));

        let script = codec.validate(&foreign, "d.xxc").unwrap();
        assert_eq!(
            engine.run_in_this_context(&script).unwrap().as_number(),
            Some(43.0)
        );
    }

    #[test]
    fn other_line_is_rejected_even_after_patch() {
        let other = Engine::with_flags(BuildIdentity::new("2.0", "x"), EngineFlags::code_cache());
        let foreign = blob_for(&other, SCENARIO_A, false);
        let engine = engine();
        let err = CacheCodec::new(&engine)
            .validate(&foreign, "line.xxc")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheRejected);
    }

    #[test]
    fn patch_is_stable_on_real_blobs() {
        let engine = engine();
        let codec = CacheCodec::new(&engine);
        let mut once = blob_for(&sibling(), "let x = 1; x", false);
        codec.patch(&mut once).unwrap();
        let mut twice = once.clone();
        codec.patch(&mut twice).unwrap();
        assert_eq!(once, twice);
        // The current build's own blob is a fixed point.
        let mut own = blob_for(&engine, "let x = 1; x", false);
        let before = own.clone();
        codec.patch(&mut own).unwrap();
        assert_eq!(own, before);
    }

    #[test]
    fn source_length_fidelity() {
        let engine = engine();
        let codec = CacheCodec::new(&engine);
        for src in ["43", "'ಠ_ಠ' + 'x'", "let s = 'é'; s + s"] {
            let blob = blob_for(&engine, src, false);
            let len = decode_source_length(&blob, codec.layout()).unwrap();
            assert_eq!(len, source_length(src));
            assert_eq!(source_length(&build_placeholder_source(len)), len);
        }
    }

    #[test]
    fn every_format_version_validates() {
        for format in [
            FormatVersion::Legacy,
            FormatVersion::Standard,
            FormatVersion::Extended,
        ] {
            let producer = sibling().with_format(format);
            let consumer = engine().with_format(format);
            let blob = blob_for(&producer, "40 + 3", false);
            let script = CacheCodec::new(&consumer).validate(&blob, "f.xxc").unwrap();
            let v = consumer.run_in_this_context(&script).unwrap();
            assert_eq!(v.as_number(), Some(43.0), "{format}");
        }
    }

    #[test]
    fn garbage_is_invalid_format() {
        let engine = engine();
        let codec = CacheCodec::new(&engine);
        let inputs: [&[u8]; 3] = [b"", b"abc", b"not a cache blob at all"];
        for bytes in inputs {
            let err = codec.validate(bytes, "g.xxc").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCacheFormat);
        }
    }

    #[test]
    fn oversized_source_length_is_invalid_format() {
        let engine = engine();
        let codec = CacheCodec::new(&engine);
        let range = codec.layout().source_length.clone();
        for declared in [MAX_SOURCE_LENGTH + 1, u32::MAX] {
            let mut blob = blob_for(&engine, "43", false);
            blob[range.clone()].copy_from_slice(&declared.to_le_bytes());
            let err = codec.validate(&blob, "huge.xxc").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCacheFormat);
            assert!(err.to_string().contains(&declared.to_string()));
        }
    }

    #[test]
    fn compressed_garbage_is_invalid_format() {
        let engine = engine();
        let packed = crate::compress(b"hello").unwrap();
        let err = CacheCodec::new(&engine).decode(&packed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCacheFormat);
    }

    #[test]
    fn truncated_header_is_invalid_format() {
        let engine = engine();
        let blob = blob_for(&engine, "1 + 1", false);
        let err = CacheCodec::new(&engine).decode(&blob[..8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCacheFormat);
    }

    #[test]
    fn reference_blob_is_compiled_once() {
        let engine = engine();
        let codec = CacheCodec::new(&engine);
        let a = codec.reference_blob().unwrap().as_ptr();
        let b = codec.reference_blob().unwrap().as_ptr();
        assert_eq!(a, b);
        assert!(recognize(codec.reference_blob().unwrap()));
    }
}
