//! Code cache serialization and the acceptance check.
//!
//! A cache blob is a fixed header in the layout of the engine's
//! [`FormatVersion`] followed by the bincode-encoded top-level
//! [`FunctionProto`]. The engine accepts a blob only if every header field
//! matches what it would have written itself for a source of the same
//! length.

use kiln_common::{FormatVersion, Fingerprint, HeaderLayout, MAGIC_MARKER};

use crate::bytecode::FunctionProto;
use crate::error::EngineError;
use crate::identity::{BuildIdentity, EngineFlags};

/// The value stored in the external-reference field of every blob.
pub const EXTERNAL_REFERENCE_COUNT: u16 = 0x01a4;

/// Why the engine refused a cache blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The blob ends inside the header.
    #[error("blob is {len} bytes, shorter than the {header_len}-byte header")]
    Truncated {
        /// Blob length.
        len: usize,
        /// Required header length.
        header_len: usize,
    },
    /// The external-reference or magic field does not match.
    #[error("bad magic number")]
    BadMagic,
    /// The blob was produced by another engine line.
    #[error("version hash mismatch")]
    VersionMismatch,
    /// The blob was compiled from a source of different length.
    #[error("source length mismatch: cache has {cached}, source has {actual}")]
    SourceMismatch {
        /// Length recorded in the blob.
        cached: u32,
        /// Length of the supplied source.
        actual: u32,
    },
    /// The blob was produced by another build or with other flags.
    #[error("build flags mismatch")]
    FlagMismatch,
    /// The payload length field disagrees with the blob.
    #[error("payload length mismatch: header says {declared}, blob carries {actual}")]
    LengthMismatch {
        /// Length recorded in the header.
        declared: u32,
        /// Bytes following the header.
        actual: usize,
    },
    /// The payload was modified.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// The payload passed every check but does not decode.
    #[error("payload does not decode: {0}")]
    Corrupt(String),
}

/// Serializes `proto`, compiled from `source`, into a cache blob.
pub fn encode(
    identity: &BuildIdentity,
    flags: EngineFlags,
    format: FormatVersion,
    source: &str,
    proto: &FunctionProto,
) -> Result<Vec<u8>, EngineError> {
    let payload = bincode::serde::encode_to_vec(proto, bincode::config::standard())
        .map_err(|e| EngineError::Serialize(e.to_string()))?;
    let layout = format.layout();

    let mut blob = vec![0u8; layout.header_len];
    blob[layout.external_refs.clone()].copy_from_slice(&EXTERNAL_REFERENCE_COUNT.to_le_bytes());
    blob[layout.magic.clone()].copy_from_slice(&MAGIC_MARKER);
    put(&mut blob, layout, Field::VersionHash, identity.version_hash().value());
    put(&mut blob, layout, Field::SourceLength, crate::source_length(source));
    for (range, word) in layout
        .build_flags
        .iter()
        .zip(identity.flag_words(flags, format))
    {
        blob[range.clone()].copy_from_slice(&word.to_le_bytes());
    }
    put(&mut blob, layout, Field::PayloadLength, payload.len() as u32);
    put(
        &mut blob,
        layout,
        Field::Checksum,
        Fingerprint::from_bytes(&payload).value(),
    );
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Checks `cache` against this engine and `source`, then decodes it.
pub fn decode(
    identity: &BuildIdentity,
    flags: EngineFlags,
    format: FormatVersion,
    source: &str,
    cache: &[u8],
) -> Result<FunctionProto, Rejection> {
    let layout = format.layout();
    if cache.len() < layout.header_len {
        return Err(Rejection::Truncated {
            len: cache.len(),
            header_len: layout.header_len,
        });
    }
    let read = |range: std::ops::Range<usize>| HeaderLayout::read_u32(cache, range).unwrap_or(0);

    if cache[layout.external_refs.clone()] != EXTERNAL_REFERENCE_COUNT.to_le_bytes()
        || cache[layout.magic.clone()] != MAGIC_MARKER
    {
        return Err(Rejection::BadMagic);
    }
    if read(layout.version_hash.clone()) != identity.version_hash().value() {
        return Err(Rejection::VersionMismatch);
    }
    let cached = read(layout.source_length.clone());
    let actual = crate::source_length(source);
    if cached != actual {
        return Err(Rejection::SourceMismatch { cached, actual });
    }
    let expected_flags = identity.flag_words(flags, format);
    let flags_match = layout
        .build_flags
        .iter()
        .zip(&expected_flags)
        .all(|(range, &word)| read(range.clone()) == word);
    if !flags_match {
        return Err(Rejection::FlagMismatch);
    }

    let payload = &cache[layout.header_len..];
    let declared = read(layout.payload_length.clone());
    if declared as usize != payload.len() {
        return Err(Rejection::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    if read(layout.checksum.clone()) != Fingerprint::from_bytes(payload).value() {
        return Err(Rejection::ChecksumMismatch);
    }

    let (proto, consumed): (FunctionProto, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| Rejection::Corrupt(e.to_string()))?;
    if consumed != payload.len() {
        return Err(Rejection::Corrupt(format!(
            "{} trailing bytes",
            payload.len() - consumed
        )));
    }
    Ok(proto)
}

enum Field {
    VersionHash,
    SourceLength,
    PayloadLength,
    Checksum,
}

fn put(blob: &mut [u8], layout: &HeaderLayout, field: Field, value: u32) {
    let range = match field {
        Field::VersionHash => layout.version_hash.clone(),
        Field::SourceLength => layout.source_length.clone(),
        Field::PayloadLength => layout.payload_length.clone(),
        Field::Checksum => layout.checksum.clone(),
    };
    blob[range].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, FunctionBody};
    use crate::compiler::compile_script;
    use crate::parser::parse_program;
    use std::rc::Rc;

    const SRC: &str = "function f() { return 42; }\nf() + 1";

    fn proto(src: &str) -> FunctionProto {
        let chunk = compile_script(&parse_program(src).unwrap(), EngineFlags::code_cache());
        FunctionProto {
            name: None,
            params: vec![],
            body: FunctionBody::Eager(Rc::new(chunk)),
        }
    }

    fn blob(format: FormatVersion) -> Vec<u8> {
        encode(
            &BuildIdentity::current(),
            EngineFlags::code_cache(),
            format,
            SRC,
            &proto(SRC),
        )
        .unwrap()
    }

    fn check(cache: &[u8], identity: &BuildIdentity) -> Result<FunctionProto, Rejection> {
        decode(
            identity,
            EngineFlags::code_cache(),
            FormatVersion::Standard,
            SRC,
            cache,
        )
    }

    #[test]
    fn header_fields_are_stamped() {
        let b = blob(FormatVersion::Standard);
        assert_eq!(&b[0..2], &EXTERNAL_REFERENCE_COUNT.to_le_bytes());
        assert_eq!(&b[2..4], &MAGIC_MARKER);
        assert_eq!(
            HeaderLayout::read_u32(&b, 8..12),
            Some(crate::source_length(SRC))
        );
        assert_eq!(
            HeaderLayout::read_u32(&b, 16..20),
            Some((b.len() - 24) as u32)
        );
    }

    #[test]
    fn accepts_its_own_blob() {
        let b = blob(FormatVersion::Standard);
        assert_eq!(check(&b, &BuildIdentity::current()).unwrap(), proto(SRC));
    }

    #[test]
    fn every_layout_roundtrips() {
        for format in [FormatVersion::Legacy, FormatVersion::Extended] {
            let b = blob(format);
            let decoded = decode(
                &BuildIdentity::current(),
                EngineFlags::code_cache(),
                format,
                SRC,
                &b,
            );
            assert!(decoded.is_ok(), "{format}");
        }
    }

    #[test]
    fn rejects_other_build() {
        let b = blob(FormatVersion::Standard);
        let sibling = BuildIdentity::new(crate::ENGINE_LINE, "other-build");
        assert_eq!(check(&b, &sibling), Err(Rejection::FlagMismatch));
    }

    #[test]
    fn rejects_other_line() {
        let b = blob(FormatVersion::Standard);
        let other = BuildIdentity::new("9.9", "x");
        assert_eq!(check(&b, &other), Err(Rejection::VersionMismatch));
    }

    #[test]
    fn rejects_other_flags() {
        let b = blob(FormatVersion::Standard);
        let result = decode(
            &BuildIdentity::current(),
            EngineFlags::default(),
            FormatVersion::Standard,
            SRC,
            &b,
        );
        assert_eq!(result, Err(Rejection::FlagMismatch));
    }

    #[test]
    fn rejects_source_length_mismatch() {
        let b = blob(FormatVersion::Standard);
        let result = decode(
            &BuildIdentity::current(),
            EngineFlags::code_cache(),
            FormatVersion::Standard,
            "short",
            &b,
        );
        assert!(matches!(result, Err(Rejection::SourceMismatch { .. })));
    }

    #[test]
    fn rejects_tampered_payload() {
        let mut b = blob(FormatVersion::Standard);
        let last = b.len() - 1;
        b[last] ^= 0xff;
        assert_eq!(
            check(&b, &BuildIdentity::current()),
            Err(Rejection::ChecksumMismatch)
        );
    }

    #[test]
    fn rejects_truncation_and_bad_magic() {
        let b = blob(FormatVersion::Standard);
        assert!(matches!(
            check(&b[..10], &BuildIdentity::current()),
            Err(Rejection::Truncated { .. })
        ));
        assert!(matches!(
            check(&b[..b.len() - 1], &BuildIdentity::current()),
            Err(Rejection::LengthMismatch { .. })
        ));
        let mut bad = b.clone();
        bad[3] = 0;
        assert_eq!(
            check(&bad, &BuildIdentity::current()),
            Err(Rejection::BadMagic)
        );
    }

    #[test]
    fn empty_chunk_encodes() {
        let empty = FunctionProto {
            name: None,
            params: vec![],
            body: FunctionBody::Eager(Rc::new(Chunk::default())),
        };
        let b = encode(
            &BuildIdentity::current(),
            EngineFlags::code_cache(),
            FormatVersion::Standard,
            "",
            &empty,
        )
        .unwrap();
        assert!(b.len() > 24);
    }
}
