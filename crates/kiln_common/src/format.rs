//! Cache blob header layouts.
//!
//! Every engine format version places the same logical header fields at
//! slightly different offsets. The codec never hardcodes an offset; it asks the
//! [`HeaderLayout`] of the declared [`FormatVersion`] instead.
//!
//! All multi-byte fields are little-endian.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two bytes at offsets 2..4 of every genuine cache blob.
pub const MAGIC_MARKER: [u8; 2] = [0xDE, 0xC0];

/// Blobs shorter than this are never recognized.
pub const MIN_RECOGNIZABLE_LEN: usize = 4;

/// Largest source-length field, in UTF-16 units, a blob may declare before
/// a placeholder is built for it.
pub const MAX_SOURCE_LENGTH: u32 = 1 << 24;

/// Largest blob a compressed input may inflate to.
pub const MAX_INFLATED_LEN: u64 = 256 * 1024 * 1024;

/// Declares which header layout a cache blob uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Oldest layout: source length at 12..16, two build-flag words after it.
    Legacy,
    /// Source length at 8..12, a single build-flag word at 12..16.
    #[default]
    Standard,
    /// Source length at 8..12, build-flag words at 12..16 and 16..20.
    Extended,
}

impl FormatVersion {
    /// Returns the header layout for this format version.
    pub fn layout(self) -> &'static HeaderLayout {
        match self {
            FormatVersion::Legacy => &LEGACY,
            FormatVersion::Standard => &STANDARD,
            FormatVersion::Extended => &EXTENDED,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormatVersion::Legacy => "legacy",
            FormatVersion::Standard => "standard",
            FormatVersion::Extended => "extended",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown format version name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache format version '{0}' (expected legacy, standard, or extended)")]
pub struct ParseFormatVersionError(pub String);

impl FromStr for FormatVersion {
    type Err = ParseFormatVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(FormatVersion::Legacy),
            "standard" => Ok(FormatVersion::Standard),
            "extended" => Ok(FormatVersion::Extended),
            _ => Err(ParseFormatVersionError(s.to_string())),
        }
    }
}

/// Byte ranges of the header fields for one format version.
#[derive(Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    /// The format version this layout describes.
    pub version: FormatVersion,
    /// External-reference-table length (2 bytes).
    pub external_refs: Range<usize>,
    /// Magic marker (2 bytes).
    pub magic: Range<usize>,
    /// Engine line hash. Blobs from another line are structurally incompatible.
    pub version_hash: Range<usize>,
    /// Length of the source the blob was compiled from, in UTF-16 units.
    pub source_length: Range<usize>,
    /// Build-flag words stamped by the producing build.
    pub build_flags: &'static [Range<usize>],
    /// Length of the payload following the header.
    pub payload_length: Range<usize>,
    /// Checksum of the payload.
    pub checksum: Range<usize>,
    /// Total header length; the payload starts here.
    pub header_len: usize,
}

static LEGACY: HeaderLayout = HeaderLayout {
    version: FormatVersion::Legacy,
    external_refs: 0..2,
    magic: 2..4,
    version_hash: 4..8,
    source_length: 12..16,
    build_flags: &[16..20, 20..24],
    payload_length: 24..28,
    checksum: 28..32,
    header_len: 32,
};

static STANDARD: HeaderLayout = HeaderLayout {
    version: FormatVersion::Standard,
    external_refs: 0..2,
    magic: 2..4,
    version_hash: 4..8,
    source_length: 8..12,
    build_flags: &[12..16],
    payload_length: 16..20,
    checksum: 20..24,
    header_len: 24,
};

static EXTENDED: HeaderLayout = HeaderLayout {
    version: FormatVersion::Extended,
    external_refs: 0..2,
    magic: 2..4,
    version_hash: 4..8,
    source_length: 8..12,
    build_flags: &[12..16, 16..20],
    payload_length: 20..24,
    checksum: 24..28,
    header_len: 28,
};

impl HeaderLayout {
    /// Reads a little-endian `u32` field, accumulating `byte[i] * 256^i`.
    ///
    /// Returns `None` if the blob is too short to contain the field.
    pub fn read_u32(blob: &[u8], field: Range<usize>) -> Option<u32> {
        let bytes = blob.get(field)?;
        Some(
            bytes
                .iter()
                .enumerate()
                .fold(0u32, |acc, (power, &b)| acc | (u32::from(b) << (8 * power))),
        )
    }

    /// Writes a little-endian `u32` field in place.
    ///
    /// Returns `false` without writing if the blob is too short.
    pub fn write_u32(blob: &mut [u8], field: Range<usize>, value: u32) -> bool {
        match blob.get_mut(field) {
            Some(slot) if slot.len() == 4 => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_share_the_recognition_prefix() {
        for v in [
            FormatVersion::Legacy,
            FormatVersion::Standard,
            FormatVersion::Extended,
        ] {
            let layout = v.layout();
            assert_eq!(layout.external_refs, 0..2);
            assert_eq!(layout.magic, 2..4);
            assert_eq!(layout.version, v);
        }
    }

    #[test]
    fn standard_offsets() {
        let l = FormatVersion::Standard.layout();
        assert_eq!(l.source_length, 8..12);
        assert_eq!(l.build_flags, &[12..16]);
        assert_eq!(l.header_len, 24);
    }

    #[test]
    fn legacy_and_extended_have_two_flag_words() {
        assert_eq!(FormatVersion::Legacy.layout().build_flags.len(), 2);
        assert_eq!(FormatVersion::Legacy.layout().source_length, 12..16);
        assert_eq!(
            FormatVersion::Extended.layout().build_flags,
            &[12..16, 16..20]
        );
    }

    #[test]
    fn fields_fit_inside_header() {
        for v in [
            FormatVersion::Legacy,
            FormatVersion::Standard,
            FormatVersion::Extended,
        ] {
            let l = v.layout();
            let mut ends = vec![
                l.version_hash.end,
                l.source_length.end,
                l.payload_length.end,
                l.checksum.end,
            ];
            ends.extend(l.build_flags.iter().map(|r| r.end));
            assert!(ends.iter().all(|&e| e <= l.header_len), "{v}");
        }
    }

    #[test]
    fn read_u32_weights_bytes_little_endian() {
        let blob = [0, 0, 0, 0, 0, 0, 0, 0, 0x2a, 0x01, 0x00, 0x00];
        assert_eq!(HeaderLayout::read_u32(&blob, 8..12), Some(0x012a));
        assert_eq!(HeaderLayout::read_u32(&blob, 10..14), None);
    }

    #[test]
    fn write_u32_roundtrip_and_bounds() {
        let mut blob = [0u8; 8];
        assert!(HeaderLayout::write_u32(&mut blob, 4..8, 0xdead_beef));
        assert_eq!(blob[4..8], [0xef, 0xbe, 0xad, 0xde]);
        assert!(!HeaderLayout::write_u32(&mut blob, 6..10, 1));
    }

    #[test]
    fn parse_format_version() {
        assert_eq!(
            "Extended".parse::<FormatVersion>(),
            Ok(FormatVersion::Extended)
        );
        assert!("v9".parse::<FormatVersion>().is_err());
        assert_eq!(FormatVersion::default().to_string(), "standard");
    }

    #[test]
    fn serde_lowercase_names() {
        let json = serde_json::to_string(&FormatVersion::Legacy).unwrap();
        assert_eq!(json, "\"legacy\"");
    }
}
