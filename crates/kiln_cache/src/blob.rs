//! Raw blob inspection and patching.
//!
//! These functions look only at header bytes. They never decode the payload,
//! which stays opaque to the codec.

use kiln_common::{HeaderLayout, KilnError, KilnResult, MAGIC_MARKER, MIN_RECOGNIZABLE_LEN};
use tracing::trace;

/// Returns `true` if `bytes` looks like an uncompressed cache blob.
///
/// A blob is recognized when it is at least four bytes long, its two-byte
/// external-reference prefix is not zero, and bytes 2..4 hold the magic
/// marker. Recognition says nothing about compatibility.
pub fn recognize(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_RECOGNIZABLE_LEN {
        return false;
    }
    let prefix_nonzero = bytes[0] != 0 || bytes[1] != 0;
    prefix_nonzero && bytes[2..4] == MAGIC_MARKER
}

/// Reads the source-length field of `blob`.
///
/// The field is little-endian: `sum(byte[i] * 256^i)`.
pub fn decode_source_length(blob: &[u8], layout: &HeaderLayout) -> KilnResult<u32> {
    HeaderLayout::read_u32(blob, layout.source_length.clone()).ok_or_else(|| {
        KilnError::invalid_format(format!(
            "blob of {} bytes has no {} source-length field",
            blob.len(),
            layout.version
        ))
    })
}

/// Overwrites every build-flag word of `blob` with the same bytes of
/// `reference`.
///
/// Applying the same reference twice leaves the blob unchanged.
pub fn patch_with(blob: &mut [u8], reference: &[u8], layout: &HeaderLayout) -> KilnResult<()> {
    for range in layout.build_flags {
        let source = reference.get(range.clone()).ok_or_else(|| {
            KilnError::invalid_format("reference blob is shorter than its header")
        })?;
        let target = blob
            .get_mut(range.clone())
            .ok_or_else(|| KilnError::invalid_format("blob is shorter than its header"))?;
        target.copy_from_slice(source);
        trace!(start = range.start, end = range.end, "patched build-flag word");
    }
    Ok(())
}
