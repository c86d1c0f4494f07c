//! Optional gzip transport compression.
//!
//! Compression is chosen at encode time. At decode time it is detected
//! implicitly: bytes that are not a recognizable blob are handed to
//! [`decompress`].

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kiln_common::{KilnError, KilnResult, MAX_INFLATED_LEN};

/// Gzip-compresses `bytes`.
pub fn compress(bytes: &[u8]) -> KilnResult<Vec<u8>> {
    let failed = |e: std::io::Error| KilnError::invalid_format(format!("compression failed: {e}"));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(failed)?;
    encoder.finish().map_err(failed)
}

/// Decompresses gzip `bytes`.
///
/// Input that is not valid gzip, or that inflates past
/// [`MAX_INFLATED_LEN`], fails with `InvalidCacheFormat`.
pub fn decompress(bytes: &[u8]) -> KilnResult<Vec<u8>> {
    decompress_limited(bytes, MAX_INFLATED_LEN)
}

fn decompress_limited(bytes: &[u8], limit: u64) -> KilnResult<Vec<u8>> {
    // One byte past the limit tells an exact fit from an overrun.
    let mut decoder = GzDecoder::new(bytes).take(limit.saturating_add(1));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| KilnError::invalid_format(format!("not a cache blob or gzip stream: {e}")))?;
    if out.len() as u64 > limit {
        return Err(KilnError::invalid_format(format!(
            "compressed blob inflates past {limit} bytes"
        )));
    }
    Ok(out)
}
