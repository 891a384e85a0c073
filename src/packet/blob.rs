//! Per-file content encoding: zlib compression followed by standard base64.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use super::DecodeError;

/// Compresses raw file bytes and encodes them as packet-safe text.
pub fn encode_blob(bytes: &[u8]) -> std::io::Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`encode_blob`].
///
/// The zlib stream must run to its end marker and pass its checksum; a
/// truncated or corrupt blob is an error, never a partial result.
pub fn decode_blob(blob: &str) -> Result<Vec<u8>, DecodeError> {
    let compressed = STANDARD
        .decode(blob.trim())
        .map_err(|e| DecodeError::InvalidBlob(format!("invalid base64: {e}")))?;
    inflate(&compressed)
}

/// Compresses an arbitrary buffer with zlib (used for archived packet bodies).
pub fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(compressed.len().saturating_mul(4).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(1024));
        }

        let consumed = inflater.total_in() as usize;
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();

        let status = inflater
            .decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| DecodeError::InvalidBlob(format!("corrupt zlib stream: {e}")))?;

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                let stalled =
                    inflater.total_in() == before_in && inflater.total_out() == before_out;
                if stalled && out.len() < out.capacity() {
                    return Err(DecodeError::InvalidBlob(
                        "truncated zlib stream".to_string(),
                    ));
                }
            }
        }
    }
}
