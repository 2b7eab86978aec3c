//! Reversible compression strategies for chunk and text payloads
//!
//! The strategy is chosen once per file through the header's compression code.
//! Every variant round-trips exactly, including the empty block.

use std::io::{Read, Write};

use bzip2::{read::BzDecoder, write::BzEncoder};
use flate2::{write::ZlibEncoder, Decompress, FlushDecompress, Status};

use crate::header::Compression;

/// Deflate level used by the writer
const DEFLATE_LEVEL: u32 = 6;

/// bzip2 block size (in 100k units)
const BZIP2_LEVEL: u32 = 9;

impl Compression {
    /// Compresses `raw` into `out`
    ///
    /// `out` is cleared first.
    pub fn compress(self, raw: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
        out.clear();
        match self {
            Self::None => out.extend_from_slice(raw),
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(out, flate2::Compression::new(DEFLATE_LEVEL));
                encoder.write_all(raw)?;
                encoder.finish()?;
            }
            Self::Bzip2 => {
                let mut encoder = BzEncoder::new(out, bzip2::Compression::new(BZIP2_LEVEL));
                encoder.write_all(raw)?;
                encoder.finish()?;
            }
        }
        Ok(())
    }

    /// Decompresses `bytes` into `out`
    ///
    /// `out` is cleared first. Malformed or truncated input is an error and
    /// never yields a partial block.
    pub fn decompress(self, bytes: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
        out.clear();
        match self {
            Self::None => out.extend_from_slice(bytes),
            Self::Deflate => inflate(bytes, out)?,
            Self::Bzip2 => {
                let mut decoder = BzDecoder::new(bytes);
                decoder.read_to_end(out)?;
                ensure_consumed(decoder.total_in(), bytes.len())?;
            }
        }
        Ok(())
    }
}

/// Inflates a zlib stream, requiring it to reach its end marker
///
/// The streaming `read` decoders of flate2 report a truncated stream as a
/// clean EOF, so this drives the decompressor directly.
fn inflate(bytes: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
    let mut inflater = Decompress::new(true);
    out.reserve(bytes.len().saturating_mul(3).max(1024));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(1024));
        }
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let consumed = in_before as usize;
        let status = inflater.decompress_vec(&bytes[consumed..], out, FlushDecompress::None)?;
        if status == Status::StreamEnd {
            break;
        }
        let stalled = inflater.total_in() == in_before && inflater.total_out() == out_before;
        if stalled && out.len() < out.capacity() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "deflate stream ended before its end marker",
            ));
        }
    }
    ensure_consumed(inflater.total_in(), bytes.len())
}

/// A compressed stream must span the whole block
fn ensure_consumed(total_in: u64, len: usize) -> std::io::Result<()> {
    if total_in == len as u64 {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("compressed stream ended after {total_in} of {len} bytes"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Compression; 3] = [Compression::None, Compression::Deflate, Compression::Bzip2];

    #[test]
    fn test_round_trip_including_empty() -> anyhow::Result<()> {
        let payloads: [&[u8]; 3] = [b"", b"A", &[b'G'; 10_000]];
        let mut packed = Vec::new();
        let mut unpacked = Vec::new();
        for compression in ALL {
            for payload in payloads {
                compression.compress(payload, &mut packed)?;
                compression.decompress(&packed, &mut unpacked)?;
                assert_eq!(unpacked, payload, "{compression}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_compression_shrinks_repetitive_input() -> anyhow::Result<()> {
        let payload = b"ACGT".repeat(4096);
        let mut packed = Vec::new();
        for compression in [Compression::Deflate, Compression::Bzip2] {
            compression.compress(&payload, &mut packed)?;
            assert!(packed.len() < payload.len() / 10, "{compression}");
        }
        Ok(())
    }

    #[test]
    fn test_malformed_input_is_rejected() -> anyhow::Result<()> {
        let payload = b"ACGTTGCA".repeat(512);
        let mut packed = Vec::new();
        let mut unpacked = Vec::new();
        for compression in [Compression::Deflate, Compression::Bzip2] {
            compression.compress(&payload, &mut packed)?;

            // truncated
            let truncated = &packed[..packed.len() / 2];
            assert!(compression.decompress(truncated, &mut unpacked).is_err());

            // garbage
            assert!(compression
                .decompress(b"definitely not compressed", &mut unpacked)
                .is_err());
        }
        Ok(())
    }
}
