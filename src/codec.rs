//! # Container framing
//!
//! After the [file header](crate::SqzHeader) an SQZ file is a sequence of
//! tagged, length-prefixed blocks closed by an end marker:
//!
//! ```text
//! ┌────────┬─────────────┬──────────────────────────────┐
//! │ 0x01   │ len: u64    │ chunk payload (len bytes)    │  zero or more
//! ├────────┼─────────────┴──┬──────────┬────────────────┤
//! │ 0x02   │ name len: u16  │ name     │ len: u64 │ ... │  zero or more
//! ├────────┼────────────────┴──────────┴────────────────┤
//! │ 0x00   │                                            │  end marker
//! └────────┴────────────────────────────────────────────┘
//! ```
//!
//! The payload length is known before the payload is touched, which lets a
//! reader either decode a block or skip over it. Payloads are opaque here;
//! compression and encryption are applied by the [`Envelope`](crate::envelope::Envelope).
//!
//! This module also defines the raw (pre-envelope) chunk body: a `u32`
//! fragment count followed by every read of every fragment as `u32`
//! length-prefixed `name`, `sequence`, `quality` and, when the file carries
//! comments, `comment` fields.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::digest::DigestReader;
use crate::error::{DecodeError, Result, WriteError};
use crate::record::{FastqRead, Fragment};

/// Tag of the end marker
pub const TAG_END: u8 = 0x00;

/// Tag of a data chunk
pub const TAG_CHUNK: u8 = 0x01;

/// Tag of a named text block
pub const TAG_TEXT: u8 = 0x02;

/// Parsed block preamble; the payload has not been consumed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFrame {
    Chunk { len: u64 },
    Text { name: String, len: u64 },
    End,
}

pub fn write_chunk_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_u8(TAG_CHUNK)?;
    writer.write_u64::<LittleEndian>(payload.len() as u64)?;
    writer.write_all(payload)?;
    Ok(())
}

pub fn write_text_frame<W: Write>(writer: &mut W, name: &str, payload: &[u8]) -> Result<()> {
    let name_len =
        u16::try_from(name.len()).map_err(|_| WriteError::TextNameTooLong(name.len()))?;
    writer.write_u8(TAG_TEXT)?;
    writer.write_u16::<LittleEndian>(name_len)?;
    writer.write_all(name.as_bytes())?;
    writer.write_u64::<LittleEndian>(payload.len() as u64)?;
    writer.write_all(payload)?;
    Ok(())
}

pub fn write_end_marker<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_u8(TAG_END)?;
    Ok(())
}

/// Maps a premature end of stream onto a decode error at the current position
fn eof_at<R: Read>(reader: &DigestReader<R>, e: std::io::Error) -> crate::Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        DecodeError::UnexpectedEof(reader.count()).into()
    } else {
        e.into()
    }
}

/// Reads the next block preamble
pub fn read_frame<R: Read>(reader: &mut DigestReader<R>) -> Result<BlockFrame> {
    let pos = reader.count();
    let tag = match reader.read_u8() {
        Ok(tag) => tag,
        Err(e) => return Err(eof_at(reader, e)),
    };
    match tag {
        TAG_END => Ok(BlockFrame::End),
        TAG_CHUNK => {
            let len = read_u64(reader)?;
            Ok(BlockFrame::Chunk { len })
        }
        TAG_TEXT => {
            let name_len = match reader.read_u16::<LittleEndian>() {
                Ok(len) => len as usize,
                Err(e) => return Err(eof_at(reader, e)),
            };
            let mut name = vec![0u8; name_len];
            if let Err(e) = reader.read_exact(&mut name) {
                return Err(eof_at(reader, e));
            }
            let name = String::from_utf8(name).map_err(|_| DecodeError::InvalidTextName)?;
            let len = read_u64(reader)?;
            Ok(BlockFrame::Text { name, len })
        }
        _ => Err(DecodeError::UnknownBlockTag(tag, pos).into()),
    }
}

fn read_u64<R: Read>(reader: &mut DigestReader<R>) -> Result<u64> {
    match reader.read_u64::<LittleEndian>() {
        Ok(v) => Ok(v),
        Err(e) => Err(eof_at(reader, e)),
    }
}

/// Reads a payload of `len` bytes
///
/// Memory grows with the bytes actually present, so a corrupt length prefix
/// cannot trigger a huge allocation up front.
pub fn read_payload<R: Read>(reader: &mut DigestReader<R>, len: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    let n = reader.by_ref().take(len).read_to_end(&mut payload)?;
    if n as u64 == len {
        Ok(payload)
    } else {
        Err(DecodeError::UnexpectedEof(reader.count()).into())
    }
}

/// Consumes a payload of `len` bytes without decoding it
pub fn skip_payload<R: Read>(reader: &mut DigestReader<R>, len: u64) -> Result<()> {
    match reader.skip(len) {
        Ok(()) => Ok(()),
        Err(e) => Err(eof_at(reader, e)),
    }
}

/// Requires the stream to be exhausted after the end marker
pub fn expect_eof<R: Read>(reader: &mut DigestReader<R>) -> Result<()> {
    let pos = reader.count();
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(DecodeError::TrailingData(pos).into()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Accumulates fragments into a raw chunk body
///
/// The first four bytes are reserved for the fragment count and patched when
/// the body is taken.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    ubuf: Vec<u8>,
    fragments: usize,
    comments: bool,
}
impl ChunkEncoder {
    #[must_use]
    pub fn new(comments: bool) -> Self {
        let mut encoder = Self {
            ubuf: Vec::new(),
            fragments: 0,
            comments,
        };
        encoder.clear();
        encoder
    }

    #[must_use]
    pub fn n_fragments(&self) -> usize {
        self.fragments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments == 0
    }

    /// Appends a fragment; on error the body is left as it was
    pub fn push(&mut self, reads: &[FastqRead]) -> Result<()> {
        let mark = self.ubuf.len();
        if let Err(e) = self.push_reads(reads) {
            self.ubuf.truncate(mark);
            return Err(e);
        }
        self.fragments += 1;
        Ok(())
    }

    fn push_reads(&mut self, reads: &[FastqRead]) -> Result<()> {
        for read in reads {
            self.write_field(&read.name)?;
            self.write_field(&read.sequence)?;
            self.write_field(&read.quality)?;
            if self.comments {
                self.write_field(read.comment.as_deref().unwrap_or_default())?;
            }
        }
        Ok(())
    }

    fn write_field(&mut self, field: &[u8]) -> Result<()> {
        let len = u32::try_from(field.len()).map_err(|_| WriteError::FieldTooLong(field.len()))?;
        self.ubuf.write_u32::<LittleEndian>(len)?;
        self.ubuf.write_all(field)?;
        Ok(())
    }

    /// Returns the finished body; call [`clear`](Self::clear) before reuse
    pub fn body(&mut self) -> &[u8] {
        LittleEndian::write_u32(&mut self.ubuf[0..4], self.fragments as u32);
        &self.ubuf
    }

    pub fn clear(&mut self) {
        self.ubuf.clear();
        self.ubuf.extend_from_slice(&[0u8; 4]);
        self.fragments = 0;
    }
}

/// Cursor over a raw chunk body
struct BodyCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}
impl<'a> BodyCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(DecodeError::MalformedChunk(format!(
                "field of {n} bytes overruns body at offset {}",
                self.pos
            ))
            .into()),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn read_field(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Smallest encoding of a read in a chunk body
const MIN_READ_LEN: usize = 12;

/// Decodes a raw chunk body into fragments of `width` reads
///
/// The body must be consumed exactly.
pub fn decode_chunk(
    bytes: &[u8],
    width: u32,
    comments: bool,
    out: &mut VecDeque<Fragment>,
) -> Result<usize> {
    let mut cursor = BodyCursor { bytes, pos: 0 };
    let n_fragments = cursor.read_u32()? as usize;
    // every read takes at least three length prefixes
    let remaining = bytes.len() - cursor.pos;
    let min_len = (n_fragments as u64)
        .saturating_mul(u64::from(width))
        .saturating_mul(MIN_READ_LEN as u64);
    if min_len > remaining as u64 {
        return Err(DecodeError::MalformedChunk(format!(
            "{n_fragments} fragments of {width} reads cannot fit in {remaining} bytes"
        ))
        .into());
    }
    for _ in 0..n_fragments {
        let mut reads = Vec::with_capacity(width as usize);
        for _ in 0..width {
            let name = cursor.read_field()?;
            let sequence = cursor.read_field()?;
            let quality = cursor.read_field()?;
            let comment = if comments {
                Some(cursor.read_field()?)
            } else {
                None
            };
            reads.push(FastqRead::new(name, sequence, quality, comment));
        }
        out.push_back(Fragment::new(reads));
    }
    if cursor.pos != bytes.len() {
        return Err(DecodeError::MalformedChunk(format!(
            "{} trailing bytes after {n_fragments} fragments",
            bytes.len() - cursor.pos
        ))
        .into());
    }
    Ok(n_fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn pair(name: &str, comment: Option<&str>) -> Fragment {
        let comment = comment.map(|c| c.as_bytes().to_vec());
        Fragment::new(vec![
            FastqRead::new(format!("{name}/1"), "ACGT", "IIII", comment.clone()),
            FastqRead::new(format!("{name}/2"), "TTGCA", "#####", comment),
        ])
    }

    #[test]
    fn test_chunk_body() -> anyhow::Result<()> {
        let mut encoder = ChunkEncoder::new(true);
        encoder.push(pair("a", Some("x")).reads())?;
        encoder.push(pair("b", None).reads())?;
        assert_eq!(encoder.n_fragments(), 2);

        let mut out = VecDeque::new();
        let n = decode_chunk(encoder.body(), 2, true, &mut out)?;
        assert_eq!(n, 2);
        assert_eq!(out[0], pair("a", Some("x")));
        assert_eq!(out[1], pair("b", None));

        encoder.clear();
        assert!(encoder.is_empty());
        assert_eq!(encoder.body(), &[0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_comments_not_stored_without_flag() -> anyhow::Result<()> {
        let mut encoder = ChunkEncoder::new(false);
        encoder.push(pair("a", Some("dropped")).reads())?;
        let mut out = VecDeque::new();
        decode_chunk(encoder.body(), 2, false, &mut out)?;
        assert!(out[0].reads().iter().all(|r| r.comment.is_none()));
        Ok(())
    }

    #[test]
    fn test_malformed_body() -> anyhow::Result<()> {
        let mut encoder = ChunkEncoder::new(false);
        encoder.push(pair("a", None).reads())?;
        let body = encoder.body().to_vec();

        // wrong width overruns the body
        let err = decode_chunk(&body, 3, false, &mut VecDeque::new()).unwrap_err();
        assert!(err.is_decode());

        // truncated
        let err = decode_chunk(&body[..body.len() - 1], 2, false, &mut VecDeque::new())
            .unwrap_err();
        assert!(err.is_decode());

        // trailing garbage
        let mut long = body.clone();
        long.push(0);
        let err = decode_chunk(&long, 2, false, &mut VecDeque::new()).unwrap_err();
        assert!(err.is_decode());
        Ok(())
    }

    #[test]
    fn test_fragment_count_bounded_by_body() {
        // one fragment claimed, no read bytes present
        let body = 1u32.to_le_bytes();
        for width in [2, u32::MAX] {
            let err = decode_chunk(&body, width, false, &mut VecDeque::new()).unwrap_err();
            assert!(matches!(
                err,
                Error::DecodeError(DecodeError::MalformedChunk(_))
            ));
        }

        let body = u32::MAX.to_le_bytes();
        let mut out = VecDeque::new();
        assert!(decode_chunk(&body, u32::MAX, true, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_frames() -> anyhow::Result<()> {
        let mut bytes = Vec::new();
        write_chunk_frame(&mut bytes, b"abc")?;
        write_text_frame(&mut bytes, "meta", b"{}")?;
        write_end_marker(&mut bytes)?;

        let mut reader = DigestReader::new(bytes.as_slice());
        assert_eq!(read_frame(&mut reader)?, BlockFrame::Chunk { len: 3 });
        skip_payload(&mut reader, 3)?;
        assert_eq!(
            read_frame(&mut reader)?,
            BlockFrame::Text {
                name: "meta".to_string(),
                len: 2
            }
        );
        assert_eq!(read_payload(&mut reader, 2)?, b"{}");
        assert_eq!(read_frame(&mut reader)?, BlockFrame::End);
        expect_eof(&mut reader)?;
        assert_eq!(reader.count(), bytes.len() as u64);
        Ok(())
    }

    #[test]
    fn test_frame_errors() -> anyhow::Result<()> {
        let mut reader = DigestReader::new(&[0x07u8][..]);
        assert!(matches!(
            read_frame(&mut reader),
            Err(Error::DecodeError(DecodeError::UnknownBlockTag(0x07, 0)))
        ));

        let mut bytes = Vec::new();
        write_chunk_frame(&mut bytes, b"abcdef")?;
        bytes.truncate(bytes.len() - 2);
        let mut reader = DigestReader::new(bytes.as_slice());
        let BlockFrame::Chunk { len } = read_frame(&mut reader)? else {
            panic!("expected chunk frame");
        };
        assert!(read_payload(&mut reader, len).unwrap_err().is_decode());

        let mut reader = DigestReader::new(&[TAG_CHUNK, 1, 2][..]);
        assert!(matches!(
            read_frame(&mut reader),
            Err(Error::DecodeError(DecodeError::UnexpectedEof(_)))
        ));

        let mut reader = DigestReader::new(&[TAG_END, 0xff][..]);
        assert_eq!(read_frame(&mut reader)?, BlockFrame::End);
        assert!(expect_eof(&mut reader).unwrap_err().is_decode());
        Ok(())
    }
}
