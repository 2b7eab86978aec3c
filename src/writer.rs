//! Writer implementation for SQZ files
//!
//! Fragments are accumulated into an in-memory chunk body. Once the body holds
//! `chunk_size` fragments it is sealed (compressed, checked and optionally
//! encrypted), framed and written. Text blocks are sealed when they are added
//! and written after the last data chunk when the writer is finished.
//!
//! Every byte crosses a [`DigestWriter`], so the whole-file digest is known as
//! soon as [`SqzWriter::finish`] returns.
//!
//! ## Example
//!
//! ```rust
//! use sqz::{FastqRead, Fragment, SqzReader, SqzWriterBuilder, ReaderOptions};
//!
//! let mut buffer = Vec::new();
//! let mut writer = SqzWriterBuilder::default()
//!     .chunk_size(2)
//!     .build(&mut buffer)
//!     .unwrap();
//!
//! let read = FastqRead::new("r1", "ACGT", "IIII", None);
//! writer.write_fragment(&Fragment::single(read)).unwrap();
//! writer.write_text("meta", b"{\"version\":\"1\"}").unwrap();
//! writer.finish().unwrap();
//! assert_eq!(writer.chunk_count(), 1);
//! drop(writer);
//!
//! let mut reader = SqzReader::new(buffer.as_slice(), ReaderOptions::default()).unwrap();
//! assert_eq!(reader.by_ref().count(), 1);
//! assert!(reader.exception().is_none());
//! ```

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec::{write_chunk_frame, write_end_marker, write_text_frame, ChunkEncoder};
use crate::crypto::{random_salt, BlockCipher, DEFAULT_KDF_ROUNDS};
use crate::digest::{DigestWriter, FileDigest};
use crate::envelope::Envelope;
use crate::error::{Result, WriteError};
use crate::header::{Compression, Encryption, EncryptionInfo, SqzHeader, MAX_KDF_ROUNDS};
use crate::record::{FastqRead, Fragment};

/// Default number of fragments per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// A builder for creating configured [`SqzWriter`] instances
///
/// Every option has a default, so `SqzWriterBuilder::default().build(sink)`
/// produces a single-end, deflate compressed, unencrypted writer.
///
/// # Example
///
/// ```rust
/// use sqz::{Compression, SqzWriterBuilder};
///
/// let writer = SqzWriterBuilder::default()
///     .fragment_width(2)
///     .compression(Compression::Bzip2)
///     .password("hunter2")
///     .kdf_rounds(1024)
///     .comments(true)
///     .build(Vec::new())
///     .unwrap();
/// assert!(writer.header().is_encrypted());
/// ```
#[derive(Default, Clone)]
pub struct SqzWriterBuilder {
    fragment_width: Option<u32>,
    compression: Option<Compression>,
    encryption: Option<Encryption>,
    password: Option<String>,
    kdf_rounds: Option<u32>,
    chunk_size: Option<usize>,
    comments: Option<bool>,
    colorspace: Option<bool>,
    timestamp: Option<u64>,
    force: Option<bool>,
}
impl SqzWriterBuilder {
    /// Number of reads per fragment (one per paired input source)
    #[must_use]
    pub fn fragment_width(mut self, width: u32) -> Self {
        self.fragment_width = Some(width);
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Cipher strength; requires a [`password`](Self::password)
    #[must_use]
    pub fn encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Enables encryption, with AES-128 unless another algorithm is chosen
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// PBKDF2 iteration count stored in the header
    #[must_use]
    pub fn kdf_rounds(mut self, rounds: u32) -> Self {
        self.kdf_rounds = Some(rounds);
        self
    }

    /// Maximum number of fragments per chunk
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Whether read comments are stored
    #[must_use]
    pub fn comments(mut self, comments: bool) -> Self {
        self.comments = Some(comments);
        self
    }

    #[must_use]
    pub fn colorspace(mut self, colorspace: bool) -> Self {
        self.colorspace = Some(colorspace);
        self
    }

    /// Overrides the creation timestamp (unix seconds)
    #[must_use]
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Allows [`create`](Self::create) to overwrite an existing file
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    /// Builds the header described by this configuration
    fn header(&self) -> Result<SqzHeader> {
        let width = self.fragment_width.unwrap_or(1);
        if width == 0 {
            return Err(WriteError::InvalidFragmentWidth(width).into());
        }
        let mut header = SqzHeader::new(width, self.compression.unwrap_or_default());
        header.has_comments = self.comments.unwrap_or(false);
        header.colorspace = self.colorspace.unwrap_or(false);
        if let Some(timestamp) = self.timestamp {
            header.timestamp = timestamp;
        }
        let rounds = self.kdf_rounds.unwrap_or(DEFAULT_KDF_ROUNDS);
        if !(1..=MAX_KDF_ROUNDS).contains(&rounds) {
            return Err(WriteError::InvalidKdfRounds(rounds).into());
        }
        header.encryption = match (self.encryption, &self.password) {
            (Some(_), None) => return Err(WriteError::MissingPassword.into()),
            (algorithm, Some(_)) => Some(EncryptionInfo {
                algorithm: algorithm.unwrap_or_default(),
                salt: random_salt(),
                rounds,
            }),
            (None, None) => None,
        };
        Ok(header)
    }

    /// Creates a writer over `inner` and writes the header
    ///
    /// # Errors
    ///
    /// * `WriteError::InvalidChunkSize` / `InvalidFragmentWidth` - A zero size was configured
    /// * `WriteError::MissingPassword` - Encryption was requested without a password
    /// * `WriteError::InvalidKdfRounds` - Rounds outside `1..=MAX_KDF_ROUNDS`
    /// * `Error::IoError` - The header could not be written
    pub fn build<W: Write>(self, inner: W) -> Result<SqzWriter<W>> {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(WriteError::InvalidChunkSize(chunk_size).into());
        }
        let header = self.header()?;
        let cipher = match (&header.encryption, &self.password) {
            (Some(info), Some(password)) => Some(BlockCipher::derive(password, info)),
            _ => None,
        };
        SqzWriter::new(inner, header, Envelope::new(header.compression, cipher), chunk_size)
    }

    /// Creates the file at `path` and a buffered writer over it
    ///
    /// The configuration is validated before the file is touched.
    ///
    /// # Errors
    ///
    /// * `WriteError::OutputExists` - The path exists and `force` was not set
    /// * Any error of [`build`](Self::build)
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<SqzWriter<BufWriter<File>>> {
        let path = path.as_ref();
        if self.chunk_size == Some(0) {
            return Err(WriteError::InvalidChunkSize(0).into());
        }
        self.header()?;

        let file = if self.force.unwrap_or(false) {
            File::create(path)?
        } else {
            match File::options().write(true).create_new(true).open(path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(WriteError::OutputExists(path.to_path_buf()).into())
                }
                Err(e) => return Err(e.into()),
            }
        };
        debug!(path = %path.display(), "created output file");
        self.build(BufWriter::new(file))
    }
}

/// Writer for SQZ files
///
/// The writer owns its sink for its whole lifetime. Dropping an unfinished
/// writer finishes it; errors raised at that point can only be logged, so
/// callers who care should call [`finish`](Self::finish) themselves.
pub struct SqzWriter<W: Write> {
    /// Digesting wrapper around the sink
    inner: DigestWriter<W>,

    header: SqzHeader,

    /// Block transform (compression, check, encryption)
    envelope: Envelope,

    /// Raw body of the chunk being filled
    chunk: ChunkEncoder,

    /// Fragments per chunk
    chunk_size: usize,

    /// Sealed text blocks awaiting the end of the data section
    texts: Vec<(String, Vec<u8>)>,

    chunk_count: usize,
    fragment_count: u64,
    finished: bool,
    digest: Option<FileDigest>,
}
impl<W: Write> SqzWriter<W> {
    fn new(inner: W, header: SqzHeader, envelope: Envelope, chunk_size: usize) -> Result<Self> {
        let mut writer = Self {
            inner: DigestWriter::new(inner),
            header,
            envelope,
            chunk: ChunkEncoder::new(header.has_comments),
            chunk_size,
            texts: Vec::new(),
            chunk_count: 0,
            fragment_count: 0,
            finished: false,
            digest: None,
        };
        writer.init()?;
        Ok(writer)
    }

    fn init(&mut self) -> Result<()> {
        self.header.write_bytes(&mut self.inner)?;
        debug!(
            fragment_width = self.header.fragment_width,
            compression = %self.header.compression,
            encrypted = self.header.is_encrypted(),
            chunk_size = self.chunk_size,
            "wrote header"
        );
        Ok(())
    }

    #[must_use]
    pub fn header(&self) -> SqzHeader {
        self.header
    }

    /// Appends a fragment to the current chunk
    ///
    /// The chunk is sealed and written once it holds `chunk_size` fragments.
    ///
    /// # Errors
    ///
    /// * `WriteError::WriterFinished` - The writer was already finished
    /// * `WriteError::FragmentWidthMismatch` - The fragment does not hold exactly N reads
    /// * `WriteError::FieldTooLong` - A field exceeds its length prefix
    pub fn write_fragment(&mut self, fragment: &Fragment) -> Result<()> {
        self.write_reads(fragment.reads())
    }

    /// Appends the reads of one fragment, in source order
    pub fn write_reads(&mut self, reads: &[FastqRead]) -> Result<()> {
        if self.finished {
            return Err(WriteError::WriterFinished.into());
        }
        if reads.len() != self.header.fragment_width as usize {
            return Err(WriteError::FragmentWidthMismatch {
                expected: self.header.fragment_width,
                got: reads.len(),
            }
            .into());
        }
        self.chunk.push(reads)?;
        self.fragment_count += 1;
        if self.chunk.n_fragments() >= self.chunk_size {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Seals and writes the pending chunk, if any
    fn flush_chunk(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        let n_fragments = self.chunk.n_fragments();
        let payload = self.envelope.seal(self.chunk.body())?;
        write_chunk_frame(&mut self.inner, &payload)?;
        self.chunk.clear();
        debug!(
            chunk = self.chunk_count,
            fragments = n_fragments,
            bytes = payload.len(),
            "wrote chunk"
        );
        self.chunk_count += 1;
        Ok(())
    }

    /// Attaches a named annotation
    ///
    /// The payload goes through the same envelope as the data chunks. It is
    /// stored after the last chunk regardless of when it was added.
    ///
    /// # Errors
    ///
    /// * `WriteError::WriterFinished` - The writer was already finished
    /// * `WriteError::TextNameTooLong` - The name exceeds 65535 bytes
    pub fn write_text(&mut self, name: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        if self.finished {
            return Err(WriteError::WriterFinished.into());
        }
        if u16::try_from(name.len()).is_err() {
            return Err(WriteError::TextNameTooLong(name.len()).into());
        }
        let sealed = self.envelope.seal(payload.as_ref())?;
        self.texts.push((name.to_string(), sealed));
        Ok(())
    }

    /// Attaches the full contents of `reader` as a named annotation
    pub fn write_text_from_reader<R: Read>(&mut self, name: &str, mut reader: R) -> Result<()> {
        if self.finished {
            return Err(WriteError::WriterFinished.into());
        }
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        self.write_text(name, payload)
    }

    /// Flushes the pending chunk, writes the text blocks and the end marker
    ///
    /// Calling `finish` on a finished writer does nothing. No fragments or
    /// texts can be added afterwards.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.flush_chunk()?;
        for (name, sealed) in std::mem::take(&mut self.texts) {
            write_text_frame(&mut self.inner, &name, &sealed)?;
            debug!(name = %name, bytes = sealed.len(), "wrote text block");
        }
        write_end_marker(&mut self.inner)?;
        self.inner.flush()?;

        let digest = self.inner.finalize();
        self.digest = Some(digest);
        info!(
            chunks = self.chunk_count,
            fragments = self.fragment_count,
            bytes = self.inner.count(),
            digest = %hex::encode(digest),
            "finished sqz file"
        );
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of chunks written so far
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of fragments accepted so far, including the pending chunk
    #[must_use]
    pub fn fragment_count(&self) -> u64 {
        self.fragment_count
    }

    /// Number of physical bytes written so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.inner.count()
    }

    /// Whole-file digest, available once the writer is finished
    #[must_use]
    pub fn digest(&self) -> Option<FileDigest> {
        self.digest
    }

    #[must_use]
    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}
impl<W: Write> Drop for SqzWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish() {
                warn!(error = %e, "failed to finish sqz writer on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_frame, BlockFrame};
    use crate::digest::DigestReader;
    use crate::header::SIZE_HEADER;

    fn read(name: &str) -> FastqRead {
        FastqRead::new(name, "ACGTN", "IIII#", None)
    }

    fn frames(bytes: &[u8]) -> anyhow::Result<Vec<BlockFrame>> {
        let mut reader = DigestReader::new(&bytes[SIZE_HEADER..]);
        let mut frames = Vec::new();
        loop {
            let frame = read_frame(&mut reader)?;
            match &frame {
                BlockFrame::Chunk { len } | BlockFrame::Text { len, .. } => {
                    reader.skip(*len)?;
                }
                BlockFrame::End => {
                    frames.push(frame);
                    return Ok(frames);
                }
            }
            frames.push(frame);
        }
    }

    #[test]
    fn test_chunking_and_text_placement() -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        let mut writer = SqzWriterBuilder::default()
            .chunk_size(2)
            .build(&mut buffer)?;
        writer.write_text("early", b"added first")?;
        for name in ["a", "b", "c"] {
            writer.write_fragment(&Fragment::single(read(name)))?;
        }
        assert_eq!(writer.chunk_count(), 1);
        writer.finish()?;
        assert_eq!(writer.chunk_count(), 2);
        assert_eq!(writer.fragment_count(), 3);
        assert!(writer.digest().is_some());
        let written = writer.bytes_written();
        drop(writer);
        assert_eq!(written, buffer.len() as u64);

        let frames = frames(&buffer)?;
        assert_eq!(frames.len(), 4);
        assert!(matches!(frames[0], BlockFrame::Chunk { .. }));
        assert!(matches!(frames[1], BlockFrame::Chunk { .. }));
        assert!(matches!(&frames[2], BlockFrame::Text { name, .. } if name == "early"));
        assert_eq!(frames[3], BlockFrame::End);
        Ok(())
    }

    #[test]
    fn test_fragment_width_mismatch_has_no_side_effect() -> anyhow::Result<()> {
        let mut writer = SqzWriterBuilder::default()
            .fragment_width(2)
            .build(Vec::new())?;
        let err = writer
            .write_fragment(&Fragment::single(read("a")))
            .unwrap_err();
        assert!(err.is_argument());
        assert_eq!(writer.fragment_count(), 0);

        writer.write_reads(&[read("a"), read("a")])?;
        assert_eq!(writer.fragment_count(), 1);
        Ok(())
    }

    #[test]
    fn test_writes_after_finish_are_rejected() -> anyhow::Result<()> {
        let mut writer = SqzWriterBuilder::default().build(Vec::new())?;
        writer.finish()?;
        let len = writer.bytes_written();
        assert!(writer
            .write_fragment(&Fragment::single(read("a")))
            .unwrap_err()
            .is_argument());
        assert!(writer.write_text("x", b"y").unwrap_err().is_argument());
        writer.finish()?;
        assert_eq!(writer.bytes_written(), len);
        Ok(())
    }

    #[test]
    fn test_invalid_configuration() {
        let err = SqzWriterBuilder::default()
            .chunk_size(0)
            .build(Vec::new())
            .err()
            .unwrap();
        assert!(err.is_argument());

        let err = SqzWriterBuilder::default()
            .fragment_width(0)
            .build(Vec::new())
            .err()
            .unwrap();
        assert!(err.is_argument());

        let err = SqzWriterBuilder::default()
            .encryption(Encryption::Aes256)
            .build(Vec::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::MissingPassword)
        ));
    }

    #[test]
    fn test_kdf_rounds_bounds() {
        for rounds in [0, MAX_KDF_ROUNDS + 1] {
            let err = SqzWriterBuilder::default()
                .password("pw")
                .kdf_rounds(rounds)
                .build(Vec::new())
                .err()
                .unwrap();
            assert!(matches!(
                err,
                crate::Error::WriteError(WriteError::InvalidKdfRounds(r)) if r == rounds
            ));
        }
    }

    #[test]
    fn test_password_selects_aes128() -> anyhow::Result<()> {
        let writer = SqzWriterBuilder::default()
            .password("pw")
            .kdf_rounds(4)
            .build(Vec::new())?;
        let info = writer.header().encryption.unwrap();
        assert_eq!(info.algorithm, Encryption::Aes128);
        assert_eq!(info.rounds, 4);
        Ok(())
    }

    #[test]
    fn test_empty_file_layout() -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        SqzWriterBuilder::default()
            .timestamp(7)
            .build(&mut buffer)?
            .finish()?;
        assert_eq!(buffer.len(), SIZE_HEADER + 1);
        assert_eq!(buffer[SIZE_HEADER], crate::codec::TAG_END);
        assert_eq!(SqzHeader::from_bytes(buffer[..SIZE_HEADER].try_into()?)?.timestamp, 7);
        Ok(())
    }

    #[test]
    fn test_drop_finishes() -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        {
            let mut writer = SqzWriterBuilder::default().build(&mut buffer)?;
            writer.write_fragment(&Fragment::single(read("a")))?;
        }
        let frames = frames(&buffer)?;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], BlockFrame::End);
        Ok(())
    }

    #[test]
    fn test_create_respects_force() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reads.sqz");

        SqzWriterBuilder::default().create(&path)?.finish()?;
        let err = SqzWriterBuilder::default().create(&path).err().unwrap();
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::OutputExists(_))
        ));

        let mut writer = SqzWriterBuilder::default().force(true).create(&path)?;
        writer.write_fragment(&Fragment::single(read("a")))?;
        writer.finish()?;
        drop(writer);
        assert!(std::fs::metadata(&path)?.len() > (SIZE_HEADER + 1) as u64);
        Ok(())
    }
}
