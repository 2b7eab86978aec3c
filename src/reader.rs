//! Reader implementation for SQZ files
//!
//! The reader offers two ways through a file:
//!
//! * Iteration: [`SqzReader`] is an [`Iterator`] over [`Fragment`]s. Chunks are
//!   decoded lazily, one chunk's worth of fragments at a time. When the data
//!   section ends the reader goes straight on to decode the text blocks, so an
//!   exhausted iterator always leaves the text blocks and the digest populated.
//! * [`SqzReader::fetch_text`]: skips over every data chunk without decrypting
//!   or decompressing it and decodes only the text blocks.
//!
//! Both paths consume every byte of the stream, which keeps the whole-file
//! digest meaningful.
//!
//! Errors met while decoding blocks are not raised through the iterator.
//! They end the iteration and are kept as the reader's
//! [`exception`](SqzReader::exception), so that the header, the fragments of
//! earlier chunks and the partial counts stay available.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::codec::{self, read_frame, read_payload, skip_payload, BlockFrame};
use crate::crypto::BlockCipher;
use crate::digest::{DigestReader, FileDigest};
use crate::envelope::Envelope;
use crate::error::{AuthError, DecodeError, Error, Result};
use crate::header::SqzHeader;
use crate::record::Fragment;

/// Options controlling how a file is decoded
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Strip the comment of every read as it is yielded
    pub ignore_comments: bool,
    /// Password of encrypted files
    pub password: Option<String>,
}
impl ReaderOptions {
    #[must_use]
    pub fn ignore_comments(mut self, ignore: bool) -> Self {
        self.ignore_comments = ignore;
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Text blocks of a file, in the order they were written
///
/// Names may repeat. [`get`](Self::get) and [`to_map`](Self::to_map) resolve
/// duplicates to the payload written last, while [`iter`](Self::iter) and
/// [`names`](Self::names) keep every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBlocks {
    blocks: Vec<(String, Vec<u8>)>,
}
impl TextBlocks {
    pub(crate) fn push(&mut self, name: String, payload: Vec<u8>) {
        self.blocks.push((name, payload));
    }

    /// Names in write order, duplicates included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|(name, _)| name.as_str())
    }

    /// Payload written last under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.blocks
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.blocks
            .iter()
            .map(|(name, payload)| (name.as_str(), payload.as_slice()))
    }

    /// Name to payload map, last write wins
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Vec<u8>> {
        self.blocks.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Inside the data section
    Data,
    /// Inside the text section
    Text,
    /// End marker consumed
    Done,
    /// Stopped on a captured error
    Failed,
}

/// Reader for SQZ files
///
/// # Example
///
/// ```rust
/// use sqz::{FastqRead, Fragment, ReaderOptions, SqzReader, SqzWriterBuilder};
///
/// let mut buffer = Vec::new();
/// let mut writer = SqzWriterBuilder::default().build(&mut buffer).unwrap();
/// writer
///     .write_fragment(&Fragment::single(FastqRead::new("r1", "ACGT", "IIII", None)))
///     .unwrap();
/// writer.write_text("meta", "annotation").unwrap();
/// writer.finish().unwrap();
/// drop(writer);
///
/// let mut reader = SqzReader::new(buffer.as_slice(), ReaderOptions::default()).unwrap();
/// let texts = reader.fetch_text();
/// assert_eq!(texts.get("meta"), Some(&b"annotation"[..]));
/// assert!(reader.digest().is_some());
/// ```
pub struct SqzReader<R: Read> {
    /// Digesting wrapper around the source
    inner: DigestReader<R>,

    header: SqzHeader,

    ignore_comments: bool,
    password: Option<Zeroizing<String>>,

    /// Block transform, built when the first block is opened
    envelope: Option<Envelope>,

    /// Raw payload of the last opened block
    rbuf: Vec<u8>,

    /// Decoded fragments of the current chunk
    buffer: VecDeque<Fragment>,

    state: State,

    /// Index of the next block (chunks and texts)
    block_index: usize,

    chunk_count: usize,
    fragment_count: u64,
    texts: TextBlocks,
    exception: Option<Error>,
    digest: Option<FileDigest>,
}
impl<R: Read> SqzReader<R> {
    /// Parses the header of `source`
    ///
    /// An absent password is not an error here even when the file is
    /// encrypted: the key is only needed once the first block is opened.
    ///
    /// # Errors
    ///
    /// * `HeaderError` - The source is not an SQZ file or its version is unsupported
    /// * `Error::IoError` - The source could not be read
    pub fn new(source: R, options: ReaderOptions) -> Result<Self> {
        let mut inner = DigestReader::new(source);
        let header = SqzHeader::from_reader(&mut inner)?;
        info!(
            major = header.major,
            minor = header.minor,
            fragment_width = header.fragment_width,
            compression = %header.compression,
            encrypted = header.is_encrypted(),
            comments = header.has_comments,
            "opened sqz file"
        );
        Ok(Self {
            inner,
            header,
            ignore_comments: options.ignore_comments,
            password: options.password.map(Zeroizing::new),
            envelope: None,
            rbuf: Vec::new(),
            buffer: VecDeque::new(),
            state: State::Data,
            block_index: 0,
            chunk_count: 0,
            fragment_count: 0,
            texts: TextBlocks::default(),
            exception: None,
            digest: None,
        })
    }

    #[must_use]
    pub fn header(&self) -> SqzHeader {
        self.header
    }

    /// Builds the block transform, deriving the key if the file is encrypted
    fn make_envelope(&self) -> Result<Envelope> {
        let cipher = match &self.header.encryption {
            Some(info) => {
                let password = self.password.as_ref().ok_or(AuthError::MissingPassword)?;
                Some(BlockCipher::derive(password, info))
            }
            None => None,
        };
        Ok(Envelope::new(self.header.compression, cipher))
    }

    /// Opens the next block's payload into `rbuf`
    fn open_block(&mut self, payload: &[u8]) -> Result<()> {
        let index = self.block_index;
        self.block_index += 1;
        let envelope = match self.envelope.take() {
            Some(envelope) => envelope,
            None => self.make_envelope()?,
        };
        let opened = envelope.open(index, payload, &mut self.rbuf);
        self.envelope = Some(envelope);
        opened
    }

    fn decode_chunk(&mut self, len: u64) -> Result<()> {
        let payload = read_payload(&mut self.inner, len)?;
        self.open_block(&payload)?;
        let n_fragments = codec::decode_chunk(
            &self.rbuf,
            self.header.fragment_width,
            self.header.has_comments,
            &mut self.buffer,
        )?;
        debug!(
            chunk = self.chunk_count,
            fragments = n_fragments,
            bytes = len,
            "decoded chunk"
        );
        self.chunk_count += 1;
        Ok(())
    }

    fn decode_text(&mut self, name: String, len: u64) -> Result<()> {
        let payload = read_payload(&mut self.inner, len)?;
        self.open_block(&payload)?;
        debug!(name = %name, bytes = len, "decoded text block");
        self.texts.push(name, std::mem::take(&mut self.rbuf));
        Ok(())
    }

    /// Decodes text blocks up to and including the end marker
    fn read_text_section(&mut self) -> Result<()> {
        self.state = State::Text;
        loop {
            let pos = self.inner.count();
            match read_frame(&mut self.inner)? {
                BlockFrame::Text { name, len } => self.decode_text(name, len)?,
                BlockFrame::Chunk { .. } => return Err(DecodeError::ChunkAfterText(pos).into()),
                BlockFrame::End => return self.finish_stream(),
            }
        }
    }

    fn finish_stream(&mut self) -> Result<()> {
        codec::expect_eof(&mut self.inner)?;
        let digest = self.inner.finalize();
        self.digest = Some(digest);
        self.state = State::Done;
        info!(
            chunks = self.chunk_count,
            texts = self.texts.len(),
            bytes = self.inner.count(),
            digest = %hex::encode(digest),
            "reached end of sqz file"
        );
        Ok(())
    }

    /// Decodes the next chunk into the fragment buffer
    ///
    /// Returns `false` once the data section is over, in which case the rest
    /// of the stream has been consumed.
    fn fill_buffer(&mut self) -> Result<bool> {
        loop {
            match self.state {
                State::Done | State::Failed => return Ok(false),
                State::Text => {
                    self.read_text_section()?;
                    return Ok(false);
                }
                State::Data => match read_frame(&mut self.inner)? {
                    BlockFrame::Chunk { len } => {
                        self.decode_chunk(len)?;
                        if !self.buffer.is_empty() {
                            return Ok(true);
                        }
                    }
                    BlockFrame::Text { name, len } => {
                        self.state = State::Text;
                        self.decode_text(name, len)?;
                    }
                    BlockFrame::End => {
                        self.finish_stream()?;
                        return Ok(false);
                    }
                },
            }
        }
    }

    /// Consumes the rest of the stream, skipping data chunk payloads
    fn skip_to_end(&mut self) -> Result<()> {
        self.buffer.clear();
        loop {
            match self.state {
                State::Done | State::Failed => return Ok(()),
                State::Text => return self.read_text_section(),
                State::Data => match read_frame(&mut self.inner)? {
                    BlockFrame::Chunk { len } => {
                        skip_payload(&mut self.inner, len)?;
                        debug!(chunk = self.chunk_count, bytes = len, "skipped chunk");
                        self.block_index += 1;
                        self.chunk_count += 1;
                    }
                    BlockFrame::Text { name, len } => {
                        self.state = State::Text;
                        self.decode_text(name, len)?;
                    }
                    BlockFrame::End => return self.finish_stream(),
                },
            }
        }
    }

    fn fail(&mut self, error: Error) {
        warn!(error = %error, "stopped reading sqz file");
        self.buffer.clear();
        self.exception = Some(error);
        self.state = State::Failed;
    }

    /// Reads every text block without decoding the data chunks
    ///
    /// Fragments still buffered from a partial iteration are discarded. Errors
    /// are captured as the [`exception`](Self::exception); the returned
    /// blocks are those decoded before the error.
    pub fn fetch_text(&mut self) -> &TextBlocks {
        if let Err(e) = self.skip_to_end() {
            self.fail(e);
        }
        &self.texts
    }

    /// The error that ended reading, if any
    #[must_use]
    pub fn exception(&self) -> Option<&Error> {
        self.exception.as_ref()
    }

    /// Moves the captured error out of the reader
    pub fn take_exception(&mut self) -> Option<Error> {
        self.exception.take()
    }

    /// Whether no further fragments will be produced
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Whole-file digest, available once the end marker was consumed
    #[must_use]
    pub fn digest(&self) -> Option<FileDigest> {
        self.digest
    }

    /// Text block names in write order
    #[must_use]
    pub fn text_names(&self) -> Vec<&str> {
        self.texts.names().collect()
    }

    /// Payload written last under `name`
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&[u8]> {
        self.texts.get(name)
    }

    #[must_use]
    pub fn texts(&self) -> &TextBlocks {
        &self.texts
    }

    /// Number of data chunks seen so far (decoded or skipped)
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of fragments yielded so far
    #[must_use]
    pub fn fragment_count(&self) -> u64 {
        self.fragment_count
    }

    /// Number of reads yielded so far
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.fragment_count * u64::from(self.header.fragment_width)
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
impl SqzReader<BufReader<File>> {
    /// Opens the file at `path`
    pub fn open<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), options)
    }
}
impl<R: Read> Iterator for SqzReader<R> {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        loop {
            if let Some(mut fragment) = self.buffer.pop_front() {
                if self.ignore_comments {
                    fragment.strip_comments();
                }
                self.fragment_count += 1;
                return Some(fragment);
            }
            match self.fill_buffer() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.fail(e);
                    return None;
                }
            }
        }
    }
}
