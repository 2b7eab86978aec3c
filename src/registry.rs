//! Format registry for generic read sources
//!
//! A multi-format opener peeks at the leading bytes of its input and hands the
//! stream to the highest priority format whose signature matches. Formats are
//! listed in an explicit table of [`FormatEntry`] values; [`Registry::builtin`]
//! contains the SQZ entry.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;

use auto_impl::auto_impl;
use tracing::info;

use crate::error::{Error, HeaderError, Result};
use crate::header::MAGIC;
use crate::reader::{ReaderOptions, SqzReader};
use crate::record::FastqRead;

/// Detection priority of the SQZ format
pub const SQZ_PRIORITY: i32 = 20;

/// A source of individual reads, independent of the container format
#[auto_impl(&mut, Box)]
pub trait ReadSource {
    /// Returns the next read, or `None` once the source is exhausted or failed
    fn next_read(&mut self) -> Option<FastqRead>;

    /// The error that ended the source early, if any
    fn exception(&self) -> Option<&Error>;

    /// Display name of the source
    fn name(&self) -> &str;
}

/// Options handed to a format's opener
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub ignore_comments: bool,
    pub password: Option<String>,
    /// Log the container metadata when opening
    pub verbose: bool,
    /// Display name, defaults to the format name
    pub name: Option<String>,
}

/// Constructor of a read source from a peeked stream
pub type OpenFn = fn(Box<dyn BufRead>, &OpenOptions) -> Result<Box<dyn ReadSource>>;

/// A format known to the registry
#[derive(Clone, Copy)]
pub struct FormatEntry {
    pub name: &'static str,
    /// Leading bytes identifying the format
    pub signature: &'static [u8],
    /// Higher values win when several signatures match
    pub priority: i32,
    pub open: OpenFn,
}
impl FormatEntry {
    #[must_use]
    pub fn matches(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(self.signature)
    }
}
impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

static BUILTIN: &[FormatEntry] = &[FormatEntry {
    name: "sqz",
    signature: &MAGIC,
    priority: SQZ_PRIORITY,
    open: open_sqz,
}];

/// Table of formats consulted by [`Registry::open`]
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<FormatEntry>,
}
impl Registry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry holding the formats of this crate
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.to_vec(),
        }
    }

    pub fn register(&mut self, entry: FormatEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[FormatEntry] {
        &self.entries
    }

    /// Number of leading bytes needed to tell the registered formats apart
    #[must_use]
    pub fn peek_len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.signature.len())
            .max()
            .unwrap_or(0)
    }

    /// Finds the highest priority entry whose signature starts `peeked`
    #[must_use]
    pub fn detect(&self, peeked: &[u8]) -> Option<&FormatEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(peeked))
            .max_by_key(|entry| entry.priority)
    }

    /// Detects the format of `source` and opens it
    ///
    /// Up to [`peek_len`](Self::peek_len) bytes are read, however many reads
    /// the source needs to deliver them, and handed back to the opener in
    /// front of the rest of the stream.
    ///
    /// # Errors
    ///
    /// * `HeaderError::UnknownFormat` - No entry matches
    /// * Any error raised by the format's opener
    pub fn open<R: BufRead + 'static>(
        &self,
        mut source: R,
        options: &OpenOptions,
    ) -> Result<Box<dyn ReadSource>> {
        let mut peeked = Vec::with_capacity(self.peek_len());
        source
            .by_ref()
            .take(self.peek_len() as u64)
            .read_to_end(&mut peeked)?;
        let entry = *self
            .detect(&peeked)
            .ok_or(HeaderError::UnknownFormat)?;
        (entry.open)(Box::new(Cursor::new(peeked).chain(source)), options)
    }

    /// Opens the file at `path`, naming the source after the path
    pub fn open_path<P: AsRef<Path>>(
        &self,
        path: P,
        options: &OpenOptions,
    ) -> Result<Box<dyn ReadSource>> {
        let path = path.as_ref();
        let mut options = options.clone();
        if options.name.is_none() {
            options.name = Some(path.display().to_string());
        }
        self.open(BufReader::new(File::open(path)?), &options)
    }
}

fn open_sqz(source: Box<dyn BufRead>, options: &OpenOptions) -> Result<Box<dyn ReadSource>> {
    let reader_options = ReaderOptions {
        ignore_comments: options.ignore_comments,
        password: options.password.clone(),
    };
    let source = SqzReadSource::new(SqzReader::new(source, reader_options)?, options.name.clone());
    if options.verbose {
        let header = source.reader().header();
        info!(
            name = source.name(),
            version = %format!("{}.{}", header.major, header.minor),
            fragment_width = header.fragment_width,
            comments = header.has_comments,
            colorspace = header.colorspace,
            compression = %header.compression,
            encryption = %header
                .encryption
                .map_or_else(|| "none".to_string(), |info| info.algorithm.to_string()),
            created = %header
                .created()
                .map_or_else(|| "unknown".to_string(), |date| date.to_rfc3339()),
            "sqz metadata"
        );
    }
    Ok(Box::new(source))
}

/// Flattens the fragments of an [`SqzReader`] into single reads
pub struct SqzReadSource<R: Read> {
    reader: SqzReader<R>,
    pending: VecDeque<FastqRead>,
    name: String,
}
impl<R: Read> SqzReadSource<R> {
    pub fn new(reader: SqzReader<R>, name: Option<String>) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            name: name.unwrap_or_else(|| "sqz".to_string()),
        }
    }

    pub fn reader(&self) -> &SqzReader<R> {
        &self.reader
    }

    pub fn into_reader(self) -> SqzReader<R> {
        self.reader
    }
}
impl<R: Read> ReadSource for SqzReadSource<R> {
    fn next_read(&mut self) -> Option<FastqRead> {
        loop {
            if let Some(read) = self.pending.pop_front() {
                return Some(read);
            }
            let fragment = self.reader.next()?;
            self.pending.extend(fragment);
        }
    }

    fn exception(&self) -> Option<&Error> {
        self.reader.exception()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fragment;
    use crate::writer::SqzWriterBuilder;

    /// Source that hands out a single byte per read
    struct Trickle(Cursor<Vec<u8>>);
    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(1);
            self.0.read(&mut buf[..n])
        }
    }

    fn paired_file(password: Option<&str>) -> anyhow::Result<Vec<u8>> {
        let mut builder = SqzWriterBuilder::default().fragment_width(2).kdf_rounds(8);
        if let Some(password) = password {
            builder = builder.password(password);
        }
        let mut buffer = Vec::new();
        let mut writer = builder.build(&mut buffer)?;
        for i in 0..3 {
            let name = format!("pair{i}");
            writer.write_fragment(&Fragment::new(vec![
                FastqRead::new(name.clone(), "ACGT", "IIII", None),
                FastqRead::new(name, "TTGA", "####", None),
            ]))?;
        }
        writer.finish()?;
        drop(writer);
        Ok(buffer)
    }

    fn drain(mut source: impl ReadSource) -> Vec<FastqRead> {
        std::iter::from_fn(|| source.next_read()).collect()
    }

    #[test]
    fn test_detect() -> anyhow::Result<()> {
        let registry = Registry::builtin();
        assert_eq!(registry.peek_len(), MAGIC.len());
        let buffer = paired_file(None)?;
        let entry = registry.detect(&buffer).unwrap();
        assert_eq!(entry.name, "sqz");
        assert_eq!(entry.priority, SQZ_PRIORITY);

        assert!(registry.detect(b"@r1\nACGT\n+\nIIII\n").is_none());
        assert!(registry.detect(&MAGIC[..2]).is_none());
        Ok(())
    }

    #[test]
    fn test_open_source_delivering_one_byte_per_read() -> anyhow::Result<()> {
        let buffer = paired_file(None)?;
        let source = BufReader::new(Trickle(Cursor::new(buffer)));
        let source = Registry::builtin().open(source, &OpenOptions::default())?;
        assert_eq!(drain(source).len(), 6);
        Ok(())
    }

    #[test]
    fn test_open_flattens_fragments() -> anyhow::Result<()> {
        let buffer = paired_file(Some("pw"))?;
        let options = OpenOptions {
            password: Some("pw".into()),
            verbose: true,
            name: Some("pairs".into()),
            ..Default::default()
        };
        let mut source = Registry::builtin().open(Cursor::new(buffer), &options)?;
        assert_eq!(source.name(), "pairs");
        let reads = drain(&mut source);
        assert_eq!(reads.len(), 6);
        assert_eq!(reads[0].name, b"pair0");
        assert_eq!(reads[1].sequence, b"TTGA");
        assert_eq!(reads[5].name, b"pair2");
        assert!(source.exception().is_none());
        Ok(())
    }

    #[test]
    fn test_wrong_password_surfaces_through_source() -> anyhow::Result<()> {
        let buffer = paired_file(Some("pw"))?;
        let options = OpenOptions {
            password: Some("nope".into()),
            ..Default::default()
        };
        let mut source = Registry::builtin().open(Cursor::new(buffer), &options)?;
        assert!(source.next_read().is_none());
        assert!(source.exception().unwrap().is_authentication());
        Ok(())
    }

    #[test]
    fn test_unknown_format() {
        let err = Registry::builtin()
            .open(Cursor::new(b"plain text".to_vec()), &OpenOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::HeaderError(HeaderError::UnknownFormat)
        ));
        assert!(Registry::new()
            .open(Cursor::new(paired_file(None).unwrap()), &OpenOptions::default())
            .is_err());
    }

    #[test]
    fn test_priority_resolves_competing_signatures() -> anyhow::Result<()> {
        fn reject(_: Box<dyn BufRead>, _: &OpenOptions) -> Result<Box<dyn ReadSource>> {
            Err(HeaderError::Truncated.into())
        }
        let mut registry = Registry::builtin();
        registry.register(FormatEntry {
            name: "low",
            signature: b"SQ",
            priority: 1,
            open: reject,
        });
        let buffer = paired_file(None)?;
        assert_eq!(registry.detect(&buffer).unwrap().name, "sqz");

        registry.register(FormatEntry {
            name: "high",
            signature: b"SQ",
            priority: 99,
            open: reject,
        });
        assert_eq!(registry.detect(&buffer).unwrap().name, "high");
        let source = Cursor::new(buffer);
        assert!(registry.open(source, &OpenOptions::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_open_path_names_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pairs.sqz");
        std::fs::write(&path, paired_file(None)?)?;
        let source = Registry::builtin().open_path(&path, &OpenOptions::default())?;
        assert!(source.name().ends_with("pairs.sqz"));
        assert_eq!(drain(source).len(), 6);
        Ok(())
    }
}
