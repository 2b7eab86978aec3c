//! Integrity verification of SQZ files
//!
//! [`verify`] drains a reader and gathers what it learned on the way. The
//! report keeps the statistics collected before a fault, so an invalid file
//! still shows how far decoding got.

use std::fmt;
use std::io::Read;

use crate::digest::FileDigest;
use crate::error::Error;
use crate::header::SqzHeader;
use crate::reader::{SqzReader, TextBlocks};

/// Outcome of [`verify`]
#[derive(Debug)]
pub struct VerifyReport {
    /// Display name of the verified input
    pub name: String,
    pub header: SqzHeader,
    pub fragments: u64,
    pub reads: u64,
    /// Data chunks observed before the stream ended or failed
    pub chunks: usize,
    pub texts: TextBlocks,
    /// Whole-file digest, only present when the stream was consumed to the end
    pub digest: Option<FileDigest>,
    /// The error that made the file invalid
    pub fault: Option<Error>,
}
impl VerifyReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }

    /// Hex rendering of the digest
    #[must_use]
    pub fn digest_hex(&self) -> Option<String> {
        self.digest.map(hex::encode)
    }
}
impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = &self.header;
        writeln!(f, "SQZ version: {}.{}", header.major, header.minor)?;
        match header.encryption {
            Some(info) => writeln!(f, "Encrypted: {}", info.algorithm)?,
            None => writeln!(f, "Encrypted: no")?,
        }
        writeln!(
            f,
            "Includes comments: {}",
            if header.has_comments { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "Space: {}-space",
            if header.colorspace { "color" } else { "base" }
        )?;
        writeln!(f, "Compression: {}", header.compression)?;
        writeln!(f, "Reads per fragment: {}", header.fragment_width)?;
        match header.created() {
            Some(date) => writeln!(f, "Date created: {}", date.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "Date created: unknown")?,
        }
        writeln!(f, "Reads: {}", self.reads)?;
        writeln!(f, "Data chunks: {}", self.chunks)?;
        if !self.texts.is_empty() {
            writeln!(f, "[Text data]")?;
            for (name, payload) in self.texts.iter() {
                writeln!(f, "[{name}]")?;
                writeln!(f, "{}", String::from_utf8_lossy(payload))?;
            }
        }
        if let Some(digest) = self.digest_hex() {
            writeln!(f, "File SHA-1: {digest}")?;
        }
        match &self.fault {
            Some(fault) => {
                writeln!(f, "{fault}")?;
                write!(f, "{} is not valid!", self.name)
            }
            None => write!(f, "{} is valid", self.name),
        }
    }
}

/// Reads `reader` to the end and reports what was found
///
/// Every chunk is fully decoded, so authentication and decode failures of any
/// block make the file invalid.
pub fn verify<R: Read>(name: impl Into<String>, mut reader: SqzReader<R>) -> VerifyReport {
    for _ in reader.by_ref() {}
    VerifyReport {
        name: name.into(),
        header: reader.header(),
        fragments: reader.fragment_count(),
        reads: reader.read_count(),
        chunks: reader.chunk_count(),
        texts: reader.texts().clone(),
        digest: reader.digest(),
        fault: reader.take_exception(),
    }
}
