//! Whole-file digest accumulation
//!
//! Both wrappers feed every byte that crosses the stream boundary, in stream
//! order, into a single SHA-1 instance. The digest covers exactly the physical
//! bytes: header, compressed/encrypted blocks and the end marker.

use std::io::{self, Read, Write};

use sha1::{Digest, Sha1};

/// Length of the computed digest in bytes
pub const DIGEST_LEN: usize = 20;

/// A finalized whole-file digest
pub type FileDigest = [u8; DIGEST_LEN];

/// Writer that hashes everything written through it
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha1,
    count: u64,
}
impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            count: 0,
        }
    }

    /// Number of bytes written so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finalizes the digest, resetting the hasher
    pub fn finalize(&mut self) -> FileDigest {
        self.hasher.finalize_reset().into()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}
impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that hashes everything read through it
pub struct DigestReader<R: Read> {
    inner: R,
    hasher: Sha1,
    count: u64,
}
impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            count: 0,
        }
    }

    /// Number of bytes consumed so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Consumes exactly `n` bytes without keeping them
    ///
    /// The bytes are still hashed.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(n), &mut io::sink())?;
        if copied == n {
            Ok(())
        } else {
            Err(io::ErrorKind::UnexpectedEof.into())
        }
    }

    /// Finalizes the digest, resetting the hasher
    pub fn finalize(&mut self) -> FileDigest {
        self.hasher.finalize_reset().into()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}
