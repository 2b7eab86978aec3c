//! Sealing and opening of block payloads
//!
//! Chunks and text blocks go through the same pipeline:
//!
//! ```text
//! raw ──compress──▶ c ──append check──▶ c ‖ sha1(c)[..8] ──encrypt──▶ iv ‖ ciphertext
//! ```
//!
//! The check is verified before decompression, so a wrong password surfaces
//! as an authentication failure instead of garbage fed to the decompressor.

use sha1::{Digest, Sha1};

use crate::crypto::BlockCipher;
use crate::error::{AuthError, DecodeError, Result};
use crate::header::Compression;

/// Length of the integrity check appended to every compressed payload
pub const CHECK_LEN: usize = 8;

fn check(bytes: &[u8]) -> [u8; CHECK_LEN] {
    let digest = Sha1::digest(bytes);
    let mut out = [0u8; CHECK_LEN];
    out.copy_from_slice(&digest[..CHECK_LEN]);
    out
}

/// Block transform shared by the writer and the reader of one file
#[derive(Debug)]
pub struct Envelope {
    compression: Compression,
    cipher: Option<BlockCipher>,
    zbuf: Vec<u8>,
}
impl Envelope {
    #[must_use]
    pub fn new(compression: Compression, cipher: Option<BlockCipher>) -> Self {
        Self {
            compression,
            cipher,
            zbuf: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Transforms a raw payload into its on-disk form
    pub fn seal(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        self.compression.compress(raw, &mut self.zbuf)?;
        let tag = check(&self.zbuf);
        self.zbuf.extend_from_slice(&tag);
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&self.zbuf),
            None => Ok(std::mem::take(&mut self.zbuf)),
        }
    }

    /// Recovers the raw payload of block `index` from its on-disk form
    ///
    /// # Errors
    ///
    /// * `AuthError::DecryptionFailed` - Padding or check failed on an encrypted block
    /// * `DecodeError::ChecksumMismatch` - Check failed on a plaintext block
    /// * `DecodeError::Decompression` - The compressed payload is malformed
    pub fn open(&self, index: usize, bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let decrypted;
        let sealed = match &self.cipher {
            Some(cipher) => {
                decrypted = cipher
                    .decrypt(bytes)
                    .ok_or(AuthError::DecryptionFailed(index))?;
                decrypted.as_slice()
            }
            None => bytes,
        };
        if sealed.len() < CHECK_LEN {
            return Err(if self.is_encrypted() {
                AuthError::DecryptionFailed(index).into()
            } else {
                DecodeError::BlockTooShort(index, sealed.len()).into()
            });
        }
        let (payload, tag) = sealed.split_at(sealed.len() - CHECK_LEN);
        if check(payload) != tag {
            return Err(if self.is_encrypted() {
                AuthError::DecryptionFailed(index).into()
            } else {
                DecodeError::ChecksumMismatch(index).into()
            });
        }
        self.compression
            .decompress(payload, out)
            .map_err(|e| DecodeError::Decompression(index, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Encryption, EncryptionInfo};
    use crate::Error;

    fn cipher(password: &str) -> BlockCipher {
        BlockCipher::derive(
            password,
            &EncryptionInfo {
                algorithm: Encryption::Aes128,
                salt: [9; 16],
                rounds: 8,
            },
        )
    }

    #[test]
    fn test_plain_round_trip() -> anyhow::Result<()> {
        let mut envelope = Envelope::new(Compression::Deflate, None);
        let sealed = envelope.seal(b"ACGTACGTACGT")?;
        let mut out = Vec::new();
        envelope.open(0, &sealed, &mut out)?;
        assert_eq!(out, b"ACGTACGTACGT");
        Ok(())
    }

    #[test]
    fn test_corruption_is_detected_without_compression() -> anyhow::Result<()> {
        let mut envelope = Envelope::new(Compression::None, None);
        let mut sealed = envelope.seal(b"ACGTACGTACGT")?;
        sealed[3] ^= 0x01;
        let err = envelope.open(4, &sealed, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::DecodeError(DecodeError::ChecksumMismatch(4))
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_password_is_authentication_error() -> anyhow::Result<()> {
        let mut writer = Envelope::new(Compression::Bzip2, Some(cipher("right")));
        let sealed = writer.seal(&b"ACGT".repeat(100))?;

        let reader = Envelope::new(Compression::Bzip2, Some(cipher("wrong")));
        let err = reader.open(0, &sealed, &mut Vec::new()).unwrap_err();
        assert!(err.is_authentication());

        let reader = Envelope::new(Compression::Bzip2, Some(cipher("right")));
        let mut out = Vec::new();
        reader.open(0, &sealed, &mut out)?;
        assert_eq!(out, b"ACGT".repeat(100));
        Ok(())
    }

    #[test]
    fn test_short_block() {
        let envelope = Envelope::new(Compression::None, None);
        let err = envelope.open(1, b"abc", &mut Vec::new()).unwrap_err();
        assert!(err.is_decode());
    }
}
