//! Password based block encryption
//!
//! A key is derived once per file with PBKDF2-HMAC-SHA1 from the password and
//! the salt stored in the header. Every block is then encrypted on its own with
//! AES-CBC (PKCS#7 padding) under a fresh random IV that is stored in front of
//! the ciphertext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};
use crate::header::{Encryption, EncryptionInfo, SALT_LEN};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the per-block initialization vector
pub const IV_LEN: usize = 16;

/// Default PBKDF2 iteration count for new files
pub const DEFAULT_KDF_ROUNDS: u32 = 65_536;

/// Generates a fresh per-file salt
#[must_use]
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Symmetric key derived from a password, bound to one file
pub struct BlockCipher {
    algorithm: Encryption,
    key: Zeroizing<Vec<u8>>,
}
impl BlockCipher {
    /// Derives the file key from `password` and the header's encryption descriptor
    #[must_use]
    pub fn derive(password: &str, info: &EncryptionInfo) -> Self {
        let mut key = Zeroizing::new(vec![0u8; info.algorithm.key_len()]);
        pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), &info.salt, info.rounds, &mut key);
        Self {
            algorithm: info.algorithm,
            key,
        }
    }

    /// Encrypts `plain`, returning `iv ‖ ciphertext`
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let ciphertext = match self.algorithm {
            Encryption::Aes128 => Aes128CbcEnc::new_from_slices(&self.key, &iv)
                .map_err(|e| AuthError::KeyDerivation(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
            Encryption::Aes256 => Aes256CbcEnc::new_from_slices(&self.key, &iv)
                .map_err(|e| AuthError::KeyDerivation(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
        };

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `iv ‖ ciphertext`
    ///
    /// Returns `None` when the ciphertext is malformed or the padding does not
    /// validate, which is what a wrong key produces in the vast majority of
    /// cases. Callers must still verify the plaintext framing.
    #[must_use]
    pub fn decrypt(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < IV_LEN {
            return None;
        }
        let (iv, ciphertext) = bytes.split_at(IV_LEN);
        match self.algorithm {
            Encryption::Aes128 => Aes128CbcDec::new_from_slices(&self.key, iv)
                .ok()?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .ok(),
            Encryption::Aes256 => Aes256CbcDec::new_from_slices(&self.key, iv)
                .ok()?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .ok(),
        }
    }
}
impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
