//! # File Header Definition
//!
//! The SQZ file header is a fixed 48-byte structure at the start of every file.
//! It carries everything a reader needs to decode the blocks that follow: the
//! compression strategy, the encryption descriptor (algorithm + key derivation
//! salt), the number of reads per fragment and a couple of flag bits.
//!
//! ```text
//! ┌───────┬───────┬───────┬───────┬──────┬──────┬──────────┬───────┬───────────┬──────┬────────┬──────────┐
//! │ magic │ major │ minor │ flags │ comp │ encr │ reserved │ width │ timestamp │ salt │ rounds │ reserved │
//! │  4    │   1   │   1   │   1   │  1   │  1   │    3     │   4   │     8     │  16  │   4    │    4     │
//! └───────┴───────┴───────┴───────┴──────┴──────┴──────────┴───────┴───────────┴──────┴────────┴──────────┘
//! ```
//!
//! All integers are little-endian.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::error::{HeaderError, Result};

/// Magic bytes for file identification: "SQZ" followed by the DOS EOF byte
///
/// Checked byte-for-byte by the reader and by format auto-detection.
pub const MAGIC: [u8; 4] = [b'S', b'Q', b'Z', 0x1a];

/// Current major format version
///
/// Readers reject files with a different major version.
pub const MAJOR_VERSION: u8 = 1;

/// Current minor format version
pub const MINOR_VERSION: u8 = 0;

/// Size of the file header in bytes
pub const SIZE_HEADER: usize = 48;

/// Size of the key derivation salt stored in the header
pub const SALT_LEN: usize = 16;

/// Flag bit: reads carry a comment field
pub const FLAG_HAS_COMMENTS: u8 = 1;

/// Flag bit: sequences are in colorspace
pub const FLAG_COLORSPACE: u8 = 1 << 1;

/// Largest number of key derivation rounds a header may declare
pub const MAX_KDF_ROUNDS: u32 = 10_000_000;

const KNOWN_FLAGS: u8 = FLAG_HAS_COMMENTS | FLAG_COLORSPACE;

const RESERVED_BYTES_A: [u8; 3] = [42; 3];
const RESERVED_BYTES_B: [u8; 4] = [42; 4];

/// Compression strategy applied to every chunk and text block of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Identity transform
    None,
    /// zlib-framed deflate
    #[default]
    Deflate,
    /// Block-sorting bzip2
    Bzip2,
}
impl Compression {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Deflate => 1,
            Self::Bzip2 => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Deflate),
            2 => Ok(Self::Bzip2),
            _ => Err(HeaderError::InvalidCompression(code).into()),
        }
    }
}
impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Deflate => write!(f, "deflate"),
            Self::Bzip2 => write!(f, "bzip2"),
        }
    }
}

/// Symmetric cipher strength used for password based encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// AES with a 128-bit key
    #[default]
    Aes128,
    /// AES with a 256-bit key
    Aes256,
}
impl Encryption {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Aes128 => 1,
            Self::Aes256 => 2,
        }
    }

    /// Length of the derived key in bytes
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    fn from_code(code: u8) -> Result<Option<Self>> {
        match code {
            0 => Ok(None),
            1 => Ok(Some(Self::Aes128)),
            2 => Ok(Some(Self::Aes256)),
            _ => Err(HeaderError::InvalidEncryption(code).into()),
        }
    }
}
impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128 => write!(f, "AES-128"),
            Self::Aes256 => write!(f, "AES-256"),
        }
    }
}

/// Encryption descriptor stored in the header of encrypted files
///
/// The salt is generated once per file and feeds the password based key
/// derivation together with the number of rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// Cipher strength
    pub algorithm: Encryption,
    /// Per-file random salt
    pub salt: [u8; SALT_LEN],
    /// PBKDF2 iteration count
    pub rounds: u32,
}

/// File header for SQZ files
///
/// Constructed once when the writer is opened and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqzHeader {
    /// Major format version
    pub major: u8,

    /// Minor format version
    pub minor: u8,

    /// Whether reads carry an optional comment field
    pub has_comments: bool,

    /// Whether the sequences are in colorspace
    pub colorspace: bool,

    /// Compression applied to every block
    pub compression: Compression,

    /// Encryption descriptor, `None` for plaintext files
    pub encryption: Option<EncryptionInfo>,

    /// Number of reads in every fragment (1 for single-end / interleaved input)
    pub fragment_width: u32,

    /// Creation time in seconds since the unix epoch
    pub timestamp: u64,
}
impl SqzHeader {
    /// Creates a new unencrypted header stamped with the current time
    ///
    /// # Example
    ///
    /// ```rust
    /// use sqz::{Compression, SqzHeader};
    ///
    /// // Paired-end reads, deflate compressed
    /// let header = SqzHeader::new(2, Compression::Deflate);
    /// assert_eq!(header.fragment_width, 2);
    /// ```
    #[must_use]
    pub fn new(fragment_width: u32, compression: Compression) -> Self {
        Self {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            has_comments: false,
            colorspace: false,
            compression,
            encryption: None,
            fragment_width,
            timestamp: now(),
        }
    }

    /// Packs the boolean fields into the flag byte
    #[must_use]
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.has_comments {
            flags |= FLAG_HAS_COMMENTS;
        }
        if self.colorspace {
            flags |= FLAG_COLORSPACE;
        }
        flags
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Creation time as a calendar date
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Creates a header from a 48-byte buffer
    ///
    /// # Errors
    ///
    /// * `HeaderError::InvalidMagicNumber` - If the magic bytes don't match
    /// * `HeaderError::UnsupportedVersion` - If the major version is unsupported
    /// * `HeaderError::InvalidFlags` - If undefined flag bits are set
    /// * `HeaderError::InvalidCompression` / `InvalidEncryption` - Unknown codes
    /// * `HeaderError::InvalidReservedBytes` - If the reserved bytes were altered
    /// * `HeaderError::InvalidFragmentWidth` - If the fragment width is zero
    /// * `HeaderError::MissingKdfRounds` / `KdfRoundsTooHigh` - Rounds outside `1..=MAX_KDF_ROUNDS`
    pub fn from_bytes(buffer: &[u8; SIZE_HEADER]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buffer[0..4]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagicNumber(magic).into());
        }
        let (major, minor) = (buffer[4], buffer[5]);
        if major != MAJOR_VERSION {
            return Err(HeaderError::UnsupportedVersion(major, minor).into());
        }
        let flags = buffer[6];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(HeaderError::InvalidFlags(flags).into());
        }
        if buffer[9..12] != RESERVED_BYTES_A || buffer[44..48] != RESERVED_BYTES_B {
            return Err(HeaderError::InvalidReservedBytes.into());
        }
        let compression = Compression::from_code(buffer[7])?;
        let algorithm = Encryption::from_code(buffer[8])?;
        let fragment_width = LittleEndian::read_u32(&buffer[12..16]);
        if fragment_width == 0 {
            return Err(HeaderError::InvalidFragmentWidth(fragment_width).into());
        }
        let timestamp = LittleEndian::read_u64(&buffer[16..24]);
        let encryption = match algorithm {
            Some(algorithm) => {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&buffer[24..40]);
                let rounds = LittleEndian::read_u32(&buffer[40..44]);
                if rounds == 0 {
                    return Err(HeaderError::MissingKdfRounds.into());
                }
                if rounds > MAX_KDF_ROUNDS {
                    return Err(HeaderError::KdfRoundsTooHigh(rounds).into());
                }
                Some(EncryptionInfo {
                    algorithm,
                    salt,
                    rounds,
                })
            }
            None => None,
        };
        Ok(Self {
            major,
            minor,
            has_comments: flags & FLAG_HAS_COMMENTS != 0,
            colorspace: flags & FLAG_COLORSPACE != 0,
            compression,
            encryption,
            fragment_width,
            timestamp,
        })
    }

    /// Serializes the header into its 48-byte representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIZE_HEADER] {
        let mut buffer = [0u8; SIZE_HEADER];
        buffer[0..4].copy_from_slice(&MAGIC);
        buffer[4] = self.major;
        buffer[5] = self.minor;
        buffer[6] = self.flags();
        buffer[7] = self.compression.code();
        buffer[8] = self.encryption.map_or(0, |info| info.algorithm.code());
        buffer[9..12].copy_from_slice(&RESERVED_BYTES_A);
        LittleEndian::write_u32(&mut buffer[12..16], self.fragment_width);
        LittleEndian::write_u64(&mut buffer[16..24], self.timestamp);
        if let Some(info) = self.encryption {
            buffer[24..40].copy_from_slice(&info.salt);
            LittleEndian::write_u32(&mut buffer[40..44], info.rounds);
        }
        buffer[44..48].copy_from_slice(&RESERVED_BYTES_B);
        buffer
    }

    /// Writes the header to a writer
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Reads a header from a reader
    ///
    /// A stream that ends inside the header is reported as a format error
    /// rather than an I/O error, since it cannot be an SQZ file.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; SIZE_HEADER];
        match reader.read_exact(&mut buffer) {
            Ok(()) => Self::from_bytes(&buffer),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(HeaderError::Truncated.into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
