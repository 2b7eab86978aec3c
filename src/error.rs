use std::path::PathBuf;

/// Custom Result type for sqz operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the sqz library, encompassing all possible error cases
/// that can occur while writing or reading a container.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// The file header is malformed or of an unsupported version
    HeaderError(#[from] HeaderError),
    /// A block could not be decrypted (wrong or missing password, tampering)
    AuthError(#[from] AuthError),
    /// A block is corrupt, truncated, or could not be decompressed
    DecodeError(#[from] DecodeError),
    /// The writer was called with invalid arguments or in an invalid state
    WriteError(#[from] WriteError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Checks if the error was raised while validating the file header
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::HeaderError(_))
    }

    /// Checks if the error is a decryption / password failure
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthError(_))
    }

    /// Checks if the error is a corrupt or truncated block
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::DecodeError(_))
    }

    /// Checks if the error was caused by an invalid call into the writer
    #[must_use]
    pub fn is_argument(&self) -> bool {
        matches!(self, Self::WriteError(_))
    }
}

/// Errors specific to processing and validating the file header
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic bytes in the header do not match the expected value
    ///
    /// # Arguments
    /// * `[u8; 4]` - The bytes that were found instead
    #[error("Invalid magic number: {0:?}")]
    InvalidMagicNumber([u8; 4]),

    /// The format version in the header is not supported
    ///
    /// # Arguments
    /// * First `u8` - The major version found
    /// * Second `u8` - The minor version found
    #[error("Unsupported format version: {0}.{1}")]
    UnsupportedVersion(u8, u8),

    /// The flag byte contains bits that are not defined
    #[error("Invalid flag bits: {0:#010b}")]
    InvalidFlags(u8),

    /// The compression code is unknown
    #[error("Invalid compression type: {0}")]
    InvalidCompression(u8),

    /// The encryption code is unknown
    #[error("Invalid encryption type: {0}")]
    InvalidEncryption(u8),

    /// The fragment width must be at least one
    #[error("Invalid fragment width: {0}")]
    InvalidFragmentWidth(u32),

    /// An encrypted header must declare a positive number of key derivation rounds
    #[error("Encrypted header does not declare key derivation rounds")]
    MissingKdfRounds,

    /// The declared key derivation rounds exceed the accepted ceiling
    ///
    /// # Arguments
    /// * `u32` - The declared number of rounds
    #[error("Key derivation rounds {0} exceed the maximum of {max}", max = crate::header::MAX_KDF_ROUNDS)]
    KdfRoundsTooHigh(u32),

    /// The reserved header bytes do not hold their fixed values
    #[error("Invalid reserved bytes in header")]
    InvalidReservedBytes,

    /// The stream ended before the header was complete
    #[error("Stream ended before the file header was complete")]
    Truncated,

    /// No registered format recognizes the leading bytes of the input
    #[error("Unrecognized input format")]
    UnknownFormat,
}

/// Errors raised when a block cannot be decrypted
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// The file is encrypted but no password was supplied
    #[error("File is encrypted but no password was supplied")]
    MissingPassword,

    /// The decrypted block did not validate (wrong password or tampered data)
    ///
    /// # Arguments
    /// * `usize` - The index of the block that failed (chunks and texts counted together)
    #[error("Unable to decrypt block {0}: wrong password or tampered data")]
    DecryptionFailed(usize),

    /// The key could not be derived from the password
    #[error("Unable to derive key: {0}")]
    KeyDerivation(String),
}

/// Errors that can occur while decoding the body of the container
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The block tag is not one of the known values
    ///
    /// # Arguments
    /// * `u8` - The tag that was found
    /// * `u64` - The byte position of the tag
    #[error("Unknown block tag {0:#04x} at byte {1}")]
    UnknownBlockTag(u8, u64),

    /// A data chunk appeared after the text section had started
    #[error("Data chunk found after text blocks at byte {0}")]
    ChunkAfterText(u64),

    /// The stream ended before a block or the end marker was complete
    #[error("Stream truncated at byte {0}")]
    UnexpectedEof(u64),

    /// Bytes follow the end marker
    #[error("Unexpected data after the end marker at byte {0}")]
    TrailingData(u64),

    /// The integrity check of an unencrypted block did not match
    #[error("Checksum mismatch in block {0}")]
    ChecksumMismatch(usize),

    /// A block is too short to contain its envelope
    #[error("Block {0} is too short ({1} bytes)")]
    BlockTooShort(usize, usize),

    /// The decompression layer rejected the block
    #[error("Unable to decompress block {0}: {1}")]
    Decompression(usize, std::io::Error),

    /// The decoded chunk body is inconsistent with its own framing
    #[error("Malformed chunk body: {0}")]
    MalformedChunk(String),

    /// A text block name was not valid UTF-8
    #[error("Text block name is not valid UTF-8")]
    InvalidTextName,
}

/// Errors that can occur while writing a container
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The number of reads in a fragment does not match the header
    ///
    /// # Fields
    /// * `expected` - The fragment width specified in the header
    /// * `got` - The number of reads in the fragment passed in
    #[error("Fragment has {got} reads but the file holds {expected} reads per fragment")]
    FragmentWidthMismatch { expected: u32, got: usize },

    /// The writer has already been finished
    #[error("Writer is already finished")]
    WriterFinished,

    /// The output exists and overwriting was not confirmed
    #[error("The output file: {0} exists! Use force to overwrite.")]
    OutputExists(PathBuf),

    /// The chunk size must be at least one fragment
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    /// The fragment width must be at least one read
    #[error("Invalid fragment width: {0}")]
    InvalidFragmentWidth(u32),

    /// Encryption was requested without a password
    #[error("Encryption requires a password")]
    MissingPassword,

    /// Key derivation rounds must lie between one and the header's ceiling
    #[error("Invalid key derivation rounds: {0}")]
    InvalidKdfRounds(u32),

    /// A text block name does not fit its length prefix
    #[error("Text block name is too long ({0} bytes)")]
    TextNameTooLong(usize),

    /// A record field does not fit its length prefix
    #[error("Record field is too long ({0} bytes)")]
    FieldTooLong(usize),
}
