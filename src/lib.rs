//! # SQZ
//!
//! A compact, optionally encrypted container for sequencing reads.
//!
//! An SQZ file holds fragments (groups of N same-named reads, one per paired
//! input source) in independently decodable chunks, followed by named text
//! annotations:
//!
//! ```text
//! ┌──────────────────┐
//! │ header (48 B)    │  magic, version, flags, compression, encryption, N
//! ├──────────────────┤
//! │ chunk            │  ≤ chunk_size fragments, compressed + encrypted
//! │ ...              │
//! ├──────────────────┤
//! │ text block       │  named annotation, same envelope as chunks
//! │ ...              │
//! ├──────────────────┤
//! │ end marker       │
//! └──────────────────┘
//! ```
//!
//! Files are written with [`SqzWriter`] (configured through
//! [`SqzWriterBuilder`]) and read with [`SqzReader`]. Readers either iterate
//! fragments or skip straight to the annotations with
//! [`SqzReader::fetch_text`]; both consume the whole stream so that the
//! SHA-1 digest of the file is available at the end.
//!
//! ```rust
//! use sqz::{FastqRead, Fragment, ReaderOptions, SqzReader, SqzWriterBuilder};
//!
//! let mut buffer = Vec::new();
//! let mut writer = SqzWriterBuilder::default()
//!     .fragment_width(2)
//!     .password("secret")
//!     .kdf_rounds(1024)
//!     .build(&mut buffer)
//!     .unwrap();
//! writer
//!     .write_reads(&[
//!         FastqRead::new("pair1", "ACGT", "IIII", None),
//!         FastqRead::new("pair1", "TTAA", "IIII", None),
//!     ])
//!     .unwrap();
//! writer.finish().unwrap();
//! drop(writer);
//!
//! let options = ReaderOptions::default().password("secret");
//! let mut reader = SqzReader::new(buffer.as_slice(), options).unwrap();
//! let fragments: Vec<Fragment> = reader.by_ref().collect();
//! assert_eq!(fragments.len(), 1);
//! assert_eq!(fragments[0].reads()[1].sequence, b"TTAA");
//! assert!(reader.exception().is_none());
//! ```

mod codec;
mod compression;
mod crypto;
mod digest;
mod envelope;
mod error;
mod header;
mod reader;
mod record;
mod registry;
mod verify;
mod writer;

pub use crypto::DEFAULT_KDF_ROUNDS;
pub use digest::{FileDigest, DIGEST_LEN};
pub use error::{AuthError, DecodeError, Error, HeaderError, Result, WriteError};
pub use header::{
    Compression, Encryption, EncryptionInfo, SqzHeader, MAGIC, MAJOR_VERSION, MINOR_VERSION,
    SIZE_HEADER,
};
pub use reader::{ReaderOptions, SqzReader, TextBlocks};
pub use record::{FastqRead, Fragment};
pub use registry::{
    FormatEntry, OpenFn, OpenOptions, ReadSource, Registry, SqzReadSource, SQZ_PRIORITY,
};
pub use verify::{verify, VerifyReport};
pub use writer::{SqzWriter, SqzWriterBuilder, DEFAULT_CHUNK_SIZE};
