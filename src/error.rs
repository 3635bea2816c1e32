//! Error types for ragzip operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when reading, writing, or parallel-processing ragzip
//! files, along with a convenient [`Result<T>`] type alias.
//!
//! Errors fall into several categories:
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | I/O | [`Io`][Self::Io] | File system operations |
//! | Configuration | [`InvalidConfig`][Self::InvalidConfig] | Bad exponents, resume mismatch |
//! | Format | [`InvalidFormat`][Self::InvalidFormat], [`MissingRaSubfield`][Self::MissingRaSubfield], [`NonMonotoneOffset`][Self::NonMonotoneOffset], [`UnsupportedVersion`][Self::UnsupportedVersion] | Damaged or foreign files |
//! | Integrity | [`Corrupt`][Self::Corrupt], [`CrcMismatch`][Self::CrcMismatch] | Damaged compressed data |
//! | Capacity | [`CapacityExceeded`][Self::CapacityExceeded], [`TooManyExtensions`][Self::TooManyExtensions], [`ExtensionPayloadTooLarge`][Self::ExtensionPayloadTooLarge] | Format limits |
//! | Usage | [`PositionOutOfRange`][Self::PositionOutOfRange] | Out-of-range seeks |
//! | Concurrency | [`Pipeline`][Self::Pipeline] | Parallel stage failures |
//!
//! Configuration and capacity errors are raised before any byte is
//! written; format and integrity errors abort the current open or seek
//! without corrupting in-memory state.

use std::io;

/// A specialized `Result` type for ragzip operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for ragzip operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration, detected before any I/O.
    ///
    /// Raised for page/index exponents outside their mandated ranges,
    /// cache sizes outside `1..=0xffff`, or resume parameters that do
    /// not match the existing file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The bytes at `offset` are not what the ragzip format mandates.
    ///
    /// This covers bad gzip magic, malformed extra fields, footers
    /// shorter than 64 bytes, and inconsistent XLEN/sflen accounting.
    #[error("invalid format at offset {offset:#x}: {reason}")]
    InvalidFormat {
        /// The file offset of the offending bytes.
        offset: u64,
        /// A description of what was expected vs. found.
        reason: String,
    },

    /// A metadata member at `offset` carries no `RA` extra subfield.
    #[error("gzip extra subfield 'RA' not found at offset {offset:#x}")]
    MissingRaSubfield {
        /// The file offset of the gzip member that was inspected.
        offset: u64,
    },

    /// An index or extension chain referenced an offset that is not
    /// strictly before the member containing it.
    ///
    /// Every stored offset must point backward; anything else indicates
    /// index or extension-list corruption.
    #[error("offset {found:#x} is not before the referencing member at {limit:#x}: possible index corruption")]
    NonMonotoneOffset {
        /// The offset that was read.
        found: u64,
        /// The offset it must be strictly below.
        limit: u64,
    },

    /// The footer declares a format version this crate does not speak.
    #[error("unsupported ragzip version {version:#010x}")]
    UnsupportedVersion {
        /// The version value found in the footer.
        version: u32,
    },

    /// The compressed data is damaged.
    ///
    /// Raised for inflate format errors, premature end of a member, and
    /// ISIZE mismatches. `position` is the decompressor's byte position
    /// in the source when the damage was detected.
    #[error("corrupt gzip data near offset {position:#x}: {reason}")]
    Corrupt {
        /// The source byte position where the damage was detected.
        position: u64,
        /// A description of the damage.
        reason: String,
    },

    /// The CRC32 stored in a gzip trailer does not match the inflated
    /// content.
    #[error("CRC mismatch near offset {position:#x}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// The source byte position of the trailer.
        position: u64,
        /// The CRC stored in the trailer.
        expected: u32,
        /// The CRC of the inflated content.
        actual: u32,
    },

    /// Writing would reach the format capacity of 2^62 uncompressed bytes.
    #[error("ragzip capacity of 2^62 bytes would be exceeded (size {size:#x})")]
    CapacityExceeded {
        /// The logical size the write would have reached.
        size: u64,
    },

    /// The extension list is full (50 entries).
    #[error("too many extensions ({count}, maximum 50)")]
    TooManyExtensions {
        /// The number of extensions already appended.
        count: usize,
    },

    /// An extension payload exceeds 32 KiB.
    #[error("extension payload of {len} bytes exceeds the 32768-byte maximum")]
    ExtensionPayloadTooLarge {
        /// The payload length that was rejected.
        len: usize,
    },

    /// A logical position is outside the readable range.
    #[error("logical position {position} out of range (uncompressed size {size})")]
    PositionOutOfRange {
        /// The requested logical position.
        position: u64,
        /// The uncompressed size of the file.
        size: u64,
    },

    /// A parallel pipeline stage failed; the run was aborted.
    #[error("parallel {stage} stage failed: {source}")]
    Pipeline {
        /// The pipeline stage that failed first.
        stage: &'static str,
        /// The failure that aborted the run.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps an error as a pipeline-stage failure.
    #[cfg(feature = "parallel")]
    pub(crate) fn in_stage(self, stage: &'static str) -> Self {
        Error::Pipeline {
            stage,
            source: Box::new(self),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
