//! # ragzip
//!
//! Random-access gzip: a pure-Rust implementation of the *ragzip*
//! container, a byte-for-byte valid gzip stream that a ragzip-aware
//! reader can seek in O(log N) index lookups.
//!
//! Uncompressed content is partitioned into fixed-size pages of `2^P`
//! bytes, each stored as an independent gzip member. Page offsets are
//! collected into a tower of indexes (`2^I` entries each) stored inside
//! the `extra` field of otherwise-empty gzip members, which ordinary
//! gzip decoders skip silently. A fixed 64-byte footer member at the end
//! of the file records the tree geometry, so `gunzip` sees a normal
//! (concatenated) gzip file while [`RagzipReader`] can jump straight to
//! any logical byte.
//!
//! ## Writing
//!
//! ```rust,no_run
//! use ragzip::RagzipWriter;
//! use std::io::Write;
//!
//! fn main() -> ragzip::Result<()> {
//!     let file = std::fs::File::create("data.rgz")?;
//!     // 8 KiB pages, 4096-entry indexes
//!     let mut writer = RagzipWriter::new(std::io::BufWriter::new(file), 13, 12)?;
//!     writer.write_all(b"hello ragzip")?;
//!     let summary = writer.finish()?;
//!     println!("{} bytes in {} pages", summary.uncompressed_size, summary.pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Random-access reading
//!
//! ```rust,no_run
//! use ragzip::{IndexCacheMode, RagzipReader};
//! use std::io::{Read, Seek, SeekFrom};
//!
//! fn main() -> ragzip::Result<()> {
//!     let file = std::fs::File::open("data.rgz")?;
//!     let mut reader = RagzipReader::with_cache(file, IndexCacheMode::Lru(16))?;
//!     reader.seek(SeekFrom::Start(6))?;
//!     let mut word = [0u8; 6];
//!     reader.read_exact(&mut word)?;
//!     assert_eq!(&word, b"ragzip");
//!     Ok(())
//! }
//! ```
//!
//! ## Parallel pipelines
//!
//! With the `parallel` feature (default), [`parallel::ParallelEncoder`]
//! and [`parallel::ParallelDecoder`] spread deflate work across every
//! core while preserving page order and the exact same file layout.
//!
//! ## Feature flags
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `parallel` | yes | rayon-based encoder/decoder pipelines |
//! | `cli` | yes | the `ragzip` command-line tool |

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod format;
pub mod gzip;
mod index;
pub mod read;
pub mod write;

#[cfg(feature = "parallel")]
pub mod parallel;

pub use cache::CachingPageReader;
pub use error::{Error, Result};
pub use format::{
    Extension, TreeSpec, FOOTER_LEN, MAX_CAPACITY, MAX_EXTENSION_COUNT, MAX_EXTENSION_PAYLOAD,
    VERSION_1_0,
};
pub use gzip::GzipStream;
pub use read::{IndexCacheMode, RagzipReader};
pub use write::{RagzipWriter, WriteSummary};

#[cfg(feature = "parallel")]
pub use parallel::{ParallelDecoder, ParallelEncoder};
