//! Minimal gzip member codec.
//!
//! ragzip files are sequences of RFC 1952 gzip members: content-bearing
//! page members and empty metadata members. This module implements the
//! only codec capabilities the container needs:
//!
//! - [`GzipStream`]: a sequential decoder that seamlessly crosses member
//!   boundaries (including empty metadata members) and supports
//!   fast-forward skipping;
//! - [`MemberEncoder`]: a streaming single-member encoder;
//! - [`metadata`]: encode/decode for the empty `RA`-subfield members that
//!   carry indexes, extensions, and the footer.

pub(crate) mod header;
pub(crate) mod metadata;
mod reader;
mod writer;

pub use header::{ExtraField, SubField};
pub use reader::GzipStream;
pub use writer::MemberEncoder;
pub(crate) use writer::compress_member;

use flate2::Compression;

/// Gzip magic, first byte.
pub(crate) const ID1: u8 = 0x1f;
/// Gzip magic, second byte.
pub(crate) const ID2: u8 = 0x8b;
/// Compression method: deflate.
pub(crate) const CM_DEFLATE: u8 = 8;
/// OS byte: unknown.
pub(crate) const OS_UNKNOWN: u8 = 255;

pub(crate) const FHCRC: u8 = 0x02;
pub(crate) const FEXTRA: u8 = 0x04;
pub(crate) const FNAME: u8 = 0x08;
pub(crate) const FCOMMENT: u8 = 0x10;
/// FLG bits 5..7 are reserved and must be zero.
pub(crate) const FLG_RESERVED: u8 = 0xe0;

/// Maps a deflate level to the gzip XFL byte (2 = maximum compression,
/// 4 = fastest, 0 otherwise).
pub(crate) fn xfl_for_level(level: Compression) -> u8 {
    if level == Compression::best() {
        2
    } else if level == Compression::fast() {
        4
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xfl_follows_compression_level() {
        assert_eq!(xfl_for_level(Compression::best()), 2);
        assert_eq!(xfl_for_level(Compression::fast()), 4);
        assert_eq!(xfl_for_level(Compression::default()), 0);
        assert_eq!(xfl_for_level(Compression::new(3)), 0);
    }
}
