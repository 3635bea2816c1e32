//! Streaming single-member gzip encoder.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::Result;

use super::{xfl_for_level, CM_DEFLATE, ID1, ID2, OS_UNKNOWN};

const SCRATCH_RESERVE: usize = 8192;

/// Writes the fixed 10-byte gzip header for a page member: no flags,
/// MTIME 0, XFL per compression level, OS unknown.
fn page_header(level: Compression) -> [u8; 10] {
    [
        ID1,
        ID2,
        CM_DEFLATE,
        0, // FLG
        0,
        0,
        0,
        0, // MTIME
        xfl_for_level(level),
        OS_UNKNOWN,
    ]
}

/// A streaming encoder for one gzip member at a time.
///
/// The encoder does not own the output sink; `begin`, `write`, and
/// `finish` all take it as an argument. The deflate state is reset at
/// `finish`, so one encoder serves every page of a stream.
pub struct MemberEncoder {
    level: Compression,
    deflate: Compress,
    crc: crc32fast::Hasher,
    member_in: u64,
    scratch: Vec<u8>,
    open: bool,
}

impl MemberEncoder {
    /// Creates an encoder producing raw-deflate members at `level`.
    pub fn new(level: Compression) -> Self {
        Self {
            level,
            deflate: Compress::new(level, false),
            crc: crc32fast::Hasher::new(),
            member_in: 0,
            scratch: Vec::with_capacity(SCRATCH_RESERVE),
            open: false,
        }
    }

    /// True while a member has been begun and not yet finished.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Starts a new member by writing its header.
    pub fn begin<W: Write>(&mut self, out: &mut W) -> Result<()> {
        debug_assert!(!self.open);
        out.write_all(&page_header(self.level))?;
        self.open = true;
        Ok(())
    }

    /// Compresses `data` into the current member.
    pub fn write<W: Write>(&mut self, out: &mut W, mut data: &[u8]) -> Result<()> {
        debug_assert!(self.open);
        self.crc.update(data);
        self.member_in += data.len() as u64;
        while !data.is_empty() {
            self.scratch.clear();
            self.scratch.reserve(SCRATCH_RESERVE);
            let before_in = self.deflate.total_in();
            self.deflate
                .compress_vec(data, &mut self.scratch, FlushCompress::None)
                .map_err(std::io::Error::other)?;
            data = &data[(self.deflate.total_in() - before_in) as usize..];
            out.write_all(&self.scratch)?;
        }
        Ok(())
    }

    /// Flushes the deflate tail, writes the CRC32/ISIZE trailer, and
    /// resets the encoder for the next member.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> Result<()> {
        debug_assert!(self.open);
        loop {
            self.scratch.clear();
            self.scratch.reserve(SCRATCH_RESERVE);
            let status = self
                .deflate
                .compress_vec(&[], &mut self.scratch, FlushCompress::Finish)
                .map_err(std::io::Error::other)?;
            out.write_all(&self.scratch)?;
            if status == Status::StreamEnd {
                break;
            }
        }

        let crc = std::mem::take(&mut self.crc).finalize();
        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&crc.to_le_bytes());
        trailer[4..].copy_from_slice(&(self.member_in as u32).to_le_bytes());
        out.write_all(&trailer)?;

        self.deflate.reset();
        self.member_in = 0;
        self.open = false;
        Ok(())
    }
}

impl std::fmt::Debug for MemberEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberEncoder")
            .field("open", &self.open)
            .field("member_in", &self.member_in)
            .finish_non_exhaustive()
    }
}

/// Compresses `data` into one complete in-memory gzip member.
///
/// Used by the parallel encoder, where every page becomes an
/// independent buffer.
pub(crate) fn compress_member(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut member = Vec::with_capacity(data.len() / 2 + 64);
    member.extend_from_slice(&page_header(level));

    let mut encoder = DeflateEncoder::new(member, level);
    encoder.write_all(data)?;
    let mut member = encoder.finish()?;

    let crc = crc32fast::hash(data);
    member.extend_from_slice(&crc.to_le_bytes());
    member.extend_from_slice(&(data.len() as u32).to_le_bytes());
    Ok(member)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gzip::GzipStream;

    #[test]
    fn streaming_and_oneshot_members_agree() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let mut streamed = Vec::new();
        let mut enc = MemberEncoder::new(Compression::default());
        enc.begin(&mut streamed).unwrap();
        for chunk in data.chunks(777) {
            enc.write(&mut streamed, chunk).unwrap();
        }
        enc.finish(&mut streamed).unwrap();

        let oneshot = compress_member(&data, Compression::default()).unwrap();

        // Headers and trailers must be byte-identical; the deflate bodies
        // may differ in block splitting but both must inflate back.
        assert_eq!(streamed[..10], oneshot[..10]);
        assert_eq!(streamed[streamed.len() - 8..], oneshot[oneshot.len() - 8..]);

        for member in [&streamed, &oneshot] {
            let mut src = &member[..];
            let mut gz = crate::gzip::GzipStream::open(&mut src, true).unwrap();
            let mut out = vec![0u8; data.len()];
            let mut at = 0;
            while at < out.len() {
                let n = gz.read(&mut src, &mut out[at..]).unwrap();
                assert!(n > 0);
                at += n;
            }
            assert_eq!(out, data);
        }
    }

    #[test]
    fn encoder_is_reusable_across_members() {
        let mut out = Vec::new();
        let mut enc = MemberEncoder::new(Compression::fast());
        for part in [b"one".as_slice(), b"two".as_slice()] {
            enc.begin(&mut out).unwrap();
            enc.write(&mut out, part).unwrap();
            enc.finish(&mut out).unwrap();
        }
        let mut src = &out[..];
        let mut gz = GzipStream::open(&mut src, true).unwrap();
        let mut buf = [0u8; 16];
        let mut decoded = Vec::new();
        loop {
            let n = gz.read(&mut src, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            decoded.extend_from_slice(&buf[..n]);
        }
        assert_eq!(decoded, b"onetwo");
    }
}
