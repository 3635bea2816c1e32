//! Concatenation-aware streaming gzip decoder.

use std::io::Read;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{Error, Result};

use super::{CM_DEFLATE, FCOMMENT, FEXTRA, FHCRC, FLG_RESERVED, FNAME, ID1, ID2};

const BUF_SIZE: usize = 8192;
/// NUL-terminated header strings (FNAME/FCOMMENT) are bounded to this
/// many bytes before the terminator.
const MAX_HEADER_STRING: usize = 0xffff;

/// A streaming gzip decoder that does not own its byte source.
///
/// Every method takes the source as an argument, which lets the caller
/// reposition the source between members (the ragzip reader seeks the
/// source during index navigation and opens a fresh `GzipStream` at each
/// page). In concatenated mode the decoder crosses member boundaries
/// seamlessly, including the empty metadata members interleaved in a
/// ragzip file, and reports end-of-stream on a clean EOF at a boundary.
///
/// CRC32 and ISIZE are verified at every member trailer.
pub struct GzipStream {
    inflate: Decompress,
    crc: crc32fast::Hasher,
    /// Uncompressed bytes produced for the current member.
    member_out: u64,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    /// Total bytes consumed from the source, for error reporting.
    consumed: u64,
    concatenated: bool,
    eos: bool,
}

impl GzipStream {
    /// Opens a decoder on a source positioned at the start of a gzip
    /// member and parses the first header.
    ///
    /// When `concatenated` is false, decoding stops at the end of the
    /// first member; when true it continues through every following
    /// member until EOF.
    pub fn open<R: Read>(src: &mut R, concatenated: bool) -> Result<Self> {
        let mut stream = Self {
            inflate: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            member_out: 0,
            buf: vec![0u8; BUF_SIZE],
            pos: 0,
            filled: 0,
            consumed: 0,
            concatenated,
            eos: false,
        };
        if !stream.read_header(src, false)? {
            return Err(stream.corrupt("empty source where a gzip member was expected"));
        }
        Ok(stream)
    }

    /// Inflates up to `dst.len()` bytes, crossing member boundaries when
    /// concatenated. Returns 0 only at end-of-stream.
    pub fn read<R: Read>(&mut self, src: &mut R, dst: &mut [u8]) -> Result<usize> {
        if self.eos || dst.is_empty() {
            return Ok(0);
        }
        loop {
            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let status = self
                .inflate
                .decompress(&self.buf[self.pos..self.filled], dst, FlushDecompress::None)
                .map_err(|e| self.corrupt(format!("invalid deflate data: {e}")))?;
            self.pos += (self.inflate.total_in() - before_in) as usize;
            let produced = (self.inflate.total_out() - before_out) as usize;
            if produced > 0 {
                self.crc.update(&dst[..produced]);
                self.member_out += produced as u64;
            }

            match status {
                Status::StreamEnd => {
                    self.finish_member(src)?;
                    if !self.concatenated || !self.read_header(src, true)? {
                        self.eos = true;
                        return Ok(produced);
                    }
                    if produced > 0 {
                        return Ok(produced);
                    }
                    // An empty member ended without producing anything;
                    // keep going into the next one.
                }
                _ => {
                    if produced > 0 {
                        return Ok(produced);
                    }
                    if self.pos == self.filled && self.refill(src)? == 0 {
                        return Err(self.corrupt("unexpected end of gzip stream"));
                    }
                }
            }
        }
    }

    /// Fast-forwards by `distance` uncompressed bytes, decoding and
    /// discarding. Fails if the stream ends first.
    pub fn skip<R: Read>(&mut self, src: &mut R, mut distance: u64) -> Result<()> {
        let mut waste = [0u8; BUF_SIZE];
        while distance > 0 {
            let want = distance.min(BUF_SIZE as u64) as usize;
            let n = self.read(src, &mut waste[..want])?;
            if n == 0 {
                return Err(self.corrupt(format!(
                    "end of stream while skipping ({distance} bytes short)"
                )));
            }
            distance -= n as u64;
        }
        Ok(())
    }

    /// True once every member has been decoded.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::Corrupt {
            position: self.consumed - (self.filled - self.pos) as u64,
            reason: reason.into(),
        }
    }

    /// Reads more bytes from the source into the internal buffer.
    /// Returns the number of bytes obtained (0 at EOF).
    fn refill<R: Read>(&mut self, src: &mut R) -> Result<usize> {
        debug_assert_eq!(self.pos, self.filled);
        self.pos = 0;
        self.filled = 0;
        loop {
            match src.read(&mut self.buf) {
                Ok(n) => {
                    self.filled = n;
                    self.consumed += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_byte<R: Read>(&mut self, src: &mut R) -> Result<u8> {
        if self.pos == self.filled && self.refill(src)? == 0 {
            return Err(self.corrupt("unexpected EOF inside gzip header"));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_exact_buffered<R: Read>(&mut self, src: &mut R, out: &mut [u8]) -> Result<()> {
        for slot in out.iter_mut() {
            *slot = self.next_byte(src)?;
        }
        Ok(())
    }

    /// Parses one member header. Returns false on a clean EOF before the
    /// first byte when `eof_ok` (the member-boundary end-of-stream case).
    fn read_header<R: Read>(&mut self, src: &mut R, eof_ok: bool) -> Result<bool> {
        if self.pos == self.filled && self.refill(src)? == 0 {
            if eof_ok {
                return Ok(false);
            }
            return Err(self.corrupt("unexpected EOF where a gzip header was expected"));
        }

        let mut fixed = [0u8; 10];
        self.read_exact_buffered(src, &mut fixed)?;
        if fixed[0] != ID1 || fixed[1] != ID2 {
            return Err(self.corrupt(format!(
                "bad gzip magic {:#04x} {:#04x}",
                fixed[0], fixed[1]
            )));
        }
        if fixed[2] != CM_DEFLATE {
            return Err(self.corrupt(format!("unsupported compression method {}", fixed[2])));
        }
        let flg = fixed[3];
        if flg & FLG_RESERVED != 0 {
            return Err(self.corrupt(format!("reserved FLG bits set ({flg:#04x})")));
        }

        let hcrc = flg & FHCRC != 0;
        let mut header_crc = crc32fast::Hasher::new();
        if hcrc {
            header_crc.update(&fixed);
        }

        if flg & FEXTRA != 0 {
            let mut xlen_bytes = [0u8; 2];
            self.read_exact_buffered(src, &mut xlen_bytes)?;
            let xlen = u16::from_le_bytes(xlen_bytes) as usize;
            let mut extra = vec![0u8; xlen];
            self.read_exact_buffered(src, &mut extra)?;
            if hcrc {
                header_crc.update(&xlen_bytes);
                header_crc.update(&extra);
            }
        }
        if flg & FNAME != 0 {
            self.skip_header_string(src, hcrc, &mut header_crc)?;
        }
        if flg & FCOMMENT != 0 {
            self.skip_header_string(src, hcrc, &mut header_crc)?;
        }
        if hcrc {
            let mut stored = [0u8; 2];
            self.read_exact_buffered(src, &mut stored)?;
            let expected = u16::from_le_bytes(stored);
            let actual = (header_crc.finalize() & 0xffff) as u16;
            if expected != actual {
                return Err(self.corrupt(format!(
                    "header CRC16 mismatch: stored {expected:#06x}, computed {actual:#06x}"
                )));
            }
        }

        self.inflate.reset(false);
        self.crc = crc32fast::Hasher::new();
        self.member_out = 0;
        Ok(true)
    }

    /// Consumes a NUL-terminated header string, bounded to 65535 bytes.
    fn skip_header_string<R: Read>(
        &mut self,
        src: &mut R,
        hcrc: bool,
        header_crc: &mut crc32fast::Hasher,
    ) -> Result<()> {
        for _ in 0..=MAX_HEADER_STRING {
            let b = self.next_byte(src)?;
            if hcrc {
                header_crc.update(&[b]);
            }
            if b == 0 {
                return Ok(());
            }
        }
        Err(self.corrupt("NUL-terminated header string exceeds 65535 bytes"))
    }

    /// Reads and verifies the 8-byte CRC32/ISIZE trailer of the member
    /// that just finished inflating.
    fn finish_member<R: Read>(&mut self, src: &mut R) -> Result<()> {
        let mut trailer = [0u8; 8];
        self.read_exact_buffered(src, &mut trailer)?;
        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let expected_isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        let actual_crc = std::mem::take(&mut self.crc).finalize();
        if expected_crc != actual_crc {
            return Err(Error::CrcMismatch {
                position: self.consumed - (self.filled - self.pos) as u64,
                expected: expected_crc,
                actual: actual_crc,
            });
        }
        let actual_isize = self.member_out as u32;
        if expected_isize != actual_isize {
            return Err(self.corrupt(format!(
                "ISIZE mismatch: stored {expected_isize}, inflated {actual_isize}"
            )));
        }
        self.member_out = 0;
        Ok(())
    }
}

impl std::fmt::Debug for GzipStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipStream")
            .field("concatenated", &self.concatenated)
            .field("eos", &self.eos)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gzip::metadata::encode_metadata_member;
    use crate::gzip::writer::compress_member;
    use flate2::Compression;

    fn read_all(bytes: &[u8], concatenated: bool) -> Result<Vec<u8>> {
        let mut src = bytes;
        let mut gz = GzipStream::open(&mut src, concatenated)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = gz.read(&mut src, &mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    #[test]
    fn single_member_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let member = compress_member(&data, Compression::default()).unwrap();
        assert_eq!(read_all(&member, true).unwrap(), data);
    }

    #[test]
    fn crosses_members_and_metadata() {
        let mut file = Vec::new();
        file.extend_from_slice(&compress_member(b"hello ", Compression::fast()).unwrap());
        file.extend_from_slice(&encode_metadata_member(&[1, 2, 3, 4, 5, 6, 7, 8]));
        file.extend_from_slice(&compress_member(b"ragzip", Compression::best()).unwrap());
        file.extend_from_slice(&encode_metadata_member(&[]));
        assert_eq!(read_all(&file, true).unwrap(), b"hello ragzip");
    }

    #[test]
    fn non_concatenated_stops_at_first_member() {
        let mut file = Vec::new();
        file.extend_from_slice(&compress_member(b"first", Compression::default()).unwrap());
        file.extend_from_slice(&compress_member(b"second", Compression::default()).unwrap());
        assert_eq!(read_all(&file, false).unwrap(), b"first");
    }

    #[test]
    fn skip_spans_members() {
        let mut file = Vec::new();
        file.extend_from_slice(&compress_member(b"0123456789", Compression::default()).unwrap());
        file.extend_from_slice(&compress_member(b"abcdefghij", Compression::default()).unwrap());
        let mut src = &file[..];
        let mut gz = GzipStream::open(&mut src, true).unwrap();
        gz.skip(&mut src, 13).unwrap();
        let mut buf = [0u8; 4];
        let n = gz.read(&mut src, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"defg");
    }

    #[test]
    fn detects_trailer_corruption() {
        let mut member = compress_member(b"payload bytes", Compression::default()).unwrap();
        let crc_at = member.len() - 8;
        member[crc_at] ^= 0xff;
        assert!(matches!(
            read_all(&member, true).unwrap_err(),
            Error::CrcMismatch { .. }
        ));
    }

    #[test]
    fn detects_truncated_member() {
        let member = compress_member(b"payload bytes", Compression::default()).unwrap();
        let truncated = &member[..member.len() - 12];
        assert!(read_all(truncated, true).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut src: &[u8] = &[0x50, 0x4b, 0x03, 0x04];
        assert!(GzipStream::open(&mut src, true).is_err());
    }
}
