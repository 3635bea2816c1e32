//! Empty gzip members carrying ragzip `RA` metadata.
//!
//! Indexes, extensions, and the footer are stored as "empty" gzip
//! members: valid gzip, zero uncompressed bytes, with a single `RA`
//! extra subfield holding the metadata payload. Ordinary gzip decoders
//! pass through them without producing output, which keeps a ragzip
//! file a byte-for-byte valid gzip stream.

use std::io::Read;

use crate::error::{Error, Result};

use super::header::ExtraField;
use super::{CM_DEFLATE, FEXTRA, FLG_RESERVED, ID1, ID2, OS_UNKNOWN};

/// First id byte of the ragzip subfield: 'R'.
pub(crate) const SI1_RA: u8 = b'R';
/// Second id byte of the ragzip subfield: 'A'.
pub(crate) const SI2_RA: u8 = b'A';

/// Fixed bytes of a metadata member around the payload: 10-byte header,
/// 2-byte XLEN, 4-byte subfield header, the empty deflate block `03 00`,
/// and the 8-byte all-zero trailer.
pub(crate) const METADATA_OVERHEAD: usize = 26;

/// Distance from a metadata member's start to the first payload byte.
pub(crate) const METADATA_PAYLOAD_OFFSET: u64 = 16;

/// The two-byte deflate encoding of an empty stream.
const EMPTY_DEFLATE: [u8; 2] = [0x03, 0x00];

/// Encodes an empty gzip member whose only payload is one `RA` subfield
/// of `payload` bytes. The result is exactly `26 + payload.len()` bytes.
pub(crate) fn encode_metadata_member(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= 0xffff - 4);
    let xlen = (4 + payload.len()) as u16;
    let sflen = payload.len() as u16;

    let mut member = Vec::with_capacity(METADATA_OVERHEAD + payload.len());
    member.extend_from_slice(&[
        ID1, ID2, CM_DEFLATE, FEXTRA, 0, 0, 0, 0, // MTIME
        0,          // XFL
        OS_UNKNOWN, // OS
    ]);
    member.extend_from_slice(&xlen.to_le_bytes());
    member.push(SI1_RA);
    member.push(SI2_RA);
    member.extend_from_slice(&sflen.to_le_bytes());
    member.extend_from_slice(payload);
    member.extend_from_slice(&EMPTY_DEFLATE);
    member.extend_from_slice(&[0u8; 8]); // CRC32 = 0, ISIZE = 0
    member
}

/// Parses the gzip header at the source's current position and returns
/// the payload of the first `RA` subfield.
///
/// Only the header is consumed; the (empty) deflate body and trailer are
/// left unread. `offset` is the member's file offset, used in errors.
pub(crate) fn read_metadata_payload<R: Read>(src: &mut R, offset: u64) -> Result<Vec<u8>> {
    let mut fixed = [0u8; 10];
    src.read_exact(&mut fixed).map_err(|e| premature(offset, e))?;

    if fixed[0] != ID1 || fixed[1] != ID2 || fixed[2] != CM_DEFLATE {
        return Err(Error::InvalidFormat {
            offset,
            reason: format!(
                "not a gzip member ({:#04x} {:#04x} cm={})",
                fixed[0], fixed[1], fixed[2]
            ),
        });
    }
    let flg = fixed[3];
    if flg & FLG_RESERVED != 0 {
        return Err(Error::InvalidFormat {
            offset,
            reason: format!("reserved FLG bits set ({flg:#04x})"),
        });
    }
    if flg & FEXTRA == 0 {
        return Err(Error::MissingRaSubfield { offset });
    }

    let mut xlen_bytes = [0u8; 2];
    src.read_exact(&mut xlen_bytes).map_err(|e| premature(offset, e))?;
    let xlen = u16::from_le_bytes(xlen_bytes) as usize;
    let mut extra = vec![0u8; xlen];
    src.read_exact(&mut extra).map_err(|e| premature(offset, e))?;

    let parsed = ExtraField::parse(&extra, offset)?;
    match parsed.find_first(SI1_RA, SI2_RA) {
        Some(sf) => Ok(sf.payload.clone()),
        None => Err(Error::MissingRaSubfield { offset }),
    }
}

fn premature(offset: u64, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidFormat {
            offset,
            reason: "EOF inside gzip header".into(),
        }
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_length_is_overhead_plus_payload() {
        for len in [0usize, 1, 38, 4096] {
            let payload = vec![0xabu8; len];
            let member = encode_metadata_member(&payload);
            assert_eq!(member.len(), METADATA_OVERHEAD + len);
        }
    }

    #[test]
    fn payload_starts_at_fixed_offset() {
        let payload = *b"\x00\x01\x02\x03\x04\x05\x06\x07";
        let member = encode_metadata_member(&payload);
        let at = METADATA_PAYLOAD_OFFSET as usize;
        assert_eq!(&member[at..at + 8], &payload);
    }

    #[test]
    fn roundtrips_through_the_parser() {
        let payload = b"some ragzip metadata".to_vec();
        let member = encode_metadata_member(&payload);
        let got = read_metadata_payload(&mut &member[..], 0).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn decodes_as_empty_gzip() {
        let member = encode_metadata_member(&[9u8; 100]);
        let mut src = &member[..];
        let mut gz = crate::gzip::GzipStream::open(&mut src, false).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(gz.read(&mut src, &mut buf).unwrap(), 0);
    }

    #[test]
    fn missing_subfield_is_reported() {
        // A member with an extra field holding only an unrelated subfield.
        let mut member = encode_metadata_member(&[1, 2, 3]);
        member[12] = b'X';
        member[13] = b'Y';
        assert!(matches!(
            read_metadata_payload(&mut &member[..], 42).unwrap_err(),
            Error::MissingRaSubfield { offset: 42 }
        ));
    }
}
