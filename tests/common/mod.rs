//! Shared helpers for ragzip integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration
//! test file compiles as a separate crate and uses a subset of these.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use ragzip::RagzipWriter;

/// Deterministic pseudo-random content for a given seed.
pub fn deterministic_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Encodes `data` into an in-memory ragzip stream.
pub fn encode_to_vec(data: &[u8], page_exponent: u8, index_exponent: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer =
        RagzipWriter::new(Cursor::new(&mut out), page_exponent, index_exponent).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap();
    out
}

/// Decodes a whole file with an independent gzip implementation
/// (flate2's multi-member decoder), proving gzip transparency.
pub fn gunzip_all(file: &[u8]) -> Vec<u8> {
    let mut decoder = flate2::read::MultiGzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    out
}

/// The five big-endian footer fields of a ragzip file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFooter {
    pub version: u32,
    pub levels: u8,
    pub index_exponent: u8,
    pub page_exponent: u8,
    pub uncompressed_size: u64,
    pub top_index_offset: u64,
    pub extensions_tail_offset: i64,
}

/// Parses the footer fields straight out of the file's last 64 bytes.
pub fn raw_footer(file: &[u8]) -> RawFooter {
    assert!(file.len() >= 64, "file shorter than the footer");
    let payload = &file[file.len() - 64 + 16..];
    let be_u32 = |at: usize| u32::from_be_bytes(payload[at..at + 4].try_into().unwrap());
    let be_u64 = |at: usize| u64::from_be_bytes(payload[at..at + 8].try_into().unwrap());
    let treespec = be_u32(4);
    RawFooter {
        version: be_u32(0),
        levels: ((treespec >> 16) & 0xff) as u8,
        index_exponent: ((treespec >> 8) & 0xff) as u8,
        page_exponent: (treespec & 0xff) as u8,
        uncompressed_size: be_u64(8),
        top_index_offset: be_u64(16),
        extensions_tail_offset: be_u64(24) as i64,
    }
}

/// Reads the `RA` payload of the metadata member starting at `offset`.
pub fn metadata_payload_at(file: &[u8], offset: u64) -> Vec<u8> {
    let at = offset as usize;
    assert_eq!(&file[at..at + 4], &[0x1f, 0x8b, 0x08, 0x04], "not a metadata member");
    assert_eq!(&file[at + 12..at + 14], b"RA");
    let sflen = u16::from_le_bytes([file[at + 14], file[at + 15]]) as usize;
    file[at + 16..at + 16 + sflen].to_vec()
}

/// The big-endian offsets stored in an index payload.
pub fn index_entries(payload: &[u8]) -> Vec<u64> {
    assert_eq!(payload.len() % 8, 0);
    payload
        .chunks_exact(8)
        .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
        .collect()
}

/// Builds a raw metadata member around `payload` (test fixture for
/// crafting not-quite-conformant files).
pub fn metadata_member(payload: &[u8]) -> Vec<u8> {
    let xlen = (4 + payload.len()) as u16;
    let mut member = Vec::with_capacity(26 + payload.len());
    member.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 255]);
    member.extend_from_slice(&xlen.to_le_bytes());
    member.extend_from_slice(b"RA");
    member.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    member.extend_from_slice(payload);
    member.extend_from_slice(&[0x03, 0x00]);
    member.extend_from_slice(&[0u8; 8]);
    member
}

/// Builds a raw extension metadata payload.
pub fn extension_payload(previous: i64, flags: u8, id: i32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(13 + data.len());
    payload.extend_from_slice(&previous.to_be_bytes());
    payload.push(flags);
    payload.extend_from_slice(&id.to_be_bytes());
    payload.extend_from_slice(data);
    payload
}

/// Builds a raw 64-byte footer member.
pub fn footer_member(footer: RawFooter) -> Vec<u8> {
    let mut payload = [0u8; 38];
    payload[0..4].copy_from_slice(&footer.version.to_be_bytes());
    let treespec = (u32::from(footer.levels) << 16)
        | (u32::from(footer.index_exponent) << 8)
        | u32::from(footer.page_exponent);
    payload[4..8].copy_from_slice(&treespec.to_be_bytes());
    payload[8..16].copy_from_slice(&footer.uncompressed_size.to_be_bytes());
    payload[16..24].copy_from_slice(&footer.top_index_offset.to_be_bytes());
    payload[24..32].copy_from_slice(&footer.extensions_tail_offset.to_be_bytes());
    let member = metadata_member(&payload);
    assert_eq!(member.len(), 64);
    member
}
