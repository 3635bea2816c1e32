//! Round-trip and file-layout tests for the streaming writer.
//!
//! The concrete scenarios (empty file, one short page, two pages, a
//! full level-1 index, the level-2 crossing) pin down the exact tree
//! shapes the format mandates at each boundary.

mod common;

use std::io::{Cursor, Read, Seek, SeekFrom};

use ragzip::{RagzipReader, VERSION_1_0};

/// Streams the whole logical content through the ragzip reader.
fn read_all(file: &[u8]) -> Vec<u8> {
    let mut reader = RagzipReader::open(Cursor::new(file.to_vec())).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn empty_input_produces_footer_only_file() {
    let file = common::encode_to_vec(b"", 10, 5);
    assert_eq!(file.len(), 64);

    let footer = common::raw_footer(&file);
    assert_eq!(footer.version, VERSION_1_0);
    assert_eq!(footer.levels, 0);
    assert_eq!(footer.uncompressed_size, 0);
    assert_eq!(footer.top_index_offset, 0);
    assert_eq!(footer.extensions_tail_offset, -1);

    let mut reader = RagzipReader::open(Cursor::new(file.clone())).unwrap();
    assert_eq!(reader.len(), 0);
    assert!(reader.is_empty());
    assert_eq!(reader.levels(), 0);
    let mut buf = [0u8; 1];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
    assert!(reader.read_at(0, &mut buf).is_err());

    assert!(common::gunzip_all(&file).is_empty());
}

#[test]
fn one_short_page_elides_the_tree() {
    let data = common::deterministic_bytes(42, 1000);
    let file = common::encode_to_vec(&data, 10, 5);

    let footer = common::raw_footer(&file);
    assert_eq!(footer.levels, 0);
    assert_eq!(footer.top_index_offset, 0);
    assert_eq!(footer.uncompressed_size, 1000);

    let mut reader = RagzipReader::open(Cursor::new(file.clone())).unwrap();
    assert_eq!(reader.len(), 1000);
    let mut tail = vec![0u8; 500];
    assert_eq!(reader.read_at(500, &mut tail).unwrap(), 500);
    assert_eq!(tail, &data[500..]);

    assert_eq!(read_all(&file), data);
    assert_eq!(common::gunzip_all(&file), data);
}

#[test]
fn exactly_one_full_page_still_elides_the_tree() {
    let data = common::deterministic_bytes(43, 1024);
    let file = common::encode_to_vec(&data, 10, 5);
    let footer = common::raw_footer(&file);
    assert_eq!(footer.levels, 0);
    assert_eq!(footer.top_index_offset, 0);
    assert_eq!(read_all(&file), data);
}

#[test]
fn two_pages_grow_one_index_level() {
    let data = common::deterministic_bytes(44, 1025);
    let file = common::encode_to_vec(&data, 10, 5);

    let footer = common::raw_footer(&file);
    assert_eq!(footer.levels, 1);

    // The level-1 index holds both page offsets: page 0 at the start of
    // the file, page 1 at a real gzip member.
    let index = common::metadata_payload_at(&file, footer.top_index_offset);
    let entries = common::index_entries(&index);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], 0);
    assert!(entries[1] > 0 && entries[1] < footer.top_index_offset);
    let second_page = entries[1] as usize;
    assert_eq!(&file[second_page..second_page + 2], &[0x1f, 0x8b]);

    assert_eq!(read_all(&file), data);
    assert_eq!(common::gunzip_all(&file), data);
}

#[test]
fn full_level_one_index_stays_one_level() {
    // 0x8000 bytes = 32 pages of 1024 = exactly 2^I entries.
    let data = common::deterministic_bytes(45, 0x8000);
    let file = common::encode_to_vec(&data, 10, 5);

    let footer = common::raw_footer(&file);
    assert_eq!(footer.levels, 1);
    let entries = common::index_entries(&common::metadata_payload_at(&file, footer.top_index_offset));
    assert_eq!(entries.len(), 32);

    assert_eq!(read_all(&file), data);
}

#[test]
fn one_byte_past_a_full_index_opens_level_two() {
    let data = common::deterministic_bytes(46, 0x8001);
    let file = common::encode_to_vec(&data, 10, 5);

    let footer = common::raw_footer(&file);
    assert_eq!(footer.levels, 2);

    // Level 2 references the rolled-over full index and the level-1
    // tail, which holds the single overflow page.
    let level2 = common::index_entries(&common::metadata_payload_at(&file, footer.top_index_offset));
    assert_eq!(level2.len(), 2);
    assert!(level2[0] < level2[1]);
    let tail = common::index_entries(&common::metadata_payload_at(&file, level2[1]));
    assert_eq!(tail.len(), 1);
    let full = common::index_entries(&common::metadata_payload_at(&file, level2[0]));
    assert_eq!(full.len(), 32);

    assert_eq!(read_all(&file), data);
    assert_eq!(common::gunzip_all(&file), data);
}

#[test]
fn every_offset_is_monotone() {
    let data = common::deterministic_bytes(47, 0x8001);
    let file = common::encode_to_vec(&data, 10, 5);
    let footer = common::raw_footer(&file);

    fn check(file: &[u8], index_offset: u64, level: u8) {
        let entries = common::index_entries(&common::metadata_payload_at(file, index_offset));
        for &entry in &entries {
            assert!(entry < index_offset, "offset {entry:#x} not before {index_offset:#x}");
            if level > 1 {
                check(file, entry, level - 1);
            }
        }
    }
    check(&file, footer.top_index_offset, footer.levels);
    assert!(footer.top_index_offset < (file.len() - 64) as u64);
}

#[test]
fn open_is_idempotent() {
    let data = common::deterministic_bytes(48, 5000);
    let file = common::encode_to_vec(&data, 10, 5);
    let a = RagzipReader::open(Cursor::new(file.clone())).unwrap();
    let b = RagzipReader::open(Cursor::new(file)).unwrap();
    assert_eq!(a.tree_spec(), b.tree_spec());
    assert_eq!(a.len(), b.len());
    assert_eq!(a.extensions(), b.extensions());
}

#[test]
fn larger_exponent_grid_roundtrips() {
    for (p, i) in [(9, 1), (10, 2), (12, 3), (13, 12)] {
        for len in [0usize, 1, 511, 512, 513, 70_000] {
            let data = common::deterministic_bytes(1000 + len as u64, len);
            let file = common::encode_to_vec(&data, p, i);
            assert_eq!(read_all(&file), data, "P={p} I={i} len={len}");
            assert_eq!(common::gunzip_all(&file), data, "P={p} I={i} len={len}");
        }
    }
}

#[test]
fn streamed_reader_reports_logical_positions() {
    let data = common::deterministic_bytes(49, 3000);
    let file = common::encode_to_vec(&data, 10, 5);
    let mut reader = RagzipReader::open(Cursor::new(file)).unwrap();
    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 3000);
    assert_eq!(reader.seek(SeekFrom::Start(1500)).unwrap(), 1500);
    assert_eq!(reader.seek(SeekFrom::Current(-500)).unwrap(), 1000);
    let mut buf = [0u8; 100];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[1000..1100]);
    assert_eq!(reader.position(), 1100);
}
