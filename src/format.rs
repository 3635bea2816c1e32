//! The ragzip container format: tree geometry, footer, and extensions.
//!
//! A ragzip file partitions its uncompressed content into fixed-size
//! pages of `2^P` bytes, each stored as one gzip member. Absolute file
//! offsets of the page members are collected into level-1 indexes of
//! `2^I` entries; offsets of level-1 index members cascade into level-2
//! indexes, and so on up to a single top index. Indexes, extensions, and
//! the fixed 64-byte footer all live in empty metadata members, so the
//! whole file remains an ordinary gzip stream.

use crate::error::{Error, Result};
use crate::gzip::metadata::METADATA_OVERHEAD;

/// Format version 1.0, as embedded in the footer.
pub const VERSION_1_0: u32 = 0x0001_0000;

/// The forever-fixed length of the footer member, in bytes.
pub const FOOTER_LEN: u64 = 64;

/// The format capacity: uncompressed sizes must stay below 2^62 bytes.
pub const MAX_CAPACITY: u64 = 1 << 62;

/// Deepest possible index tower.
pub const MAX_LEVELS: u8 = 53;

/// Smallest supported page size exponent (512-byte pages).
pub const MIN_PAGE_EXPONENT: u8 = 9;
/// Largest supported page size exponent (1 GiB pages).
pub const MAX_PAGE_EXPONENT: u8 = 30;
/// Largest page size exponent in parallel mode, where whole pages are
/// buffered in memory (2 MiB pages).
pub const MAX_PARALLEL_PAGE_EXPONENT: u8 = 21;

/// Smallest supported index size exponent (2 entries).
pub const MIN_INDEX_EXPONENT: u8 = 1;
/// Largest supported index size exponent (4096 entries).
pub const MAX_INDEX_EXPONENT: u8 = 12;

/// Maximum extension payload, in bytes (32 KiB).
pub const MAX_EXTENSION_PAYLOAD: usize = 0x8000;
/// Maximum number of extensions in a file.
pub const MAX_EXTENSION_COUNT: usize = 50;

/// Footer payload: 32 content bytes plus 6 bytes of zero padding so the
/// member is exactly [`FOOTER_LEN`] bytes.
pub(crate) const FOOTER_PAYLOAD_LEN: usize = FOOTER_LEN as usize - METADATA_OVERHEAD;
const FOOTER_CONTENT_LEN: usize = 32;

/// Validates a `(page, index)` exponent pair for the streaming writer.
pub(crate) fn validate_exponents(page_exponent: u8, index_exponent: u8) -> Result<()> {
    if !(MIN_PAGE_EXPONENT..=MAX_PAGE_EXPONENT).contains(&page_exponent) {
        return Err(Error::InvalidConfig(format!(
            "page size exponent {page_exponent} not in [{MIN_PAGE_EXPONENT}..{MAX_PAGE_EXPONENT}] (512 bytes to 1 GiB)"
        )));
    }
    if !(MIN_INDEX_EXPONENT..=MAX_INDEX_EXPONENT).contains(&index_exponent) {
        return Err(Error::InvalidConfig(format!(
            "index size exponent {index_exponent} not in [{MIN_INDEX_EXPONENT}..{MAX_INDEX_EXPONENT}] (2 to 4096 records)"
        )));
    }
    Ok(())
}

/// The packed `(reserved, levels, I, P)` geometry of an index tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSpec {
    /// Number of index levels (0 for single-page files).
    pub levels: u8,
    /// Index size exponent: each index holds `2^I` offsets.
    pub index_exponent: u8,
    /// Page size exponent: each page holds `2^P` uncompressed bytes.
    pub page_exponent: u8,
}

impl TreeSpec {
    /// Packs the tree spec into its 32-bit footer representation.
    pub fn pack(self) -> u32 {
        (u32::from(self.levels) << 16)
            | (u32::from(self.index_exponent) << 8)
            | u32::from(self.page_exponent)
    }

    /// Unpacks a 32-bit footer tree spec (the reserved high byte is
    /// ignored, as mandated for version 1.0).
    pub fn unpack(raw: u32) -> Self {
        Self {
            levels: ((raw >> 16) & 0xff) as u8,
            index_exponent: ((raw >> 8) & 0xff) as u8,
            page_exponent: (raw & 0xff) as u8,
        }
    }

    pub(crate) fn validate(self, footer_offset: u64) -> Result<()> {
        if self.levels > MAX_LEVELS {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!("unsupported number of levels: {}", self.levels),
            });
        }
        if !(MIN_PAGE_EXPONENT..=MAX_PAGE_EXPONENT).contains(&self.page_exponent)
            || !(MIN_INDEX_EXPONENT..=MAX_INDEX_EXPONENT).contains(&self.index_exponent)
        {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!("unsupported tree spec {:#010x}", self.pack()),
            });
        }
        Ok(())
    }

    /// Page size in bytes (`2^P`).
    pub fn page_size(&self) -> u64 {
        1u64 << self.page_exponent
    }

    /// Mask extracting the offset within a page.
    pub fn page_mask(&self) -> u64 {
        self.page_size() - 1
    }

    /// Index capacity in entries (`2^I`).
    pub fn index_size(&self) -> u64 {
        1u64 << self.index_exponent
    }

    /// Mask extracting a slot number within an index.
    pub fn index_mask(&self) -> u64 {
        self.index_size() - 1
    }
}

/// The decoded content of the fixed 64-byte footer member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    pub version: u32,
    pub tree: TreeSpec,
    pub uncompressed_size: u64,
    /// Offset of the top index member; 0 when `levels == 0`.
    pub top_index_offset: u64,
    /// Offset of the last-written extension, if any.
    pub extensions_tail_offset: Option<u64>,
}

impl Footer {
    /// Encodes the footer payload: 32 content bytes plus zero padding to
    /// [`FOOTER_PAYLOAD_LEN`].
    pub fn encode_payload(&self) -> [u8; FOOTER_PAYLOAD_LEN] {
        let mut payload = [0u8; FOOTER_PAYLOAD_LEN];
        payload[0..4].copy_from_slice(&self.version.to_be_bytes());
        payload[4..8].copy_from_slice(&self.tree.pack().to_be_bytes());
        payload[8..16].copy_from_slice(&self.uncompressed_size.to_be_bytes());
        payload[16..24].copy_from_slice(&self.top_index_offset.to_be_bytes());
        let tail = match self.extensions_tail_offset {
            Some(off) => off as i64,
            None => -1,
        };
        payload[24..32].copy_from_slice(&tail.to_be_bytes());
        payload
    }

    /// Decodes and validates a footer payload. `footer_offset` is the
    /// footer member's own position, which every stored offset must
    /// precede.
    pub fn decode(payload: &[u8], footer_offset: u64) -> Result<Self> {
        if payload.len() < FOOTER_CONTENT_LEN {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!(
                    "footer payload of {} bytes is shorter than {FOOTER_CONTENT_LEN}",
                    payload.len()
                ),
            });
        }
        let be_u32 = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&payload[at..at + 4]);
            u32::from_be_bytes(raw)
        };
        let be_i64 = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&payload[at..at + 8]);
            i64::from_be_bytes(raw)
        };

        let version = be_u32(0);
        if version != VERSION_1_0 {
            return Err(Error::UnsupportedVersion { version });
        }
        let tree = TreeSpec::unpack(be_u32(4));
        tree.validate(footer_offset)?;

        let uncompressed_size = be_i64(8);
        if uncompressed_size < 0 || uncompressed_size as u64 >= MAX_CAPACITY {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!("uncompressed size {uncompressed_size:#x} out of range"),
            });
        }

        let top_index_offset = be_i64(16);
        if top_index_offset < 0 || (tree.levels > 0 && top_index_offset as u64 >= footer_offset) {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!(
                    "top index offset {top_index_offset:#x} is not before the footer"
                ),
            });
        }

        let extensions_tail = be_i64(24);
        let extensions_tail_offset = match extensions_tail {
            -1 => None,
            off if off >= 0 && (off as u64) < footer_offset => Some(off as u64),
            off => {
                return Err(Error::InvalidFormat {
                    offset: footer_offset,
                    reason: format!("extensions offset {off:#x} is not before the footer"),
                })
            }
        };

        Ok(Self {
            version,
            tree,
            uncompressed_size: uncompressed_size as u64,
            top_index_offset: top_index_offset as u64,
            extensions_tail_offset,
        })
    }
}

/// Bit 7 of the extension flags, reserved to the format specification.
const FLAG_SPEC: u8 = 0x80;

/// A forward-compatible directive stored in the footer's extension
/// chain.
///
/// Extensions form a singly linked list whose tail offset is recorded in
/// the footer; readers restore them in first-written order. Bit 7 of the
/// flags marks specification-reserved extensions and cannot be set
/// through [`Extension::custom`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    flags: u8,
    id: i32,
    payload: Vec<u8>,
    /// Where this extension's member starts, filled in by the reader.
    pub(crate) self_offset: Option<u64>,
}

impl Extension {
    /// Creates a user extension. Only the low 7 flag bits may be set.
    ///
    /// Payload size is not checked here; the writer refuses payloads
    /// over 32 KiB when the extension is appended.
    pub fn custom(flags: u8, id: i32, payload: impl Into<Vec<u8>>) -> Result<Self> {
        if flags & FLAG_SPEC != 0 {
            return Err(Error::InvalidConfig(
                "extension flag bit 7 is reserved to the specification".into(),
            ));
        }
        Ok(Self {
            flags,
            id,
            payload: payload.into(),
            self_offset: None,
        })
    }

    /// Creates a specification-reserved extension (bit 7 set).
    #[allow(dead_code)]
    pub(crate) fn spec(id: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            flags: FLAG_SPEC,
            id,
            payload: payload.into(),
            self_offset: None,
        }
    }

    /// True when the specification-reserved flag (bit 7) is set.
    pub fn is_spec(&self) -> bool {
        self.flags & FLAG_SPEC != 0
    }

    /// The 8 flag bits.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// The extension identifier.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The extension payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encodes the metadata payload of this extension's member, chained
    /// to the previously written extension (or -1 for the list head).
    pub(crate) fn encode_payload(&self, previous_offset: i64) -> Vec<u8> {
        let mut payload = Vec::with_capacity(13 + self.payload.len());
        payload.extend_from_slice(&previous_offset.to_be_bytes());
        payload.push(self.flags);
        payload.extend_from_slice(&self.id.to_be_bytes());
        payload.extend_from_slice(&self.payload);
        payload
    }

    /// Decodes one extension from its metadata payload. Returns the
    /// extension and the offset of the previous list entry (-1 at the
    /// head). The caller enforces chain monotonicity.
    pub(crate) fn decode_payload(payload: &[u8], self_offset: u64) -> Result<(Self, i64)> {
        if payload.len() < 13 {
            return Err(Error::InvalidFormat {
                offset: self_offset,
                reason: format!("extension payload of {} bytes is shorter than 13", payload.len()),
            });
        }
        let mut raw8 = [0u8; 8];
        raw8.copy_from_slice(&payload[0..8]);
        let previous = i64::from_be_bytes(raw8);
        let flags = payload[8];
        let mut raw4 = [0u8; 4];
        raw4.copy_from_slice(&payload[9..13]);
        let id = i32::from_be_bytes(raw4);
        Ok((
            Self {
                flags,
                id,
                payload: payload[13..].to_vec(),
                self_offset: Some(self_offset),
            },
            previous,
        ))
    }
}
