//! Random-access reading of ragzip files.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, trace, warn};

use crate::cache::LruMap;
use crate::error::{Error, Result};
use crate::format::{Extension, Footer, TreeSpec, FOOTER_LEN, MAX_EXTENSION_COUNT, MAX_EXTENSION_PAYLOAD};
use crate::gzip::metadata::{read_metadata_payload, METADATA_PAYLOAD_OFFSET, SI1_RA, SI2_RA};
use crate::gzip::GzipStream;

const TRANSFER_BUF: usize = 8192;

/// How the reader resolves index lookups during tree descent.
///
/// The trade-off is lookup time against memory: `Direct` reads 8 raw
/// bytes per level and never allocates, `Loaded` decodes whole index
/// payloads and throws them away, `Lru` keeps up to N payloads per
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexCacheMode {
    /// Read each 8-byte slot straight out of the index member, without
    /// opening it as gzip. This relies on the `RA` subfield being the
    /// first subfield of the member, which the format guarantees by
    /// construction; the footer having validated confers trust.
    #[default]
    Direct,
    /// Decode the whole index payload on every lookup and do not keep
    /// it. Slowest; provided for full-validation runs and as a fallback
    /// for unusual metadata members.
    Loaded,
    /// Keep up to N decoded index payloads per level, evicting the least
    /// recently used. N must be in `1..=0xffff`.
    Lru(u16),
}

/// A random-access reader over a ragzip file.
///
/// Logical (uncompressed) positions are reachable in O(log N) index
/// lookups instead of decompressing from the beginning. The reader
/// implements [`Read`] and [`Seek`] over the *logical* content: `Seek`
/// positions are uncompressed offsets and `seek(SeekFrom::End(0))`
/// reports the uncompressed size.
///
/// # Example
///
/// ```rust,ignore
/// use ragzip::{IndexCacheMode, RagzipReader};
/// use std::io::{Read, Seek, SeekFrom};
///
/// let file = std::fs::File::open("big.rgz")?;
/// let mut reader = RagzipReader::with_cache(file, IndexCacheMode::Lru(16))?;
/// reader.seek(SeekFrom::Start(1 << 30))?;
/// let mut buf = [0u8; 4096];
/// reader.read_exact(&mut buf)?;
/// ```
pub struct RagzipReader<R: Read + Seek> {
    src: R,
    footer: Footer,
    footer_offset: u64,
    cache_mode: IndexCacheMode,
    /// Per-level payload caches, indexed by level (slot 0 unused).
    caches: Vec<LruMap<u64, Vec<u8>>>,
    extensions: Vec<Extension>,
    extensions_truncated: bool,
    /// Logical position of the next `read`.
    position: u64,
    /// The live decoder for sequential reads, if one is open.
    stream: Option<GzipStream>,
}

impl<R: Read + Seek> RagzipReader<R> {
    /// Opens a ragzip file in the default (cacheless-direct) mode.
    pub fn open(src: R) -> Result<Self> {
        Self::with_cache(src, IndexCacheMode::default())
    }

    /// Opens a ragzip file with the given index lookup mode.
    ///
    /// Parses and validates the footer, then restores the extension
    /// list. The source is expected to hold the whole ragzip stream
    /// starting at byte 0.
    pub fn with_cache(mut src: R, cache_mode: IndexCacheMode) -> Result<Self> {
        if let IndexCacheMode::Lru(n) = cache_mode {
            if n == 0 {
                return Err(Error::InvalidConfig(
                    "LRU index cache must hold at least one index per level".into(),
                ));
            }
        }

        let file_size = src.seek(SeekFrom::End(0))?;
        if file_size < FOOTER_LEN {
            return Err(Error::InvalidFormat {
                offset: 0,
                reason: format!("file of {file_size} bytes is shorter than the 64-byte footer"),
            });
        }
        let footer_offset = file_size - FOOTER_LEN;
        src.seek(SeekFrom::Start(footer_offset))?;
        let mut raw = [0u8; FOOTER_LEN as usize];
        src.read_exact(&mut raw)?;

        // Cheap signature probe before trusting the bytes as gzip: a
        // footer member always starts 1f 8b 08 04 and its first subfield
        // is always 'RA'.
        if raw[0..4] != [0x1f, 0x8b, 0x08, 0x04] {
            return Err(Error::InvalidFormat {
                offset: footer_offset,
                reason: format!(
                    "footer does not start like a gzip member with FEXTRA: {:02x} {:02x} {:02x} {:02x}",
                    raw[0], raw[1], raw[2], raw[3]
                ),
            });
        }
        if raw[12] != SI1_RA || raw[13] != SI2_RA {
            return Err(Error::MissingRaSubfield {
                offset: footer_offset,
            });
        }

        let payload = read_metadata_payload(&mut &raw[..], footer_offset)?;
        let footer = Footer::decode(&payload, footer_offset)?;
        debug!(
            version = format_args!("{:#010x}", footer.version),
            levels = footer.tree.levels,
            page_exponent = footer.tree.page_exponent,
            index_exponent = footer.tree.index_exponent,
            uncompressed_size = footer.uncompressed_size,
            "opened ragzip footer"
        );

        let mut reader = Self {
            src,
            footer,
            footer_offset,
            cache_mode,
            caches: Vec::new(),
            extensions: Vec::new(),
            extensions_truncated: false,
            position: 0,
            stream: None,
        };
        reader.load_extensions()?;
        if let IndexCacheMode::Lru(n) = cache_mode {
            reader.caches = (0..=footer.tree.levels as usize)
                .map(|_| LruMap::new(n as usize))
                .collect();
        }
        Ok(reader)
    }

    fn load_extensions(&mut self) -> Result<()> {
        let mut next = match self.footer.extensions_tail_offset {
            Some(off) => off as i64,
            None => return Ok(()),
        };
        while next >= 0 && self.extensions.len() < MAX_EXTENSION_COUNT {
            let offset = next as u64;
            self.src.seek(SeekFrom::Start(offset))?;
            let payload = read_metadata_payload(&mut self.src, offset)?;
            let (ext, previous) = Extension::decode_payload(&payload, offset)?;
            if previous >= 0 && previous as u64 >= offset {
                return Err(Error::NonMonotoneOffset {
                    found: previous as u64,
                    limit: offset,
                });
            }
            next = previous;
            if ext.payload().len() > MAX_EXTENSION_PAYLOAD {
                debug!(
                    len = ext.payload().len(),
                    offset = format_args!("{offset:#x}"),
                    "ignoring oversized extension"
                );
                continue;
            }
            trace!(id = ext.id(), spec = ext.is_spec(), "found extension");
            self.extensions.push(ext);
        }
        if next >= 0 {
            self.extensions_truncated = true;
            warn!("further extensions were not loaded: the list already holds {MAX_EXTENSION_COUNT}");
        }
        self.extensions.reverse(); // restore first-written order
        Ok(())
    }

    /// The footer's format version.
    pub fn version(&self) -> u32 {
        self.footer.version
    }

    /// The index tree geometry.
    pub fn tree_spec(&self) -> TreeSpec {
        self.footer.tree
    }

    /// Number of index levels (0 for single-page files).
    pub fn levels(&self) -> u8 {
        self.footer.tree.levels
    }

    /// The page size exponent P.
    pub fn page_size_exponent(&self) -> u8 {
        self.footer.tree.page_exponent
    }

    /// The index size exponent I.
    pub fn index_size_exponent(&self) -> u8 {
        self.footer.tree.index_exponent
    }

    /// Total uncompressed size. Typically larger than the file itself.
    pub fn len(&self) -> u64 {
        self.footer.uncompressed_size
    }

    /// True when the file holds no uncompressed content.
    pub fn is_empty(&self) -> bool {
        self.footer.uncompressed_size == 0
    }

    /// The extensions found in the footer chain, in first-written order.
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// True when the file held more extensions than the format allows
    /// and the excess was left unloaded.
    pub fn extensions_truncated(&self) -> bool {
        self.extensions_truncated
    }

    /// The current logical position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn top_index_offset(&self) -> u64 {
        self.footer.top_index_offset
    }

    pub(crate) fn footer_offset(&self) -> u64 {
        self.footer_offset
    }

    /// Returns the wrapped source.
    pub fn into_inner(self) -> R {
        self.src
    }

    /// Decodes the metadata payload of the member at `offset`.
    pub(crate) fn metadata_payload_at(&mut self, offset: u64) -> Result<Vec<u8>> {
        self.src.seek(SeekFrom::Start(offset))?;
        read_metadata_payload(&mut self.src, offset)
    }

    /// Reads one big-endian offset slot from an index payload.
    fn slot_value(payload: &[u8], slot: usize, index_offset: u64) -> Result<u64> {
        match payload.get(slot * 8..slot * 8 + 8) {
            Some(bytes) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(u64::from_be_bytes(raw))
            }
            None => Err(Error::InvalidFormat {
                offset: index_offset,
                reason: format!(
                    "index slot {slot} beyond payload of {} entries",
                    payload.len() / 8
                ),
            }),
        }
    }

    /// Descends the index tree and returns the file offset of the gzip
    /// member holding `page_id`.
    fn locate_page(&mut self, page_id: u64) -> Result<u64> {
        let tree = self.footer.tree;
        let mut current = self.footer.top_index_offset;
        for level in (1..=tree.levels as usize).rev() {
            let slot =
                ((page_id >> ((level - 1) as u32 * tree.index_exponent as u32)) & tree.index_mask())
                    as usize;
            trace!(level, slot, offset = format_args!("{current:#x}"), "descending index");

            let next = match self.cache_mode {
                IndexCacheMode::Direct => {
                    // The 16 is the fixed distance from the member start
                    // to the first payload byte; the slot is read without
                    // opening the (empty) member.
                    let at = current + METADATA_PAYLOAD_OFFSET + 8 * slot as u64;
                    self.src.seek(SeekFrom::Start(at))?;
                    let mut raw = [0u8; 8];
                    self.src.read_exact(&mut raw).map_err(|e| {
                        if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            Error::InvalidFormat {
                                offset: at,
                                reason: "EOF inside index member".into(),
                            }
                        } else {
                            Error::Io(e)
                        }
                    })?;
                    u64::from_be_bytes(raw)
                }
                IndexCacheMode::Loaded => {
                    let payload = self.metadata_payload_at(current)?;
                    Self::slot_value(&payload, slot, current)?
                }
                IndexCacheMode::Lru(_) => {
                    let key = page_id >> (level as u32 * tree.index_exponent as u32);
                    let cached = self.caches[level]
                        .get(&key)
                        .map(|payload| Self::slot_value(payload, slot, current))
                        .transpose()?;
                    match cached {
                        Some(value) => value,
                        None => {
                            let payload = self.metadata_payload_at(current)?;
                            let value = Self::slot_value(&payload, slot, current)?;
                            debug!(
                                level,
                                key = format_args!("{key:#x}"),
                                "caching index"
                            );
                            if let Some(old) = self.caches[level].insert(key, payload) {
                                debug!(
                                    level,
                                    key = format_args!("{old:#x}"),
                                    "evicting cached index"
                                );
                            }
                            value
                        }
                    }
                }
            };

            if next >= current {
                return Err(Error::NonMonotoneOffset {
                    found: next,
                    limit: current,
                });
            }
            current = next;
        }
        trace!(page_id, offset = format_args!("{current:#x}"), "page located");
        Ok(current)
    }

    /// Opens a fresh decoder at the member holding `pos` and skips to
    /// the in-page offset. Returns the decoder; channel state untouched.
    fn open_at(&mut self, pos: u64) -> Result<GzipStream> {
        let tree = self.footer.tree;
        let page_offset = self.locate_page(pos >> tree.page_exponent)?;
        self.src.seek(SeekFrom::Start(page_offset))?;
        let mut stream = GzipStream::open(&mut self.src, true)?;
        stream.skip(&mut self.src, pos & tree.page_mask())?;
        Ok(stream)
    }

    /// Repositions the channel to logical position `pos`.
    ///
    /// Positions in `[0, len]` are accepted; `len` itself is the EOF
    /// position. Same-position seeks are free, and forward seeks within
    /// the current page skip on the live decoder instead of descending
    /// the tree.
    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        if pos == self.position {
            return Ok(());
        }
        let size = self.footer.uncompressed_size;
        if pos > size {
            return Err(Error::PositionOutOfRange {
                position: pos,
                size,
            });
        }
        if pos == size {
            // EOF position: nothing can be read from here.
            self.stream = None;
            self.position = pos;
            return Ok(());
        }

        let tree = self.footer.tree;
        let same_page = (pos >> tree.page_exponent) == (self.position >> tree.page_exponent);
        if same_page && pos > self.position {
            if let Some(stream) = &mut self.stream {
                trace!(
                    distance = pos - self.position,
                    "skipping forward within the current page"
                );
                stream.skip(&mut self.src, pos - self.position)?;
                self.position = pos;
                return Ok(());
            }
        }

        let stream = self.open_at(pos)?;
        self.stream = Some(stream);
        self.position = pos;
        Ok(())
    }

    /// Reads at logical position `pos` without mutating the channel
    /// position or its live decoder. Fills `dst` unless end-of-content
    /// intervenes; returns the number of bytes read.
    pub fn read_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        let size = self.footer.uncompressed_size;
        if pos >= size {
            return Err(Error::PositionOutOfRange {
                position: pos,
                size,
            });
        }
        let backup = self.src.stream_position()?;
        let result = self.detached_read(pos, dst);
        self.src.seek(SeekFrom::Start(backup))?;
        result
    }

    fn detached_read(&mut self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        let mut stream = self.open_at(pos)?;
        let want = dst
            .len()
            .min((self.footer.uncompressed_size - pos) as usize);
        let mut at = 0;
        while at < want {
            let n = stream.read(&mut self.src, &mut dst[at..want])?;
            if n == 0 {
                break;
            }
            at += n;
        }
        Ok(at)
    }

    /// Copies `count` logical bytes starting at `pos` into `target`
    /// without mutating the channel position. Returns the number of
    /// bytes transferred, which is short only at end-of-content.
    pub fn transfer_to<W: Write>(&mut self, pos: u64, count: u64, target: &mut W) -> Result<u64> {
        let size = self.footer.uncompressed_size;
        if pos >= size {
            return Err(Error::PositionOutOfRange {
                position: pos,
                size,
            });
        }
        let backup = self.src.stream_position()?;
        let result = self.detached_transfer(pos, count, target);
        self.src.seek(SeekFrom::Start(backup))?;
        result
    }

    fn detached_transfer<W: Write>(
        &mut self,
        pos: u64,
        count: u64,
        target: &mut W,
    ) -> Result<u64> {
        let mut stream = self.open_at(pos)?;
        let mut remaining = count.min(self.footer.uncompressed_size - pos);
        let mut total = 0u64;
        let mut buf = [0u8; TRANSFER_BUF];
        while remaining > 0 {
            let want = remaining.min(TRANSFER_BUF as u64) as usize;
            let n = stream.read(&mut self.src, &mut buf[..want])?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n])?;
            total += n as u64;
            remaining -= n as u64;
        }
        Ok(total)
    }

    /// Collects the rightmost (tail) index payload at every level, top
    /// level first. Used by resume-append.
    pub(crate) fn tail_index_payloads(&mut self) -> Result<Vec<(u8, Vec<u8>)>> {
        let tree = self.footer.tree;
        debug_assert!(self.footer.uncompressed_size > 0);
        let last_page = (self.footer.uncompressed_size - 1) >> tree.page_exponent;

        let mut tails = Vec::new();
        let mut current = self.footer.top_index_offset;
        for level in (1..=tree.levels as usize).rev() {
            let slot =
                ((last_page >> ((level - 1) as u32 * tree.index_exponent as u32)) & tree.index_mask())
                    as usize;
            let payload = self.metadata_payload_at(current)?;
            let next = Self::slot_value(&payload, slot, current)?;
            if next >= current {
                return Err(Error::NonMonotoneOffset {
                    found: next,
                    limit: current,
                });
            }
            tails.push((level as u8, payload));
            current = next;
        }
        Ok(tails)
    }
}

impl<R: Read + Seek> Read for RagzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.footer.uncompressed_size;
        if self.position >= size || buf.is_empty() {
            return Ok(0);
        }
        if self.stream.is_none() {
            let stream = self.open_at(self.position)?;
            self.stream = Some(stream);
        }
        let want = buf.len().min((size - self.position) as usize);
        let n = match &mut self.stream {
            Some(stream) => stream.read(&mut self.src, &mut buf[..want])?,
            None => 0,
        };
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for RagzipReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let size = self.footer.uncompressed_size;
        let target = match pos {
            SeekFrom::Start(at) => Some(at),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before byte 0")
        })?;
        self.seek_to(target)?;
        Ok(target)
    }
}

impl<R: Read + Seek> std::fmt::Debug for RagzipReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagzipReader")
            .field("uncompressed_size", &self.footer.uncompressed_size)
            .field("levels", &self.footer.tree.levels)
            .field("page_exponent", &self.footer.tree.page_exponent)
            .field("index_exponent", &self.footer.tree.index_exponent)
            .field("cache_mode", &self.cache_mode)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::RagzipWriter;
    use std::io::Cursor;

    fn encode(data: &[u8], extensions: Vec<Extension>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = RagzipWriter::new(Cursor::new(&mut out), 10, 2).unwrap();
        for ext in extensions {
            writer.append_extension(ext).unwrap();
        }
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        out
    }

    #[test]
    fn spec_extensions_survive_the_roundtrip() {
        let data = vec![7u8; 1000];
        let file = encode(
            &data,
            vec![
                Extension::custom(0x0a, 1001, b"my extension 1001".to_vec()).unwrap(),
                Extension::custom(0x0b, 1002, b"my extension 1002".to_vec()).unwrap(),
                Extension::spec(3, b"spec extension 3".to_vec()),
            ],
        );
        let reader = RagzipReader::open(Cursor::new(file)).unwrap();
        let exts = reader.extensions();
        assert_eq!(exts.len(), 3);
        assert!(!exts[0].is_spec());
        assert!(!exts[1].is_spec());
        assert!(exts[2].is_spec());
        assert_eq!(exts[2].id(), 3);
        assert_eq!(exts[0].id(), 1001);
    }

    #[test]
    fn rejects_files_shorter_than_the_footer() {
        let err = RagzipReader::open(Cursor::new(vec![0u8; 20])).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn rejects_plain_gzip_without_a_footer() {
        let member = crate::gzip::compress_member(&vec![1u8; 200], flate2::Compression::default())
            .unwrap();
        assert!(RagzipReader::open(Cursor::new(member)).is_err());
    }

    #[test]
    fn rejects_zero_sized_lru_cache() {
        let file = encode(b"x", Vec::new());
        assert!(matches!(
            RagzipReader::with_cache(Cursor::new(file), IndexCacheMode::Lru(0)).unwrap_err(),
            Error::InvalidConfig(_)
        ));
    }

    #[test]
    fn corrupted_index_offset_is_caught() {
        let data = vec![3u8; 5000];
        let mut file = encode(&data, Vec::new());
        // Point the footer's top index at itself by patching the stored
        // offset to something non-monotone.
        let footer_at = file.len() - 64;
        let top_at = footer_at + 16 + 16;
        let bogus = (file.len() as u64).to_be_bytes();
        file[top_at..top_at + 8].copy_from_slice(&bogus);
        assert!(RagzipReader::open(Cursor::new(file)).is_err());
    }

    #[test]
    fn sequential_read_crosses_interleaved_indexes() {
        // Small index size forces index members between page runs.
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let file = encode(&data, Vec::new());
        let mut reader = RagzipReader::open(Cursor::new(file)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
