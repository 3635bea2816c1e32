//! Page-granular LRU caching over a seekable byte source.
//!
//! [`CachingPageReader`] is independent of the ragzip layer: it caches
//! fixed-size pages of *any* `Read + Seek` source. Its intended use is
//! as a buffering layer on top of [`RagzipReader`](crate::RagzipReader)
//! to serve small-jump access patterns without repeated tree descents,
//! but it works over a plain file just as well.

use std::collections::HashMap;
use std::hash::Hash;
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{Error, Result};

/// Smallest cacheable page (16 bytes).
pub const MIN_CACHE_PAGE_SIZE: usize = 16;
/// Largest cacheable page (2 MiB).
pub const MAX_CACHE_PAGE_SIZE: usize = 1 << 21;

/// A small least-recently-used map.
///
/// Recency is tracked with a monotonic stamp per entry; eviction scans
/// for the minimum stamp. Capacities here are bounded (at most 0xffff
/// entries), so the linear eviction scan is cheaper than maintaining an
/// ordered structure on every access.
pub(crate) struct LruMap<K, V> {
    map: HashMap<K, (u64, V)>,
    tick: u64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 1);
        Self {
            map: HashMap::new(),
            tick: 0,
            capacity,
        }
    }

    /// Looks up a key, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        self.map.get_mut(key).map(|(stamp, value)| {
            *stamp = tick;
            &*value
        })
    }

    /// Inserts a value, evicting the least recently used entry when the
    /// map is full. Returns the evicted key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        let mut evicted = None;
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            if let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, (stamp, _))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        self.tick += 1;
        self.map.insert(key, (self.tick, value));
        evicted
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

/// A read-only LRU page cache over a seekable byte source.
///
/// A cache miss loads one entire page from the source; hits never touch
/// it. The source size is captured at construction, so live changes to
/// the underlying content are unsupported (there is no staleness
/// detection). A short page is only tolerated at end-of-source.
pub struct CachingPageReader<R: Read + Seek> {
    source: R,
    page_size: usize,
    max_pages: usize,
    len: u64,
    pos: u64,
    cache: LruMap<u64, Vec<u8>>,
}

impl<R: Read + Seek> CachingPageReader<R> {
    /// Wraps `source`, caching up to `max_pages` pages of `page_size`
    /// bytes. The page size must lie in `[16, 2^21]`.
    pub fn new(mut source: R, page_size: usize, max_pages: usize) -> Result<Self> {
        if !(MIN_CACHE_PAGE_SIZE..=MAX_CACHE_PAGE_SIZE).contains(&page_size) {
            return Err(Error::InvalidConfig(format!(
                "cache page size {page_size} not in [2^4, 2^21]"
            )));
        }
        if max_pages == 0 {
            return Err(Error::InvalidConfig("cache must hold at least one page".into()));
        }
        let len = source.seek(SeekFrom::End(0))?;
        Ok(Self {
            source,
            page_size,
            max_pages,
            len,
            pos: 0,
            cache: LruMap::new(max_pages),
        })
    }

    /// Total size of the underlying source.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the underlying source is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the page containing `position` is currently cached.
    pub fn has_page(&mut self, position: u64) -> bool {
        let page_id = position / self.page_size as u64;
        self.cache.get(&page_id).is_some()
    }

    /// Returns the wrapped source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Ensures the page containing `position` is cached.
    fn fetch(&mut self, position: u64) -> Result<()> {
        let page_id = position / self.page_size as u64;
        if self.cache.get(&page_id).is_some() {
            return Ok(());
        }

        let start = page_id * self.page_size as u64;
        let end = (start + self.page_size as u64).min(self.len);
        let want = (end - start) as usize;
        let mut page = vec![0u8; want];
        self.source.seek(SeekFrom::Start(start))?;
        self.source.read_exact(&mut page).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Corrupt {
                    position: start,
                    reason: format!("source ended inside page {page_id:#x} ({want} bytes expected)"),
                }
            } else {
                Error::Io(e)
            }
        })?;

        if let Some(old) = self.cache.insert(page_id, page) {
            debug!(page = format_args!("{old:#x}"), "evicting cached page");
        }
        Ok(())
    }

    /// Reads at `position` without moving the cursor. Returns the number
    /// of bytes read; 0 only at end-of-source (or for an empty buffer).
    /// At most one page boundary is crossed per call.
    pub fn read_at(&mut self, position: u64, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() || position >= self.len {
            return Ok(0);
        }
        self.fetch(position)?;
        let page_id = position / self.page_size as u64;
        let page = match self.cache.get(&page_id) {
            Some(page) => page,
            None => {
                return Err(Error::Corrupt {
                    position,
                    reason: "page vanished from cache".into(),
                })
            }
        };
        let at = (position % self.page_size as u64) as usize;
        let n = dst.len().min(page.len() - at);
        dst[..n].copy_from_slice(&page[at..at + n]);
        Ok(n)
    }

    /// Copies `count` bytes starting at `position` into `target`,
    /// advancing through as many cached pages as needed. The cursor is
    /// untouched. Returns the number of bytes written, which is short
    /// only at end-of-source.
    pub fn transfer_to<W: Write>(
        &mut self,
        position: u64,
        count: u64,
        target: &mut W,
    ) -> Result<u64> {
        let mut written = 0u64;
        let mut at = position;
        let mut buf = vec![0u8; self.page_size];
        while written < count && at < self.len {
            let want = (count - written).min(buf.len() as u64) as usize;
            let n = self.read_at(at, &mut buf[..want])?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n])?;
            written += n as u64;
            at += n as u64;
        }
        Ok(written)
    }

    /// Maximum number of cached pages.
    pub fn capacity(&self) -> usize {
        self.max_pages
    }
}

impl<R: Read + Seek> Read for CachingPageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for CachingPageReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(at) => Some(at),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(at) => {
                self.pos = at;
                Ok(at)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before byte 0",
            )),
        }
    }
}
