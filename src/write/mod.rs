//! Streaming ragzip writing.
//!
//! [`RagzipWriter`] partitions the bytes written to it into fixed-size
//! pages, emits every page as an independent gzip member, and maintains
//! the cascading index tower as pages complete. Finishing the stream
//! flushes the partial indexes, the extensions, and the fixed 64-byte
//! footer.
//!
//! The writer works over any [`Write`] sink: output position is tracked
//! arithmetically, so append-only destinations (sockets, stdout) work
//! exactly like files. Resuming an existing file additionally needs
//! read/truncate access and is provided for `File` sinks in
//! [`resume`](RagzipWriter::resume).

mod resume;

use std::io::Write;

use flate2::Compression;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::format::{
    validate_exponents, Extension, Footer, TreeSpec, MAX_CAPACITY, MAX_EXTENSION_COUNT,
    MAX_EXTENSION_PAYLOAD, VERSION_1_0,
};
use crate::gzip::MemberEncoder;
use crate::index::{CountingWriter, IndexTower, MetadataSink};

/// Statistics returned by [`RagzipWriter::finish`].
#[must_use = "the write summary reports what was actually written"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Total uncompressed content bytes.
    pub uncompressed_size: u64,
    /// Total bytes of the produced ragzip stream.
    pub compressed_size: u64,
    /// Number of content pages.
    pub pages: u64,
    /// Number of index levels recorded in the footer.
    pub levels: u8,
}

impl WriteSummary {
    /// Fraction of the input size saved by compression (negative when
    /// the output grew).
    pub fn space_savings(&self) -> f64 {
        if self.uncompressed_size == 0 {
            return 0.0;
        }
        1.0 - self.compressed_size as f64 / self.uncompressed_size as f64
    }
}

/// A streaming ragzip encoder.
///
/// Implements [`Write`]; call [`finish`](Self::finish) to emit the index
/// tail, extensions, and footer. Dropping the writer without finishing
/// produces plain concatenated gzip with no ragzip trailer.
///
/// # Example
///
/// ```rust,ignore
/// use ragzip::RagzipWriter;
/// use std::io::Write;
///
/// let file = std::fs::File::create("out.rgz")?;
/// let mut writer = RagzipWriter::new(std::io::BufWriter::new(file), 13, 12)?;
/// writer.write_all(b"some content")?;
/// let summary = writer.finish()?;
/// println!("{} pages, {} levels", summary.pages, summary.levels);
/// ```
pub struct RagzipWriter<W: Write> {
    sink: CountingWriter<W>,
    tree: TreeSpec,
    encoder: MemberEncoder,
    tower: IndexTower,
    /// File offset where the current page's member starts.
    current_page_start: u64,
    /// Bytes of the current page already stored.
    page_fill: u64,
    total_uncompressed: u64,
    extensions: Vec<Extension>,
    finished: bool,
}

impl<W: Write> RagzipWriter<W> {
    /// Starts a new ragzip stream on `sink`.
    ///
    /// The destination is assumed to begin at offset 0; all metadata
    /// offsets are relative to the first byte written. Page size is
    /// `2^page_exponent` (exponent in 9..=30), each index holds
    /// `2^index_exponent` entries (exponent in 1..=12).
    pub fn new(sink: W, page_exponent: u8, index_exponent: u8) -> Result<Self> {
        validate_exponents(page_exponent, index_exponent)?;
        Ok(Self {
            sink: CountingWriter::new(sink),
            tree: TreeSpec {
                levels: 0,
                index_exponent,
                page_exponent,
            },
            encoder: MemberEncoder::new(Compression::default()),
            tower: IndexTower::new(index_exponent),
            current_page_start: 0,
            page_fill: 0,
            total_uncompressed: 0,
            extensions: Vec::new(),
            finished: false,
        })
    }

    /// Sets the deflate level used for page members.
    pub fn with_compression(mut self, level: Compression) -> Self {
        self.encoder = MemberEncoder::new(level);
        self
    }

    /// Queues an extension for the footer chain.
    ///
    /// Fails when the payload exceeds 32 KiB or 50 extensions are
    /// already queued; either check fires before any byte is written.
    pub fn append_extension(&mut self, extension: Extension) -> Result<&mut Self> {
        if extension.payload().len() > MAX_EXTENSION_PAYLOAD {
            return Err(Error::ExtensionPayloadTooLarge {
                len: extension.payload().len(),
            });
        }
        if self.extensions.len() >= MAX_EXTENSION_COUNT {
            return Err(Error::TooManyExtensions {
                count: self.extensions.len(),
            });
        }
        self.extensions.push(extension);
        Ok(self)
    }

    /// The uncompressed bytes accepted so far.
    pub fn uncompressed_size(&self) -> u64 {
        self.total_uncompressed
    }

    fn write_content(&mut self, mut data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidConfig("writer is already finished".into()));
        }
        match self.total_uncompressed.checked_add(data.len() as u64) {
            Some(total) if total < MAX_CAPACITY => {}
            _ => {
                return Err(Error::CapacityExceeded {
                    size: self.total_uncompressed.saturating_add(data.len() as u64),
                })
            }
        }

        let page_size = self.tree.page_size();
        while !data.is_empty() {
            if self.page_fill == page_size {
                self.roll_page()?;
            }
            if !self.encoder.is_open() {
                // Lazy open: an empty stream produces no page member at
                // all.
                self.current_page_start = self.sink.offset();
                self.page_fill = 0;
                self.encoder.begin(&mut self.sink)?;
            }

            let take = ((page_size - self.page_fill) as usize).min(data.len());
            self.encoder.write(&mut self.sink, &data[..take])?;
            self.page_fill += take as u64;
            self.total_uncompressed += take as u64;
            data = &data[take..];
        }
        Ok(())
    }

    /// Finishes the full page that was just written, records it into
    /// level 1, and opens the next member.
    fn roll_page(&mut self) -> Result<()> {
        debug_assert_eq!(self.page_fill, self.tree.page_size());
        if self.encoder.is_open() {
            self.encoder.finish(&mut self.sink)?;
        }
        self.tower
            .add_record(self.current_page_start, 1, &mut self.sink)?;
        debug!(
            page_start = format_args!("{:#x}", self.current_page_start),
            next = format_args!("{:#x}", self.sink.offset()),
            "page complete"
        );
        self.current_page_start = self.sink.offset();
        self.page_fill = 0;
        self.encoder.begin(&mut self.sink)?;
        Ok(())
    }

    /// Finishes the ragzip stream: closes the open page member, flushes
    /// the index tower, writes extensions and the 64-byte footer, and
    /// flushes the sink.
    pub fn finish(mut self) -> Result<WriteSummary> {
        self.finished = true;

        let had_open_member = self.encoder.is_open();
        if had_open_member {
            self.encoder.finish(&mut self.sink)?;
        }

        let page_size = self.tree.page_size();
        let (levels, top_index_offset) = if self.total_uncompressed <= page_size {
            // At most one page: the tree is elided entirely and the
            // footer points at the first page.
            (0, 0)
        } else {
            // The still-open member is the unrecorded final page.
            if had_open_member && self.page_fill > 0 {
                self.tower
                    .add_record(self.current_page_start, 1, &mut self.sink)?;
            }
            self.tower.finish(&mut self.sink)?
        };

        let mut previous_extension_offset: i64 = -1;
        for extension in &self.extensions {
            if extension.payload().len() > MAX_EXTENSION_PAYLOAD {
                // Refusing here would waste the whole written stream;
                // the entry is dropped instead of corrupting the chain.
                warn!(
                    id = extension.id(),
                    len = extension.payload().len(),
                    "skipping oversized extension at finish"
                );
                continue;
            }
            let offset = self.sink.offset();
            self.sink
                .write_metadata(&extension.encode_payload(previous_extension_offset))?;
            previous_extension_offset = offset as i64;
        }

        let footer = Footer {
            version: VERSION_1_0,
            tree: TreeSpec {
                levels,
                ..self.tree
            },
            uncompressed_size: self.total_uncompressed,
            top_index_offset,
            extensions_tail_offset: match previous_extension_offset {
                -1 => None,
                off => Some(off as u64),
            },
        };
        self.sink.write_metadata(&footer.encode_payload())?;
        self.sink.flush()?;

        let pages = if self.total_uncompressed == 0 {
            0
        } else {
            (self.total_uncompressed - 1) / page_size + 1
        };
        Ok(WriteSummary {
            uncompressed_size: self.total_uncompressed,
            compressed_size: self.sink.offset(),
            pages,
            levels,
        })
    }
}

impl<W: Write> Write for RagzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_content(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}

impl<W: Write> std::fmt::Debug for RagzipWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagzipWriter")
            .field("page_exponent", &self.tree.page_exponent)
            .field("index_exponent", &self.tree.index_exponent)
            .field("total_uncompressed", &self.total_uncompressed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FOOTER_LEN;

    #[test]
    fn rejects_bad_exponents() {
        assert!(RagzipWriter::new(Vec::new(), 8, 5).is_err());
        assert!(RagzipWriter::new(Vec::new(), 31, 5).is_err());
        assert!(RagzipWriter::new(Vec::new(), 13, 0).is_err());
        assert!(RagzipWriter::new(Vec::new(), 13, 13).is_err());
    }

    #[test]
    fn empty_stream_is_footer_only() {
        let writer = RagzipWriter::new(Vec::new(), 10, 5).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.uncompressed_size, 0);
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.levels, 0);
        assert_eq!(summary.compressed_size, FOOTER_LEN);
    }

    #[test]
    fn extension_limits_are_enforced_on_append() {
        let mut writer = RagzipWriter::new(Vec::new(), 10, 5).unwrap();
        let big = Extension::custom(0, 1, vec![0u8; MAX_EXTENSION_PAYLOAD + 1]).unwrap();
        assert!(matches!(
            writer.append_extension(big).unwrap_err(),
            Error::ExtensionPayloadTooLarge { .. }
        ));
        for i in 0..MAX_EXTENSION_COUNT {
            writer
                .append_extension(Extension::custom(0, i as i32, b"x".to_vec()).unwrap())
                .unwrap();
        }
        assert!(matches!(
            writer
                .append_extension(Extension::custom(0, 99, b"x".to_vec()).unwrap())
                .unwrap_err(),
            Error::TooManyExtensions { count: 50 }
        ));
    }

    #[test]
    fn capacity_guard_fires_before_io() {
        let mut writer = RagzipWriter::new(Vec::new(), 10, 5).unwrap();
        writer.total_uncompressed = MAX_CAPACITY - 1;
        assert!(matches!(
            writer.write_content(b"x").unwrap_err(),
            Error::CapacityExceeded { .. }
        ));
    }
}
