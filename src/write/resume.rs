//! Resume-append: extending an existing ragzip file in place.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use flate2::Compression;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{validate_exponents, TreeSpec, VERSION_1_0};
use crate::gzip::MemberEncoder;
use crate::index::{CountingWriter, IndexTower};
use crate::read::{IndexCacheMode, RagzipReader};

use super::RagzipWriter;

impl RagzipWriter<BufWriter<File>> {
    /// Resumes an existing ragzip file, appending new content after the
    /// content already present.
    ///
    /// The file's footer, extensions, and tail indexes are read back,
    /// then everything from the earliest tail artifact on (tail level-1
    /// index, else first extension, else footer) is truncated away and
    /// rewritten at the next [`finish`](RagzipWriter::finish). Queued
    /// extensions carry over.
    ///
    /// The last, possibly partial, page is never re-read or
    /// re-processed: it stays on disk exactly as written, and appended
    /// bytes begin a brand-new page at the truncation offset, trading a
    /// little compression ratio at the seam.
    ///
    /// Fails when `(page_exponent, index_exponent)` or the format
    /// version differ from the file's. A file with zero logical content
    /// is truncated to nothing and started fresh.
    pub fn resume(file: File, page_exponent: u8, index_exponent: u8) -> Result<Self> {
        validate_exponents(page_exponent, index_exponent)?;

        let mut reader = match RagzipReader::with_cache(file, IndexCacheMode::Loaded) {
            Ok(reader) => reader,
            Err(err) => {
                return Err(Error::InvalidConfig(format!(
                    "cannot resume: not a readable ragzip file ({err})"
                )))
            }
        };
        if reader.version() != VERSION_1_0 {
            return Err(Error::InvalidConfig(format!(
                "cannot append to a ragzip of version {:#010x}",
                reader.version()
            )));
        }
        if reader.page_size_exponent() != page_exponent
            || reader.index_size_exponent() != index_exponent
        {
            return Err(Error::InvalidConfig(format!(
                "cannot append with page/index exponents {page_exponent}/{index_exponent} \
                 to a file using {}/{}",
                reader.page_size_exponent(),
                reader.index_size_exponent()
            )));
        }

        let size = reader.len();
        let extensions = reader.extensions().to_vec();

        if size == 0 {
            // Much simpler to start over; queued extensions survive.
            let mut file = reader.into_inner();
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            let mut writer = Self::new(BufWriter::new(file), page_exponent, index_exponent)?;
            writer.extensions = extensions;
            return Ok(writer);
        }

        let tree = TreeSpec {
            levels: reader.levels(),
            index_exponent,
            page_exponent,
        };
        let levels = tree.levels as usize;
        let top_index_offset = reader.top_index_offset();
        let footer_offset = reader.footer_offset();

        let mut tower = IndexTower::new(index_exponent);
        for (level, payload) in reader.tail_index_payloads()? {
            tower.seed_level(level as usize, payload);
        }

        // The truncation point: the start of the earliest artifact that
        // will be rewritten at the next finish. Every parent level's
        // last entry points at the truncated tail index below it and is
        // dropped; the popped level-2 value is the tail level-1 offset.
        let truncate_at = if levels == 1 {
            top_index_offset
        } else if levels >= 2 {
            let mut tail_offset = 0;
            for level in (2..=levels).rev() {
                tail_offset = tower.pop_last(level).ok_or_else(|| Error::InvalidFormat {
                    offset: top_index_offset,
                    reason: format!("tail index of level {level} is empty"),
                })?;
            }
            tail_offset
        } else {
            match extensions.first().and_then(|ext| ext.self_offset) {
                Some(offset) => offset,
                None => footer_offset,
            }
        };

        // The last page stays on disk as written, short or not, with
        // its level-1 entry untouched; the next page starts fresh at
        // the truncation offset.
        if levels == 0 {
            // The single page at offset 0 was never indexed; its entry
            // must exist before a second page can be recorded.
            tower.seed_level(1, 0u64.to_be_bytes().to_vec());
        }

        debug!(
            size,
            truncate_at = format_args!("{truncate_at:#x}"),
            tail_entries = tower.occupancy(1),
            "resuming ragzip file"
        );

        let mut file = reader.into_inner();
        file.set_len(truncate_at)?;
        file.seek(SeekFrom::Start(truncate_at))?;

        Ok(Self {
            sink: CountingWriter::with_offset(BufWriter::new(file), truncate_at),
            tree,
            encoder: MemberEncoder::new(Compression::default()),
            tower,
            current_page_start: truncate_at,
            page_fill: 0,
            total_uncompressed: size,
            extensions,
            finished: false,
        })
    }
}

impl RagzipWriter<BufWriter<File>> {
    /// Truncates the file and starts a brand-new ragzip stream in it,
    /// discarding any previous content.
    pub fn create_truncated(
        mut file: File,
        page_exponent: u8,
        index_exponent: u8,
    ) -> Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Self::new(BufWriter::new(file), page_exponent, index_exponent)
    }
}

impl<W: Write> RagzipWriter<W> {
    /// Extensions queued for the footer (own appends plus, after a
    /// resume, the ones carried over from the file).
    pub fn extensions(&self) -> &[crate::format::Extension] {
        &self.extensions
    }
}
