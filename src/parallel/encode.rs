//! The parallel ragzip encoder.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{
    Footer, TreeSpec, MAX_CAPACITY, MAX_INDEX_EXPONENT, MAX_PARALLEL_PAGE_EXPONENT,
    MIN_INDEX_EXPONENT, MIN_PAGE_EXPONENT, VERSION_1_0,
};
use crate::gzip::compress_member;
use crate::index::{CountingWriter, IndexTower, MetadataSink};
use crate::write::WriteSummary;

use super::{build_pool, DEFAULT_MAX_BUFFERED_PAGES};

/// Options for parallel encoding.
#[derive(Debug, Clone)]
pub struct ParallelEncodeOptions {
    /// Number of compression workers (0 = one per core).
    pub threads: usize,
    /// Maximum pages buffered in memory at once.
    pub max_buffered_pages: usize,
    /// Deflate level for page members.
    pub level: Compression,
}

impl Default for ParallelEncodeOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            max_buffered_pages: DEFAULT_MAX_BUFFERED_PAGES,
            level: Compression::default(),
        }
    }
}

impl ParallelEncodeOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of compression workers (0 = auto).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the bound on pages buffered in memory (at least 1).
    pub fn max_buffered_pages(mut self, pages: usize) -> Self {
        self.max_buffered_pages = pages.max(1);
        self
    }

    /// Sets the deflate level for page members.
    pub fn level(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }
}

/// Compresses a file into ragzip format using every core.
///
/// Pages are read in order, compressed in parallel, and written back in
/// order while the same index tower as the streaming writer cascades
/// their offsets, so the produced layout is identical to streaming
/// output up to deflate implementation details. Content is read with
/// positional slices, so the input must be a real file.
///
/// # Example
///
/// ```rust,ignore
/// use ragzip::parallel::{ParallelEncoder, ParallelEncodeOptions};
///
/// let summary = ParallelEncoder::new("input.bin", "input.bin.gz", 13, 12)?
///     .with_options(ParallelEncodeOptions::new().threads(8))
///     .run()?;
/// ```
pub struct ParallelEncoder {
    input: PathBuf,
    output: PathBuf,
    tree: TreeSpec,
    options: ParallelEncodeOptions,
}

impl ParallelEncoder {
    /// Prepares a parallel encode of `input` into `output`.
    ///
    /// The page size exponent is limited to 21 (2 MiB) because whole
    /// pages are buffered in memory.
    pub fn new(
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        page_exponent: u8,
        index_exponent: u8,
    ) -> Result<Self> {
        if !(MIN_PAGE_EXPONENT..=MAX_PARALLEL_PAGE_EXPONENT).contains(&page_exponent) {
            return Err(Error::InvalidConfig(format!(
                "page size exponent {page_exponent} not in [{MIN_PAGE_EXPONENT}..{MAX_PARALLEL_PAGE_EXPONENT}] (512 bytes to 2 MiB) for parallel mode"
            )));
        }
        if !(MIN_INDEX_EXPONENT..=MAX_INDEX_EXPONENT).contains(&index_exponent) {
            return Err(Error::InvalidConfig(format!(
                "index size exponent {index_exponent} not in [{MIN_INDEX_EXPONENT}..{MAX_INDEX_EXPONENT}] (2 to 4096 records)"
            )));
        }
        Ok(Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            tree: TreeSpec {
                levels: 0,
                index_exponent,
                page_exponent,
            },
            options: ParallelEncodeOptions::default(),
        })
    }

    /// Replaces the pipeline options.
    pub fn with_options(mut self, options: ParallelEncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the pipeline to completion.
    pub fn run(&self) -> Result<WriteSummary> {
        let total = std::fs::metadata(&self.input)
            .map_err(|e| Error::Io(e).in_stage("slice"))?
            .len();
        if total >= MAX_CAPACITY {
            return Err(Error::CapacityExceeded { size: total });
        }

        let page_size = self.tree.page_size();
        let pages = total.div_ceil(page_size);
        debug!(total, pages, "parallel encode starting");

        let pool = build_pool(self.options.threads)?;
        let mut input = File::open(&self.input).map_err(|e| Error::Io(e).in_stage("slice"))?;
        let output = File::create(&self.output).map_err(|e| Error::Io(e).in_stage("write"))?;
        let mut sink = CountingWriter::new(BufWriter::new(output));
        let mut tower = IndexTower::new(self.tree.index_exponent);

        let batch_pages = self.options.max_buffered_pages as u64;
        let mut batch = Vec::with_capacity(self.options.max_buffered_pages);
        let mut page_id = 0u64;
        while page_id < pages {
            // Slice and read the next bounded batch, in page order.
            batch.clear();
            let batch_end = (page_id + batch_pages).min(pages);
            while page_id < batch_end {
                let logical_start = page_id * page_size;
                let len = (total - logical_start).min(page_size) as usize;
                let mut data = vec![0u8; len];
                input
                    .seek(SeekFrom::Start(logical_start))
                    .and_then(|_| input.read_exact(&mut data))
                    .map_err(|e| Error::Io(e).in_stage("read"))?;
                batch.push(data);
                page_id += 1;
            }

            // Deflate the whole batch across the pool.
            let level = self.options.level;
            let members: Vec<Vec<u8>> = pool
                .install(|| {
                    batch
                        .par_iter()
                        .map(|data| compress_member(data, level))
                        .collect::<Result<_>>()
                })
                .map_err(|e| e.in_stage("zip"))?;

            // Drain strictly in page order: append the member, then
            // cascade its offset; index members interleave exactly as
            // in streaming mode.
            for member in members {
                let page_offset = sink.offset();
                sink.write_all(&member)
                    .map_err(|e| Error::Io(e).in_stage("write"))?;
                tower
                    .add_record(page_offset, 1, &mut sink)
                    .map_err(|e| e.in_stage("order"))?;
            }
        }

        // A single page (or none) elides the tree entirely, matching the
        // streaming writer.
        let (levels, top_index_offset) = if total <= page_size {
            (0, 0)
        } else {
            tower.finish(&mut sink).map_err(|e| e.in_stage("order"))?
        };

        let footer = Footer {
            version: VERSION_1_0,
            tree: TreeSpec {
                levels,
                ..self.tree
            },
            uncompressed_size: total,
            top_index_offset,
            extensions_tail_offset: None,
        };
        sink.write_metadata(&footer.encode_payload())
            .map_err(|e| e.in_stage("write"))?;
        sink.flush().map_err(|e| Error::Io(e).in_stage("write"))?;

        debug!(levels, compressed = sink.offset(), "parallel encode finished");
        Ok(WriteSummary {
            uncompressed_size: total,
            compressed_size: sink.offset(),
            pages,
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_large_pages_in_parallel_mode() {
        assert!(ParallelEncoder::new("a", "b", 22, 5).is_err());
        assert!(ParallelEncoder::new("a", "b", 8, 5).is_err());
        assert!(ParallelEncoder::new("a", "b", 13, 0).is_err());
        assert!(ParallelEncoder::new("a", "b", 13, 12).is_ok());
    }
}
