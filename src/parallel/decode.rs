//! The parallel ragzip decoder.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::MAX_PARALLEL_PAGE_EXPONENT;
use crate::gzip::GzipStream;
use crate::read::{IndexCacheMode, RagzipReader};

use super::{build_pool, DEFAULT_MAX_BUFFERED_PAGES};

/// Options for parallel decoding.
#[derive(Debug, Clone)]
pub struct ParallelDecodeOptions {
    /// Number of inflate workers (0 = one per core).
    pub threads: usize,
    /// Maximum pages buffered in memory at once.
    pub max_buffered_pages: usize,
}

impl Default for ParallelDecodeOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            max_buffered_pages: DEFAULT_MAX_BUFFERED_PAGES,
        }
    }
}

impl ParallelDecodeOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of inflate workers (0 = auto).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the bound on pages buffered in memory (at least 1).
    pub fn max_buffered_pages(mut self, pages: usize) -> Self {
        self.max_buffered_pages = pages.max(1);
        self
    }
}

/// Statistics returned by [`ParallelDecoder::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Bytes written to the output file.
    pub uncompressed_size: u64,
    /// Number of pages decoded.
    pub pages: u64,
}

/// One page's compressed extent and logical placement.
struct PageTask {
    gz_start: u64,
    gz_end: u64,
    logical_len: usize,
}

/// Decompresses a ragzip file using every core.
///
/// The index tree is walked once to learn every page's compressed
/// extent; pages are then read in bounded batches, inflated in
/// parallel, and written at their fixed logical offsets.
pub struct ParallelDecoder {
    input: PathBuf,
    output: PathBuf,
    options: ParallelDecodeOptions,
}

impl ParallelDecoder {
    /// Prepares a parallel decode of `input` into `output`.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            options: ParallelDecodeOptions::default(),
        }
    }

    /// Replaces the pipeline options.
    pub fn with_options(mut self, options: ParallelDecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the pipeline to completion.
    pub fn run(&self) -> Result<DecodeSummary> {
        let file = File::open(&self.input).map_err(|e| Error::Io(e).in_stage("walk"))?;
        let mut reader = RagzipReader::with_cache(file, IndexCacheMode::Loaded)
            .map_err(|e| e.in_stage("walk"))?;
        let tree = reader.tree_spec();
        if tree.page_exponent > MAX_PARALLEL_PAGE_EXPONENT {
            return Err(Error::InvalidConfig(format!(
                "page size exponent {} exceeds {MAX_PARALLEL_PAGE_EXPONENT} (2 MiB); pages are buffered in memory in parallel mode",
                tree.page_exponent
            )));
        }
        let total = reader.len();

        let output = File::create(&self.output).map_err(|e| Error::Io(e).in_stage("write"))?;
        let mut out = BufWriter::new(output);
        if total == 0 {
            out.flush().map_err(|e| Error::Io(e).in_stage("write"))?;
            return Ok(DecodeSummary {
                uncompressed_size: 0,
                pages: 0,
            });
        }

        let tasks = self.collect_tasks(&mut reader)?;
        debug!(pages = tasks.len(), total, "parallel decode starting");

        let pool = build_pool(self.options.threads)?;
        let mut input = reader.into_inner();

        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(self.options.max_buffered_pages);
        for chunk in tasks.chunks(self.options.max_buffered_pages) {
            batch.clear();
            for task in chunk {
                let len = (task.gz_end - task.gz_start) as usize;
                let mut gz = vec![0u8; len];
                input
                    .seek(SeekFrom::Start(task.gz_start))
                    .and_then(|_| input.read_exact(&mut gz))
                    .map_err(|e| Error::Io(e).in_stage("read"))?;
                batch.push(gz);
            }

            let pages: Vec<Vec<u8>> = pool
                .install(|| {
                    chunk
                        .par_iter()
                        .zip(batch.par_iter())
                        .map(|(task, gz)| inflate_page(gz, task.logical_len, task.gz_start))
                        .collect::<Result<_>>()
                })
                .map_err(|e| e.in_stage("unzip"))?;

            for page in pages {
                out.write_all(&page)
                    .map_err(|e| Error::Io(e).in_stage("write"))?;
            }
        }
        out.flush().map_err(|e| Error::Io(e).in_stage("write"))?;

        Ok(DecodeSummary {
            uncompressed_size: total,
            pages: tasks.len() as u64,
        })
    }

    /// Walks the whole index tree and returns one task per page, in
    /// page order.
    fn collect_tasks(&self, reader: &mut RagzipReader<File>) -> Result<Vec<PageTask>> {
        let tree = reader.tree_spec();
        let total = reader.len();
        let mut tasks = Vec::with_capacity(total.div_ceil(tree.page_size()) as usize);

        if tree.levels == 0 {
            // A single page: its member run ends where the metadata
            // begins. Any extension members inside the range are empty
            // gzip and decode to nothing.
            let gz_end = reader
                .extensions()
                .first()
                .and_then(|ext| ext.self_offset)
                .unwrap_or_else(|| reader.footer_offset());
            tasks.push(PageTask {
                gz_start: 0,
                gz_end,
                logical_len: total as usize,
            });
            return Ok(tasks);
        }

        self.walk_index(
            reader,
            tree.levels as usize,
            reader.top_index_offset(),
            0,
            &mut tasks,
        )
        .map_err(|e| e.in_stage("walk"))?;
        Ok(tasks)
    }

    fn walk_index(
        &self,
        reader: &mut RagzipReader<File>,
        level: usize,
        index_offset: u64,
        position_bits: u64,
        tasks: &mut Vec<PageTask>,
    ) -> Result<()> {
        let tree = reader.tree_spec();
        let total = reader.len();
        let payload = reader.metadata_payload_at(index_offset)?;
        if payload.len() % 8 != 0 {
            return Err(Error::InvalidFormat {
                offset: index_offset,
                reason: format!("index payload of {} bytes is not a multiple of 8", payload.len()),
            });
        }
        let entries: Vec<u64> = payload
            .chunks_exact(8)
            .map(|c| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(c);
                u64::from_be_bytes(raw)
            })
            .collect();

        for (slot, &entry) in entries.iter().enumerate() {
            if entry >= index_offset {
                return Err(Error::NonMonotoneOffset {
                    found: entry,
                    limit: index_offset,
                });
            }
            let bits = (position_bits << tree.index_exponent) | slot as u64;
            if level > 1 {
                self.walk_index(reader, level - 1, entry, bits, tasks)?;
            } else {
                // The page's members end where the next page (or the
                // enclosing index itself) starts.
                let gz_end = entries.get(slot + 1).copied().unwrap_or(index_offset);
                let logical_start = bits << tree.page_exponent;
                let logical_end = total.min(logical_start + tree.page_size());
                tasks.push(PageTask {
                    gz_start: entry,
                    gz_end,
                    logical_len: (logical_end - logical_start) as usize,
                });
            }
        }
        Ok(())
    }
}

/// Inflates one page's compressed extent into exactly `logical_len`
/// bytes. The extent may include interleaved empty metadata members,
/// which decode to nothing and are crossed transparently.
fn inflate_page(gz: &[u8], logical_len: usize, gz_start: u64) -> Result<Vec<u8>> {
    let mut src = gz;
    let mut stream = GzipStream::open(&mut src, true)?;
    let mut out = vec![0u8; logical_len];
    let mut at = 0;
    while at < logical_len {
        let n = stream.read(&mut src, &mut out[at..])?;
        if n == 0 {
            return Err(Error::Corrupt {
                position: gz_start,
                reason: format!(
                    "page ended {} bytes short of its logical length {logical_len}",
                    logical_len - at
                ),
            });
        }
        at += n;
    }
    Ok(out)
}
