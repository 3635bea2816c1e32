//! Multi-threaded ragzip encoding and decoding.
//!
//! Both pipelines process pages in bounded, strictly ordered batches
//! over a rayon pool: deflate work fans out across the pool while reads,
//! index cascades, and writes stay in `page_id` order on the driving
//! thread. The batch bound (`max_buffered_pages`) is the back-pressure
//! hinge: at most that many pages are ever buffered in memory, so the
//! page size exponent is capped at 21 (2 MiB pages) in parallel mode.

mod decode;
mod encode;

pub use decode::{DecodeSummary, ParallelDecodeOptions, ParallelDecoder};
pub use encode::{ParallelEncodeOptions, ParallelEncoder};

use crate::error::{Error, Result};

/// Builds the rayon pool shared by one pipeline run. `threads == 0`
/// means one worker per available core.
fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| {
            Error::InvalidConfig(format!("cannot build worker pool: {e}")).in_stage("startup")
        })
}

/// Default bound on in-flight pages per batch.
const DEFAULT_MAX_BUFFERED_PAGES: usize = 20;
