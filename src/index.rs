//! The cascading index tower shared by the streaming writer and the
//! parallel encoder.
//!
//! One byte buffer per active level holds up to `2^I` big-endian
//! offsets. Recording an offset into a full level first emits that
//! level's buffer as a metadata member and cascades the emitted member's
//! own offset into the level above, so index members always appear after
//! everything they reference.

use std::io::Write;

use crate::error::Result;
use crate::format::MAX_LEVELS;
use crate::gzip::metadata::encode_metadata_member;

/// A byte sink that knows its absolute output offset and can emit
/// metadata members.
pub(crate) trait MetadataSink {
    fn offset(&self) -> u64;
    fn write_metadata(&mut self, payload: &[u8]) -> Result<()>;
}

/// An `io::Write` adapter that tracks the absolute output offset.
///
/// Both writers thread all output through this, which is what makes
/// append-only (non-seekable) sinks work: position is arithmetic, not a
/// seek. For resumed files the counter starts at the truncation offset.
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    offset: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_offset(inner, 0)
    }

    pub fn with_offset(inner: W, offset: u64) -> Self {
        Self { inner, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> MetadataSink for CountingWriter<W> {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn write_metadata(&mut self, payload: &[u8]) -> Result<()> {
        self.write_all(&encode_metadata_member(payload))?;
        Ok(())
    }
}

/// The per-level index buffers. Level 0 is the pages themselves and is
/// never used; levels run 1..=53.
pub(crate) struct IndexTower {
    index_max: usize,
    levels: Vec<Option<Vec<u8>>>,
}

impl IndexTower {
    pub fn new(index_exponent: u8) -> Self {
        Self {
            index_max: 1 << index_exponent,
            levels: vec![None; MAX_LEVELS as usize + 2],
        }
    }

    /// Records `offset` into the index of the given level, emitting the
    /// level and cascading upward when it is already full. The buffer is
    /// created lazily the first time a level is needed and reused across
    /// flushes.
    pub fn add_record(
        &mut self,
        offset: u64,
        level: usize,
        sink: &mut impl MetadataSink,
    ) -> Result<()> {
        debug_assert!((1..=MAX_LEVELS as usize).contains(&level));
        let full = self.levels[level]
            .as_ref()
            .is_some_and(|buf| buf.len() == 8 * self.index_max);
        if self.levels[level].is_none() {
            self.levels[level] = Some(Vec::with_capacity(8 * self.index_max));
        } else if full {
            let index_offset = sink.offset();
            let mut buf = self.levels[level].take().unwrap_or_default();
            sink.write_metadata(&buf)?;
            buf.clear();
            self.levels[level] = Some(buf);
            self.add_record(index_offset, level + 1, sink)?;
        }
        if let Some(buf) = &mut self.levels[level] {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        Ok(())
    }

    /// Flushes every active level bottom-up, cascading each emitted tail
    /// into the level above when one is active. Returns the number of
    /// levels and the top index offset (0 when no level is active).
    pub fn finish(&mut self, sink: &mut impl MetadataSink) -> Result<(u8, u64)> {
        let mut levels = 0u8;
        let mut top_index_offset = 0u64;
        for level in 1..=MAX_LEVELS as usize {
            if self.levels[level].is_none() {
                break;
            }
            levels = level as u8;
            let index_offset = sink.offset();
            top_index_offset = index_offset;

            let mut buf = self.levels[level].take().unwrap_or_default();
            sink.write_metadata(&buf)?;
            buf.clear();
            self.levels[level] = Some(buf);

            if self.levels[level + 1].is_some() {
                self.add_record(index_offset, level + 1, sink)?;
            }
        }
        Ok((levels, top_index_offset))
    }

    /// Number of offsets currently buffered at the level.
    pub fn occupancy(&self, level: usize) -> usize {
        self.levels[level].as_ref().map_or(0, |b| b.len() / 8)
    }

    /// Seeds a level's buffer from a tail index payload read back from
    /// an existing file (resume-append).
    pub fn seed_level(&mut self, level: usize, payload: Vec<u8>) {
        debug_assert!(payload.len() % 8 == 0 && payload.len() <= 8 * self.index_max);
        self.levels[level] = Some(payload);
    }

    /// Removes and returns the last offset buffered at the level
    /// (resume-append drops entries that point at truncated members).
    pub fn pop_last(&mut self, level: usize) -> Option<u64> {
        let buf = self.levels[level].as_mut()?;
        if buf.len() < 8 {
            return None;
        }
        let at = buf.len() - 8;
        let tail: [u8; 8] = buf[at..].try_into().ok()?;
        buf.truncate(at);
        Some(u64::from_be_bytes(tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sink that records emitted metadata payloads at fake offsets.
    struct RecordingSink {
        offset: u64,
        emitted: Vec<(u64, Vec<u8>)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                offset: 0,
                emitted: Vec::new(),
            }
        }
    }

    impl MetadataSink for RecordingSink {
        fn offset(&self) -> u64 {
            self.offset
        }

        fn write_metadata(&mut self, payload: &[u8]) -> Result<()> {
            self.emitted.push((self.offset, payload.to_vec()));
            self.offset += 26 + payload.len() as u64;
            Ok(())
        }
    }

    fn entries(payload: &[u8]) -> Vec<u64> {
        payload
            .chunks(8)
            .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn cascades_on_full_level() {
        // index size 2: the third record rolls level 1 into level 2.
        let mut tower = IndexTower::new(1);
        let mut sink = RecordingSink::new();
        sink.offset = 1000;

        tower.add_record(0, 1, &mut sink).unwrap();
        tower.add_record(100, 1, &mut sink).unwrap();
        assert!(sink.emitted.is_empty());

        tower.add_record(200, 1, &mut sink).unwrap();
        assert_eq!(sink.emitted.len(), 1);
        let (index_offset, payload) = &sink.emitted[0];
        assert_eq!(*index_offset, 1000);
        assert_eq!(entries(payload), vec![0, 100]);
        assert_eq!(tower.occupancy(1), 1);
        assert_eq!(tower.occupancy(2), 1);

        let (levels, top) = tower.finish(&mut sink).unwrap();
        assert_eq!(levels, 2);
        // level 1 tail, then level 2 holding [old index, level-1 tail].
        assert_eq!(sink.emitted.len(), 3);
        assert_eq!(entries(&sink.emitted[1].1), vec![200]);
        assert_eq!(entries(&sink.emitted[2].1), vec![1000, sink.emitted[1].0]);
        assert_eq!(top, sink.emitted[2].0);
    }

    #[test]
    fn finish_without_records_reports_zero_levels() {
        let mut tower = IndexTower::new(5);
        let mut sink = RecordingSink::new();
        assert_eq!(tower.finish(&mut sink).unwrap(), (0, 0));
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn seed_and_pop_restore_resume_state() {
        let mut tower = IndexTower::new(2);
        let mut payload = Vec::new();
        for off in [10u64, 20, 30] {
            payload.extend_from_slice(&off.to_be_bytes());
        }
        tower.seed_level(1, payload);
        assert_eq!(tower.occupancy(1), 3);
        assert_eq!(tower.pop_last(1), Some(30));
        assert_eq!(tower.occupancy(1), 2);
    }
}
