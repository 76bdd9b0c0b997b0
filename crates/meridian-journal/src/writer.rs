//! The journal's single writer.
//!
//! The writer assigns indexes, encodes frames into the current segment,
//! rolls segments when a frame does not fit, and performs truncation and
//! reset. There is exactly one writer per journal; the append path takes
//! no journal-wide lock and relies on that contract, while `delete_after`
//! and `reset` are invoked by the facade under its exclusive lock.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use meridian_common::types::Asqn;

use crate::error::{JournalError, JournalResult};
use crate::journal::JournalShared;
use crate::record::{self, JournalRecord};
use crate::segment::Segment;

pub(crate) struct JournalWriter {
    shared: Arc<JournalShared>,
}

impl JournalWriter {
    pub fn new(shared: Arc<JournalShared>) -> Self {
        Self { shared }
    }

    /// Appends a record with the journal's next index.
    pub fn append(&self, asqn: Asqn, data: &[u8]) -> JournalResult<JournalRecord> {
        if data.is_empty() {
            return Err(JournalError::EmptyData);
        }

        let frame_len = record::frame_length(data.len());
        let capacity = self.shared.config.segment_capacity();
        if frame_len > capacity {
            return Err(JournalError::RecordTooLarge {
                size: frame_len,
                max: capacity,
            });
        }

        let index = self.shared.last_index() + 1;
        let started = Instant::now();

        let (segment, offset) = self.append_frame(index, asqn, data)?;

        self.shared
            .last_index
            .store(index, std::sync::atomic::Ordering::Release);
        self.shared.index.write().maybe_put(
            index,
            segment.id(),
            offset,
            offset == Segment::data_start(),
        );

        self.shared.metrics.record_append(frame_len, started.elapsed());
        self.shared.metrics.set_last_index(index);

        let checksum = record::compute_checksum(index, asqn, frame_len as u32, data);
        Ok(JournalRecord::new(
            index,
            asqn,
            checksum,
            Bytes::copy_from_slice(data),
        ))
    }

    /// Appends a replicated record verbatim, preserving its checksum.
    ///
    /// The record's index must be the journal's next index, and its
    /// checksum must match its contents.
    pub fn append_record(&self, record: &JournalRecord) -> JournalResult<()> {
        let expected = self.shared.last_index() + 1;
        if record.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                found: record.index(),
            });
        }

        let frame_len = record.frame_length() as u32;
        let computed =
            record::compute_checksum(record.index(), record.asqn(), frame_len, record.data());
        if computed != record.checksum() {
            return Err(JournalError::checksum_mismatch(
                record.index(),
                record.checksum(),
                computed,
            ));
        }

        // Encoding recomputes the identical checksum, so the frame lands
        // on disk byte-for-byte as it was on the leader.
        self.append(record.asqn(), record.data()).map(|_| ())
    }

    /// Writes the frame into the current segment, rolling once if it does
    /// not fit.
    fn append_frame(&self, index: u64, asqn: Asqn, data: &[u8]) -> JournalResult<(Arc<Segment>, u64)> {
        let current = Arc::clone(self.shared.segments.read().current_segment());
        match current.append(index, asqn, data) {
            Ok(offset) => return Ok((current, offset)),
            Err(JournalError::SegmentFull { .. }) => {}
            Err(err) => return Err(err),
        }

        let started = Instant::now();
        let mut segments = self.shared.segments.write();

        // Seal the full segment durably before its successor exists.
        segments.current_segment().flush()?;
        let next = segments.create_next_segment(index)?;
        let segment_count = segments.segment_count();
        drop(segments);

        self.shared.metrics.observe_segment_roll(started.elapsed());
        self.shared.metrics.set_segment_count(segment_count);

        let offset = next.append(index, asqn, data)?;
        Ok((next, offset))
    }

    /// Truncates every record with index above `index_exclusive`.
    ///
    /// Returns false when nothing was truncated. Runs under the facade's
    /// exclusive lock.
    pub fn delete_after(&self, index_exclusive: u64) -> JournalResult<bool> {
        let first_index = self.shared.first_index();
        let last_index = self.shared.last_index();
        if index_exclusive >= last_index {
            return Ok(false);
        }

        // Everything below the first index truncates to an empty journal.
        let target = index_exclusive.max(first_index - 1);

        self.shared.index.write().delete_after(target);

        let mut segments = self.shared.segments.write();
        let tail = segments
            .get_segment(target)
            .unwrap_or_else(|| Arc::clone(segments.first_segment()));
        segments.remove_segments_after(tail.id())?;
        let segment_count = segments.segment_count();
        drop(segments);

        tail.truncate_to(target)?;

        self.shared
            .last_index
            .store(target, std::sync::atomic::Ordering::Release);
        self.shared.metrics.set_last_index(target);
        self.shared.metrics.set_segment_count(segment_count);

        Ok(true)
    }

    /// Resets the journal as if it had always started at `next_index`.
    ///
    /// Runs under the facade's exclusive lock.
    pub fn reset(&self, next_index: u64) -> JournalResult<()> {
        if next_index == 0 {
            return Err(JournalError::InvalidIndex {
                expected: 1,
                found: 0,
            });
        }

        self.shared.index.write().clear();

        let mut segments = self.shared.segments.write();
        segments.reset_segments(next_index)?;
        let segment_count = segments.segment_count();
        drop(segments);

        self.shared
            .last_index
            .store(next_index - 1, std::sync::atomic::Ordering::Release);

        self.shared.metrics.set_first_index(next_index);
        self.shared.metrics.set_last_index(next_index - 1);
        self.shared.metrics.set_segment_count(segment_count);

        Ok(())
    }

    /// Forces durability of all appended records.
    ///
    /// Sealed segments were synced when they were rolled, so syncing the
    /// current segment suffices.
    pub fn flush(&self) -> JournalResult<()> {
        let current = Arc::clone(self.shared.segments.read().current_segment());
        current.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::journal::JournalShared;
    use crate::metrics::NoopMetrics;
    use tempfile::TempDir;

    fn test_writer(tmp: &TempDir, max_segment_size: u32) -> JournalWriter {
        let config = JournalConfig::new(tmp.path())
            .with_name("test")
            .with_max_segment_size(max_segment_size)
            .with_preallocate_segment_files(false)
            .with_index_stride(2);
        let shared = JournalShared::open(config, Arc::new(NoopMetrics)).unwrap();
        JournalWriter::new(shared)
    }

    #[test]
    fn test_append_assigns_contiguous_indexes() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);

        let first = writer.append(Asqn::IGNORE, b"a").unwrap();
        let second = writer.append(Asqn::new(17), b"bb").unwrap();

        assert_eq!(first.index(), 1);
        assert_eq!(second.index(), 2);
        assert_eq!(second.asqn(), Asqn::new(17));
        assert_eq!(writer.shared.last_index(), 2);
    }

    #[test]
    fn test_append_rejects_empty_payload() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);

        assert!(matches!(
            writer.append(Asqn::IGNORE, b""),
            Err(JournalError::EmptyData)
        ));
    }

    #[test]
    fn test_append_rolls_segments() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 160);

        // Capacity after the header is 96 bytes; 40-byte frames roll on
        // every third append.
        for i in 1..=7u64 {
            let record = writer.append(Asqn::IGNORE, b"0123456789abcdef").unwrap();
            assert_eq!(record.index(), i);
        }

        let segments = writer.shared.segments.read();
        assert_eq!(segments.segment_count(), 4);
        assert_eq!(segments.first_segment().first_index(), 1);
        // Each rolled segment starts right after its predecessor.
        assert_eq!(segments.get_segment(3).unwrap().first_index(), 3);
    }

    #[test]
    fn test_record_too_large() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 160);

        let oversized = vec![0xAB; 100];
        let err = writer.append(Asqn::IGNORE, &oversized).unwrap_err();
        assert!(matches!(err, JournalError::RecordTooLarge { .. }));
        assert_eq!(writer.shared.last_index(), 0);
        // No segment was created for the doomed append.
        assert_eq!(writer.shared.segments.read().segment_count(), 1);
    }

    #[test]
    fn test_append_record_requires_contiguous_index() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);
        let record = writer.append(Asqn::IGNORE, b"a").unwrap();

        // Replaying the same record again is a gap of -1.
        let err = writer.append_record(&record).unwrap_err();
        assert!(matches!(
            err,
            JournalError::InvalidIndex {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_append_record_preserves_checksum() {
        let tmp = TempDir::new().unwrap();
        let leader = test_writer(&tmp, 1024);
        let record = leader.append(Asqn::new(5), b"replicated").unwrap();

        let tmp2 = TempDir::new().unwrap();
        let follower = test_writer(&tmp2, 1024);
        follower.append_record(&record).unwrap();

        let current = Arc::clone(follower.shared.segments.read().current_segment());
        let stored = current.read_at(Segment::data_start()).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.checksum(), record.checksum());
    }

    #[test]
    fn test_append_record_rejects_bad_checksum() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);
        let record = writer.append(Asqn::IGNORE, b"data").unwrap();

        let forged = JournalRecord::new(
            2,
            record.asqn(),
            record.checksum(), // checksum of index 1, not 2
            record.data().clone(),
        );
        let err = writer.append_record(&forged).unwrap_err();
        assert!(matches!(err, JournalError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_delete_after() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 160);
        for _ in 1..=10u64 {
            writer.append(Asqn::IGNORE, b"0123456789abcdef").unwrap();
        }

        assert!(writer.delete_after(5).unwrap());
        assert_eq!(writer.shared.last_index(), 5);

        // Appends continue at index 6.
        let record = writer.append(Asqn::IGNORE, b"resumed").unwrap();
        assert_eq!(record.index(), 6);

        // Truncating at or past the tail is a no-op.
        assert!(!writer.delete_after(6).unwrap());
        assert!(!writer.delete_after(u64::MAX).unwrap());
    }

    #[test]
    fn test_delete_after_below_first_empties_journal() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);
        for _ in 1..=3u64 {
            writer.append(Asqn::IGNORE, b"x").unwrap();
        }

        assert!(writer.delete_after(0).unwrap());
        assert_eq!(writer.shared.last_index(), 0);
        assert_eq!(writer.shared.first_index(), 1);

        let record = writer.append(Asqn::IGNORE, b"fresh").unwrap();
        assert_eq!(record.index(), 1);
    }

    #[test]
    fn test_reset() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 160);
        for _ in 1..=6u64 {
            writer.append(Asqn::IGNORE, b"0123456789abcdef").unwrap();
        }

        writer.reset(100).unwrap();
        assert_eq!(writer.shared.first_index(), 100);
        assert_eq!(writer.shared.last_index(), 99);
        assert_eq!(writer.shared.segments.read().segment_count(), 1);

        let record = writer.append(Asqn::IGNORE, b"after reset").unwrap();
        assert_eq!(record.index(), 100);
    }

    #[test]
    fn test_reset_rejects_zero() {
        let tmp = TempDir::new().unwrap();
        let writer = test_writer(&tmp, 1024);
        assert!(writer.reset(0).is_err());
    }
}
