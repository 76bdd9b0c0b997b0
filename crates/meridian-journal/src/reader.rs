//! Forward record cursors.
//!
//! A reader walks committed records in index order. Its cursor is a cell
//! shared with the journal's reader registry, so truncation can rewind a
//! reader that has advanced past the new tail; positioning is lazy, and a
//! rewound cursor re-seeks through the sparse index on its next read.

use std::sync::Arc;

use parking_lot::Mutex;

use meridian_common::types::Asqn;

use crate::error::{JournalError, JournalResult};
use crate::journal::JournalShared;
use crate::record::JournalRecord;
use crate::segment::Segment;
use crate::segments::SegmentsManager;

/// Cursor state shared between a reader and the journal's registry.
pub(crate) struct Cursor {
    /// Index of the next record to return.
    pub next_index: u64,
    /// Segment the cursor points into; `None` after a rewind or seek,
    /// until the next read re-positions.
    pub segment: Option<Arc<Segment>>,
    /// Offset of the next frame within `segment`.
    pub offset: u64,
}

impl Cursor {
    pub fn at(next_index: u64) -> Self {
        Self {
            next_index,
            segment: None,
            offset: 0,
        }
    }

    /// Forgets the cached position. Called by the journal during
    /// truncation, since cached segments may no longer be live.
    pub fn invalidate(&mut self) {
        self.segment = None;
        self.offset = 0;
    }
}

/// A forward cursor over the journal's committed records.
///
/// Readers are values owned by the caller; dropping (or closing) one
/// removes it from the journal's registry.
pub struct JournalReader {
    shared: Arc<JournalShared>,
    id: u64,
    cursor: Arc<Mutex<Cursor>>,
    closed: bool,
}

impl JournalReader {
    pub(crate) fn new(shared: Arc<JournalShared>, id: u64, cursor: Arc<Mutex<Cursor>>) -> Self {
        Self {
            shared,
            id,
            cursor,
            closed: false,
        }
    }

    /// True if a committed record is available at the cursor.
    pub fn has_next(&self) -> bool {
        if self.closed || !self.shared.is_open() {
            return false;
        }
        let _guard = self.shared.op_lock.read();
        self.cursor.lock().next_index <= self.shared.last_index()
    }

    /// Returns the record at the cursor and advances past it.
    #[allow(clippy::should_implement_trait)] // Iterator is also implemented
    pub fn next(&mut self) -> JournalResult<JournalRecord> {
        self.check_usable()?;
        let _guard = self.shared.op_lock.read();
        let mut cursor = self.cursor.lock();

        let target = cursor.next_index;
        if target > self.shared.last_index() {
            return Err(JournalError::NoSuchIndex { index: target });
        }

        if cursor.segment.is_none() {
            Self::position(&self.shared, &mut cursor, target)?;
        }

        loop {
            let segment = Arc::clone(cursor.segment.as_ref().expect("cursor is positioned"));
            match segment.read_at(cursor.offset)? {
                Some(record) => {
                    if record.index() != target {
                        return Err(JournalError::NoSuchIndex { index: target });
                    }
                    cursor.offset += record.frame_length() as u64;
                    cursor.next_index = target + 1;
                    return Ok(record);
                }
                None => {
                    let next = self
                        .shared
                        .segments
                        .read()
                        .get_next_segment(segment.first_index());
                    match next {
                        Some(next) => {
                            cursor.segment = Some(next);
                            cursor.offset = Segment::data_start();
                        }
                        None => return Err(JournalError::NoSuchIndex { index: target }),
                    }
                }
            }
        }
    }

    /// Moves the cursor so the next read returns `index`.
    ///
    /// Accepts `first_index ..= next_index`; seeking to `next_index`
    /// parks the cursor at the end of the journal.
    pub fn seek(&mut self, index: u64) -> JournalResult<u64> {
        self.check_usable()?;
        let _guard = self.shared.op_lock.read();

        let first = self.shared.first_index();
        let last = self.shared.last_index();
        if index < first || index > last + 1 {
            return Err(JournalError::OutOfRange { index, first, last });
        }

        let mut cursor = self.cursor.lock();
        cursor.next_index = index;
        cursor.invalidate();
        Ok(index)
    }

    /// Moves the cursor to the first retained record.
    pub fn seek_to_first(&mut self) -> JournalResult<u64> {
        let first = {
            let _guard = self.shared.op_lock.read();
            self.shared.first_index()
        };
        self.seek(first)
    }

    /// Moves the cursor to the last record, so the next read returns it.
    /// On an empty journal the cursor parks at the end.
    pub fn seek_to_last(&mut self) -> JournalResult<u64> {
        let (first, last) = {
            let _guard = self.shared.op_lock.read();
            (self.shared.first_index(), self.shared.last_index())
        };
        self.seek(last.max(first))
    }

    /// Positions the cursor on the record with the greatest ASQN `<=
    /// asqn`, returning its index.
    ///
    /// ASQNs are only as ordered as the caller made them, so this scans
    /// every record from the first index. Records without an ASQN never
    /// qualify. When no record qualifies the cursor moves to the first
    /// index and `None` is returned.
    pub fn seek_to_asqn(&mut self, asqn: Asqn) -> JournalResult<Option<u64>> {
        self.check_usable()?;
        let _guard = self.shared.op_lock.read();

        let first = self.shared.first_index();
        let last = self.shared.last_index();

        let mut best = None;
        if first <= last {
            let segments = self.shared.segments.read();
            let mut segment = segments
                .get_segment(first)
                .unwrap_or_else(|| Arc::clone(segments.first_segment()));
            let mut offset = Segment::data_start();

            loop {
                match segment.read_at(offset)? {
                    Some(record) => {
                        if record.asqn().is_set() && record.asqn() <= asqn {
                            best = Some(record.index());
                        }
                        offset += record.frame_length() as u64;
                    }
                    None => match segments.get_next_segment(segment.first_index()) {
                        Some(next) => {
                            segment = next;
                            offset = Segment::data_start();
                        }
                        None => break,
                    },
                }
            }
        }

        let mut cursor = self.cursor.lock();
        cursor.next_index = best.unwrap_or(first);
        cursor.invalidate();
        Ok(best)
    }

    /// Index of the next record this reader will return.
    pub fn next_index(&self) -> u64 {
        self.cursor.lock().next_index
    }

    /// Deregisters this reader from the journal. Further reads fail.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.readers.lock().remove(&self.id);
        }
    }

    fn check_usable(&self) -> JournalResult<()> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        self.shared.check_open()
    }

    /// Resolves `target` to a `(segment, offset)` position, starting from
    /// the sparse index's floor entry and scanning forward.
    fn position(shared: &JournalShared, cursor: &mut Cursor, target: u64) -> JournalResult<()> {
        let segments = shared.segments.read();

        let floor = shared.index.read().floor_entry(target);
        let (mut segment, mut offset) = match floor {
            Some((floor_index, entry)) => match segments.get_segment(floor_index) {
                Some(segment) if segment.id() == entry.segment_id => (segment, entry.offset),
                _ => Self::scan_start(&segments, target),
            },
            None => Self::scan_start(&segments, target),
        };

        loop {
            match segment.read_at(offset)? {
                Some(record) => {
                    if record.index() == target {
                        cursor.segment = Some(segment);
                        cursor.offset = offset;
                        return Ok(());
                    }
                    offset += record.frame_length() as u64;
                }
                None => {
                    segment = segments
                        .get_next_segment(segment.first_index())
                        .ok_or(JournalError::NoSuchIndex { index: target })?;
                    offset = Segment::data_start();
                }
            }
        }
    }

    fn scan_start(segments: &SegmentsManager, target: u64) -> (Arc<Segment>, u64) {
        let segment = segments
            .get_segment(target)
            .unwrap_or_else(|| Arc::clone(segments.first_segment()));
        (segment, Segment::data_start())
    }
}

impl Iterator for JournalReader {
    type Item = JournalResult<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(JournalReader::next(self))
    }
}

impl Drop for JournalReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::journal::JournalShared;
    use crate::metrics::NoopMetrics;
    use crate::writer::JournalWriter;
    use tempfile::TempDir;

    struct Fixture {
        shared: Arc<JournalShared>,
        writer: JournalWriter,
    }

    impl Fixture {
        fn new(tmp: &TempDir, max_segment_size: u32, stride: u64) -> Self {
            let config = JournalConfig::new(tmp.path())
                .with_name("test")
                .with_max_segment_size(max_segment_size)
                .with_preallocate_segment_files(false)
                .with_index_stride(stride);
            let shared = JournalShared::open(config, Arc::new(NoopMetrics)).unwrap();
            let writer = JournalWriter::new(Arc::clone(&shared));
            Self { shared, writer }
        }

        fn reader(&self) -> JournalReader {
            let cursor = Arc::new(Mutex::new(Cursor::at(self.shared.first_index())));
            JournalReader::new(Arc::clone(&self.shared), 0, cursor)
        }
    }

    #[test]
    fn test_empty_journal_has_no_next() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        let mut reader = fixture.reader();

        assert!(!reader.has_next());
        assert!(matches!(
            reader.next(),
            Err(JournalError::NoSuchIndex { index: 1 })
        ));
    }

    #[test]
    fn test_sequential_read() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        for payload in [&b"a"[..], b"bb", b"ccc"] {
            fixture.writer.append(Asqn::IGNORE, payload).unwrap();
        }

        let mut reader = fixture.reader();
        let mut seen = Vec::new();
        while reader.has_next() {
            seen.push(reader.next().unwrap());
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].data().as_ref(), b"a");
        assert_eq!(seen[2].data().as_ref(), b"ccc");
        assert_eq!(
            seen.iter().map(JournalRecord::index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_read_across_segments() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 160, 10);
        for i in 1..=9u64 {
            fixture
                .writer
                .append(Asqn::IGNORE, b"0123456789abcdef")
                .unwrap();
            assert_eq!(fixture.shared.last_index(), i);
        }
        assert!(fixture.shared.segments.read().segment_count() > 1);

        let mut reader = fixture.reader();
        for expected in 1..=9u64 {
            assert!(reader.has_next());
            assert_eq!(reader.next().unwrap().index(), expected);
        }
        assert!(!reader.has_next());
    }

    #[test]
    fn test_reader_observes_new_appends() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        fixture.writer.append(Asqn::IGNORE, b"one").unwrap();

        let mut reader = fixture.reader();
        assert_eq!(reader.next().unwrap().index(), 1);
        assert!(!reader.has_next());

        fixture.writer.append(Asqn::IGNORE, b"two").unwrap();
        assert!(reader.has_next());
        assert_eq!(reader.next().unwrap().index(), 2);
    }

    #[test]
    fn test_seek_uses_sparse_index() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 4096, 10);
        for i in 1..=100u64 {
            let record = fixture.writer.append(Asqn::IGNORE, b"padding-payload").unwrap();
            assert_eq!(record.index(), i);
        }

        let mut reader = fixture.reader();
        assert_eq!(reader.seek(73).unwrap(), 73);
        assert_eq!(reader.next().unwrap().index(), 73);
        assert_eq!(reader.next().unwrap().index(), 74);
    }

    #[test]
    fn test_seek_bounds() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        for _ in 0..3 {
            fixture.writer.append(Asqn::IGNORE, b"x").unwrap();
        }
        let mut reader = fixture.reader();

        // One past the tail is the parked end-of-journal position.
        assert_eq!(reader.seek(4).unwrap(), 4);
        assert!(!reader.has_next());

        assert!(matches!(
            reader.seek(5),
            Err(JournalError::OutOfRange {
                index: 5,
                first: 1,
                last: 3
            })
        ));
        assert!(matches!(reader.seek(0), Err(JournalError::OutOfRange { .. })));
    }

    #[test]
    fn test_seek_to_first_and_last() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        for _ in 0..5 {
            fixture.writer.append(Asqn::IGNORE, b"x").unwrap();
        }

        let mut reader = fixture.reader();
        assert_eq!(reader.seek_to_last().unwrap(), 5);
        assert_eq!(reader.next().unwrap().index(), 5);
        assert!(!reader.has_next());

        assert_eq!(reader.seek_to_first().unwrap(), 1);
        assert_eq!(reader.next().unwrap().index(), 1);
    }

    #[test]
    fn test_seek_to_last_on_empty_journal() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        let mut reader = fixture.reader();

        assert_eq!(reader.seek_to_last().unwrap(), 1);
        assert!(!reader.has_next());
    }

    #[test]
    fn test_seek_to_asqn() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        fixture.writer.append(Asqn::new(10), b"ten").unwrap();
        fixture.writer.append(Asqn::IGNORE, b"gap").unwrap();
        fixture.writer.append(Asqn::new(20), b"twenty").unwrap();
        fixture.writer.append(Asqn::new(30), b"thirty").unwrap();

        let mut reader = fixture.reader();

        // Exact hit.
        assert_eq!(reader.seek_to_asqn(Asqn::new(20)).unwrap(), Some(3));
        assert_eq!(reader.next().unwrap().asqn(), Asqn::new(20));

        // Between two ASQNs: the lower one wins.
        assert_eq!(reader.seek_to_asqn(Asqn::new(25)).unwrap(), Some(3));

        // Below all ASQNs: nothing qualifies, cursor is at the start.
        assert_eq!(reader.seek_to_asqn(Asqn::new(5)).unwrap(), None);
        assert_eq!(reader.next_index(), 1);

        // Above all ASQNs.
        assert_eq!(reader.seek_to_asqn(Asqn::new(100)).unwrap(), Some(4));
    }

    #[test]
    fn test_iterator() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        for _ in 0..4 {
            fixture.writer.append(Asqn::IGNORE, b"x").unwrap();
        }

        let reader = fixture.reader();
        let indexes: Vec<u64> = reader.map(|r| r.unwrap().index()).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_closed_reader_fails() {
        let tmp = TempDir::new().unwrap();
        let fixture = Fixture::new(&tmp, 1024, 10);
        fixture.writer.append(Asqn::IGNORE, b"x").unwrap();

        let mut reader = fixture.reader();
        reader.close();
        assert!(!reader.has_next());
        assert!(matches!(reader.next(), Err(JournalError::Closed)));
    }
}
