//! The journal facade.
//!
//! `Journal` ties the writer, the segments manager, the sparse index, and
//! the reader registry together and enforces the locking discipline:
//! reader operations and `open_reader` take the shared lock, truncation
//! (`delete_after`, `delete_until`, `reset`) and `close` take the
//! exclusive lock, and the append path relies on the single-writer
//! contract instead of locking.
//!
//! Readers are plain values owned by the caller. The registry keeps only
//! a weak reference to each reader's cursor cell, looked up under the
//! exclusive lock to rewind readers that truncation has left past the
//! tail; a dropped reader simply stops upgrading.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use meridian_common::types::Asqn;

use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::index::SparseIndex;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::reader::{Cursor, JournalReader};
use crate::record::JournalRecord;
use crate::segments::SegmentsManager;
use crate::writer::JournalWriter;

/// State shared between the facade, the writer, and all readers.
pub(crate) struct JournalShared {
    pub(crate) config: Arc<JournalConfig>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    /// Readers take this shared; truncation, reset, and close take it
    /// exclusive.
    pub(crate) op_lock: RwLock<()>,
    pub(crate) segments: RwLock<SegmentsManager>,
    pub(crate) index: RwLock<SparseIndex>,
    /// Highest committed index; `first_index - 1` while empty.
    pub(crate) last_index: AtomicU64,
    /// Registered reader cursors, by reader id.
    pub(crate) readers: Mutex<HashMap<u64, Weak<Mutex<Cursor>>>>,
    pub(crate) next_reader_id: AtomicU64,
    pub(crate) open: AtomicBool,
}

impl JournalShared {
    /// Opens the journal directory, recovering all state by scanning.
    pub(crate) fn open(
        config: JournalConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> JournalResult<Arc<Self>> {
        config.validate()?;
        fs::create_dir_all(&config.directory)?;

        let config = Arc::new(config);
        let mut index = SparseIndex::new(config.index_stride);
        let segments = SegmentsManager::open(Arc::clone(&config), &mut index)?;

        // The current segment's last index is the journal's: a freshly
        // rolled empty segment reports its first index minus one, which
        // is the previous segment's last.
        let last_index = segments.current_segment().last_index();

        metrics.set_segment_count(segments.segment_count());
        metrics.set_first_index(segments.first_segment().first_index());
        metrics.set_last_index(last_index);

        Ok(Arc::new(Self {
            config,
            metrics,
            op_lock: RwLock::new(()),
            segments: RwLock::new(segments),
            index: RwLock::new(index),
            last_index: AtomicU64::new(last_index),
            readers: Mutex::new(HashMap::new()),
            next_reader_id: AtomicU64::new(0),
            open: AtomicBool::new(true),
        }))
    }

    pub(crate) fn first_index(&self) -> u64 {
        self.segments.read().first_segment().first_index()
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn check_open(&self) -> JournalResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(JournalError::Closed)
        }
    }
}

/// A segmented append-only journal.
///
/// Records are appended with strictly increasing indexes and persisted
/// across rolling fixed-size segment files. A single writer appends,
/// truncates, and resets while any number of readers stream records.
/// Appends become durable when [`Journal::flush`] returns.
pub struct Journal {
    shared: Arc<JournalShared>,
    writer: JournalWriter,
}

impl Journal {
    /// Opens (or creates) the journal described by `config`.
    pub fn open(config: JournalConfig) -> JournalResult<Self> {
        Self::open_with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Opens the journal, reporting metrics to `metrics`.
    pub fn open_with_metrics(
        config: JournalConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> JournalResult<Self> {
        let last_written_hint = config.last_written_index;
        let shared = JournalShared::open(config, metrics)?;
        let writer = JournalWriter::new(Arc::clone(&shared));

        // Frames above the caller's last written index were never
        // committed; drop them before anyone reads.
        if shared.last_index() > last_written_hint {
            debug!(
                last_index = shared.last_index(),
                hint = last_written_hint,
                "dropping uncommitted records above last written index"
            );
            writer.delete_after(last_written_hint)?;
        }

        Ok(Self { shared, writer })
    }

    /// Appends a record without an application sequence number.
    pub fn append(&self, data: &[u8]) -> JournalResult<JournalRecord> {
        self.shared.check_open()?;
        self.writer.append(Asqn::IGNORE, data)
    }

    /// Appends a record with a caller-supplied application sequence
    /// number.
    pub fn append_with_asqn(&self, asqn: Asqn, data: &[u8]) -> JournalResult<JournalRecord> {
        self.shared.check_open()?;
        self.writer.append(asqn, data)
    }

    /// Appends a replicated record verbatim. Its index must equal
    /// [`Journal::next_index`] and its checksum must match its contents.
    pub fn append_record(&self, record: &JournalRecord) -> JournalResult<()> {
        self.shared.check_open()?;
        self.writer.append_record(record)
    }

    /// Deletes every record with index above `index_exclusive` and
    /// rewinds any reader that had advanced past it.
    pub fn delete_after(&self, index_exclusive: u64) -> JournalResult<()> {
        self.shared.check_open()?;
        let started = Instant::now();
        let _guard = self.shared.op_lock.write();

        if self.writer.delete_after(index_exclusive)? {
            self.rewind_readers_past(self.shared.last_index() + 1);
            self.shared
                .metrics
                .observe_segment_truncation(started.elapsed());
        }
        Ok(())
    }

    /// Deletes whole segments whose records all fall below `index`,
    /// advancing the first index. The current segment is never deleted.
    pub fn delete_until(&self, index: u64) -> JournalResult<()> {
        self.shared.check_open()?;
        let _guard = self.shared.op_lock.write();

        let new_first = self.shared.segments.write().delete_until(index)?;
        self.shared.index.write().delete_until(new_first);
        self.rewind_readers_before(new_first);

        self.shared.metrics.set_first_index(new_first);
        self.shared
            .metrics
            .set_segment_count(self.shared.segments.read().segment_count());
        Ok(())
    }

    /// Resets the journal as if it had always started at `next_index`:
    /// all segments are replaced by a fresh one, the sparse index is
    /// cleared, and every reader is rewound to `next_index`.
    pub fn reset(&self, next_index: u64) -> JournalResult<()> {
        self.shared.check_open()?;
        let started = Instant::now();
        let _guard = self.shared.op_lock.write();

        self.writer.reset(next_index)?;
        self.rewind_readers_past(next_index);
        self.rewind_readers_before(next_index);
        self.shared
            .metrics
            .observe_segment_truncation(started.elapsed());
        Ok(())
    }

    /// Forces durability of every appended record.
    pub fn flush(&self) -> JournalResult<()> {
        self.shared.check_open()?;
        self.writer.flush()
    }

    /// Opens a reader positioned at the first retained record.
    pub fn open_reader(&self) -> JournalResult<JournalReader> {
        self.shared.check_open()?;
        let _guard = self.shared.op_lock.read();

        let cursor = Arc::new(Mutex::new(Cursor::at(self.shared.first_index())));
        let id = self.shared.next_reader_id.fetch_add(1, Ordering::Relaxed);

        let mut readers = self.shared.readers.lock();
        readers.retain(|_, weak| weak.strong_count() > 0);
        readers.insert(id, Arc::downgrade(&cursor));
        drop(readers);

        Ok(JournalReader::new(Arc::clone(&self.shared), id, cursor))
    }

    /// Index of the earliest retained record.
    pub fn first_index(&self) -> u64 {
        self.shared.first_index()
    }

    /// Index of the most recently appended record, or `first_index - 1`
    /// when the journal is empty.
    pub fn last_index(&self) -> u64 {
        self.shared.last_index()
    }

    /// Index the next appended record will be assigned.
    pub fn next_index(&self) -> u64 {
        self.shared.last_index() + 1
    }

    /// True if no record is retained.
    pub fn is_empty(&self) -> bool {
        self.next_index() == self.shared.first_index()
    }

    /// True until [`Journal::close`] is called.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Flushes and closes the journal. Idempotent; every other operation
    /// fails with [`JournalError::Closed`] afterwards.
    pub fn close(&self) -> JournalResult<()> {
        let _guard = self.shared.op_lock.write();
        if self.shared.open.swap(false, Ordering::AcqRel) {
            let current = Arc::clone(self.shared.segments.read().current_segment());
            current.flush()?;
        }
        Ok(())
    }

    /// Rewinds every registered reader whose cursor moved past `index`.
    /// Caches are invalidated on all readers, since segments they point
    /// into may have been removed or rewritten.
    fn rewind_readers_past(&self, index: u64) {
        let readers = self.shared.readers.lock();
        for weak in readers.values() {
            if let Some(cell) = weak.upgrade() {
                let mut cursor = cell.lock();
                cursor.invalidate();
                if cursor.next_index > index {
                    cursor.next_index = index;
                }
            }
        }
    }

    /// Advances every registered reader left below the first retained
    /// index.
    fn rewind_readers_before(&self, first_index: u64) {
        let readers = self.shared.readers.lock();
        for weak in readers.values() {
            if let Some(cell) = weak.upgrade() {
                let mut cursor = cell.lock();
                cursor.invalidate();
                if cursor.next_index < first_index {
                    cursor.next_index = first_index;
                }
            }
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("name", &self.shared.config.name)
            .field("first_index", &self.first_index())
            .field("last_index", &self.last_index())
            .field("open", &self.is_open())
            .finish()
    }
}
