//! Discovery and lifecycle of segment files.
//!
//! The manager owns the ordered list of live segments. It discovers files
//! on open (all journal state is recoverable by scanning; there is no
//! manifest), validates headers and index contiguity across the chain,
//! creates the next segment on rollover, and deletes segments from either
//! end for retention and truncation.

use std::fs;
use std::sync::Arc;

use tracing::{debug, warn};

use meridian_common::constants::SEGMENT_BUFFER_FACTOR;

use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::index::SparseIndex;
use crate::segment::Segment;

/// Manages the ordered set of segment files in the journal directory.
#[derive(Debug)]
pub(crate) struct SegmentsManager {
    config: Arc<JournalConfig>,
    /// Live segments, ordered by id. Never empty after `open`; the last
    /// entry is the writable (current) segment.
    segments: Vec<Arc<Segment>>,
}

impl SegmentsManager {
    /// Discovers and opens all segments in the journal directory,
    /// rebuilding the sparse index from the scan.
    ///
    /// A trailing segment that cannot be opened (crash during creation)
    /// is deleted. If no segment survives, a fresh segment 1 starting at
    /// index 1 is created.
    pub fn open(config: Arc<JournalConfig>, index: &mut SparseIndex) -> JournalResult<Self> {
        let mut discovered = Vec::new();
        for entry in fs::read_dir(&config.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = config.parse_segment_id(name) {
                discovered.push((id, entry.path()));
            }
        }
        discovered.sort_by_key(|(id, _)| *id);

        let mut segments: Vec<Arc<Segment>> = Vec::with_capacity(discovered.len());
        let last_pos = discovered.len().saturating_sub(1);
        for (pos, (id, path)) in discovered.into_iter().enumerate() {
            let data_start = Segment::data_start();
            let opened = Segment::open(&path, id, |record_index, offset| {
                index.maybe_put(record_index, id, offset, offset == data_start);
            });

            let segment = match opened {
                Ok(segment) => segment,
                Err(err) if pos == last_pos => {
                    // The tail segment was being created when the process
                    // died; no complete frame can live there.
                    warn!(segment = id, %err, "deleting unreadable trailing segment");
                    fs::remove_file(&path)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Some(prev) = segments.last() {
                let expected = prev.last_index() + 1;
                if segment.first_index() != expected {
                    return Err(JournalError::segment_corrupted(
                        segment.id(),
                        format!(
                            "segment starts at index {} but previous segment ends at {}",
                            segment.first_index(),
                            prev.last_index()
                        ),
                    ));
                }
            }

            segments.push(Arc::new(segment));
        }

        let mut manager = Self { config, segments };
        if manager.segments.is_empty() {
            manager.create_segment(1, 1)?;
        }

        Ok(manager)
    }

    /// First (oldest) segment.
    pub fn first_segment(&self) -> &Arc<Segment> {
        self.segments.first().expect("journal always has a segment")
    }

    /// Last segment; the one accepting appends.
    pub fn current_segment(&self) -> &Arc<Segment> {
        self.segments.last().expect("journal always has a segment")
    }

    /// Returns the segment containing `index`, if it is persisted.
    pub fn get_segment(&self, index: u64) -> Option<Arc<Segment>> {
        let pos = self
            .segments
            .partition_point(|segment| segment.first_index() <= index);
        let candidate = self.segments.get(pos.checked_sub(1)?)?;
        (index <= candidate.last_index()).then(|| Arc::clone(candidate))
    }

    /// Returns the first segment whose records start above `index`.
    pub fn get_next_segment(&self, index: u64) -> Option<Arc<Segment>> {
        let pos = self
            .segments
            .partition_point(|segment| segment.first_index() <= index);
        self.segments.get(pos).map(Arc::clone)
    }

    /// Creates the segment following the current one, with `first_index`
    /// as its starting index.
    ///
    /// Fails with [`JournalError::OutOfDiskSpace`] when the directory's
    /// usable space is below `max(SEGMENT_BUFFER_FACTOR × segment size,
    /// min_free_disk_space)`.
    pub fn create_next_segment(&mut self, first_index: u64) -> JournalResult<Arc<Segment>> {
        self.assert_disk_space()?;
        let id = self.current_segment().id() + 1;
        self.create_segment(id, first_index)
    }

    fn create_segment(&mut self, id: u64, first_index: u64) -> JournalResult<Arc<Segment>> {
        let segment = Segment::create(
            self.config.segment_path(id),
            id,
            first_index,
            self.config.max_segment_size,
            self.config.preallocate_segment_files,
        )?;
        debug!(segment = id, first_index, "created segment");

        let segment = Arc::new(segment);
        self.segments.push(Arc::clone(&segment));
        Ok(segment)
    }

    /// Requires enough usable space for the new segment, the still-open
    /// current segment, and allocation overhead during rollover.
    fn assert_disk_space(&self) -> JournalResult<()> {
        let required = (self.config.max_segment_size as u64 * SEGMENT_BUFFER_FACTOR)
            .max(self.config.min_free_disk_space);
        let available = fs2::available_space(&self.config.directory)?;
        if available < required {
            return Err(JournalError::OutOfDiskSpace {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Deletes every segment with id above `segment_id` and makes the
    /// segment with `segment_id` current again.
    pub fn remove_segments_after(&mut self, segment_id: u64) -> JournalResult<()> {
        while let Some(segment) = self.segments.last() {
            if segment.id() <= segment_id {
                break;
            }
            let segment = self.segments.pop().expect("checked non-empty");
            debug!(segment = segment.id(), "removing truncated segment");
            fs::remove_file(segment.path())?;
        }
        Ok(())
    }

    /// Deletes every segment whose records all fall below `index`. The
    /// current segment is never deleted. Returns the new first index.
    pub fn delete_until(&mut self, index: u64) -> JournalResult<u64> {
        while self.segments.len() > 1 && self.segments[0].last_index() < index {
            let segment = self.segments.remove(0);
            debug!(segment = segment.id(), "deleting compacted segment");
            fs::remove_file(segment.path())?;
        }
        Ok(self.first_segment().first_index())
    }

    /// Deletes all segments and creates a fresh segment 1 starting at
    /// `first_index`.
    pub fn reset_segments(&mut self, first_index: u64) -> JournalResult<()> {
        for segment in self.segments.drain(..) {
            fs::remove_file(segment.path())?;
        }
        self.create_segment(1, first_index)?;
        Ok(())
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}
