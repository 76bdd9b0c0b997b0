//! Journal segment files.
//!
//! A segment is one fixed-size file holding a contiguous range of record
//! frames behind a 64-byte header. The current segment accepts appends;
//! older segments are read-only. After every frame the writer lays down a
//! zeroed length word, so a scan over a truncated or reused file always
//! stops at the logical tail.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use tracing::warn;

use meridian_common::constants::{
    FRAME_HEADER_SIZE, SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
use meridian_common::types::Asqn;

use crate::error::{JournalError, JournalResult};
use crate::record::{self, JournalRecord};

/// Length word written after the last frame so scans stop cleanly.
const FRAME_TERMINATOR: [u8; 4] = [0; 4];

/// A single journal segment file.
pub(crate) struct Segment {
    /// Segment id, monotonic starting at 1.
    id: u64,
    /// Index of the first record stored in this segment.
    first_index: u64,
    /// Fixed file size this segment was created with.
    max_size: u32,
    /// Path to the segment file.
    path: PathBuf,
    /// File handle, shared between the writer and all readers.
    file: Mutex<File>,
    /// Offset at which the next frame will be written.
    write_pos: AtomicU64,
    /// Highest index present; `first_index - 1` while empty.
    last_index: AtomicU64,
}

impl Segment {
    /// Creates a new segment file with a fresh header.
    pub fn create(
        path: impl AsRef<Path>,
        id: u64,
        first_index: u64,
        max_size: u32,
        preallocate: bool,
    ) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        if preallocate {
            file.set_len(max_size as u64)?;
        }

        let header = encode_header(id, first_index, max_size);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        if !preallocate {
            // Terminate the (empty) frame region explicitly; a preallocated
            // file is already zero-filled.
            file.write_all(&FRAME_TERMINATOR)?;
        }
        file.sync_all()?;

        Ok(Self {
            id,
            first_index,
            max_size,
            path,
            file: Mutex::new(file),
            write_pos: AtomicU64::new(SEGMENT_HEADER_SIZE as u64),
            last_index: AtomicU64::new(first_index - 1),
        })
    }

    /// Opens an existing segment file, validating its header and scanning
    /// forward to recover the write position and last index.
    ///
    /// `on_frame` is invoked with `(index, offset)` for every complete
    /// frame, letting the caller rebuild the sparse index in the same
    /// pass. A partial or corrupt tail is trimmed to the last complete
    /// frame.
    pub fn open(
        path: impl AsRef<Path>,
        expected_id: u64,
        mut on_frame: impl FnMut(u64, u64),
    ) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_buf = [0u8; SEGMENT_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_buf).map_err(|_| {
            JournalError::segment_corrupted(expected_id, "segment header is incomplete")
        })?;
        let (id, first_index, max_size) = decode_header(&header_buf, expected_id)?;

        let segment = Self {
            id,
            first_index,
            max_size,
            path,
            file: Mutex::new(file),
            write_pos: AtomicU64::new(SEGMENT_HEADER_SIZE as u64),
            last_index: AtomicU64::new(first_index - 1),
        };
        segment.scan(&mut on_frame)?;

        Ok(segment)
    }

    /// Scans frames from the start of the data region, recovering
    /// `write_pos` and `last_index` and trimming a partial tail.
    fn scan(&self, on_frame: &mut impl FnMut(u64, u64)) -> JournalResult<()> {
        let mut file = self.file.lock();
        let data_end = file.metadata()?.len().min(self.max_size as u64);

        let mut offset = SEGMENT_HEADER_SIZE as u64;
        let mut last_index = self.first_index - 1;
        let mut trimmed = false;

        let mut frame_header = [0u8; FRAME_HEADER_SIZE];
        let mut payload = Vec::new();

        loop {
            let remaining = data_end.saturating_sub(offset) as usize;
            if remaining < FRAME_HEADER_SIZE {
                break;
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut frame_header)?;

            let header = match record::decode_frame_header(&frame_header, self.id, remaining) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) => {
                    warn!(segment = self.id, %offset, %err, "trimming unreadable frame tail");
                    trimmed = true;
                    break;
                }
            };

            payload.resize(header.data_length(), 0);
            if file.read_exact(&mut payload).is_err() {
                warn!(segment = self.id, %offset, "trimming torn frame at end of segment");
                trimmed = true;
                break;
            }

            if let Err(err) = record::decode_frame_data(&header, &payload) {
                warn!(segment = self.id, %offset, %err, "trimming frame that failed checksum");
                trimmed = true;
                break;
            }

            let expected = last_index + 1;
            if header.index != expected {
                warn!(
                    segment = self.id,
                    found = header.index,
                    expected,
                    "trimming frames after index discontinuity"
                );
                trimmed = true;
                break;
            }

            on_frame(header.index, offset);
            last_index = header.index;
            offset += header.length as u64;
        }

        if trimmed {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&FRAME_TERMINATOR)?;
            file.sync_all()?;
        }

        self.write_pos.store(offset, Ordering::Release);
        self.last_index.store(last_index, Ordering::Release);

        Ok(())
    }

    /// Appends one record frame at the current write position.
    ///
    /// Returns the file offset the frame starts at, or
    /// [`JournalError::SegmentFull`] when the remaining capacity cannot
    /// hold it.
    pub fn append(&self, index: u64, asqn: Asqn, data: &[u8]) -> JournalResult<u64> {
        let mut file = self.file.lock();

        let offset = self.write_pos.load(Ordering::Acquire);
        let capacity = (self.max_size as u64).saturating_sub(offset) as usize;
        let frame_len = record::frame_length(data.len());
        if frame_len > capacity {
            return Err(JournalError::SegmentFull { segment_id: self.id });
        }

        let terminated = frame_len + FRAME_TERMINATOR.len() <= capacity;
        let mut buf = vec![0u8; if terminated { frame_len + FRAME_TERMINATOR.len() } else { frame_len }];
        record::encode_frame(index, asqn, data, &mut buf)
            .expect("buffer sized to the frame");

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;

        self.write_pos.store(offset + frame_len as u64, Ordering::Release);
        self.last_index.store(index, Ordering::Release);

        Ok(offset)
    }

    /// Reads the record frame starting at `offset`.
    ///
    /// Returns `Ok(None)` once `offset` reaches the logical tail of the
    /// segment. Offsets below the tail are expected to hold well-formed
    /// frames; anything else is corruption.
    pub fn read_at(&self, offset: u64) -> JournalResult<Option<JournalRecord>> {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        if offset >= write_pos {
            return Ok(None);
        }

        let mut file = self.file.lock();
        let remaining = write_pos.saturating_sub(offset) as usize;

        let mut frame_header = [0u8; FRAME_HEADER_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut frame_header)?;

        let header = record::decode_frame_header(&frame_header, self.id, remaining)?
            .ok_or_else(|| {
                JournalError::segment_corrupted(self.id, format!("missing frame at offset {offset}"))
            })?;

        let mut payload = vec![0u8; header.data_length()];
        file.read_exact(&mut payload)?;
        drop(file);

        record::decode_frame_data(&header, &payload).map(Some)
    }

    /// Rewinds the write position to just after the frame holding `index`
    /// and terminates the frame region there. Frames with a higher index
    /// become unreachable.
    pub fn truncate_to(&self, index: u64) -> JournalResult<()> {
        if index >= self.last_index() {
            return Ok(());
        }

        let mut offset = SEGMENT_HEADER_SIZE as u64;
        let mut last_index = self.first_index - 1;
        while last_index < index {
            match self.read_at(offset)? {
                Some(record) => {
                    last_index = record.index();
                    offset += record.frame_length() as u64;
                }
                None => break,
            }
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&FRAME_TERMINATOR)?;
        file.sync_all()?;

        self.write_pos.store(offset, Ordering::Release);
        self.last_index.store(last_index, Ordering::Release);

        Ok(())
    }

    /// Forces all appended frames to durable storage.
    pub fn flush(&self) -> JournalResult<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    /// Segment id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the first record this segment stores.
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Highest index present, or `first_index - 1` while empty.
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    /// True if no frame has been appended.
    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index
    }

    /// Offset of the first frame, just past the segment header.
    pub fn data_start() -> u64 {
        SEGMENT_HEADER_SIZE as u64
    }

    /// Current logical tail offset.
    pub fn write_pos(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("first_index", &self.first_index)
            .field("last_index", &self.last_index())
            .field("write_pos", &self.write_pos())
            .finish()
    }
}

/// Encodes the 64-byte segment header.
fn encode_header(id: u64, first_index: u64, max_size: u32) -> [u8; SEGMENT_HEADER_SIZE] {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    let mut buf = &mut header[..];
    buf.put_u32_le(SEGMENT_MAGIC);
    buf.put_u16_le(SEGMENT_FORMAT_VERSION);
    buf.put_u16_le(0); // flags
    buf.put_u64_le(id);
    buf.put_u64_le(first_index);
    buf.put_u32_le(max_size);
    // Remaining bytes are reserved and stay zero.
    header
}

/// Decodes and validates the 64-byte segment header.
fn decode_header(
    header: &[u8; SEGMENT_HEADER_SIZE],
    expected_id: u64,
) -> JournalResult<(u64, u64, u32)> {
    let mut buf = &header[..];

    let magic = buf.get_u32_le();
    if magic != SEGMENT_MAGIC {
        return Err(JournalError::InvalidMagic {
            expected: SEGMENT_MAGIC,
            found: magic,
        });
    }

    let version = buf.get_u16_le();
    if version != SEGMENT_FORMAT_VERSION {
        return Err(JournalError::UnsupportedVersion {
            expected: SEGMENT_FORMAT_VERSION,
            found: version,
        });
    }

    let _flags = buf.get_u16_le();
    let id = buf.get_u64_le();
    let first_index = buf.get_u64_le();
    let max_size = buf.get_u32_le();

    if id != expected_id {
        return Err(JournalError::segment_corrupted(
            expected_id,
            format!("segment id mismatch: file is named {expected_id}, header says {id}"),
        ));
    }
    if first_index == 0 {
        return Err(JournalError::segment_corrupted(id, "first index must be positive"));
    }
    if (max_size as usize) < SEGMENT_HEADER_SIZE + FRAME_HEADER_SIZE {
        return Err(JournalError::segment_corrupted(
            id,
            format!("segment size {max_size} cannot hold any record"),
        ));
    }

    Ok((id, first_index, max_size))
}
