//! Journal error types.
//!
//! This module defines all error types for the segmented journal.

use std::io;

use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// I/O error during journal operations.
    #[error("journal I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Not enough usable disk space to allocate a new segment.
    #[error("not enough disk space to allocate a new segment: {available} bytes available, {required} required")]
    OutOfDiskSpace {
        /// Usable bytes reported for the journal directory.
        available: u64,
        /// Bytes the disk-space policy requires.
        required: u64,
    },

    /// The current segment cannot hold the frame being appended.
    #[error("segment {segment_id} is full")]
    SegmentFull {
        /// Id of the full segment.
        segment_id: u64,
    },

    /// A segment file did not start with the expected magic number.
    #[error("invalid segment magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Expected magic number.
        expected: u32,
        /// Magic number found on disk.
        found: u32,
    },

    /// A segment file was written by an unsupported format version.
    #[error("unsupported segment version: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// Version this build understands.
        expected: u16,
        /// Version found on disk.
        found: u16,
    },

    /// A segment file is structurally corrupted.
    #[error("segment {segment_id} corrupted: {reason}")]
    SegmentCorrupted {
        /// Id of the corrupted segment.
        segment_id: u64,
        /// Description of the corruption.
        reason: String,
    },

    /// A record frame failed checksum verification.
    #[error("record checksum mismatch at index {index}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Index of the rejected record.
        index: u64,
        /// Checksum stored in the frame.
        stored: u32,
        /// Checksum computed over the frame contents.
        computed: u32,
    },

    /// A replicated record was appended with a non-contiguous index.
    #[error("invalid record index: expected {expected}, found {found}")]
    InvalidIndex {
        /// The journal's next index.
        expected: u64,
        /// Index carried by the record.
        found: u64,
    },

    /// A seek targeted an index outside the journal's retained range.
    #[error("index {index} out of range [{first}, {last}]")]
    OutOfRange {
        /// Requested index.
        index: u64,
        /// First retained index.
        first: u64,
        /// Last written index.
        last: u64,
    },

    /// A reader advanced past the journal's tail without being rewound.
    #[error("no record at index {index}")]
    NoSuchIndex {
        /// Index the reader expected to find.
        index: u64,
    },

    /// A record frame is too large to fit in an empty segment.
    #[error("record too large: frame of {size} bytes exceeds segment capacity of {max} bytes")]
    RecordTooLarge {
        /// Frame size including the header.
        size: usize,
        /// Usable capacity of an empty segment.
        max: usize,
    },

    /// A record was appended with an empty payload.
    #[error("record payload must not be empty")]
    EmptyData,

    /// The journal configuration is invalid.
    #[error("invalid journal configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// The journal has been closed.
    #[error("journal is closed")]
    Closed,
}

impl JournalError {
    /// Creates a segment corrupted error.
    pub fn segment_corrupted(segment_id: u64, reason: impl Into<String>) -> Self {
        Self::SegmentCorrupted {
            segment_id,
            reason: reason.into(),
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(index: u64, stored: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            index,
            stored,
            computed,
        }
    }

    /// Creates a config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::SegmentCorrupted { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvalidMagic { .. }
                | Self::UnsupportedVersion { .. }
        )
    }
}
