//! System-wide constants for Meridian.
//!
//! This module defines the on-disk journal format constants and the
//! defaults used across the system.

// =============================================================================
// Journal Segment Format
// =============================================================================

/// Magic number at the start of every segment file.
pub const SEGMENT_MAGIC: u32 = 0x5A45_4542; // "ZEEB"

/// Version number of the segment format.
pub const SEGMENT_FORMAT_VERSION: u16 = 1;

/// Size of the segment file header in bytes.
///
/// The header contains: magic (4), version (2), flags (2), segment_id (8),
/// first_index (8), max_size (4) = 28 bytes, padded with 36 reserved bytes
/// to 64 for alignment.
pub const SEGMENT_HEADER_SIZE: usize = 64;

/// Size of a record frame header in bytes.
///
/// The frame header contains: length (4), index (8), asqn (8),
/// checksum (4) = 24 bytes. The payload follows immediately.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Number of digits the segment id is zero-padded to in file names, so
/// that lexicographic ordering matches numeric ordering.
pub const SEGMENT_ID_DIGITS: usize = 20;

// =============================================================================
// Journal Defaults
// =============================================================================

/// Default journal name (segment file prefix).
pub const DEFAULT_JOURNAL_NAME: &str = "journal";

/// Default maximum segment size (64 MB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u32 = 64 * 1024 * 1024;

/// Default minimum usable disk space required before a new segment may be
/// allocated (1 GB).
pub const DEFAULT_MIN_FREE_DISK_SPACE: u64 = 1024 * 1024 * 1024;

/// Default number of records between sparse-index entries.
pub const DEFAULT_INDEX_STRIDE: u64 = 100;

/// Number of segment-sized allocations the disk-space policy reserves
/// headroom for when rolling: the new segment, the still-open current
/// segment, and temporary allocation overhead.
pub const SEGMENT_BUFFER_FACTOR: u64 = 3;
