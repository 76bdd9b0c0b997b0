//! Journal records and the on-disk frame codec.
//!
//! Every record is persisted as a single frame:
//!
//! ```text
//! +-----------+-----------+----------+--------------+----------------+
//! | length    | index     | asqn     | checksum     | payload        |
//! | (i32, LE) | (i64, LE) | (i64, LE)| (u32, LE)    | (length - 24)  |
//! +-----------+-----------+----------+--------------+----------------+
//! ```
//!
//! `length` covers the entire frame including itself. A zero length marks
//! the end of valid records in a segment. The checksum is a CRC32 over
//! `index || asqn || length || payload`; flipping any bit of a frame is
//! detected on decode.

use bytes::{Buf, BufMut, Bytes};
use meridian_common::constants::FRAME_HEADER_SIZE;
use meridian_common::types::Asqn;

use crate::error::{JournalError, JournalResult};

/// An indexed record stored in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    index: u64,
    asqn: Asqn,
    checksum: u32,
    data: Bytes,
}

impl JournalRecord {
    pub(crate) fn new(index: u64, asqn: Asqn, checksum: u32, data: Bytes) -> Self {
        Self {
            index,
            asqn,
            checksum,
            data,
        }
    }

    /// Index assigned to this record by the journal.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Application sequence number, or [`Asqn::IGNORE`] if none was given.
    pub fn asqn(&self) -> Asqn {
        self.asqn
    }

    /// Checksum persisted with this record's frame.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Record payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of this record's frame on disk, header included.
    pub fn frame_length(&self) -> usize {
        frame_length(self.data.len())
    }
}

/// Decoded frame header, before the payload has been read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub length: u32,
    pub index: u64,
    pub asqn: Asqn,
    pub checksum: u32,
}

impl FrameHeader {
    /// Payload size implied by the frame length.
    pub fn data_length(&self) -> usize {
        self.length as usize - FRAME_HEADER_SIZE
    }
}

/// Returns the on-disk frame size for a payload of `data_len` bytes.
pub(crate) fn frame_length(data_len: usize) -> usize {
    FRAME_HEADER_SIZE + data_len
}

/// Computes the frame checksum over `index || asqn || length || payload`.
pub(crate) fn compute_checksum(index: u64, asqn: Asqn, length: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&index.to_le_bytes());
    hasher.update(&asqn.as_i64().to_le_bytes());
    hasher.update(&(length as i32).to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

/// Encodes one frame into `buf`, returning the frame length.
///
/// Returns `None` when the buffer cannot hold the frame; the caller treats
/// that as a full segment.
pub(crate) fn encode_frame(index: u64, asqn: Asqn, data: &[u8], mut buf: &mut [u8]) -> Option<usize> {
    let length = frame_length(data.len());
    if buf.len() < length {
        return None;
    }

    let checksum = compute_checksum(index, asqn, length as u32, data);
    buf.put_i32_le(length as i32);
    buf.put_i64_le(index as i64);
    buf.put_i64_le(asqn.as_i64());
    buf.put_u32_le(checksum);
    buf.put_slice(data);

    Some(length)
}

/// Decodes a frame header from `buf`.
///
/// `remaining` is the number of bytes between the frame start and the end
/// of the segment; a length pointing past it cannot belong to a complete
/// frame. Returns `Ok(None)` at the end of valid records (zero length, or
/// too few bytes left for a header) and an error for anything that can
/// only be corruption.
pub(crate) fn decode_frame_header(
    mut buf: &[u8],
    segment_id: u64,
    remaining: usize,
) -> JournalResult<Option<FrameHeader>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let length = buf.get_i32_le();
    if length == 0 {
        return Ok(None);
    }
    if length < FRAME_HEADER_SIZE as i32 {
        return Err(JournalError::segment_corrupted(
            segment_id,
            format!("invalid frame length {length}"),
        ));
    }
    if length as usize > remaining {
        return Err(JournalError::segment_corrupted(
            segment_id,
            format!("frame length {length} exceeds segment bounds ({remaining} bytes remaining)"),
        ));
    }

    let index = buf.get_i64_le() as u64;
    let asqn = Asqn::new(buf.get_i64_le());
    let checksum = buf.get_u32_le();

    Ok(Some(FrameHeader {
        length: length as u32,
        index,
        asqn,
        checksum,
    }))
}

/// Verifies the payload against the header checksum and assembles the
/// record.
pub(crate) fn decode_frame_data(header: &FrameHeader, data: &[u8]) -> JournalResult<JournalRecord> {
    debug_assert_eq!(data.len(), header.data_length());

    let computed = compute_checksum(header.index, header.asqn, header.length, data);
    if computed != header.checksum {
        return Err(JournalError::checksum_mismatch(
            header.index,
            header.checksum,
            computed,
        ));
    }

    Ok(JournalRecord::new(
        header.index,
        header.asqn,
        header.checksum,
        Bytes::copy_from_slice(data),
    ))
}
