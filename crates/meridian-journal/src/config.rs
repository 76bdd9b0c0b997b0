//! Journal configuration.
//!
//! This module provides configuration options for the segmented journal.

use std::path::PathBuf;

use meridian_common::constants::{
    DEFAULT_INDEX_STRIDE, DEFAULT_JOURNAL_NAME, DEFAULT_MAX_SEGMENT_SIZE,
    DEFAULT_MIN_FREE_DISK_SPACE, FRAME_HEADER_SIZE, SEGMENT_HEADER_SIZE, SEGMENT_ID_DIGITS,
};

use crate::error::{JournalError, JournalResult};

/// Configuration for a segmented journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Journal name, used as the segment file prefix.
    pub name: String,

    /// Directory where segment files are stored.
    pub directory: PathBuf,

    /// Size of each segment file in bytes.
    pub max_segment_size: u32,

    /// Minimum usable disk space required before a new segment may be
    /// allocated during rollover.
    pub min_free_disk_space: u64,

    /// Whether new segment files are sized to `max_segment_size` at create.
    pub preallocate_segment_files: bool,

    /// Upper bound on committed indexes. On open, records strictly above
    /// this index are treated as uncommitted and dropped. `u64::MAX`
    /// disables the hint.
    pub last_written_index: u64,

    /// Number of records between sparse-index entries.
    pub index_stride: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_JOURNAL_NAME.to_string(),
            directory: PathBuf::from("data/journal"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            min_free_disk_space: DEFAULT_MIN_FREE_DISK_SPACE,
            preallocate_segment_files: true,
            last_written_index: u64::MAX,
            index_stride: DEFAULT_INDEX_STRIDE,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with the specified directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Sets the journal name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub fn with_max_segment_size(mut self, size: u32) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the minimum free disk space required before rollover.
    #[must_use]
    pub fn with_min_free_disk_space(mut self, bytes: u64) -> Self {
        self.min_free_disk_space = bytes;
        self
    }

    /// Sets whether segment files are preallocated to full size.
    #[must_use]
    pub fn with_preallocate_segment_files(mut self, preallocate: bool) -> Self {
        self.preallocate_segment_files = preallocate;
        self
    }

    /// Sets the last written index hint used during recovery.
    #[must_use]
    pub fn with_last_written_index(mut self, index: u64) -> Self {
        self.last_written_index = index;
        self
    }

    /// Sets the number of records between sparse-index entries.
    #[must_use]
    pub fn with_index_stride(mut self, stride: u64) -> Self {
        self.index_stride = stride;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> JournalResult<()> {
        if self.name.is_empty() {
            return Err(JournalError::invalid_config("journal name must not be empty"));
        }

        if self.name.contains(['/', '\\']) {
            return Err(JournalError::invalid_config(
                "journal name must not contain path separators",
            ));
        }

        let min_size = (SEGMENT_HEADER_SIZE + FRAME_HEADER_SIZE + 1) as u32;
        if self.max_segment_size < min_size {
            return Err(JournalError::invalid_config(format!(
                "max segment size must be at least {min_size} bytes to hold one record"
            )));
        }

        if self.index_stride == 0 {
            return Err(JournalError::invalid_config("index stride must be positive"));
        }

        Ok(())
    }

    /// Returns the segment file path for a given segment id.
    ///
    /// Ids are zero-padded so that lexicographic ordering of file names
    /// matches numeric ordering of ids.
    pub fn segment_path(&self, segment_id: u64) -> PathBuf {
        self.directory
            .join(format!("{}-{:0width$}.log", self.name, segment_id, width = SEGMENT_ID_DIGITS))
    }

    /// Parses a segment id out of a file name produced by
    /// [`Self::segment_path`]. Returns `None` for files that do not belong
    /// to this journal.
    pub fn parse_segment_id(&self, file_name: &str) -> Option<u64> {
        let digits = file_name
            .strip_prefix(self.name.as_str())?
            .strip_prefix('-')?
            .strip_suffix(".log")?;
        if digits.len() != SEGMENT_ID_DIGITS {
            return None;
        }
        digits.parse::<u64>().ok()
    }

    /// Returns the number of payload-carrying bytes an empty segment can
    /// hold.
    pub fn segment_capacity(&self) -> usize {
        self.max_segment_size as usize - SEGMENT_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JournalConfig::default();
        assert_eq!(config.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);
        assert_eq!(config.index_stride, DEFAULT_INDEX_STRIDE);
        assert!(config.preallocate_segment_files);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = JournalConfig::new("/tmp/journal")
            .with_name("raft-partition-1")
            .with_max_segment_size(1024)
            .with_preallocate_segment_files(false)
            .with_index_stride(10);

        assert_eq!(config.directory, PathBuf::from("/tmp/journal"));
        assert_eq!(config.name, "raft-partition-1");
        assert_eq!(config.max_segment_size, 1024);
        assert!(!config.preallocate_segment_files);
        assert_eq!(config.index_stride, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        // Segment too small to hold a single record.
        let config = JournalConfig::default().with_max_segment_size(64);
        assert!(config.validate().is_err());

        // Empty name.
        let config = JournalConfig::default().with_name("");
        assert!(config.validate().is_err());

        // Name with a path separator.
        let config = JournalConfig::default().with_name("a/b");
        assert!(config.validate().is_err());

        // Zero stride.
        let config = JournalConfig::default().with_index_stride(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_segment_path() {
        let config = JournalConfig::new("/data/journal").with_name("part-3");
        let path = config.segment_path(1);
        assert_eq!(
            path,
            PathBuf::from("/data/journal/part-3-00000000000000000001.log")
        );

        let path = config.segment_path(42);
        assert_eq!(
            path,
            PathBuf::from("/data/journal/part-3-00000000000000000042.log")
        );
    }

    #[test]
    fn test_parse_segment_id() {
        let config = JournalConfig::new("/data/journal").with_name("part-3");

        assert_eq!(
            config.parse_segment_id("part-3-00000000000000000042.log"),
            Some(42)
        );
        assert_eq!(config.parse_segment_id("part-3-42.log"), None);
        assert_eq!(
            config.parse_segment_id("other-00000000000000000042.log"),
            None
        );
        assert_eq!(config.parse_segment_id("part-3-snapshot.bin"), None);
    }

    #[test]
    fn test_path_roundtrip() {
        let config = JournalConfig::new("/data/journal").with_name("p");
        let path = config.segment_path(7);
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(config.parse_segment_id(file_name), Some(7));
    }
}
