//! # meridian-journal
//!
//! The segmented append-only journal backing a Meridian partition.
//!
//! Records are opaque byte payloads. The journal assigns each one a
//! strictly increasing index and persists it across rolling fixed-size
//! segment files; the stream processor may attach an application sequence
//! number ([`meridian_common::Asqn`]) for application-level seeks. A
//! single writer appends, truncates, and resets while any number of
//! readers stream records; truncation rewinds readers that have advanced
//! past the new tail.
//!
//! All state is recoverable by scanning the segment files: there is no
//! manifest, and a torn frame at the tail of a crashed process is trimmed
//! on the next open. Frames carry a CRC32 checksum verified on every
//! read.
//!
//! ## Example
//!
//! ```no_run
//! use meridian_journal::{Journal, JournalConfig};
//!
//! # fn main() -> meridian_journal::JournalResult<()> {
//! let journal = Journal::open(JournalConfig::new("data/journal"))?;
//!
//! let record = journal.append(b"workflow-event")?;
//! journal.flush()?;
//!
//! let mut reader = journal.open_reader()?;
//! reader.seek(record.index())?;
//! assert_eq!(reader.next()?.data().as_ref(), b"workflow-event");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Journal configuration.
pub mod config;

/// Error types.
pub mod error;

/// Metrics hooks.
pub mod metrics;

/// Records and the frame codec.
pub mod record;

mod index;
mod journal;
mod reader;
mod segment;
mod segments;
mod writer;

pub use config::JournalConfig;
pub use error::{JournalError, JournalResult};
pub use journal::Journal;
pub use metrics::{MetricsSink, NoopMetrics};
pub use reader::JournalReader;
pub use record::JournalRecord;

pub use meridian_common::Asqn;
