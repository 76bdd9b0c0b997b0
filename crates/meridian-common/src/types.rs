//! Core identifier types for Meridian.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application sequence number attached to a journal record.
///
/// The ASQN is assigned by the caller (the stream processor) and is opaque
/// to the journal, which stores it verbatim and allows seeking by it. A
/// record appended without an application sequence carries [`Asqn::IGNORE`].
///
/// # Example
///
/// ```rust
/// use meridian_common::types::Asqn;
///
/// let asqn = Asqn::new(42);
/// assert_eq!(asqn.as_i64(), 42);
/// assert!(asqn.is_set());
/// assert!(!Asqn::IGNORE.is_set());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Asqn(i64);

impl Asqn {
    /// Sentinel meaning "no application sequence number".
    pub const IGNORE: Self = Self(-1);

    /// Creates a new `Asqn` from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(asqn: i64) -> Self {
        Self(asqn)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this is a caller-supplied sequence number rather
    /// than the [`Self::IGNORE`] sentinel.
    #[inline]
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.0 != Self::IGNORE.0
    }
}

impl fmt::Debug for Asqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::IGNORE {
            write!(f, "Asqn(IGNORE)")
        } else {
            write!(f, "Asqn({})", self.0)
        }
    }
}

impl fmt::Display for Asqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Asqn {
    #[inline]
    fn from(asqn: i64) -> Self {
        Self::new(asqn)
    }
}

impl From<Asqn> for i64 {
    #[inline]
    fn from(asqn: Asqn) -> Self {
        asqn.0
    }
}
