//! # meridian-common
//!
//! Common types and constants for Meridian.
//!
//! This crate provides the foundational pieces shared across Meridian
//! components:
//!
//! - **Types**: the application sequence number (`Asqn`) attached to
//!   journal records by the stream processor
//! - **Constants**: on-disk format constants and system-wide defaults

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

pub use types::Asqn;
