//! # tt-types
//!
//! Shared data model for the torrent recovery subsystem: engine snapshots, the
//! closed error taxonomy and the recovery flow vocabulary.

pub mod envelope;
pub mod recovery;
pub mod torrent;

pub use envelope::*;
pub use recovery::*;
pub use torrent::*;
