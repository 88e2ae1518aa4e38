//! # Formats
//!
//! Byte-level encodings. File and database I/O lives in `storage`.

mod snapshot;

pub use snapshot::{SnapshotHeader, snapshot_from_bytes, snapshot_to_bytes};
