//! Durable storage for guard snapshots.

pub mod snapshot_store;

pub use snapshot_store::{GUARD_SNAPSHOT_FILE, SnapshotCadence, SnapshotStore, THROTTLE_SNAPSHOT_FILE};
