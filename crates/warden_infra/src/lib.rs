//! Infrastructure around the runtime safety core: configuration loading,
//! snapshot persistence, logging setup and the control-plane composition root.

#[path = "../config/mod.rs"]
pub mod config;
pub mod control_plane;
pub mod snapshot;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, GuardStackConfig, ValidationMode};
pub use control_plane::{ControlPlane, RestoreReport};
pub use snapshot::SnapshotError;
pub use store::{SnapshotCadence, SnapshotStore};
pub use telemetry::{TelemetryError, init_tracing};
