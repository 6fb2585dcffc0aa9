pub mod config;
pub mod guard;
pub mod jitter;
pub mod ring_window;
pub mod snapshot;

pub use config::{THROTTLE_WINDOW_SEC_MAX, ThrottleConfig};
pub use guard::{GLOBAL_KEY, OpKind, ThrottleGuard, WindowTotals};
pub use jitter::{JITTER_BUCKET_SEC, apply_jitter, jitter_bucket, jitter_fraction};
pub use ring_window::{RingWindow, RingWindowState};
pub use snapshot::{
    LegacyThrottleSnapshot, StructuredThrottleSnapshot, THROTTLE_SNAPSHOT_LEGACY_VERSION,
    THROTTLE_SNAPSHOT_STRUCTURED_VERSION, ThrottleRestore, ThrottleSnapshot,
};
