use std::collections::BTreeMap;

use super::guard::OpKind;
use super::ring_window::RingWindowState;

pub const THROTTLE_SNAPSHOT_LEGACY_VERSION: u32 = 1;
pub const THROTTLE_SNAPSHOT_STRUCTURED_VERSION: u32 = 2;

/// Persisted throttle state in one of the two supported shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleSnapshot {
    Legacy(LegacyThrottleSnapshot),
    Structured(StructuredThrottleSnapshot),
}

impl ThrottleSnapshot {
    pub fn version(&self) -> u32 {
        match self {
            ThrottleSnapshot::Legacy(_) => THROTTLE_SNAPSHOT_LEGACY_VERSION,
            ThrottleSnapshot::Structured(_) => THROTTLE_SNAPSHOT_STRUCTURED_VERSION,
        }
    }
}

/// Version 1: aggregate counters only, no per-window detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyThrottleSnapshot {
    /// Start of the observed window (unix ms); 0 when no events were seen.
    pub window_since_ms: u64,
    pub events_total: u64,
    pub backoff_ms_max: u64,
    /// Unix ms of the newest recorded event; 0 when none.
    pub last_event_ms: u64,
}

/// Version 2: raw ring buffers per (symbol, kind).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredThrottleSnapshot {
    pub window_sec: u64,
    pub symbols: BTreeMap<String, BTreeMap<OpKind, RingWindowState>>,
}

/// What a snapshot load did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleRestore {
    pub windows_restored: usize,
    /// Windows that were missing or malformed and started empty instead.
    pub windows_reset: usize,
    /// Restored windows that were re-bucketed from another window length.
    pub windows_resized: usize,
}
