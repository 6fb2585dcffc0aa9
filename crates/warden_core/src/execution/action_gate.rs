use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::risk::{BreachReason, RuntimeGuard};
use crate::throttle::{OpKind, ThrottleGuard};

/// Signals that feed the throttle backoff for one action.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BackoffSignals {
    pub error_rate: f64,
    pub ws_lag_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRejectReason {
    /// The throttle window for this kind is full; try again later.
    ThrottleWindowExhausted,
    /// The runtime guard is (effectively) paused.
    GuardPaused { reason: BreachReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReject {
    pub kind: OpKind,
    pub reason: ActionRejectReason,
}

/// Permission to send one request. Dropping it without `commit` leaves the
/// throttle window untouched.
#[must_use = "an admitted action must be committed once it is sent"]
#[derive(Debug, PartialEq, Eq)]
pub struct Admission {
    kind: OpKind,
    symbol: String,
    /// Delay to apply before sending.
    pub backoff_ms: u64,
}

impl Admission {
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Record the request as issued at `sent_at_ms`.
    pub fn commit(self, throttle: &mut ThrottleGuard, sent_at_ms: u64) {
        throttle.record_event(self.kind, &self.symbol, sent_at_ms);
    }
}

pub struct ActionGateMetrics {
    throttled_total: AtomicU64,
    paused_total: AtomicU64,
    admitted_total: AtomicU64,
}

impl ActionGateMetrics {
    pub const fn new() -> Self {
        Self {
            throttled_total: AtomicU64::new(0),
            paused_total: AtomicU64::new(0),
            admitted_total: AtomicU64::new(0),
        }
    }

    pub fn reject_total(&self, reason: ActionRejectReason) -> u64 {
        match reason {
            ActionRejectReason::ThrottleWindowExhausted => {
                self.throttled_total.load(Ordering::Relaxed)
            }
            ActionRejectReason::GuardPaused { .. } => self.paused_total.load(Ordering::Relaxed),
        }
    }

    fn bump(&self, reason: ActionRejectReason) {
        match reason {
            ActionRejectReason::ThrottleWindowExhausted => {
                self.throttled_total.fetch_add(1, Ordering::Relaxed);
            }
            ActionRejectReason::GuardPaused { .. } => {
                self.paused_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for ActionGateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static ACTION_GATE_METRICS: ActionGateMetrics = ActionGateMetrics::new();

pub fn action_reject_total(reason: ActionRejectReason) -> u64 {
    ACTION_GATE_METRICS.reject_total(reason)
}

pub fn action_admitted_total() -> u64 {
    ACTION_GATE_METRICS.admitted_total.load(Ordering::Relaxed)
}

fn reject(kind: OpKind, symbol: &str, reason: ActionRejectReason) -> ActionReject {
    ACTION_GATE_METRICS.bump(reason);
    match reason {
        ActionRejectReason::ThrottleWindowExhausted => {
            debug!(%kind, symbol, "action rejected: throttle window exhausted");
        }
        ActionRejectReason::GuardPaused { reason } => {
            warn!(%kind, symbol, reason = %reason, "action rejected: runtime guard paused");
        }
    }
    ActionReject { kind, reason }
}

/// Caller-side preflight for one order action.
///
/// Order: throttle window, then the guard's effective pause, then backoff.
/// Neither guard is mutated except for the backoff state; the throttle event
/// is recorded only when the returned [`Admission`] is committed.
pub fn admit_action(
    throttle: &mut ThrottleGuard,
    guard: &RuntimeGuard,
    kind: OpKind,
    symbol: &str,
    signals: BackoffSignals,
    now_ms: u64,
) -> Result<Admission, ActionReject> {
    if !throttle.allowed(kind, symbol, now_ms) {
        return Err(reject(kind, symbol, ActionRejectReason::ThrottleWindowExhausted));
    }
    if guard.effective_paused() {
        let reason = if guard.config().manual_override_pause {
            guard.last_reason() | BreachReason::MANUAL_OVERRIDE
        } else {
            guard.pause_reason()
        };
        return Err(reject(kind, symbol, ActionRejectReason::GuardPaused { reason }));
    }
    let backoff_ms =
        throttle.compute_backoff_ms(signals.error_rate, signals.ws_lag_ms, now_ms, Some(symbol));
    ACTION_GATE_METRICS.admitted_total.fetch_add(1, Ordering::Relaxed);
    Ok(Admission {
        kind,
        symbol: symbol.to_string(),
        backoff_ms,
    })
}
