//! Composition root for the tick loop: owns the throttle, the runtime guard and
//! their snapshot store.

use tracing::{error, info, warn};
use warden_core::execution::{ActionReject, Admission, BackoffSignals, admit_action};
use warden_core::risk::{GuardDecision, RuntimeGuard, TickSignals};
use warden_core::throttle::{OpKind, ThrottleGuard, ThrottleRestore};

use crate::config::GuardStackConfig;
use crate::snapshot::SnapshotError;
use crate::store::{SnapshotCadence, SnapshotStore};

/// Outcome of [`ControlPlane::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// `None` when no usable throttle snapshot was found.
    pub throttle: Option<ThrottleRestore>,
    /// Guard fields applied; `None` when no usable guard snapshot was found.
    pub guard_fields: Option<usize>,
    /// Fields that failed to decode and kept their defaults.
    pub field_issues: usize,
}

pub struct ControlPlane {
    throttle: ThrottleGuard,
    guard: RuntimeGuard,
    store: SnapshotStore,
    cadence: SnapshotCadence,
}

impl ControlPlane {
    pub fn new(config: &GuardStackConfig, store: SnapshotStore) -> Self {
        Self {
            throttle: ThrottleGuard::new(config.throttle),
            guard: RuntimeGuard::new(config.runtime_guard.clone()),
            cadence: SnapshotCadence::new(config.runtime_guard.snapshot_period_sec),
            store,
        }
    }

    pub fn throttle(&self) -> &ThrottleGuard {
        &self.throttle
    }

    pub fn throttle_mut(&mut self) -> &mut ThrottleGuard {
        &mut self.throttle
    }

    pub fn guard(&self) -> &RuntimeGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut RuntimeGuard {
        &mut self.guard
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Load both snapshots. A missing file leaves that component fresh; an
    /// unreadable or corrupt one is logged and skipped.
    pub fn restore(&mut self, now_ms: u64) -> RestoreReport {
        let mut report = RestoreReport::default();

        match self.store.load_throttle() {
            Ok(Some(decoded)) => {
                report.field_issues += decoded.issues.len();
                report.throttle = Some(self.throttle.load_snapshot(&decoded.value, now_ms));
            }
            Ok(None) => {}
            Err(err) => error!(error = %err, "throttle snapshot unusable, starting fresh"),
        }

        match self.store.load_guard() {
            Ok(Some(decoded)) => {
                report.field_issues += decoded.issues.len();
                report.guard_fields = Some(self.guard.load_snapshot(&decoded.value));
            }
            Ok(None) => {}
            Err(err) => error!(error = %err, "guard snapshot unusable, starting fresh"),
        }

        if self.guard.paused() {
            warn!(
                reason = %self.guard.last_reason(),
                effective = self.guard.effective_paused(),
                "restored in paused state"
            );
        }
        info!(
            throttle_restored = report.throttle.is_some(),
            guard_fields = report.guard_fields.unwrap_or(0),
            field_issues = report.field_issues,
            "control plane restored"
        );
        report
    }

    /// Write both snapshots unconditionally.
    pub fn persist(&mut self, now_ms: u64) -> Result<(), SnapshotError> {
        self.cadence.mark(now_ms);
        self.store.save_throttle(&self.throttle.to_snapshot())?;
        self.store.save_guard(&self.guard.to_snapshot())
    }

    /// Write both snapshots when the cadence allows. Returns whether a write
    /// was attempted and succeeded.
    pub fn persist_if_due(&mut self, now_ms: u64) -> Result<bool, SnapshotError> {
        if !self.cadence.is_due(now_ms) {
            return Ok(false);
        }
        self.persist(now_ms).map_err(|err| {
            error!(error = %err, "periodic snapshot failed");
            err
        })?;
        Ok(true)
    }

    /// Feed one tick of health signals to the guard.
    pub fn on_tick(&mut self, signals: &TickSignals, now_ms: u64) -> GuardDecision {
        self.guard.update(signals, now_ms)
    }

    /// Preflight one order action against the throttle and the guard.
    pub fn admit(
        &mut self,
        kind: OpKind,
        symbol: &str,
        signals: BackoffSignals,
        now_ms: u64,
    ) -> Result<Admission, ActionReject> {
        admit_action(&mut self.throttle, &self.guard, kind, symbol, signals, now_ms)
    }
}
