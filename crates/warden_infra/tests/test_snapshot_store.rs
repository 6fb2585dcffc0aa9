//! Integration tests for atomic snapshot files and the control plane restore path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use warden_core::execution::{ActionRejectReason, BackoffSignals};
use warden_core::risk::{RuntimeGuardConfig, TickSignals};
use warden_core::throttle::{OpKind, ThrottleConfig};
use warden_infra::config::GuardStackConfig;
use warden_infra::store::{GUARD_SNAPSHOT_FILE, THROTTLE_SNAPSHOT_FILE};
use warden_infra::{ControlPlane, SnapshotStore};

static STORE_COUNTER: AtomicUsize = AtomicUsize::new(0);

const T0_MS: u64 = 1_700_000_000_000;

fn temp_store_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let idx = STORE_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "warden_infra_snapshots_{}_{}_{}",
        label,
        std::process::id(),
        idx
    ));
    let _ = std::fs::remove_dir_all(&path);
    path
}

fn stack_config() -> GuardStackConfig {
    GuardStackConfig {
        throttle: ThrottleConfig {
            window_sec: 4,
            max_creates_per_sec: 0.25,
            ..ThrottleConfig::default()
        },
        runtime_guard: RuntimeGuardConfig {
            consecutive_breaches_to_pause: 1,
            hysteresis_bad_required: 1,
            hysteresis_good_required: 3,
            snapshot_period_sec: 30,
            ..RuntimeGuardConfig::default()
        },
        ..GuardStackConfig::default()
    }
}

fn bad() -> TickSignals {
    TickSignals {
        rest_error_rate: 0.5,
        ..TickSignals::default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SnapshotStore
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_snapshot_loads_as_none() {
    let store = SnapshotStore::open(temp_store_dir("missing")).expect("open store");
    assert!(store.load_throttle().expect("no io error").is_none());
    assert!(store.load_guard().expect("no io error").is_none());
    assert_eq!(store.load_failures_total(), 0);
}

#[test]
fn test_write_leaves_no_temp_file() {
    let dir = temp_store_dir("atomic");
    let store = SnapshotStore::open(&dir).expect("open store");
    store.write_atomic(GUARD_SNAPSHOT_FILE, r#"{"paused":false}"#).expect("write");
    store.write_atomic(GUARD_SNAPSHOT_FILE, r#"{"paused":true}"#).expect("overwrite");

    assert!(!dir.join(format!("{GUARD_SNAPSHOT_FILE}.tmp")).exists());
    let loaded = store.load_guard().expect("load").expect("present");
    assert_eq!(loaded.value.paused, Some(true), "second write replaces the first");
    assert_eq!(store.writes_total(), 2);
}

#[test]
fn test_corrupt_snapshot_counts_as_load_failure() {
    let store = SnapshotStore::open(temp_store_dir("corrupt")).expect("open store");
    store.write_atomic(THROTTLE_SNAPSHOT_FILE, "{truncated").expect("write");

    assert!(store.load_throttle().is_err());
    assert_eq!(store.load_failures_total(), 1);
}

// ────────────────────────────────────────────────────────────────────────────
// ControlPlane
// ────────────────────────────────────────────────────────────────────────────

/// GIVEN a paused guard and a full create window persisted to disk
/// WHEN a new control plane restores from the same directory
/// THEN it is still paused and the window is still full.
#[test]
fn test_restart_restores_pause_and_windows() {
    let dir = temp_store_dir("restart");
    let config = stack_config();

    let mut before = ControlPlane::new(&config, SnapshotStore::open(&dir).expect("open store"));
    let admission = before
        .admit(OpKind::Create, "BTCUSDT", BackoffSignals::default(), T0_MS)
        .expect("first create admitted");
    admission.commit(before.throttle_mut(), T0_MS);
    assert!(before.on_tick(&bad(), T0_MS + 1_000).paused);
    before.persist(T0_MS + 1_000).expect("persist");

    let mut after = ControlPlane::new(&config, SnapshotStore::open(&dir).expect("open store"));
    let report = after.restore(T0_MS + 2_000);
    assert_eq!(report.field_issues, 0);
    assert_eq!(report.guard_fields, Some(10));
    let throttle = report.throttle.expect("throttle restored");
    assert_eq!(throttle.windows_restored, 3);

    assert!(after.guard().paused(), "pause survives the restart");
    assert_eq!(after.throttle().events_in_window_total("BTCUSDT", T0_MS + 2_000), 1);

    after.guard_mut().set_dry_run(true);
    let rejected = after
        .admit(OpKind::Create, "BTCUSDT", BackoffSignals::default(), T0_MS + 2_000)
        .expect_err("window restored as full");
    assert_eq!(rejected.reason, ActionRejectReason::ThrottleWindowExhausted);
}

#[test]
fn test_restore_skips_corrupt_file_and_keeps_defaults() {
    let dir = temp_store_dir("restore_corrupt");
    let store = SnapshotStore::open(&dir).expect("open store");
    store.write_atomic(GUARD_SNAPSHOT_FILE, "not json").expect("write");

    let mut plane = ControlPlane::new(&stack_config(), store);
    let report = plane.restore(T0_MS);
    assert_eq!(report.guard_fields, None);
    assert_eq!(report.throttle, None);
    assert!(!plane.guard().paused());
}

#[test]
fn test_persist_if_due_follows_cadence() {
    let dir = temp_store_dir("cadence");
    let mut plane = ControlPlane::new(&stack_config(), SnapshotStore::open(&dir).expect("open"));

    assert!(plane.persist_if_due(T0_MS).expect("first write"));
    assert!(!plane.persist_if_due(T0_MS + 29_999).expect("not due"));
    assert!(plane.persist_if_due(T0_MS + 30_000).expect("due again"));
    assert_eq!(plane.store().writes_total(), 4, "two files per persist");
    assert!(dir.join(THROTTLE_SNAPSHOT_FILE).exists());
}
