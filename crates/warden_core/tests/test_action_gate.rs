use std::sync::Mutex;

use warden_core::execution::{
    ActionRejectReason, BackoffSignals, action_admitted_total, action_reject_total, admit_action,
};
use warden_core::risk::{BreachReason, RuntimeGuard, RuntimeGuardConfig, TickSignals};
use warden_core::throttle::{OpKind, ThrottleConfig, ThrottleGuard};

/// Gate metrics are process-wide statics; serialize tests that read deltas.
static TEST_MUTEX: Mutex<()> = Mutex::new(());

const T0_MS: u64 = 1_700_000_000_000;

fn one_create_per_window() -> ThrottleGuard {
    ThrottleGuard::new(ThrottleConfig {
        window_sec: 1,
        max_creates_per_sec: 1.0,
        jitter_pct: 0.0,
        ..ThrottleConfig::default()
    })
}

fn paused_guard() -> RuntimeGuard {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        consecutive_breaches_to_pause: 1,
        hysteresis_bad_required: 1,
        ..RuntimeGuardConfig::default()
    });
    let bad = TickSignals {
        rest_error_rate: 0.5,
        ..TickSignals::default()
    };
    guard.update(&bad, T0_MS);
    guard
}

#[test]
fn test_committed_action_consumes_window() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = one_create_per_window();
    let guard = RuntimeGuard::new(RuntimeGuardConfig::default());
    let admitted_before = action_admitted_total();
    let throttled_before = action_reject_total(ActionRejectReason::ThrottleWindowExhausted);

    let admission = admit_action(
        &mut throttle,
        &guard,
        OpKind::Create,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS,
    )
    .expect("first create admitted");
    assert_eq!(admission.backoff_ms, 0);
    assert_eq!(admission.symbol(), "BTCUSDT");
    admission.commit(&mut throttle, T0_MS);

    let rejected = admit_action(
        &mut throttle,
        &guard,
        OpKind::Create,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS,
    )
    .expect_err("window is full");
    assert_eq!(rejected.reason, ActionRejectReason::ThrottleWindowExhausted);
    assert_eq!(rejected.kind, OpKind::Create);

    assert_eq!(action_admitted_total() - admitted_before, 1);
    assert_eq!(
        action_reject_total(ActionRejectReason::ThrottleWindowExhausted) - throttled_before,
        1
    );
}

#[test]
fn test_uncommitted_admission_leaves_window_untouched() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = one_create_per_window();
    let guard = RuntimeGuard::new(RuntimeGuardConfig::default());

    for _ in 0..3 {
        let admission = admit_action(
            &mut throttle,
            &guard,
            OpKind::Create,
            "BTCUSDT",
            BackoffSignals::default(),
            T0_MS,
        );
        assert!(admission.is_ok(), "dropped admissions never fill the window");
    }
    assert_eq!(throttle.events_in_window_total("BTCUSDT", T0_MS), 0);
}

#[test]
fn test_paused_guard_rejects_with_reason() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = one_create_per_window();
    let guard = paused_guard();
    let paused_before = action_reject_total(ActionRejectReason::GuardPaused {
        reason: BreachReason::NONE,
    });

    let rejected = admit_action(
        &mut throttle,
        &guard,
        OpKind::Cancel,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS,
    )
    .expect_err("paused guard blocks actions");
    assert_eq!(
        rejected.reason,
        ActionRejectReason::GuardPaused {
            reason: BreachReason::HIGH_ERROR_RATE
        }
    );
    assert_eq!(
        action_reject_total(ActionRejectReason::GuardPaused {
            reason: BreachReason::NONE
        }) - paused_before,
        1
    );
}

#[test]
fn test_dry_run_pause_admits() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = one_create_per_window();
    let mut guard = paused_guard();
    guard.set_dry_run(true);
    assert!(guard.paused());

    let admission = admit_action(
        &mut throttle,
        &guard,
        OpKind::Create,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS,
    );
    assert!(admission.is_ok(), "dry run never blocks");
}

#[test]
fn test_manual_override_reports_manual_bit() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = one_create_per_window();
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig::default());
    guard.set_manual_override(true);

    let rejected = admit_action(
        &mut throttle,
        &guard,
        OpKind::Amend,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS,
    )
    .expect_err("manual override blocks actions");
    match rejected.reason {
        ActionRejectReason::GuardPaused { reason } => {
            assert!(reason.contains(BreachReason::MANUAL_OVERRIDE), "got {reason}");
        }
        other => panic!("unexpected reject {other:?}"),
    }
}

#[test]
fn test_backoff_follows_signals() {
    let _lock = TEST_MUTEX.lock().expect("action gate test mutex");
    let mut throttle = ThrottleGuard::new(ThrottleConfig {
        jitter_pct: 0.0,
        ..ThrottleConfig::default()
    });
    let guard = RuntimeGuard::new(RuntimeGuardConfig::default());
    let degraded = BackoffSignals {
        error_rate: 0.05,
        ws_lag_ms: 0.0,
    };

    let mut backoffs = Vec::new();
    for step in 0..3 {
        let admission = admit_action(
            &mut throttle,
            &guard,
            OpKind::Cancel,
            "BTCUSDT",
            degraded,
            T0_MS + step * 100,
        )
        .expect("cancels admitted");
        backoffs.push(admission.backoff_ms);
    }
    assert_eq!(backoffs, vec![200, 400, 800]);

    let clean = admit_action(
        &mut throttle,
        &guard,
        OpKind::Cancel,
        "BTCUSDT",
        BackoffSignals::default(),
        T0_MS + 300,
    )
    .expect("cancel admitted");
    assert_eq!(clean.backoff_ms, 0);
}
