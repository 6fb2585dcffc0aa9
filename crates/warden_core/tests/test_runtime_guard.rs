use std::collections::HashMap;

use warden_core::risk::{
    BreachReason, RuntimeGuard, RuntimeGuardConfig, RuntimeGuardSnapshot, SymbolOverrides,
    TickSignals, Transition,
};

const MINUTE_MS: u64 = 60_000;

fn bad() -> TickSignals {
    TickSignals {
        rest_error_rate: 0.5,
        ..TickSignals::default()
    }
}

fn clean() -> TickSignals {
    TickSignals::default()
}

fn hysteresis(bad_required: u32, good_required: u32, recovery_minutes: f64) -> RuntimeGuardConfig {
    RuntimeGuardConfig {
        consecutive_breaches_to_pause: bad_required,
        hysteresis_bad_required: bad_required,
        hysteresis_good_required: good_required,
        recovery_minutes,
        ..RuntimeGuardConfig::default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pause / resume
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_two_breaches_pause_one_does_not() {
    let mut guard = RuntimeGuard::new(hysteresis(2, 1, 5.0));

    let first = guard.update(&bad(), 1_000);
    assert!(!first.paused, "a single breach must not pause");
    assert_eq!(first.transition, None);

    let second = guard.update(&bad(), 2_000);
    assert!(second.paused, "two consecutive breaches must pause");
    assert_eq!(second.transition, Some(Transition::Paused));
    assert_eq!(guard.pauses_total(), 1);
    assert_eq!(guard.pause_reason(), BreachReason::HIGH_ERROR_RATE);
    assert_eq!(guard.last_change_ts_ms(), 2_000);
}

#[test]
fn test_interrupted_breach_streak_does_not_pause() {
    let mut guard = RuntimeGuard::new(hysteresis(2, 1, 5.0));
    guard.update(&bad(), 1_000);
    guard.update(&clean(), 2_000);
    let decision = guard.update(&bad(), 3_000);
    assert!(!decision.paused);
    assert_eq!(guard.consecutive_bad(), 1);
}

#[test]
fn test_hysteresis_bad_is_capped_by_legacy_threshold() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        consecutive_breaches_to_pause: 2,
        hysteresis_bad_required: 5,
        ..RuntimeGuardConfig::default()
    });
    guard.update(&bad(), 1_000);
    assert!(guard.update(&bad(), 2_000).paused);
}

/// Good streak satisfied but recovery time not elapsed -> still paused.
#[test]
fn test_resume_requires_recovery_time() {
    let mut guard = RuntimeGuard::new(hysteresis(2, 2, 1.0));
    guard.update(&bad(), 1_000);
    guard.update(&bad(), 2_000);

    guard.update(&clean(), 3_000);
    let decision = guard.update(&clean(), 4_000);
    assert!(decision.paused, "recovery time not yet elapsed");
    assert_eq!(guard.consecutive_good(), 2);

    let decision = guard.update(&clean(), 2_000 + MINUTE_MS);
    assert!(!decision.paused);
    assert_eq!(decision.transition, Some(Transition::Resumed));
    assert_eq!(guard.last_change_ts_ms(), 2_000 + MINUTE_MS);
}

/// Recovery time elapsed but good streak too short -> still paused.
#[test]
fn test_resume_requires_good_streak() {
    let mut guard = RuntimeGuard::new(hysteresis(2, 2, 1.0));
    guard.update(&bad(), 1_000);
    guard.update(&bad(), 2_000);

    guard.update(&bad(), 2_000 + 2 * MINUTE_MS);
    let decision = guard.update(&clean(), 2_000 + 2 * MINUTE_MS + 1_000);
    assert!(decision.paused, "one clean update is not enough");

    let decision = guard.update(&clean(), 2_000 + 2 * MINUTE_MS + 2_000);
    assert!(!decision.paused);
    assert_eq!(guard.pauses_total(), 1, "resume does not count as a pause");
}

/// bad=2, good=2, recovery 0: two breaches pause, two clean updates resume.
#[test]
fn test_scenario_c_pause_then_resume() {
    let mut guard = RuntimeGuard::new(hysteresis(2, 2, 0.0));

    guard.update(&bad(), 1_000);
    assert!(guard.update(&bad(), 2_000).paused);

    let decision = guard.update(&clean(), 3_000);
    assert!(decision.paused, "good streak 1 < required 2");

    let decision = guard.update(&clean(), 4_000);
    assert!(!decision.paused, "second clean update resumes");
    assert!(!decision.effective_paused);
}

#[test]
fn test_disabled_guard_never_changes_state() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        enabled: false,
        ..hysteresis(1, 1, 0.0)
    });
    for t in 0..5 {
        let decision = guard.update(&bad(), t * 1_000);
        assert!(!decision.paused);
    }
    assert_eq!(guard.consecutive_bad(), 0);
    assert_eq!(guard.pauses_total(), 0);
}

// ────────────────────────────────────────────────────────────────────────────
// Effective pause
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dry_run_reports_but_does_not_enforce() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        dry_run: true,
        ..hysteresis(1, 1, 5.0)
    });
    let decision = guard.update(&bad(), 1_000);
    assert!(decision.paused, "pause is still surfaced");
    assert!(!decision.effective_paused, "dry run suppresses enforcement");
    assert!(!guard.effective_paused());

    guard.set_dry_run(false);
    assert!(guard.effective_paused());
}

#[test]
fn test_manual_override_applies_even_in_dry_run() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        dry_run: true,
        ..RuntimeGuardConfig::default()
    });
    guard.set_manual_override(true);
    assert!(guard.effective_paused());

    let reason = guard.evaluate(&clean(), 1_000, None);
    assert_eq!(reason, BreachReason::MANUAL_OVERRIDE);
}

// ────────────────────────────────────────────────────────────────────────────
// Individual checks
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_reject_retries_count_once() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig::default());
    guard.on_send_ok(Some("order-1"), 1_000);
    guard.on_reject(Some("order-2"), 1_100);
    guard.on_reject(Some("order-2"), 1_200);

    assert_eq!(
        guard.compute_reject_rate(1_500),
        0.5,
        "two rejects with the same correlation id count as one"
    );

    // Without correlation ids every outcome counts
    guard.on_reject(None, 1_300);
    guard.on_reject(None, 1_300);
    assert!((guard.compute_reject_rate(1_500) - 0.75).abs() < 1e-12);
}

#[test]
fn test_each_signal_sets_its_own_bit() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        max_cancel_latency_ms_p95: 100.0,
        ws_lag_ms_max: 250.0,
        order_reject_rate_max: 0.1,
        max_gross_exposure_usd: 1_000.0,
        ..RuntimeGuardConfig::default()
    });
    let now = 10_000;
    guard.add_cancel_latency_sample(500.0, now);
    guard.set_ws_lag_ms(300.0, now);
    guard.on_reject(Some("x"), now);
    guard.set_inventory_snapshot(
        HashMap::from([("BTCUSDT".to_string(), 800.0), ("ETHUSDT".to_string(), -400.0)]),
        0.0,
    );

    let signals = TickSignals {
        cancel_rate_per_sec: 10.0,
        max_cancel_per_sec: 10.0,
        rest_error_rate: 0.02,
        pnl_slope_per_min: Some(-1.0),
    };
    let reason = guard.evaluate(&signals, now, None);
    let expected = BreachReason::HIGH_CANCEL_RATE
        | BreachReason::HIGH_ERROR_RATE
        | BreachReason::NEGATIVE_PNL_SLOPE
        | BreachReason::INVENTORY
        | BreachReason::LATENCY
        | BreachReason::WS_LAG
        | BreachReason::REJECT_RATE;
    assert_eq!(reason, expected, "got {reason}");
}

#[test]
fn test_zero_threshold_disables_check() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        ws_lag_ms_max: 0.0,
        order_reject_rate_max: 0.0,
        max_cancel_latency_ms_p95: 0.0,
        ..RuntimeGuardConfig::default()
    });
    guard.set_ws_lag_ms(1_000_000.0, 0);
    guard.on_reject(Some("a"), 0);
    guard.add_cancel_latency_sample(599_000.0, 0);

    assert!(guard.evaluate_gauges(0, None).is_empty());
}

#[test]
fn test_per_symbol_override_takes_precedence() {
    let mut overrides = SymbolOverrides::default();
    overrides.set("ws_lag_ms_max", 100.0);
    let mut config = RuntimeGuardConfig {
        ws_lag_ms_max: 1_000.0,
        ..RuntimeGuardConfig::default()
    };
    config.per_symbol.insert("ETHUSDT".to_string(), overrides);
    let mut guard = RuntimeGuard::new(config);
    guard.set_ws_lag_ms(300.0, 0);

    assert!(guard.evaluate_gauges(0, Some("ETHUSDT")).contains(BreachReason::WS_LAG));
    assert!(guard.evaluate_gauges(0, Some("BTCUSDT")).is_empty());
    assert!(guard.evaluate_gauges(0, None).is_empty());
}

#[test]
fn test_budget_percentage_breach() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig {
        max_position_pct_budget: 25.0,
        ..RuntimeGuardConfig::default()
    });
    guard.set_inventory_snapshot(HashMap::from([("BTCUSDT".to_string(), 3_000.0)]), 10_000.0);
    assert!(guard.evaluate_gauges(0, None).contains(BreachReason::INVENTORY));

    guard.set_inventory_snapshot(HashMap::from([("BTCUSDT".to_string(), 2_000.0)]), 10_000.0);
    assert!(guard.evaluate_gauges(0, None).is_empty());
}

// ────────────────────────────────────────────────────────────────────────────
// Snapshot / restore
// ────────────────────────────────────────────────────────────────────────────

/// A restored guard makes the same decisions as the one it was taken from.
#[test]
fn test_snapshot_restore_preserves_hysteresis() {
    let config = hysteresis(2, 3, 0.0);
    let mut live = RuntimeGuard::new(config.clone());
    live.update(&bad(), 1_000);
    live.update(&bad(), 2_000);
    live.update(&clean(), 3_000);

    let snapshot = live.to_snapshot();
    assert_eq!(snapshot.paused, Some(true));
    assert_eq!(snapshot.consec_good, Some(1));
    assert_eq!(snapshot.paused_effective, Some(true));

    let mut restored = RuntimeGuard::new(config);
    assert_eq!(restored.load_snapshot(&snapshot), 10);
    assert_eq!(restored.to_snapshot(), snapshot);

    for t in [4_000, 5_000, 6_000] {
        assert_eq!(live.update(&clean(), t), restored.update(&clean(), t));
    }
    assert!(!restored.paused());
}

#[test]
fn test_partial_snapshot_restores_present_fields_only() {
    let mut guard = RuntimeGuard::new(RuntimeGuardConfig::default());
    let applied = guard.load_snapshot(&RuntimeGuardSnapshot {
        paused: Some(true),
        dry_run: Some(true),
        ..RuntimeGuardSnapshot::default()
    });
    assert_eq!(applied, 2);
    assert!(guard.paused());
    assert!(!guard.effective_paused(), "dry run restored with the pause");
    assert_eq!(guard.pauses_total(), 0);
    assert_eq!(guard.last_reason(), BreachReason::NONE);
}
