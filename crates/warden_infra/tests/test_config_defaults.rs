//! Integration tests for loading the guard-stack config document.

use std::sync::atomic::{AtomicUsize, Ordering};

use warden_core::market_data::MdCacheConfig;
use warden_core::risk::RuntimeGuardConfig;
use warden_core::throttle::ThrottleConfig;
use warden_infra::config::{
    ConfigError, OverrideIssue, ValidationMode, check_override, load_config_file, load_config_str,
};

static CONFIG_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// GIVEN an empty document
/// WHEN it is loaded
/// THEN every section equals the core defaults.
#[test]
fn test_empty_document_yields_defaults() {
    let config = load_config_str("{}", ValidationMode::Strict).expect("empty config loads");

    assert_eq!(config.throttle, ThrottleConfig::default());
    assert_eq!(config.runtime_guard, RuntimeGuardConfig::default());
    assert_eq!(config.md_cache, MdCacheConfig::default());
}

/// GIVEN a document that sets a few fields
/// WHEN it is loaded
/// THEN provided values are kept and the rest default.
#[test]
fn test_partial_sections_merge_with_defaults() {
    let raw = r#"{
        "throttle": {"window_sec": 5, "max_creates_per_sec": 1.0},
        "runtime_guard": {"dry_run": true, "ws_lag_ms_max": 250},
        "md_cache": {"ttl_ms": 200, "stale_ok": false}
    }"#;
    let config = load_config_str(raw, ValidationMode::Strict).expect("config loads");

    assert_eq!(config.throttle.window_sec, 5);
    assert_eq!(config.throttle.max_creates_per_sec, 1.0);
    assert_eq!(
        config.throttle.max_cancels_per_sec,
        ThrottleConfig::default().max_cancels_per_sec,
        "unset field must keep its default"
    );
    assert!(config.runtime_guard.dry_run);
    assert_eq!(config.runtime_guard.ws_lag_ms_max, 250.0);
    assert_eq!(config.md_cache.ttl_ms, 200);
    assert!(!config.md_cache.stale_ok);
}

/// GIVEN out-of-range values
/// WHEN loaded
/// THEN they are clamped rather than rejected.
#[test]
fn test_out_of_range_values_are_clamped() {
    let raw = r#"{
        "throttle": {"window_sec": 0, "jitter_pct": 3.0},
        "md_cache": {"ttl_ms": 40, "fresh_ms_for_pricing": 90, "max_depth": 0}
    }"#;
    let config = load_config_str(raw, ValidationMode::Strict).expect("config loads");

    assert_eq!(config.throttle.window_sec, 1);
    assert!(config.throttle.jitter_pct <= 1.0);
    assert_eq!(config.md_cache.fresh_ms_for_pricing, 40, "pricing bound never exceeds ttl");
    assert_eq!(config.md_cache.max_depth, 50);
}

#[test]
fn test_valid_per_symbol_overrides_are_applied() {
    let raw = r#"{"runtime_guard": {"per_symbol": {
        "ETHUSDT": {"ws_lag_ms_max": 150, "order_reject_rate_max": 0.2}
    }}}"#;
    let config = load_config_str(raw, ValidationMode::Strict).expect("config loads");

    let eth = config.runtime_guard.per_symbol.get("ETHUSDT").expect("ETHUSDT overrides");
    assert_eq!(eth.ws_lag_ms_max, Some(150.0));
    assert_eq!(eth.order_reject_rate_max, Some(0.2));
    assert_eq!(eth.max_gross_exposure_usd, None);
}

/// GIVEN an invalid per-symbol override
/// WHEN loaded in strict mode
/// THEN the load fails naming the symbol and key.
#[test]
fn test_strict_mode_rejects_invalid_override() {
    let cases = [
        (r#"{"bogus_key": 1}"#, OverrideIssue::UnknownKey),
        (r#"{"ws_lag_ms_max": "fast"}"#, OverrideIssue::NotNumeric),
        (r#"{"ws_lag_ms_max": -1}"#, OverrideIssue::Negative),
        (r#"{"order_reject_rate_max": 1.5}"#, OverrideIssue::RateAboveOne),
    ];
    for (entry, expected) in cases {
        let raw = format!(r#"{{"runtime_guard": {{"per_symbol": {{"BTCUSDT": {entry}}}}}}}"#);
        let err = load_config_str(&raw, ValidationMode::Strict).expect_err("strict must fail");
        match err {
            ConfigError::InvalidOverride { symbol, issue, .. } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(issue, expected, "case {entry}");
            }
            other => panic!("unexpected error for {entry}: {other}"),
        }
    }
}

/// GIVEN a mix of valid and invalid overrides
/// WHEN loaded in lenient mode
/// THEN invalid ones are dropped and symbols left empty disappear.
#[test]
fn test_lenient_mode_drops_invalid_overrides() {
    let raw = r#"{"runtime_guard": {"per_symbol": {
        "BTCUSDT": {"ws_lag_ms_max": 150, "bogus_key": 1},
        "ETHUSDT": {"order_reject_rate_max": 2.0}
    }}}"#;
    let config = load_config_str(raw, ValidationMode::Lenient).expect("lenient config loads");

    let btc = config.runtime_guard.per_symbol.get("BTCUSDT").expect("BTCUSDT kept");
    assert_eq!(btc.ws_lag_ms_max, Some(150.0));
    assert!(
        !config.runtime_guard.per_symbol.contains_key("ETHUSDT"),
        "symbol with no valid overrides must be dropped"
    );
}

#[test]
fn test_check_override_accepts_boundaries() {
    assert_eq!(check_override("order_reject_rate_max", &serde_json::json!(1.0)), Ok(1.0));
    assert_eq!(check_override("max_gross_exposure_usd", &serde_json::json!(0)), Ok(0.0));
}

#[test]
fn test_malformed_document_is_parse_error() {
    let err = load_config_str(r#"{"throttle": {"window_sec": -3}}"#, ValidationMode::Lenient)
        .expect_err("negative u64 cannot parse");
    assert!(matches!(err, ConfigError::Parse(_)), "got {err}");
}

#[test]
fn test_load_from_file_and_missing_file() {
    let mut path = std::env::temp_dir();
    let idx = CONFIG_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!("warden_infra_config_{}_{}.json", std::process::id(), idx));
    std::fs::write(&path, r#"{"md_cache": {"enabled": false}}"#).expect("write config");

    let config = load_config_file(&path, ValidationMode::Strict).expect("file config loads");
    assert!(!config.md_cache.enabled);

    std::fs::remove_file(&path).expect("cleanup");
    let err = load_config_file(&path, ValidationMode::Strict).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { .. }), "got {err}");
}
