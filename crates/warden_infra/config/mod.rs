//! Loader for the guard-stack configuration document.
//!
//! The document is JSON with three optional sections:
//!
//! ```json
//! {
//!   "throttle": { "window_sec": 10, "max_creates_per_sec": 5.0 },
//!   "runtime_guard": { "per_symbol": { "ETHUSDT": { "ws_lag_ms_max": 150 } } },
//!   "md_cache": { "ttl_ms": 100 }
//! }
//! ```
//!
//! Missing fields take the core defaults. Out-of-range values are clamped by
//! each config's `sanitized()`. Per-symbol overrides are validated here.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::market_data::MdCacheConfig;
use warden_core::risk::{RuntimeGuardConfig, SYMBOL_OVERRIDE_KEYS, SymbolOverrides};
use warden_core::throttle::ThrottleConfig;

/// How invalid per-symbol overrides are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Any invalid override fails the load.
    #[default]
    Strict,
    /// Invalid overrides are dropped with a warning; the global value applies.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OverrideIssue {
    #[error("unknown override key")]
    UnknownKey,
    #[error("value is not a number")]
    NotNumeric,
    #[error("value is not finite")]
    NonFinite,
    #[error("value is negative")]
    Negative,
    #[error("rate must not exceed 1")]
    RateAboveOne,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid per-symbol override {symbol}.{key}: {issue}")]
    InvalidOverride {
        symbol: String,
        key: String,
        issue: OverrideIssue,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThrottleConfigInput {
    pub window_sec: Option<u64>,
    pub max_creates_per_sec: Option<f64>,
    pub max_amends_per_sec: Option<f64>,
    pub max_cancels_per_sec: Option<f64>,
    pub per_symbol: Option<bool>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub jitter_pct: Option<f64>,
    pub error_rate_trigger: Option<f64>,
    pub ws_lag_trigger_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuntimeGuardConfigInput {
    pub enabled: Option<bool>,
    pub cancel_rate_pct_of_limit_max: Option<f64>,
    pub rest_error_rate_max: Option<f64>,
    pub pnl_slope_min_per_min: Option<f64>,
    pub consecutive_breaches_to_pause: Option<u32>,
    pub hysteresis_bad_required: Option<u32>,
    pub hysteresis_good_required: Option<u32>,
    pub recovery_minutes: Option<f64>,
    pub max_position_notional_usd: Option<f64>,
    pub max_gross_exposure_usd: Option<f64>,
    pub max_position_pct_budget: Option<f64>,
    pub max_cancel_latency_ms_p95: Option<f64>,
    pub ws_lag_ms_max: Option<f64>,
    pub order_reject_rate_max: Option<f64>,
    pub window_seconds: Option<u64>,
    /// Raw values; validated by [`apply_defaults`].
    pub per_symbol: Option<BTreeMap<String, BTreeMap<String, Value>>>,
    pub dry_run: Option<bool>,
    pub manual_override_pause: Option<bool>,
    pub snapshot_period_sec: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MdCacheConfigInput {
    pub enabled: Option<bool>,
    pub ttl_ms: Option<u64>,
    pub max_depth: Option<u32>,
    pub stale_ok: Option<bool>,
    pub invalidate_on_ws_gap_ms: Option<u64>,
    pub max_inflight_refresh: Option<usize>,
    pub fresh_ms_for_pricing: Option<u64>,
    pub skip_pricing_on_stale: Option<bool>,
    pub price_jump_max_ticks: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GuardStackConfigInput {
    pub throttle: Option<ThrottleConfigInput>,
    pub runtime_guard: Option<RuntimeGuardConfigInput>,
    pub md_cache: Option<MdCacheConfigInput>,
}

/// Fully resolved configuration for the three runtime components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardStackConfig {
    pub throttle: ThrottleConfig,
    pub runtime_guard: RuntimeGuardConfig,
    pub md_cache: MdCacheConfig,
}

pub fn load_config_str(raw: &str, mode: ValidationMode) -> Result<GuardStackConfig, ConfigError> {
    let input: GuardStackConfigInput = serde_json::from_str(raw)?;
    apply_defaults(input, mode)
}

pub fn load_config_file(
    path: impl AsRef<Path>,
    mode: ValidationMode,
) -> Result<GuardStackConfig, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = load_config_str(&raw, mode)?;
    info!(path = %path.display(), ?mode, "guard stack config loaded");
    Ok(config)
}

/// Fill missing fields from the core defaults, validate per-symbol
/// overrides, then clamp every section.
pub fn apply_defaults(
    input: GuardStackConfigInput,
    mode: ValidationMode,
) -> Result<GuardStackConfig, ConfigError> {
    let throttle = resolve_throttle(input.throttle.unwrap_or_default());
    let runtime_guard = resolve_runtime_guard(input.runtime_guard.unwrap_or_default(), mode)?;
    let md_cache = resolve_md_cache(input.md_cache.unwrap_or_default());
    Ok(GuardStackConfig {
        throttle: throttle.sanitized(),
        runtime_guard: runtime_guard.sanitized(),
        md_cache: md_cache.sanitized(),
    })
}

fn resolve_throttle(input: ThrottleConfigInput) -> ThrottleConfig {
    let d = ThrottleConfig::default();
    ThrottleConfig {
        window_sec: input.window_sec.unwrap_or(d.window_sec),
        max_creates_per_sec: input.max_creates_per_sec.unwrap_or(d.max_creates_per_sec),
        max_amends_per_sec: input.max_amends_per_sec.unwrap_or(d.max_amends_per_sec),
        max_cancels_per_sec: input.max_cancels_per_sec.unwrap_or(d.max_cancels_per_sec),
        per_symbol: input.per_symbol.unwrap_or(d.per_symbol),
        backoff_base_ms: input.backoff_base_ms.unwrap_or(d.backoff_base_ms),
        backoff_max_ms: input.backoff_max_ms.unwrap_or(d.backoff_max_ms),
        backoff_cap_ms: input.backoff_cap_ms.unwrap_or(d.backoff_cap_ms),
        jitter_pct: input.jitter_pct.unwrap_or(d.jitter_pct),
        error_rate_trigger: input.error_rate_trigger.unwrap_or(d.error_rate_trigger),
        ws_lag_trigger_ms: input.ws_lag_trigger_ms.unwrap_or(d.ws_lag_trigger_ms),
    }
}

fn resolve_runtime_guard(
    input: RuntimeGuardConfigInput,
    mode: ValidationMode,
) -> Result<RuntimeGuardConfig, ConfigError> {
    let d = RuntimeGuardConfig::default();
    let per_symbol = match input.per_symbol {
        Some(raw) => resolve_per_symbol(raw, mode)?,
        None => BTreeMap::new(),
    };
    Ok(RuntimeGuardConfig {
        enabled: input.enabled.unwrap_or(d.enabled),
        cancel_rate_pct_of_limit_max: input
            .cancel_rate_pct_of_limit_max
            .unwrap_or(d.cancel_rate_pct_of_limit_max),
        rest_error_rate_max: input.rest_error_rate_max.unwrap_or(d.rest_error_rate_max),
        pnl_slope_min_per_min: input.pnl_slope_min_per_min.unwrap_or(d.pnl_slope_min_per_min),
        consecutive_breaches_to_pause: input
            .consecutive_breaches_to_pause
            .unwrap_or(d.consecutive_breaches_to_pause),
        hysteresis_bad_required: input
            .hysteresis_bad_required
            .unwrap_or(d.hysteresis_bad_required),
        hysteresis_good_required: input
            .hysteresis_good_required
            .unwrap_or(d.hysteresis_good_required),
        recovery_minutes: input.recovery_minutes.unwrap_or(d.recovery_minutes),
        max_position_notional_usd: input
            .max_position_notional_usd
            .unwrap_or(d.max_position_notional_usd),
        max_gross_exposure_usd: input.max_gross_exposure_usd.unwrap_or(d.max_gross_exposure_usd),
        max_position_pct_budget: input
            .max_position_pct_budget
            .unwrap_or(d.max_position_pct_budget),
        max_cancel_latency_ms_p95: input
            .max_cancel_latency_ms_p95
            .unwrap_or(d.max_cancel_latency_ms_p95),
        ws_lag_ms_max: input.ws_lag_ms_max.unwrap_or(d.ws_lag_ms_max),
        order_reject_rate_max: input.order_reject_rate_max.unwrap_or(d.order_reject_rate_max),
        window_seconds: input.window_seconds.unwrap_or(d.window_seconds),
        per_symbol,
        dry_run: input.dry_run.unwrap_or(d.dry_run),
        manual_override_pause: input.manual_override_pause.unwrap_or(d.manual_override_pause),
        snapshot_period_sec: input.snapshot_period_sec.unwrap_or(d.snapshot_period_sec),
    })
}

fn resolve_md_cache(input: MdCacheConfigInput) -> MdCacheConfig {
    let d = MdCacheConfig::default();
    MdCacheConfig {
        enabled: input.enabled.unwrap_or(d.enabled),
        ttl_ms: input.ttl_ms.unwrap_or(d.ttl_ms),
        max_depth: input.max_depth.unwrap_or(d.max_depth),
        stale_ok: input.stale_ok.unwrap_or(d.stale_ok),
        invalidate_on_ws_gap_ms: input
            .invalidate_on_ws_gap_ms
            .unwrap_or(d.invalidate_on_ws_gap_ms),
        max_inflight_refresh: input.max_inflight_refresh.unwrap_or(d.max_inflight_refresh),
        fresh_ms_for_pricing: input.fresh_ms_for_pricing.unwrap_or(d.fresh_ms_for_pricing),
        skip_pricing_on_stale: input.skip_pricing_on_stale.unwrap_or(d.skip_pricing_on_stale),
        price_jump_max_ticks: input.price_jump_max_ticks.unwrap_or(d.price_jump_max_ticks),
    }
}

fn resolve_per_symbol(
    raw: BTreeMap<String, BTreeMap<String, Value>>,
    mode: ValidationMode,
) -> Result<BTreeMap<String, SymbolOverrides>, ConfigError> {
    let mut resolved = BTreeMap::new();
    for (symbol, entries) in raw {
        let mut overrides = SymbolOverrides::default();
        for (key, value) in entries {
            match check_override(&key, &value) {
                Ok(v) => {
                    overrides.set(&key, v);
                }
                Err(issue) => match mode {
                    ValidationMode::Strict => {
                        return Err(ConfigError::InvalidOverride { symbol, key, issue });
                    }
                    ValidationMode::Lenient => {
                        warn!(%symbol, %key, %value, %issue, "per-symbol override dropped");
                    }
                },
            }
        }
        if overrides.is_empty() {
            continue;
        }
        resolved.insert(symbol, overrides);
    }
    Ok(resolved)
}

/// Validate one override value: numeric, finite, non-negative, and at most 1
/// for rates.
pub fn check_override(key: &str, value: &Value) -> Result<f64, OverrideIssue> {
    if !SYMBOL_OVERRIDE_KEYS.contains(&key) {
        return Err(OverrideIssue::UnknownKey);
    }
    let Some(v) = value.as_f64() else {
        return Err(OverrideIssue::NotNumeric);
    };
    if !v.is_finite() {
        return Err(OverrideIssue::NonFinite);
    }
    if v < 0.0 {
        return Err(OverrideIssue::Negative);
    }
    if key == "order_reject_rate_max" && v > 1.0 {
        return Err(OverrideIssue::RateAboveOne);
    }
    Ok(v)
}
