use std::collections::BTreeMap;

use tracing::warn;

/// Per-symbol threshold keys accepted in `per_symbol` override maps.
pub const SYMBOL_OVERRIDE_KEYS: [&str; 6] = [
    "max_position_notional_usd",
    "max_gross_exposure_usd",
    "max_position_pct_budget",
    "max_cancel_latency_ms_p95",
    "ws_lag_ms_max",
    "order_reject_rate_max",
];

/// Thresholds that a symbol may override. `None` falls back to the global value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymbolOverrides {
    pub max_position_notional_usd: Option<f64>,
    pub max_gross_exposure_usd: Option<f64>,
    pub max_position_pct_budget: Option<f64>,
    pub max_cancel_latency_ms_p95: Option<f64>,
    pub ws_lag_ms_max: Option<f64>,
    pub order_reject_rate_max: Option<f64>,
}

impl SymbolOverrides {
    /// Set one override by key. Returns false for an unknown key.
    pub fn set(&mut self, key: &str, value: f64) -> bool {
        let slot = match key {
            "max_position_notional_usd" => &mut self.max_position_notional_usd,
            "max_gross_exposure_usd" => &mut self.max_gross_exposure_usd,
            "max_position_pct_budget" => &mut self.max_position_pct_budget,
            "max_cancel_latency_ms_p95" => &mut self.max_cancel_latency_ms_p95,
            "ws_lag_ms_max" => &mut self.ws_lag_ms_max,
            "order_reject_rate_max" => &mut self.order_reject_rate_max,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn is_empty(&self) -> bool {
        *self == SymbolOverrides::default()
    }
}

/// Thresholds in effect for one evaluation, after per-symbol overrides.
/// A value of 0 disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeThresholds {
    pub max_position_notional_usd: f64,
    pub max_gross_exposure_usd: f64,
    pub max_position_pct_budget: f64,
    pub max_cancel_latency_ms_p95: f64,
    pub ws_lag_ms_max: f64,
    pub order_reject_rate_max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeGuardConfig {
    pub enabled: bool,
    /// Cancel rate as a percentage of the venue's cancel limit.
    pub cancel_rate_pct_of_limit_max: f64,
    pub rest_error_rate_max: f64,
    pub pnl_slope_min_per_min: f64,
    /// Legacy pause threshold; upper bound for `hysteresis_bad_required`.
    pub consecutive_breaches_to_pause: u32,
    pub hysteresis_bad_required: u32,
    pub hysteresis_good_required: u32,
    pub recovery_minutes: f64,
    pub max_position_notional_usd: f64,
    pub max_gross_exposure_usd: f64,
    pub max_position_pct_budget: f64,
    pub max_cancel_latency_ms_p95: f64,
    pub ws_lag_ms_max: f64,
    pub order_reject_rate_max: f64,
    /// Eviction horizon for the send-outcome, latency and PnL logs.
    pub window_seconds: u64,
    pub per_symbol: BTreeMap<String, SymbolOverrides>,
    /// Report pauses without enforcing them.
    pub dry_run: bool,
    pub manual_override_pause: bool,
    pub snapshot_period_sec: u64,
}

impl Default for RuntimeGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cancel_rate_pct_of_limit_max: 90.0,
            rest_error_rate_max: 0.01,
            pnl_slope_min_per_min: -0.1,
            consecutive_breaches_to_pause: 2,
            hysteresis_bad_required: 3,
            hysteresis_good_required: 1,
            recovery_minutes: 5.0,
            max_position_notional_usd: 0.0,
            max_gross_exposure_usd: 0.0,
            max_position_pct_budget: 100.0,
            max_cancel_latency_ms_p95: 60_000.0,
            ws_lag_ms_max: 0.0,
            order_reject_rate_max: 0.0,
            window_seconds: 300,
            per_symbol: BTreeMap::new(),
            dry_run: false,
            manual_override_pause: false,
            snapshot_period_sec: 60,
        }
    }
}

impl RuntimeGuardConfig {
    /// Consecutive breaching updates needed to pause.
    pub fn bad_required(&self) -> u32 {
        let legacy = self.consecutive_breaches_to_pause.max(1);
        self.hysteresis_bad_required.clamp(1, legacy)
    }

    /// Consecutive clean updates needed to resume.
    pub fn good_required(&self) -> u32 {
        self.hysteresis_good_required.max(1)
    }

    pub fn recovery_ms(&self) -> u64 {
        (self.recovery_minutes * 60_000.0) as u64
    }

    pub fn window_ms(&self) -> u64 {
        self.window_seconds.saturating_mul(1_000)
    }

    pub fn thresholds_for(&self, symbol: Option<&str>) -> GaugeThresholds {
        let global = GaugeThresholds {
            max_position_notional_usd: self.max_position_notional_usd,
            max_gross_exposure_usd: self.max_gross_exposure_usd,
            max_position_pct_budget: self.max_position_pct_budget,
            max_cancel_latency_ms_p95: self.max_cancel_latency_ms_p95,
            ws_lag_ms_max: self.ws_lag_ms_max,
            order_reject_rate_max: self.order_reject_rate_max,
        };
        let Some(overrides) = symbol.and_then(|s| self.per_symbol.get(s)) else {
            return global;
        };
        GaugeThresholds {
            max_position_notional_usd: overrides
                .max_position_notional_usd
                .unwrap_or(global.max_position_notional_usd),
            max_gross_exposure_usd: overrides
                .max_gross_exposure_usd
                .unwrap_or(global.max_gross_exposure_usd),
            max_position_pct_budget: overrides
                .max_position_pct_budget
                .unwrap_or(global.max_position_pct_budget),
            max_cancel_latency_ms_p95: overrides
                .max_cancel_latency_ms_p95
                .unwrap_or(global.max_cancel_latency_ms_p95),
            ws_lag_ms_max: overrides.ws_lag_ms_max.unwrap_or(global.ws_lag_ms_max),
            order_reject_rate_max: overrides
                .order_reject_rate_max
                .unwrap_or(global.order_reject_rate_max),
        }
    }

    /// Clamp every field into its valid range and drop invalid per-symbol
    /// overrides. Each correction is logged.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let mut cfg = self;

        cfg.cancel_rate_pct_of_limit_max = non_negative(
            "cancel_rate_pct_of_limit_max",
            cfg.cancel_rate_pct_of_limit_max,
            d.cancel_rate_pct_of_limit_max,
        );
        cfg.rest_error_rate_max =
            unit_interval("rest_error_rate_max", cfg.rest_error_rate_max, d.rest_error_rate_max);
        if !cfg.pnl_slope_min_per_min.is_finite() {
            warn!(
                field = "pnl_slope_min_per_min",
                value = cfg.pnl_slope_min_per_min,
                clamped = d.pnl_slope_min_per_min,
                "runtime guard config defaulted"
            );
            cfg.pnl_slope_min_per_min = d.pnl_slope_min_per_min;
        }
        if cfg.consecutive_breaches_to_pause == 0 {
            warn!(field = "consecutive_breaches_to_pause", value = 0, clamped = 1, "runtime guard config clamped");
            cfg.consecutive_breaches_to_pause = 1;
        }
        // hysteresis_bad_required is bounded by the legacy threshold at use, see bad_required()
        if cfg.hysteresis_good_required == 0 {
            warn!(field = "hysteresis_good_required", value = 0, clamped = 1, "runtime guard config clamped");
            cfg.hysteresis_good_required = 1;
        }
        cfg.recovery_minutes = non_negative("recovery_minutes", cfg.recovery_minutes, d.recovery_minutes);
        cfg.max_position_notional_usd = non_negative(
            "max_position_notional_usd",
            cfg.max_position_notional_usd,
            d.max_position_notional_usd,
        );
        cfg.max_gross_exposure_usd =
            non_negative("max_gross_exposure_usd", cfg.max_gross_exposure_usd, d.max_gross_exposure_usd);
        cfg.max_position_pct_budget = non_negative(
            "max_position_pct_budget",
            cfg.max_position_pct_budget,
            d.max_position_pct_budget,
        );
        cfg.max_cancel_latency_ms_p95 = non_negative(
            "max_cancel_latency_ms_p95",
            cfg.max_cancel_latency_ms_p95,
            d.max_cancel_latency_ms_p95,
        );
        cfg.ws_lag_ms_max = non_negative("ws_lag_ms_max", cfg.ws_lag_ms_max, d.ws_lag_ms_max);
        cfg.order_reject_rate_max =
            unit_interval("order_reject_rate_max", cfg.order_reject_rate_max, d.order_reject_rate_max);
        if cfg.window_seconds == 0 {
            warn!(field = "window_seconds", value = 0, clamped = d.window_seconds, "runtime guard config defaulted");
            cfg.window_seconds = d.window_seconds;
        }
        if cfg.snapshot_period_sec == 0 {
            warn!(field = "snapshot_period_sec", value = 0, clamped = 1, "runtime guard config clamped");
            cfg.snapshot_period_sec = 1;
        }

        cfg.per_symbol = cfg
            .per_symbol
            .into_iter()
            .filter_map(|(symbol, overrides)| {
                let cleaned = sanitize_overrides(&symbol, overrides);
                (!cleaned.is_empty()).then_some((symbol, cleaned))
            })
            .collect();
        cfg
    }
}

/// Whether `value` is acceptable for override `key`.
pub fn override_value_valid(key: &str, value: f64) -> bool {
    if !value.is_finite() || value < 0.0 {
        return false;
    }
    key != "order_reject_rate_max" || value <= 1.0
}

fn sanitize_overrides(symbol: &str, overrides: SymbolOverrides) -> SymbolOverrides {
    let mut cleaned = SymbolOverrides::default();
    let entries = [
        (SYMBOL_OVERRIDE_KEYS[0], overrides.max_position_notional_usd),
        (SYMBOL_OVERRIDE_KEYS[1], overrides.max_gross_exposure_usd),
        (SYMBOL_OVERRIDE_KEYS[2], overrides.max_position_pct_budget),
        (SYMBOL_OVERRIDE_KEYS[3], overrides.max_cancel_latency_ms_p95),
        (SYMBOL_OVERRIDE_KEYS[4], overrides.ws_lag_ms_max),
        (SYMBOL_OVERRIDE_KEYS[5], overrides.order_reject_rate_max),
    ];
    for (key, value) in entries {
        let Some(value) = value else { continue };
        if override_value_valid(key, value) {
            cleaned.set(key, value);
        } else {
            warn!(symbol, key, value, "per-symbol override dropped");
        }
    }
    cleaned
}

fn non_negative(field: &'static str, value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        warn!(field, value, clamped = default, "runtime guard config defaulted");
        return default;
    }
    if value < 0.0 {
        warn!(field, value, clamped = 0.0, "runtime guard config clamped");
        return 0.0;
    }
    value
}

fn unit_interval(field: &'static str, value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        warn!(field, value, clamped = default, "runtime guard config defaulted");
        return default;
    }
    let clamped = value.clamp(0.0, 1.0);
    if clamped != value {
        warn!(field, value, clamped, "runtime guard config clamped");
    }
    clamped
}
