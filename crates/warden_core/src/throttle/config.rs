use tracing::warn;

/// Request-rate and backoff limits for [`super::ThrottleGuard`].
///
/// Defaults match the production profile: 10s window, 5 creates / 10 amends /
/// 20 cancels per second, backoff 200ms doubling to 3000ms, hard cap 5000ms,
/// ±10% jitter, triggered at 2% REST errors or 500ms WS lag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Rolling window length in whole seconds.
    pub window_sec: u64,
    pub max_creates_per_sec: f64,
    pub max_amends_per_sec: f64,
    pub max_cancels_per_sec: f64,
    /// When false, all symbols share one window set.
    pub per_symbol: bool,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_cap_ms: u64,
    /// Jitter amplitude as a fraction of the un-jittered backoff, in [0, 1].
    pub jitter_pct: f64,
    pub error_rate_trigger: f64,
    pub ws_lag_trigger_ms: f64,
}

pub const THROTTLE_WINDOW_SEC_MAX: u64 = 3_600;

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_sec: 10,
            max_creates_per_sec: 5.0,
            max_amends_per_sec: 10.0,
            max_cancels_per_sec: 20.0,
            per_symbol: true,
            backoff_base_ms: 200,
            backoff_max_ms: 3_000,
            backoff_cap_ms: 5_000,
            jitter_pct: 0.10,
            error_rate_trigger: 0.02,
            ws_lag_trigger_ms: 500.0,
        }
    }
}

impl ThrottleConfig {
    /// Clamp every field into its valid range. Each correction is logged.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut cfg = self;

        if cfg.window_sec == 0 || cfg.window_sec > THROTTLE_WINDOW_SEC_MAX {
            let clamped = cfg.window_sec.clamp(1, THROTTLE_WINDOW_SEC_MAX);
            warn!(field = "window_sec", value = cfg.window_sec, clamped, "throttle config clamped");
            cfg.window_sec = clamped;
        }
        cfg.max_creates_per_sec =
            non_negative("max_creates_per_sec", cfg.max_creates_per_sec, defaults.max_creates_per_sec);
        cfg.max_amends_per_sec =
            non_negative("max_amends_per_sec", cfg.max_amends_per_sec, defaults.max_amends_per_sec);
        cfg.max_cancels_per_sec =
            non_negative("max_cancels_per_sec", cfg.max_cancels_per_sec, defaults.max_cancels_per_sec);

        if cfg.backoff_base_ms == 0 {
            warn!(field = "backoff_base_ms", value = 0, clamped = 1, "throttle config clamped");
            cfg.backoff_base_ms = 1;
        }
        if cfg.backoff_max_ms < cfg.backoff_base_ms {
            warn!(
                field = "backoff_max_ms",
                value = cfg.backoff_max_ms,
                clamped = cfg.backoff_base_ms,
                "throttle config clamped"
            );
            cfg.backoff_max_ms = cfg.backoff_base_ms;
        }
        cfg.jitter_pct = unit_interval("jitter_pct", cfg.jitter_pct, defaults.jitter_pct);
        cfg.error_rate_trigger =
            unit_interval("error_rate_trigger", cfg.error_rate_trigger, defaults.error_rate_trigger);
        cfg.ws_lag_trigger_ms =
            non_negative("ws_lag_trigger_ms", cfg.ws_lag_trigger_ms, defaults.ws_lag_trigger_ms);
        cfg
    }
}

fn non_negative(field: &'static str, value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        warn!(field, value, clamped = default, "throttle config defaulted");
        return default;
    }
    if value < 0.0 {
        warn!(field, value, clamped = 0.0, "throttle config clamped");
        return 0.0;
    }
    value
}

fn unit_interval(field: &'static str, value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        warn!(field, value, clamped = default, "throttle config defaulted");
        return default;
    }
    let clamped = value.clamp(0.0, 1.0);
    if clamped != value {
        warn!(field, value, clamped, "throttle config clamped");
    }
    clamped
}
