use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use super::breach::BreachReason;
use super::config::RuntimeGuardConfig;

pub const SEND_EVENT_LOG_MAX: usize = 10_000;
pub const CANCEL_LATENCY_SAMPLES_MAX: usize = 10_000;
pub const PNL_SAMPLES_MAX: usize = 10_000;
/// Cancel-latency samples are clamped into `[0, CANCEL_LATENCY_SAMPLE_MAX_MS]`.
pub const CANCEL_LATENCY_SAMPLE_MAX_MS: f64 = 600_000.0;

/// Signals computed by the tick loop and passed to every update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSignals {
    pub cancel_rate_per_sec: f64,
    /// Venue cancel limit the cancel rate is compared against.
    pub max_cancel_per_sec: f64,
    pub rest_error_rate: f64,
    /// When `None`, the slope is fitted from samples fed via `record_pnl`.
    pub pnl_slope_per_min: Option<f64>,
}

impl Default for TickSignals {
    fn default() -> Self {
        Self {
            cancel_rate_per_sec: 0.0,
            max_cancel_per_sec: 1.0,
            rest_error_rate: 0.0,
            pnl_slope_per_min: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Paused,
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardDecision {
    pub paused: bool,
    /// `manual_override || (paused && !dry_run)`; what callers must enforce.
    pub effective_paused: bool,
    pub reason: BreachReason,
    pub transition: Option<Transition>,
}

/// Persisted guard state. Every field is optional so that a partial or
/// older snapshot still restores whatever it carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeGuardSnapshot {
    pub paused: Option<bool>,
    /// Derived on write; ignored on load.
    pub paused_effective: Option<bool>,
    pub last_reason_bits: Option<u8>,
    pub last_change_ts_ms: Option<u64>,
    pub hysteresis_bad: Option<u32>,
    pub hysteresis_good: Option<u32>,
    pub consec_bad: Option<u32>,
    pub consec_good: Option<u32>,
    pub pauses_total: Option<u64>,
    pub dry_run: Option<bool>,
    pub manual_override_pause: Option<bool>,
}

#[derive(Debug, Clone)]
struct SendEvent {
    ts_ms: u64,
    correlation_id: Option<String>,
    ok: bool,
}

/// Aggregates live health signals into a single pause decision with hysteresis.
///
/// Single-writer: owned by the tick loop. `evaluate` and the `compute_*`
/// helpers are read-only; windowed logs are evicted on every mutation.
#[derive(Debug)]
pub struct RuntimeGuard {
    config: RuntimeGuardConfig,
    paused: bool,
    last_change_ts_ms: u64,
    consecutive_bad: u32,
    consecutive_good: u32,
    pauses_total: u64,
    last_reason: BreachReason,
    pause_reason: BreachReason,
    send_events: VecDeque<SendEvent>,
    // Correlation ids present in `send_events`, for retry dedup.
    seen_correlation_ids: HashMap<String, u64>,
    cancel_latencies: VecDeque<(u64, f64)>,
    pnl_samples: VecDeque<(u64, f64)>,
    ws_lag_ms: f64,
    ws_lag_ts_ms: u64,
    inventory: HashMap<String, f64>,
    budget_usd: f64,
}

impl RuntimeGuard {
    pub fn new(config: RuntimeGuardConfig) -> Self {
        Self {
            config: config.sanitized(),
            paused: false,
            last_change_ts_ms: 0,
            consecutive_bad: 0,
            consecutive_good: 0,
            pauses_total: 0,
            last_reason: BreachReason::NONE,
            pause_reason: BreachReason::NONE,
            send_events: VecDeque::new(),
            seen_correlation_ids: HashMap::new(),
            cancel_latencies: VecDeque::new(),
            pnl_samples: VecDeque::new(),
            ws_lag_ms: 0.0,
            ws_lag_ts_ms: 0,
            inventory: HashMap::new(),
            budget_usd: 0.0,
        }
    }

    pub fn config(&self) -> &RuntimeGuardConfig {
        &self.config
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn effective_paused(&self) -> bool {
        self.config.manual_override_pause || (self.paused && !self.config.dry_run)
    }

    pub fn last_reason(&self) -> BreachReason {
        self.last_reason
    }

    /// Mask that triggered the most recent pause.
    pub fn pause_reason(&self) -> BreachReason {
        self.pause_reason
    }

    pub fn pauses_total(&self) -> u64 {
        self.pauses_total
    }

    pub fn consecutive_bad(&self) -> u32 {
        self.consecutive_bad
    }

    pub fn consecutive_good(&self) -> u32 {
        self.consecutive_good
    }

    pub fn last_change_ts_ms(&self) -> u64 {
        self.last_change_ts_ms
    }

    pub fn set_manual_override(&mut self, enabled: bool) {
        if self.config.manual_override_pause != enabled {
            warn!(manual_override_pause = enabled, "runtime guard manual override changed");
        }
        self.config.manual_override_pause = enabled;
    }

    pub fn set_dry_run(&mut self, enabled: bool) {
        if self.config.dry_run != enabled {
            info!(dry_run = enabled, "runtime guard dry run changed");
        }
        self.config.dry_run = enabled;
    }

    // --- feeds ---

    pub fn on_send_ok(&mut self, correlation_id: Option<&str>, ts_ms: u64) {
        self.record_send_event(correlation_id, ts_ms, true);
    }

    pub fn on_reject(&mut self, correlation_id: Option<&str>, ts_ms: u64) {
        self.record_send_event(correlation_id, ts_ms, false);
    }

    fn record_send_event(&mut self, correlation_id: Option<&str>, ts_ms: u64, ok: bool) {
        self.evict(ts_ms);
        if let Some(cid) = correlation_id {
            if self.seen_correlation_ids.contains_key(cid) {
                debug!(correlation_id = cid, ok, "duplicate send outcome ignored");
                return;
            }
            self.seen_correlation_ids.insert(cid.to_string(), ts_ms);
        }
        if self.send_events.len() >= SEND_EVENT_LOG_MAX {
            self.pop_send_event();
        }
        self.send_events.push_back(SendEvent {
            ts_ms,
            correlation_id: correlation_id.map(str::to_string),
            ok,
        });
    }

    fn pop_send_event(&mut self) {
        if let Some(SendEvent {
            correlation_id: Some(cid),
            ..
        }) = self.send_events.pop_front()
        {
            self.seen_correlation_ids.remove(&cid);
        }
    }

    /// Non-finite samples are dropped; others are clamped into the valid range.
    pub fn add_cancel_latency_sample(&mut self, latency_ms: f64, ts_ms: u64) {
        if !latency_ms.is_finite() {
            warn!(latency_ms, "non-finite cancel latency sample dropped");
            return;
        }
        self.evict(ts_ms);
        if self.cancel_latencies.len() >= CANCEL_LATENCY_SAMPLES_MAX {
            self.cancel_latencies.pop_front();
        }
        let latency_ms = latency_ms.clamp(0.0, CANCEL_LATENCY_SAMPLE_MAX_MS);
        self.cancel_latencies.push_back((ts_ms, latency_ms));
    }

    pub fn record_pnl(&mut self, pnl_usd: f64, ts_ms: u64) {
        if !pnl_usd.is_finite() {
            warn!(pnl_usd, "non-finite pnl sample dropped");
            return;
        }
        self.evict(ts_ms);
        if self.pnl_samples.len() >= PNL_SAMPLES_MAX {
            self.pnl_samples.pop_front();
        }
        self.pnl_samples.push_back((ts_ms, pnl_usd));
    }

    /// Invalid readings keep the previous gauge value.
    pub fn set_ws_lag_ms(&mut self, lag_ms: f64, ts_ms: u64) {
        if !lag_ms.is_finite() || lag_ms < 0.0 {
            warn!(lag_ms, "invalid ws lag reading ignored");
            return;
        }
        self.ws_lag_ms = lag_ms;
        self.ws_lag_ts_ms = ts_ms;
    }

    pub fn ws_lag_ms(&self) -> f64 {
        self.ws_lag_ms
    }

    /// When the WS lag gauge was last set (unix ms); 0 if never.
    pub fn ws_lag_ts_ms(&self) -> u64 {
        self.ws_lag_ts_ms
    }

    /// Replace the inventory gauge with signed USD notionals per symbol.
    pub fn set_inventory_snapshot(&mut self, notionals: HashMap<String, f64>, budget_usd: f64) {
        self.inventory = notionals
            .into_iter()
            .filter(|(symbol, notional)| {
                let valid = notional.is_finite();
                if !valid {
                    warn!(symbol = symbol.as_str(), notional, "non-finite inventory notional dropped");
                }
                valid
            })
            .collect();
        self.budget_usd = if budget_usd.is_finite() && budget_usd > 0.0 {
            budget_usd
        } else {
            0.0
        };
    }

    // --- windowed helpers ---

    fn window_start(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.config.window_ms())
    }

    fn evict(&mut self, now_ms: u64) {
        let start = self.window_start(now_ms);
        while self.send_events.front().is_some_and(|e| e.ts_ms < start) {
            self.pop_send_event();
        }
        while self.cancel_latencies.front().is_some_and(|(ts, _)| *ts < start) {
            self.cancel_latencies.pop_front();
        }
        while self.pnl_samples.front().is_some_and(|(ts, _)| *ts < start) {
            self.pnl_samples.pop_front();
        }
    }

    /// p95 of cancel latencies inside the window, 0 when there are none.
    pub fn compute_p95_cancel_latency(&self, now_ms: u64) -> f64 {
        let start = self.window_start(now_ms);
        let mut values: Vec<f64> = self
            .cancel_latencies
            .iter()
            .filter(|(ts, _)| *ts >= start)
            .map(|(_, ms)| *ms)
            .collect();
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(f64::total_cmp);
        let idx = (0.95 * (values.len() - 1) as f64) as usize;
        values[idx]
    }

    /// Rejects / (rejects + oks) inside the window; retries of one correlation id count once.
    pub fn compute_reject_rate(&self, now_ms: u64) -> f64 {
        let start = self.window_start(now_ms);
        let (oks, rejects) = self
            .send_events
            .iter()
            .filter(|e| e.ts_ms >= start && e.ts_ms <= now_ms)
            .fold((0u64, 0u64), |(oks, rejects), e| {
                if e.ok { (oks + 1, rejects) } else { (oks, rejects + 1) }
            });
        let total = oks + rejects;
        if total == 0 {
            return 0.0;
        }
        rejects as f64 / total as f64
    }

    /// Least-squares PnL slope in USD per minute over the window.
    /// `None` with fewer than two samples or when all samples share a timestamp.
    pub fn pnl_slope_per_min(&self, now_ms: u64) -> Option<f64> {
        let start = self.window_start(now_ms);
        let points: Vec<(f64, f64)> = self
            .pnl_samples
            .iter()
            .filter(|(ts, _)| *ts >= start && *ts <= now_ms)
            .map(|(ts, pnl)| ((*ts - start) as f64 / 60_000.0, *pnl))
            .collect();
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let (cov, var) = points.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
            let dx = x - mean_x;
            (cov + dx * (y - mean_y), var + dx * dx)
        });
        if var <= f64::EPSILON {
            return None;
        }
        Some(cov / var)
    }

    // --- evaluation ---

    /// Breach mask for the current signals. Read-only.
    ///
    /// Non-finite tick signals count as breaches. `symbol` selects per-symbol
    /// overrides and the position used by the inventory check.
    pub fn evaluate(&self, signals: &TickSignals, now_ms: u64, symbol: Option<&str>) -> BreachReason {
        let mut reason = BreachReason::NONE;

        let limit = signals.max_cancel_per_sec.max(1e-9);
        let cancel_pct = 100.0 * signals.cancel_rate_per_sec / limit;
        if above(cancel_pct, self.config.cancel_rate_pct_of_limit_max) {
            reason |= BreachReason::HIGH_CANCEL_RATE;
        }
        if above(signals.rest_error_rate, self.config.rest_error_rate_max) {
            reason |= BreachReason::HIGH_ERROR_RATE;
        }
        let slope = signals
            .pnl_slope_per_min
            .or_else(|| self.pnl_slope_per_min(now_ms))
            .unwrap_or(0.0);
        if slope.is_nan() || slope < self.config.pnl_slope_min_per_min {
            reason |= BreachReason::NEGATIVE_PNL_SLOPE;
        }

        reason | self.evaluate_gauges(now_ms, symbol)
    }

    /// Checks that need no tick signals: manual override, inventory, cancel
    /// latency, WS lag and reject rate. A threshold of 0 disables its check.
    pub fn evaluate_gauges(&self, now_ms: u64, symbol: Option<&str>) -> BreachReason {
        let mut reason = BreachReason::NONE;
        if self.config.manual_override_pause {
            reason |= BreachReason::MANUAL_OVERRIDE;
        }

        let limits = self.config.thresholds_for(symbol);
        let gross: f64 = self.inventory.values().map(|v| v.abs()).sum();
        let position = match symbol.and_then(|s| self.inventory.get(s)) {
            Some(notional) => notional.abs(),
            None => self.inventory.values().fold(0.0, |acc: f64, v| acc.max(v.abs())),
        };
        if limits.max_position_notional_usd > 0.0 && position > limits.max_position_notional_usd {
            reason |= BreachReason::INVENTORY;
        }
        if limits.max_gross_exposure_usd > 0.0 && gross > limits.max_gross_exposure_usd {
            reason |= BreachReason::INVENTORY;
        }
        if self.budget_usd > 0.0
            && limits.max_position_pct_budget > 0.0
            && limits.max_position_pct_budget < 100.0
        {
            let pct = 100.0 * position / self.budget_usd;
            if pct > limits.max_position_pct_budget {
                reason |= BreachReason::INVENTORY;
            }
        }

        if limits.max_cancel_latency_ms_p95 > 0.0
            && self.compute_p95_cancel_latency(now_ms) > limits.max_cancel_latency_ms_p95
        {
            reason |= BreachReason::LATENCY;
        }
        if limits.ws_lag_ms_max > 0.0 && self.ws_lag_ms > limits.ws_lag_ms_max {
            reason |= BreachReason::WS_LAG;
        }
        if limits.order_reject_rate_max > 0.0
            && self.compute_reject_rate(now_ms) > limits.order_reject_rate_max
        {
            reason |= BreachReason::REJECT_RATE;
        }
        reason
    }

    fn decision(&self, reason: BreachReason, transition: Option<Transition>) -> GuardDecision {
        GuardDecision {
            paused: self.paused,
            effective_paused: self.effective_paused(),
            reason,
            transition,
        }
    }

    /// Evaluate, update the streaks and apply the pause/resume rule.
    ///
    /// Active -> Paused after `bad_required` consecutive breaching updates.
    /// Paused -> Active only on a clean update once `good_required` clean
    /// updates have accumulated and `recovery_minutes` have passed since the pause.
    pub fn update(&mut self, signals: &TickSignals, now_ms: u64) -> GuardDecision {
        if !self.config.enabled {
            return self.decision(self.last_reason, None);
        }
        self.evict(now_ms);

        let reason = self.evaluate(signals, now_ms, None);
        let breach = !reason.is_empty();
        self.last_reason = reason;
        if breach {
            self.consecutive_bad = self.consecutive_bad.saturating_add(1);
            self.consecutive_good = 0;
        } else {
            self.consecutive_good = self.consecutive_good.saturating_add(1);
            self.consecutive_bad = 0;
        }

        if !self.paused && self.consecutive_bad >= self.config.bad_required() {
            self.paused = true;
            self.last_change_ts_ms = now_ms;
            self.pauses_total += 1;
            self.pause_reason = reason;
            warn!(
                reason = %reason,
                reason_bits = reason.bits(),
                consecutive_bad = self.consecutive_bad,
                pauses_total = self.pauses_total,
                dry_run = self.config.dry_run,
                "runtime guard paused"
            );
            return self.decision(reason, Some(Transition::Paused));
        }

        let recovered = now_ms.saturating_sub(self.last_change_ts_ms) >= self.config.recovery_ms();
        if self.paused && !breach && self.consecutive_good >= self.config.good_required() && recovered {
            self.paused = false;
            self.last_change_ts_ms = now_ms;
            info!(
                consecutive_good = self.consecutive_good,
                pause_reason = %self.pause_reason,
                "runtime guard resumed"
            );
            return self.decision(reason, Some(Transition::Resumed));
        }

        if breach {
            debug!(reason = %reason, consecutive_bad = self.consecutive_bad, "runtime guard breach");
        }
        self.decision(reason, None)
    }

    // --- snapshot ---

    pub fn to_snapshot(&self) -> RuntimeGuardSnapshot {
        RuntimeGuardSnapshot {
            paused: Some(self.paused),
            paused_effective: Some(self.effective_paused()),
            last_reason_bits: Some(self.last_reason.bits()),
            last_change_ts_ms: Some(self.last_change_ts_ms),
            hysteresis_bad: Some(self.config.hysteresis_bad_required),
            hysteresis_good: Some(self.config.hysteresis_good_required),
            consec_bad: Some(self.consecutive_bad),
            consec_good: Some(self.consecutive_good),
            pauses_total: Some(self.pauses_total),
            dry_run: Some(self.config.dry_run),
            manual_override_pause: Some(self.config.manual_override_pause),
        }
    }

    /// Apply every field present in `snapshot`; returns how many were applied.
    pub fn load_snapshot(&mut self, snapshot: &RuntimeGuardSnapshot) -> usize {
        let mut applied = 0;
        if let Some(paused) = snapshot.paused {
            self.paused = paused;
            applied += 1;
        }
        if let Some(bits) = snapshot.last_reason_bits {
            self.last_reason = BreachReason::from_bits_truncate(u64::from(bits));
            if self.paused {
                self.pause_reason = self.last_reason;
            }
            applied += 1;
        }
        if let Some(ts) = snapshot.last_change_ts_ms {
            self.last_change_ts_ms = ts;
            applied += 1;
        }
        if let Some(bad) = snapshot.hysteresis_bad {
            self.config.hysteresis_bad_required = bad.max(1);
            applied += 1;
        }
        if let Some(good) = snapshot.hysteresis_good {
            self.config.hysteresis_good_required = good.max(1);
            applied += 1;
        }
        if let Some(bad) = snapshot.consec_bad {
            self.consecutive_bad = bad;
            applied += 1;
        }
        if let Some(good) = snapshot.consec_good {
            self.consecutive_good = good;
            applied += 1;
        }
        if let Some(total) = snapshot.pauses_total {
            self.pauses_total = total;
            applied += 1;
        }
        if let Some(dry_run) = snapshot.dry_run {
            self.config.dry_run = dry_run;
            applied += 1;
        }
        if let Some(manual) = snapshot.manual_override_pause {
            self.config.manual_override_pause = manual;
            applied += 1;
        }
        info!(
            fields_applied = applied,
            paused = self.paused,
            effective_paused = self.effective_paused(),
            "runtime guard snapshot loaded"
        );
        applied
    }
}

fn above(value: f64, limit: f64) -> bool {
    value.is_nan() || value > limit
}
