use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{info, warn};

use super::config::ThrottleConfig;
use super::jitter::{apply_jitter, jitter_bucket};
use super::ring_window::RingWindow;
use super::snapshot::{
    LegacyThrottleSnapshot, StructuredThrottleSnapshot, ThrottleRestore, ThrottleSnapshot,
};

/// Window key used when throttling is global, and backoff key when no symbol is given.
pub const GLOBAL_KEY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Create,
    Amend,
    Cancel,
}

impl OpKind {
    pub const ALL: [OpKind; 3] = [OpKind::Create, OpKind::Amend, OpKind::Cancel];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Amend => "amend",
            OpKind::Cancel => "cancel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OpKind::Create),
            "amend" => Some(OpKind::Amend),
            "cancel" => Some(OpKind::Cancel),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            OpKind::Create => 0,
            OpKind::Amend => 1,
            OpKind::Cancel => 2,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub create: u64,
    pub amend: u64,
    pub cancel: u64,
}

impl WindowTotals {
    pub fn total(&self) -> u64 {
        self.create + self.amend + self.cancel
    }
}

type KindWindows = [RingWindow; 3];

fn fresh_windows(window_sec: u64, now_sec: i64) -> KindWindows {
    [
        RingWindow::new(window_sec, now_sec),
        RingWindow::new(window_sec, now_sec),
        RingWindow::new(window_sec, now_sec),
    ]
}

fn to_sec(now_ms: u64) -> i64 {
    (now_ms / 1_000) as i64
}

/// Sliding-window request limiter with adaptive, deterministically jittered backoff.
///
/// Single-writer: the tick loop owns the guard and mutates it through `&mut self`.
/// `allowed` is read-only so it can be called any number of times before deciding
/// to act; `record_event` must be called exactly once per request actually sent.
#[derive(Debug)]
pub struct ThrottleGuard {
    config: ThrottleConfig,
    windows: HashMap<String, KindWindows>,
    current_backoff_ms: u64,
    last_backoff_ms: HashMap<String, u64>,
    backoff_ms_max: u64,
    last_event_ms: Option<u64>,
    legacy_meta: Option<LegacyThrottleSnapshot>,
}

impl ThrottleGuard {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config: config.sanitized(),
            windows: HashMap::new(),
            current_backoff_ms: 0,
            last_backoff_ms: HashMap::new(),
            backoff_ms_max: 0,
            last_event_ms: None,
            legacy_meta: None,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn window_key<'a>(&self, symbol: &'a str) -> &'a str {
        if self.config.per_symbol {
            symbol
        } else {
            GLOBAL_KEY
        }
    }

    fn max_per_sec(&self, kind: OpKind) -> f64 {
        match kind {
            OpKind::Create => self.config.max_creates_per_sec,
            OpKind::Amend => self.config.max_amends_per_sec,
            OpKind::Cancel => self.config.max_cancels_per_sec,
        }
    }

    /// Maximum events of `kind` allowed inside one window.
    pub fn window_limit(&self, kind: OpKind) -> u64 {
        (self.max_per_sec(kind) * self.config.window_sec as f64).floor() as u64
    }

    /// True iff one more `kind` request for `symbol` stays within the window limit.
    pub fn allowed(&self, kind: OpKind, symbol: &str, now_ms: u64) -> bool {
        let current = self.window_total(kind, symbol, now_ms);
        current < self.window_limit(kind)
    }

    fn window_total(&self, kind: OpKind, symbol: &str, now_ms: u64) -> u64 {
        self.windows
            .get(self.window_key(symbol))
            .map(|windows| windows[kind.index()].total(to_sec(now_ms)))
            .unwrap_or(0)
    }

    /// Count one issued request.
    pub fn record_event(&mut self, kind: OpKind, symbol: &str, now_ms: u64) {
        let now_sec = to_sec(now_ms);
        let window_sec = self.config.window_sec;
        let key = self.window_key(symbol);
        let windows = match self.windows.get_mut(key) {
            Some(windows) => windows,
            None => self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| fresh_windows(window_sec, now_sec)),
        };
        if !windows[kind.index()].add(now_sec, 1) {
            warn!(%kind, symbol, now_ms, "clock behind throttle window, window re-anchored");
        }
        self.last_event_ms = Some(self.last_event_ms.map_or(now_ms, |last| last.max(now_ms)));
    }

    pub fn window_totals(&self, symbol: &str, now_ms: u64) -> WindowTotals {
        WindowTotals {
            create: self.window_total(OpKind::Create, symbol, now_ms),
            amend: self.window_total(OpKind::Amend, symbol, now_ms),
            cancel: self.window_total(OpKind::Cancel, symbol, now_ms),
        }
    }

    pub fn events_in_window_total(&self, symbol: &str, now_ms: u64) -> u64 {
        self.window_totals(symbol, now_ms).total()
    }

    /// Next delay before sending, in ms.
    ///
    /// While `error_rate` or `ws_lag_ms` is at/above its trigger the backoff starts
    /// at `backoff_base_ms` and doubles per call up to `backoff_max_ms`; the first
    /// clean call resets it to 0. The result is capped at `backoff_cap_ms` and
    /// jittered per `(symbol, 5s bucket)`.
    pub fn compute_backoff_ms(
        &mut self,
        error_rate: f64,
        ws_lag_ms: f64,
        now_ms: u64,
        symbol: Option<&str>,
    ) -> u64 {
        let error_triggered = error_rate >= self.config.error_rate_trigger;
        let lag_triggered = ws_lag_ms >= self.config.ws_lag_trigger_ms;

        let previous = self.current_backoff_ms;
        if error_triggered || lag_triggered {
            self.current_backoff_ms = if previous == 0 {
                self.config.backoff_base_ms
            } else {
                previous.saturating_mul(2).min(self.config.backoff_max_ms)
            };
            if previous == 0 {
                info!(
                    error_rate,
                    ws_lag_ms,
                    backoff_ms = self.current_backoff_ms,
                    "throttle backoff engaged"
                );
            }
        } else {
            if previous > 0 {
                info!(previous_backoff_ms = previous, "throttle backoff cleared");
            }
            self.current_backoff_ms = 0;
        }

        let capped = self.current_backoff_ms.min(self.config.backoff_cap_ms) as f64;
        let key = symbol.unwrap_or(GLOBAL_KEY);
        let jittered = apply_jitter(capped, self.config.jitter_pct, key, jitter_bucket(now_ms));
        let backoff_ms = jittered as u64;

        match self.last_backoff_ms.get_mut(key) {
            Some(last) => *last = backoff_ms,
            None => {
                self.last_backoff_ms.insert(key.to_string(), backoff_ms);
            }
        }
        self.backoff_ms_max = self.backoff_ms_max.max(backoff_ms);
        backoff_ms
    }

    /// Un-jittered backoff level shared by all symbols.
    pub fn current_backoff_ms(&self) -> u64 {
        self.current_backoff_ms
    }

    pub fn last_backoff_ms(&self, symbol: &str) -> Option<u64> {
        self.last_backoff_ms.get(symbol).copied()
    }

    pub fn backoff_ms_max(&self) -> u64 {
        self.backoff_ms_max
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Structured (version 2) snapshot of every window.
    pub fn to_snapshot(&self) -> ThrottleSnapshot {
        let symbols = self
            .windows
            .iter()
            .map(|(symbol, windows)| {
                let kinds: BTreeMap<_, _> = OpKind::ALL
                    .iter()
                    .map(|kind| (*kind, windows[kind.index()].state()))
                    .collect();
                (symbol.clone(), kinds)
            })
            .collect();
        ThrottleSnapshot::Structured(StructuredThrottleSnapshot {
            window_sec: self.config.window_sec,
            symbols,
        })
    }

    /// Legacy (version 1) aggregate snapshot as seen at `now_ms`.
    pub fn to_legacy_snapshot(&self, now_ms: u64) -> ThrottleSnapshot {
        let events_total: u64 = self
            .windows
            .keys()
            .map(|key| self.events_in_window_total(key, now_ms))
            .sum();

        let snapshot = if events_total == 0 {
            match self.legacy_meta {
                Some(meta) => LegacyThrottleSnapshot {
                    backoff_ms_max: self.backoff_ms_max,
                    ..meta
                },
                None => LegacyThrottleSnapshot {
                    backoff_ms_max: self.backoff_ms_max,
                    ..LegacyThrottleSnapshot::default()
                },
            }
        } else {
            LegacyThrottleSnapshot {
                window_since_ms: now_ms.saturating_sub(self.config.window_sec * 1_000),
                events_total,
                backoff_ms_max: self.backoff_ms_max,
                last_event_ms: self.last_event_ms.unwrap_or(now_ms),
            }
        };
        ThrottleSnapshot::Legacy(snapshot)
    }

    /// Restore state from a snapshot, advancing every window to `now_ms`.
    ///
    /// Structured snapshots replace the windows of the symbols they contain.
    /// Windows of another size are re-bucketed into the configured window and
    /// windows dated after `now_ms` are re-anchored at it, keeping their counts.
    /// Legacy snapshots only restore the aggregate counters.
    pub fn load_snapshot(&mut self, snapshot: &ThrottleSnapshot, now_ms: u64) -> ThrottleRestore {
        let mut report = ThrottleRestore::default();
        match snapshot {
            ThrottleSnapshot::Legacy(meta) => {
                self.legacy_meta = Some(*meta);
                self.backoff_ms_max = meta.backoff_ms_max;
                if meta.last_event_ms > 0 {
                    self.last_event_ms = Some(meta.last_event_ms);
                }
            }
            ThrottleSnapshot::Structured(structured) => {
                let window_sec = self.config.window_sec;
                if structured.window_sec != window_sec {
                    warn!(
                        snapshot_window_sec = structured.window_sec,
                        window_sec, "throttle snapshot window differs from config, re-bucketing"
                    );
                }
                let now_sec = to_sec(now_ms);
                for (symbol, kinds) in &structured.symbols {
                    let mut windows = fresh_windows(window_sec, now_sec);
                    for kind in OpKind::ALL {
                        let Some(state) = kinds.get(&kind) else {
                            report.windows_reset += 1;
                            continue;
                        };
                        match RingWindow::from_state(window_sec, state, now_sec) {
                            Some(window) => {
                                if window.len() != state.buckets.len() {
                                    report.windows_resized += 1;
                                }
                                windows[kind.index()] = window;
                                report.windows_restored += 1;
                            }
                            None => report.windows_reset += 1,
                        }
                    }
                    self.windows.insert(symbol.clone(), windows);
                }
            }
        }
        info!(
            version = snapshot.version(),
            windows_restored = report.windows_restored,
            windows_reset = report.windows_reset,
            windows_resized = report.windows_resized,
            "throttle snapshot loaded"
        );
        report
    }

    pub fn reset(&mut self) {
        self.windows.clear();
        self.current_backoff_ms = 0;
        self.last_backoff_ms.clear();
        self.backoff_ms_max = 0;
        self.last_event_ms = None;
        self.legacy_meta = None;
    }
}
