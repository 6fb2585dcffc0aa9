pub mod breach;
pub mod config;
pub mod runtime_guard;

pub use breach::BreachReason;
pub use config::{
    GaugeThresholds, RuntimeGuardConfig, SYMBOL_OVERRIDE_KEYS, SymbolOverrides,
    override_value_valid,
};
pub use runtime_guard::{
    CANCEL_LATENCY_SAMPLE_MAX_MS, GuardDecision, RuntimeGuard, RuntimeGuardSnapshot, TickSignals,
    Transition,
};
