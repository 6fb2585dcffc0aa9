use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of independent breach causes reported by [`super::RuntimeGuard`].
///
/// Bit values are part of the persisted guard snapshot (`last_reason_bits`)
/// and must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BreachReason(u8);

impl BreachReason {
    pub const NONE: BreachReason = BreachReason(0);
    pub const HIGH_CANCEL_RATE: BreachReason = BreachReason(1);
    pub const HIGH_ERROR_RATE: BreachReason = BreachReason(1 << 1);
    pub const NEGATIVE_PNL_SLOPE: BreachReason = BreachReason(1 << 2);
    pub const INVENTORY: BreachReason = BreachReason(1 << 3);
    pub const LATENCY: BreachReason = BreachReason(1 << 4);
    pub const WS_LAG: BreachReason = BreachReason(1 << 5);
    pub const REJECT_RATE: BreachReason = BreachReason(1 << 6);
    pub const MANUAL_OVERRIDE: BreachReason = BreachReason(1 << 7);

    const NAMED: [(BreachReason, &'static str); 8] = [
        (Self::HIGH_CANCEL_RATE, "high_cancel_rate"),
        (Self::HIGH_ERROR_RATE, "high_error_rate"),
        (Self::NEGATIVE_PNL_SLOPE, "negative_pnl_slope"),
        (Self::INVENTORY, "inventory"),
        (Self::LATENCY, "latency"),
        (Self::WS_LAG, "ws_lag"),
        (Self::REJECT_RATE, "reject_rate"),
        (Self::MANUAL_OVERRIDE, "manual_override"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Keeps only the low 8 bits; higher bits in persisted data are dropped.
    pub const fn from_bits_truncate(bits: u64) -> Self {
        BreachReason((bits & 0xff) as u8)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: BreachReason) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BreachReason) {
        self.0 |= other.0;
    }

    /// Names of the set bits, lowest bit first.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for BreachReason {
    type Output = BreachReason;

    fn bitor(self, rhs: BreachReason) -> BreachReason {
        BreachReason(self.0 | rhs.0)
    }
}

impl BitOrAssign for BreachReason {
    fn bitor_assign(&mut self, rhs: BreachReason) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BreachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}
