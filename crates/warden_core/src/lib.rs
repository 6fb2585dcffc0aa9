//! Runtime safety core of the market-making loop: order-rate throttling,
//! health-based trading pauses and the order-book cache.

pub mod clock;
pub mod execution;
pub mod market_data;
pub mod risk;
pub mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
