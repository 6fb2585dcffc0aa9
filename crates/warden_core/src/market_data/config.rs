use tracing::warn;

/// Order-book cache tuning. Defaults favour short TTLs with stale-while-refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdCacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    /// Deepest book the cache will request; deeper requests are clamped.
    pub max_depth: u32,
    /// Serve stale entries while a background refresh runs.
    pub stale_ok: bool,
    pub invalidate_on_ws_gap_ms: u64,
    pub max_inflight_refresh: usize,
    /// Tighter freshness bound applied to pricing reads.
    pub fresh_ms_for_pricing: u64,
    /// Return no book (instead of a stale one) to pricing when it is stale.
    pub skip_pricing_on_stale: bool,
    /// Tick-normalized bid/ask move that invalidates a symbol.
    pub price_jump_max_ticks: f64,
}

impl Default for MdCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 100,
            max_depth: 50,
            stale_ok: true,
            invalidate_on_ws_gap_ms: 300,
            max_inflight_refresh: 1,
            fresh_ms_for_pricing: 60,
            skip_pricing_on_stale: false,
            price_jump_max_ticks: 5.0,
        }
    }
}

impl MdCacheConfig {
    /// Clamp every field into its valid range. Each correction is logged.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let mut cfg = self;
        if cfg.max_depth == 0 {
            warn!(field = "max_depth", value = 0, clamped = d.max_depth, "md cache config defaulted");
            cfg.max_depth = d.max_depth;
        }
        if cfg.max_inflight_refresh == 0 {
            warn!(field = "max_inflight_refresh", value = 0, clamped = 1, "md cache config clamped");
            cfg.max_inflight_refresh = 1;
        }
        if cfg.fresh_ms_for_pricing > cfg.ttl_ms {
            warn!(
                field = "fresh_ms_for_pricing",
                value = cfg.fresh_ms_for_pricing,
                clamped = cfg.ttl_ms,
                "md cache config clamped"
            );
            cfg.fresh_ms_for_pricing = cfg.ttl_ms;
        }
        if !cfg.price_jump_max_ticks.is_finite() || cfg.price_jump_max_ticks <= 0.0 {
            warn!(
                field = "price_jump_max_ticks",
                value = cfg.price_jump_max_ticks,
                clamped = d.price_jump_max_ticks,
                "md cache config defaulted"
            );
            cfg.price_jump_max_ticks = d.price_jump_max_ticks;
        }
        cfg
    }
}
