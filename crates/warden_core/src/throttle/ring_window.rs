/// Rolling per-second event counter over a fixed window.
///
/// Layout: `buckets[head]` counts events of second `base_ts + size - 1` (the
/// newest second in the window); the bucket `k` slots behind `head` counts
/// second `base_ts + size - 1 - k`. Advancing time rotates `head` and zeroes the
/// buckets that fall out, so memory stays at exactly `size` counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingWindow {
    buckets: Vec<u64>,
    base_ts: i64,
    head: usize,
    sum: u64,
}

/// Raw window layout, as persisted in structured throttle snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingWindowState {
    pub base_ts: i64,
    pub head: usize,
    pub buckets: Vec<u64>,
}

impl RingWindow {
    pub fn new(window_sec: u64, now_sec: i64) -> Self {
        let size = window_sec.max(1) as usize;
        Self {
            buckets: vec![0; size],
            base_ts: now_sec - (size as i64 - 1),
            head: size - 1,
            sum: 0,
        }
    }

    /// Rebuild a window from persisted state and bring it to `now_sec`.
    ///
    /// A state dated after `now_sec` is re-anchored at `now_sec` with all of its
    /// events kept. A state of a different length is re-bucketed into a
    /// `window_sec` window; seconds that fall outside the new window are
    /// dropped. Returns `None` for a state with no buckets.
    pub fn from_state(window_sec: u64, state: &RingWindowState, now_sec: i64) -> Option<Self> {
        let stored = state.buckets.len();
        if stored == 0 {
            return None;
        }
        let mut window = Self {
            buckets: state.buckets.clone(),
            base_ts: state.base_ts,
            head: state.head % stored,
            sum: state.buckets.iter().fold(0u64, |acc, n| acc.saturating_add(*n)),
        };
        if window.newest_ts() > now_sec {
            window.rebase(now_sec);
        } else {
            window.advance(now_sec);
        }

        let size = window_sec.max(1) as usize;
        if stored == size {
            return Some(window);
        }
        let mut resized = Self::new(window_sec, now_sec);
        for second in window.base_ts..=window.newest_ts() {
            let count = window.slot_for(second).map_or(0, |slot| window.buckets[slot]);
            if count == 0 {
                continue;
            }
            if let Some(slot) = resized.slot_for(second) {
                resized.buckets[slot] = resized.buckets[slot].saturating_add(count);
                resized.sum = resized.sum.saturating_add(count);
            }
        }
        Some(resized)
    }

    pub fn state(&self) -> RingWindowState {
        RingWindowState {
            base_ts: self.base_ts,
            head: self.head,
            buckets: self.buckets.clone(),
        }
    }

    /// Number of per-second buckets (the window length in seconds).
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sum == 0
    }

    pub fn base_ts(&self) -> i64 {
        self.base_ts
    }

    fn newest_ts(&self) -> i64 {
        self.base_ts + self.buckets.len() as i64 - 1
    }

    fn slot_for(&self, second: i64) -> Option<usize> {
        let newest = self.newest_ts();
        if second < self.base_ts || second > newest {
            return None;
        }
        let size = self.buckets.len();
        let back = (newest - second) as usize;
        Some((self.head + size - back) % size)
    }

    /// Move the window forward so that `now_sec` is its newest second.
    /// Never moves backwards.
    pub fn advance(&mut self, now_sec: i64) {
        let newest = self.newest_ts();
        if now_sec <= newest {
            return;
        }
        let size = self.buckets.len();
        let delta = (now_sec - newest) as u64;
        if delta >= size as u64 {
            self.buckets.iter_mut().for_each(|b| *b = 0);
            self.sum = 0;
            self.base_ts = now_sec - (size as i64 - 1);
            self.head = size - 1;
            return;
        }
        for _ in 0..delta {
            self.head = (self.head + 1) % size;
            self.sum = self.sum.saturating_sub(self.buckets[self.head]);
            self.buckets[self.head] = 0;
            self.base_ts += 1;
        }
    }

    /// Re-anchor so that `now_sec` is the newest second, folding every counted
    /// event into it. The events then age out one full window after `now_sec`.
    fn rebase(&mut self, now_sec: i64) {
        let size = self.buckets.len();
        self.buckets.iter_mut().for_each(|b| *b = 0);
        self.buckets[self.head] = self.sum;
        self.base_ts = now_sec - (size as i64 - 1);
    }

    /// Count `n` events at `now_sec`.
    ///
    /// Returns `false` when `now_sec` is older than the whole window (the clock
    /// stepped back): the window is re-anchored at `now_sec` and the events are
    /// still counted, so earlier events keep blocking.
    pub fn add(&mut self, now_sec: i64, n: u64) -> bool {
        self.advance(now_sec);
        let (slot, in_place) = match self.slot_for(now_sec) {
            Some(slot) => (slot, true),
            None => {
                self.rebase(now_sec);
                (self.head, false)
            }
        };
        self.buckets[slot] = self.buckets[slot].saturating_add(n);
        self.sum = self.sum.saturating_add(n);
        in_place
    }

    /// Events whose second falls in `(now_sec - size, now_sec]`. Read-only.
    ///
    /// When `now_sec` is not ahead of the newest second every counted event is
    /// reported, including ones stamped after `now_sec`.
    pub fn total(&self, now_sec: i64) -> u64 {
        let newest = self.newest_ts();
        if now_sec <= newest {
            return self.sum;
        }
        let size = self.buckets.len() as i64;
        let lo = self.base_ts.max(now_sec - size + 1);
        if lo > newest {
            return 0;
        }
        (lo..=newest)
            .filter_map(|second| self.slot_for(second))
            .fold(0u64, |acc, slot| acc.saturating_add(self.buckets[slot]))
    }
}
