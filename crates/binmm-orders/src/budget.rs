//! Rolling replace budget.
//!
//! Sliding-window counter over explicit timestamps: at most `max_per_window`
//! replaces in any `window_ms` span. Callers pass `now_ms` so the window is
//! testable without sleeping.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

/// Sliding-window replace limiter.
#[derive(Debug)]
pub struct ReplaceBudget {
    max_per_window: u32,
    window_ms: u64,
    timestamps: Mutex<VecDeque<u64>>,
}

impl ReplaceBudget {
    /// Create a budget of `max_per_window` replaces per `window_ms`.
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            max_per_window,
            window_ms,
            timestamps: Mutex::new(VecDeque::with_capacity(max_per_window as usize)),
        }
    }

    /// Budget of `max` replaces per minute.
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, 60_000)
    }

    /// Take one slot if available.
    pub fn try_acquire(&self, now_ms: u64) -> bool {
        let mut timestamps = self.timestamps.lock();
        self.evict(&mut timestamps, now_ms);

        if timestamps.len() >= self.max_per_window as usize {
            warn!(
                count = timestamps.len(),
                max = self.max_per_window,
                "Replace budget exhausted"
            );
            return false;
        }
        timestamps.push_back(now_ms);
        true
    }

    /// Hand back a slot taken at `acquired_ms` for a replace that never
    /// reached the venue.
    pub fn release(&self, acquired_ms: u64) {
        let mut timestamps = self.timestamps.lock();
        if let Some(pos) = timestamps.iter().rposition(|&t| t == acquired_ms) {
            timestamps.remove(pos);
        }
    }

    pub fn can_acquire(&self, now_ms: u64) -> bool {
        self.current_count(now_ms) < self.max_per_window
    }

    /// Replaces inside the current window.
    pub fn current_count(&self, now_ms: u64) -> u32 {
        let mut timestamps = self.timestamps.lock();
        self.evict(&mut timestamps, now_ms);
        timestamps.len() as u32
    }

    pub fn remaining(&self, now_ms: u64) -> u32 {
        self.max_per_window
            .saturating_sub(self.current_count(now_ms))
    }

    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }

    fn evict(&self, timestamps: &mut VecDeque<u64>, now_ms: u64) {
        while timestamps
            .front()
            .is_some_and(|&t| t.saturating_add(self.window_ms) <= now_ms)
        {
            timestamps.pop_front();
        }
    }
}
