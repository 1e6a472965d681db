// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Fixed-window rate limiter.
//!
//! One counter per string key (user id, channel id). A key's window resets
//! once `window` has elapsed since it started; inside the window the count
//! grows until `max`, after which further calls are denied without
//! mutating state. The window map is the only shared state and is never
//! exposed.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct FixedWindowLimiter {
    windows: DashMap<String, Window>,
    max: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max,
            window,
        }
    }

    /// Consume one unit for `key`. Allowed unless the key already spent
    /// `max` units inside the current window.
    pub fn consume(&self, key: &str) -> RateDecision {
        self.consume_at(key, Instant::now())
    }

    fn consume_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max {
            return RateDecision {
                allowed: false,
                remaining: 0,
            };
        }
        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.max - entry.count,
        }
    }

    /// Drop windows that have fully elapsed. Keeps the map bounded for
    /// long-lived processes with high key cardinality.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourth_call_in_window_denied() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        let decisions: Vec<bool> = (0..4)
            .map(|_| limiter.consume_at("U123", now).allowed)
            .collect();
        assert_eq!(decisions, vec![true, true, true, false]);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.consume_at("k", now).remaining, 2);
        assert_eq!(limiter.consume_at("k", now).remaining, 1);
        assert_eq!(limiter.consume_at("k", now).remaining, 0);
        assert_eq!(limiter.consume_at("k", now).remaining, 0);
    }

    #[test]
    fn window_elapse_resets_count() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..4 {
            limiter.consume_at("k", now);
        }
        let later = now + Duration::from_secs(60);
        let decision = limiter.consume_at("k", later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.consume_at("a", now).allowed);
        assert!(!limiter.consume_at("a", now).allowed);
        assert!(limiter.consume_at("b", now).allowed);
    }

    #[test]
    fn sweep_drops_only_elapsed_windows() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_millis(0));
        limiter.consume("stale");
        limiter.sweep();
        assert!(limiter.windows.is_empty());
    }
}
