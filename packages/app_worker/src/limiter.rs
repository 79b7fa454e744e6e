//! Per-key rate limiting for log lines that would otherwise repeat on every
//! reconnect attempt.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ExecutionsLimiter {
    last_run: HashMap<String, Instant>,
}

impl ExecutionsLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless another call with the same `key` ran within `limit`.
    /// Returns whether `f` ran.
    pub fn execute(&mut self, key: &str, limit: Duration, f: impl FnOnce()) -> bool {
        self.execute_at(key, limit, Instant::now(), f)
    }

    fn execute_at(&mut self, key: &str, limit: Duration, now: Instant, f: impl FnOnce()) -> bool {
        if let Some(last) = self.last_run.get(key) {
            if now.saturating_duration_since(*last) < limit {
                return false;
            }
        }
        self.last_run.insert(key.to_string(), now);
        f();
        true
    }
}
