//! Injectable request counter for abuse-prone public endpoints.
//!
//! Held in `AppState` as an `Arc<RateLimiter>` rather than process-wide
//! state, so each test builds its own limiter and runs deterministically.
//!
//! Policy: fixed windows keyed by caller. A key's counter resets when the
//! window it was recorded in ends; entries from past windows are evicted on
//! every check, so the map only ever holds keys seen in the current window.
//!
//! Configure via `RATE_LIMIT_CLAIM_RPM` (default: 10).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

#[derive(Debug)]
struct WindowEntry {
    window: i64,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window_secs: i64,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_secs: i64) -> Self {
        assert!(max_per_window > 0, "Rate limit must be greater than 0");
        assert!(window_secs > 0, "Window must be greater than 0");
        Self {
            max_per_window,
            window_secs,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for prepare-claim requests: `rpm` requests per minute per key.
    pub fn per_minute(rpm: u32) -> Self {
        Self::new(rpm, 60)
    }

    /// Record a request for `key`. Returns false when the key has exhausted
    /// its budget for the current window.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Utc::now().timestamp())
    }

    /// Clock-injected variant of [`check`](Self::check) used by tests.
    pub fn check_at(&self, key: &str, now: i64) -> bool {
        let window = now / self.window_secs;
        let mut entries = self.entries.lock().expect("rate limiter poisoned");

        entries.retain(|_, e| e.window == window);

        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            window,
            count: 0,
        });
        if entry.count >= self.max_per_window {
            return false;
        }
        entry.count += 1;
        true
    }
}
