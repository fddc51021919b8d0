use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::Level;

/// Time-windowed deduplication of identical error events, generalized from
/// the transport's per-destination announce rate limiter
/// (`AnnounceLimits::check`) to an arbitrary caller-supplied key.
///
/// At most one record is emitted per `key` per window; `log` with the same
/// key inside the window is a no-op.
pub struct SuppressLog {
    seen: Mutex<HashMap<String, Instant>>,
}

impl SuppressLog {
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()) }
    }

    /// Emits `f()`'s message at `level` unless `key` was already logged
    /// within `window`. A zero window disables suppression entirely.
    pub fn log(&self, level: Level, key: &str, window: Duration, message: impl FnOnce() -> String) {
        if window.is_zero() {
            log::log!(level, "{}", message());
            return;
        }

        let now = Instant::now();
        let mut seen = self.seen.lock().expect("suppress log mutex poisoned");
        let should_log = match seen.get(key) {
            Some(last) => now.duration_since(*last) >= window,
            None => true,
        };
        if should_log {
            seen.insert(key.to_string(), now);
            drop(seen);
            log::log!(level, "{}", message());
        }
    }

    /// Evicts cache entries older than `window` so the map does not grow
    /// unbounded across a long-lived relay core.
    pub fn remove_expired(&self, window: Duration) {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("suppress log mutex poisoned");
        seen.retain(|_, last| now.duration_since(*last) < window);
    }

    pub fn clear(&self) {
        self.seen.lock().expect("suppress log mutex poisoned").clear();
    }
}

impl Default for SuppressLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `log::log!` only evaluates its message thunk when the global max
    /// level allows the record through; tests assert on the thunk running,
    /// so they need the filter open regardless of whether a logger is
    /// installed.
    fn allow_all_log_levels() {
        log::set_max_level(log::LevelFilter::Trace);
    }

    #[test]
    fn second_log_within_window_is_suppressed() {
        allow_all_log_levels();
        let suppress = SuppressLog::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            suppress.log(Level::Error, "no-route-tok", Duration::from_secs(60), || {
                calls.fetch_add(1, Ordering::Relaxed);
                "no route to TOK".to_string()
            });
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn different_keys_both_log() {
        allow_all_log_levels();
        let suppress = SuppressLog::new();
        let calls = AtomicUsize::new(0);
        suppress.log(Level::Error, "a", Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::Relaxed);
            String::new()
        });
        suppress.log(Level::Error, "b", Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::Relaxed);
            String::new()
        });
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn zero_window_disables_suppression() {
        allow_all_log_levels();
        let suppress = SuppressLog::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            suppress.log(Level::Error, "a", Duration::ZERO, || {
                calls.fetch_add(1, Ordering::Relaxed);
                String::new()
            });
        }
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn remove_expired_evicts_stale_entries() {
        let suppress = SuppressLog::new();
        suppress.log(Level::Error, "a", Duration::from_secs(60), String::new);
        suppress.remove_expired(Duration::from_nanos(0));
        assert!(suppress.seen.lock().unwrap().is_empty());
    }
}
