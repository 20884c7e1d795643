use std::sync::Mutex;

/// Counters for store refreshes and change-feed traffic.
pub struct RefreshMetrics {
    inner: Mutex<Counters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub refreshed: usize,
    pub failed: usize,
    pub feed_events: usize,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::default()),
        }
    }

    pub fn record_refreshed(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.refreshed += 1;
        }
    }

    pub fn record_failed(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.failed += 1;
        }
    }

    pub fn record_feed_event(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.feed_events += 1;
        }
    }

    pub fn snapshot(&self) -> Counters {
        if let Ok(counters) = self.inner.lock() {
            *counters
        } else {
            Counters::default()
        }
    }
}

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self::new()
    }
}
