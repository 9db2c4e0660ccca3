//! Per-endpoint sliding-window rate limiting (§4.6), keyed on each
//! endpoint's own `rate_limit_per_min` from `EndpointConfig`.

use chrono::{DateTime, Utc};
use llmesh_domain::trace::TraceEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const WINDOW_SECS: i64 = 60;

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop timestamps older than the 60s window and return the current
    /// in-window count, leaving the window trimmed in place.
    fn trim(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
        while let Some(front) = window.front() {
            if (now - *front).num_seconds() >= WINDOW_SECS {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len() as u32
    }

    /// Admit a call against `endpoint_id`'s per-minute `limit`. Records the
    /// attempt in the window on success; emits `RateLimitRejected` and
    /// leaves the window untouched on refusal.
    pub fn admit(&self, endpoint_id: &str, limit: u32) -> bool {
        let now = Utc::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(endpoint_id.to_string()).or_default();
        let count = Self::trim(window, now);

        if count >= limit {
            TraceEvent::RateLimitRejected {
                endpoint_id: endpoint_id.to_string(),
                window_count: count,
                limit,
            }
            .emit();
            tracing::warn!(endpoint_id, count, limit, "rate limit rejected");
            return false;
        }

        window.push_back(now);
        true
    }

    /// How long until the next slot frees up, zero if `admit` would
    /// currently succeed.
    pub fn wait_time(&self, endpoint_id: &str, limit: u32) -> Duration {
        let now = Utc::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(endpoint_id.to_string()).or_default();
        let count = Self::trim(window, now);

        if count < limit {
            return Duration::ZERO;
        }
        let Some(oldest) = window.front() else {
            return Duration::ZERO;
        };
        let elapsed = (now - *oldest).num_milliseconds().max(0) as u64;
        let window_ms = (WINDOW_SECS * 1000) as u64;
        Duration::from_millis(window_ms.saturating_sub(elapsed))
    }

    pub fn window_count(&self, endpoint_id: &str) -> u32 {
        let now = Utc::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(endpoint_id.to_string()).or_default();
        Self::trim(window, now)
    }

    pub fn reset(&self, endpoint_id: &str) {
        self.windows.lock().remove(endpoint_id);
    }
}
