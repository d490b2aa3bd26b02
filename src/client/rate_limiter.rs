//! Adaptive per-model rate limiter.
//!
//! Chat-completions endpoints report their budget in `x-ratelimit-*`
//! response headers. The limiter waits out an exhausted budget and backs off
//! exponentially after consecutive 429 responses.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest backoff after repeated 429s.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Longest budget reset honoured from `x-ratelimit-reset-*` headers.
const MAX_RESET_SECS: f64 = 3600.0;

/// Rate limit state for a single model.
#[derive(Debug, Default)]
pub struct ModelRateLimitState {
    pub remaining_requests: Option<u32>,
    pub remaining_tokens: Option<u32>,
    pub reset_requests_at: Option<Instant>,
    pub reset_tokens_at: Option<Instant>,
    /// Consecutive 429 responses
    pub consecutive_429s: u32,
    pub backoff_until: Option<Instant>,
}

impl ModelRateLimitState {
    /// Time to wait before the next request.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let until = |t: Option<Instant>| t.map_or(Duration::ZERO, |t| t.saturating_duration_since(now));

        let mut wait = until(self.backoff_until);
        if self.remaining_requests == Some(0) {
            wait = wait.max(until(self.reset_requests_at));
        }
        if self.remaining_tokens == Some(0) {
            wait = wait.max(until(self.reset_tokens_at));
        }
        wait
    }

    /// Record a 429 and extend the backoff window.
    pub fn record_429(&mut self) {
        self.consecutive_429s += 1;
        let backoff_secs = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        self.backoff_until = Some(Instant::now() + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff_secs,
            "Rate limited (429), backing off"
        );
    }

    pub fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    /// Update remaining budget and reset times from response headers.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        let now = Instant::now();
        let header = |key: &str| headers.get(key).and_then(|v| v.to_str().ok());

        if let Some(s) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = s.parse().ok();
        }
        if let Some(s) = header("x-ratelimit-remaining-tokens") {
            self.remaining_tokens = s.parse().ok();
        }
        if let Some(reset) = header("x-ratelimit-reset-requests").and_then(parse_reset) {
            self.reset_requests_at = now.checked_add(reset);
        }
        if let Some(reset) = header("x-ratelimit-reset-tokens").and_then(parse_reset) {
            self.reset_tokens_at = now.checked_add(reset);
        }
    }
}

/// Parse a reset hint: plain seconds (`"1.5"`) or a duration such as `"6m0s"`,
/// `"1s"` or `"250ms"`. Hints beyond an hour are clamped to an hour.
fn parse_reset(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return clamp_reset(secs);
    }

    let mut total = 0.0_f64;
    let mut number = String::new();
    let mut chars = value.chars().peekable();
    let mut matched = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let amount: f64 = number.parse().ok()?;
        number.clear();
        let scale = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += amount * scale;
        matched = true;
    }
    if !matched || !number.is_empty() {
        return None;
    }
    clamp_reset(total)
}

fn clamp_reset(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs.min(MAX_RESET_SECS)).ok()
}

/// Per-model rate limiter shared by every call of a client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ModelRateLimitState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait if necessary before a request to `model`. Returns the time waited.
    pub async fn wait_if_needed(&self, model: &str) -> Duration {
        // Guard dropped before sleeping.
        let wait_time = self
            .states
            .get(model)
            .map_or(Duration::ZERO, |state| state.wait_time());

        if wait_time > Duration::ZERO {
            debug!(
                model = model,
                wait_ms = wait_time.as_millis(),
                "Waiting for rate limit"
            );
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Record the outcome of a request.
    pub fn record_request(&self, model: &str, status: u16, headers: &HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.states.entry(model.to_string()).or_default();
        state.update_from_headers(headers);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429();
        } else if status < 400 {
            state.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            models_tracked: self.states.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub models_tracked: usize,
}
