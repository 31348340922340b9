//! Fixed-window request throttle for the login and write paths.
//!
//! Counters are process-local and keyed `prefix:identifier`. The fixed
//! window tolerates a burst straddling a window boundary (up to twice the limit
//! across the seam); that is an accepted tradeoff of the design, chosen
//! over a sliding window for its single-counter cheapness. Under
//! horizontal scale-out each instance counts independently, which only
//! loosens the limit; externalize the counters to a shared store if a
//! hard global limit matters.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

/// Too many requests inside the current window.
#[derive(Debug, Error, Diagnostic)]
#[error("rate limit exceeded: {limit} requests per {window_secs}s, retry in {}s", retry_after.as_secs())]
#[diagnostic(
    code(marginalia::ratelimit::exceeded),
    help("wait for the window to reset before retrying")
)]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window_secs: u64,
    /// Time until the window resets.
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Header set for a 429 response.
    pub fn headers(&self) -> [(&'static str, String); 4] {
        let retry_secs = self.retry_after.as_secs().max(1);
        [
            ("Retry-After", retry_secs.to_string()),
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
            ("X-RateLimit-Reset", retry_secs.to_string()),
        ]
    }
}

/// A request admitted within the window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window resets.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Requests allowed per window.
    pub limit: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter keyed by `prefix:identifier`.
pub struct FixedWindowLimiter {
    config: RateLimiterConfig,
    windows: DashMap<SmolStr, Window>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Counts one request for `prefix:identifier` against the current
    /// window.
    pub fn check(
        &self,
        prefix: &str,
        identifier: &str,
    ) -> Result<RateLimitDecision, RateLimitExceeded> {
        self.check_at(prefix, identifier, Instant::now())
    }

    fn check_at(
        &self,
        prefix: &str,
        identifier: &str,
        now: Instant,
    ) -> Result<RateLimitDecision, RateLimitExceeded> {
        let key = SmolStr::new(format!("{prefix}:{identifier}"));
        let mut entry = self.windows.entry(key).or_insert_with(|| Window {
            count: 0,
            reset_at: now + self.config.window,
        });

        if now >= entry.reset_at {
            // Window elapsed; start a fresh one.
            entry.count = 0;
            entry.reset_at = now + self.config.window;
        }

        if entry.count >= self.config.limit {
            return Err(RateLimitExceeded {
                limit: self.config.limit,
                window_secs: self.config.window.as_secs(),
                retry_after: entry.reset_at.saturating_duration_since(now),
            });
        }
        entry.count += 1;
        Ok(RateLimitDecision {
            limit: self.config.limit,
            remaining: self.config.limit - entry.count,
            reset_after: entry.reset_at.saturating_duration_since(now),
        })
    }

    /// Drops windows that have already reset; call periodically to bound
    /// memory on high-cardinality identifiers.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| now < window.reset_at);
    }
}
