//! Cooldown + sliding-window limiter for paid generation calls.
//!
//! The limiter holds only the timestamps of accepted calls and decides from
//! them; it never sleeps and never talks to the network. Callers pass the
//! current time so decisions are reproducible.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_COOLDOWN_MS: u64 = 2_000;
pub const DEFAULT_MAX_CALLS: u32 = 10;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Accepted calls are kept at least this long, whatever the window, so a
/// later reconfiguration still sees them.
pub const HISTORY_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub cooldown_ms: u64,
    pub max_calls: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_calls: DEFAULT_MAX_CALLS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    #[serde(rename = "cooldown")]
    Cooldown,
    #[serde(rename = "window limit")]
    WindowLimit,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Cooldown => "cooldown",
            DenyReason::WindowLimit => "window limit",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_time_ms: Option<u64>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_time_ms: None,
        }
    }

    pub fn deny(reason: DenyReason, wait_time_ms: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait_time_ms: Some(wait_time_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub calls_in_window: usize,
    pub max_calls: u32,
    pub cooldown_ms: u64,
    pub window_ms: u64,
    pub next_available_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// Accepted call timestamps (ms since epoch), oldest first.
    history: Vec<i64>,
    /// Widest window ever configured.
    widest_window_ms: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            widest_window_ms: config.window_ms,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Takes effect on the next check. Recorded history is not rewritten.
    pub fn reconfigure(&mut self, config: RateLimitConfig) {
        self.config = config;
        self.widest_window_ms = self.widest_window_ms.max(config.window_ms);
    }

    pub fn can_make_call(&self, now_ms: i64) -> RateLimitDecision {
        if let Some(wait_ms) = self.cooldown_wait(now_ms) {
            return RateLimitDecision::deny(DenyReason::Cooldown, wait_ms);
        }
        if let Some(wait_ms) = self.window_wait(now_ms) {
            return RateLimitDecision::deny(DenyReason::WindowLimit, wait_ms);
        }
        RateLimitDecision::allow()
    }

    /// Records one accepted call. Only entries older than both the
    /// retention bound and every window configured so far are dropped, so
    /// narrowing the window never loses history.
    pub fn record_call(&mut self, now_ms: i64) {
        let retention_ms = self.widest_window_ms.max(HISTORY_RETENTION_MS);
        let cutoff = now_ms.saturating_sub(retention_ms as i64);
        self.history.retain(|&stamp| stamp > cutoff);
        self.history.push(now_ms);
    }

    /// `next_available_at_ms` accounts for both constraints, so it can be
    /// later than the wait reported by [`Self::can_make_call`] when the
    /// cooldown and the window are both saturated.
    pub fn status(&self, now_ms: i64) -> RateLimitStatus {
        let wait_ms = self
            .cooldown_wait(now_ms)
            .unwrap_or(0)
            .max(self.window_wait(now_ms).unwrap_or(0));
        RateLimitStatus {
            calls_in_window: self.calls_in_window(now_ms).len(),
            max_calls: self.config.max_calls,
            cooldown_ms: self.config.cooldown_ms,
            window_ms: self.config.window_ms,
            next_available_at_ms: now_ms.saturating_add(wait_ms as i64),
        }
    }

    fn cooldown_wait(&self, now_ms: i64) -> Option<u64> {
        let last = *self.history.last()?;
        let elapsed = now_ms.saturating_sub(last).max(0) as u64;
        (elapsed < self.config.cooldown_ms).then(|| self.config.cooldown_ms - elapsed)
    }

    /// Time until enough calls leave the window for one more to fit. With
    /// exactly `max_calls` in the window that is when the oldest expires.
    fn window_wait(&self, now_ms: i64) -> Option<u64> {
        let in_window = self.calls_in_window(now_ms);
        let max_calls = self.config.max_calls as usize;
        if in_window.len() < max_calls {
            return None;
        }
        let wait_ms = match in_window.get(in_window.len() - max_calls) {
            Some(&stamp) if max_calls > 0 => {
                let expires_at = stamp.saturating_add(self.config.window_ms as i64);
                expires_at.saturating_sub(now_ms).max(1) as u64
            }
            _ => self.config.window_ms.max(1),
        };
        Some(wait_ms)
    }

    fn calls_in_window(&self, now_ms: i64) -> &[i64] {
        let cutoff = self.window_cutoff(now_ms);
        let start = self.history.partition_point(|&stamp| stamp <= cutoff);
        &self.history[start..]
    }

    fn window_cutoff(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.config.window_ms as i64)
    }
}
