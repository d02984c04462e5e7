//! Reconnection backoff policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sio_core::config::ReconnectSettings;
use sio_core::constants::reconnect as defaults;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether the session reconnects at all after losing the transport.
    pub enabled: bool,
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_millis(defaults::DELAY_MS),
            max_delay: Duration::from_millis(defaults::DELAY_MAX_MS),
            multiplier: defaults::MULTIPLIER,
            max_attempts: 0,
            jitter_factor: defaults::JITTER,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            enabled: s.enabled,
            base_delay: Duration::from_millis(s.delay_ms),
            max_delay: Duration::from_millis(s.delay_max_ms),
            multiplier: finite_or(s.multiplier, defaults::MULTIPLIER).max(1.0),
            max_attempts: s.max_attempts,
            jitter_factor: finite_or(s.jitter, defaults::JITTER).clamp(0.0, 1.0),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Decides whether and when to retry a lost connection.
///
/// Attempts are numbered from 1. The cancellation flag is shared with the
/// client so an explicit `disconnect()` stops retries even while the I/O task
/// is sleeping through a backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    cancelled: Arc<AtomicBool>,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay for `attempt` without jitter: `base * multiplier^(attempt-1)`, capped.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = finite_or(base * self.config.multiplier.powi(exponent), max).min(max);
        Duration::from_secs_f64(exponential.max(0.0))
    }

    /// Delay for `attempt` with +/- `jitter_factor` randomization, never above the cap.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_for(attempt).as_secs_f64();
        let jitter_range = exponential * finite_or(self.config.jitter_factor, 0.0).clamp(0.0, 1.0);
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let max = self.config.max_delay.as_secs_f64();
        Duration::from_secs_f64((exponential + jitter).clamp(0.0, max))
    }

    /// Whether attempt number `attempt` may run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        if !self.config.enabled || self.is_cancelled() {
            return false;
        }
        self.config.max_attempts == 0 || attempt <= self.config.max_attempts
    }

    /// Stop all further retries.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
