//! Reconnection rate limiting for live streams.
//!
//! Subscription tasks retry forever; this quota keeps a flapping source
//! from turning that into a reconnect storm the venue would ban.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

use crate::config::ReconnectSettings;

/// Reconnection quota configuration.
#[derive(Debug, Clone)]
pub struct ReconnectLimiterConfig {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Quota window
    pub window: Duration,
    /// Wait when the quota is exhausted; defaults to the window
    pub cooldown: Option<Duration>,
}

impl Default for ReconnectLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60),
            cooldown: None,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectLimiterConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            window: Duration::from_secs(settings.window_secs.max(1)),
            cooldown: settings.cooldown_secs.map(Duration::from_secs),
        }
    }
}

/// Quota-based reconnection limiter shared by all stream tasks.
pub struct ReconnectLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: ReconnectLimiterConfig,
}

impl ReconnectLimiter {
    pub fn new(config: ReconnectLimiterConfig) -> Self {
        let burst = NonZeroU32::new(config.max_attempts.max(1)).expect("max_attempts is non-zero");
        let quota = Quota::with_period(config.window / config.max_attempts.max(1))
            .expect("window is non-zero")
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            config,
        }
    }

    /// Whether another reconnection attempt is within the quota.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// How long to wait once the quota is exhausted.
    pub fn cooldown(&self) -> Duration {
        self.config.cooldown.unwrap_or(self.config.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_quota() {
        let limiter = ReconnectLimiter::new(ReconnectLimiterConfig {
            max_attempts: 3,
            window: Duration::from_secs(60),
            cooldown: None,
        });

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_quota_replenishes_after_window() {
        let limiter = ReconnectLimiter::new(ReconnectLimiterConfig {
            max_attempts: 2,
            window: Duration::from_millis(100),
            cooldown: None,
        });

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(150));
        assert!(limiter.allow());
    }

    #[test]
    fn test_cooldown_defaults_to_window() {
        let limiter = ReconnectLimiter::new(ReconnectLimiterConfig {
            max_attempts: 5,
            window: Duration::from_secs(60),
            cooldown: None,
        });
        assert_eq!(limiter.cooldown(), Duration::from_secs(60));

        let limiter = ReconnectLimiter::new(ReconnectLimiterConfig {
            max_attempts: 5,
            window: Duration::from_secs(60),
            cooldown: Some(Duration::from_secs(10)),
        });
        assert_eq!(limiter.cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_settings() {
        let settings = ReconnectSettings {
            max_attempts: 7,
            window_secs: 30,
            cooldown_secs: Some(5),
        };
        let config = ReconnectLimiterConfig::from(&settings);
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.window, Duration::from_secs(30));
        assert_eq!(config.cooldown, Some(Duration::from_secs(5)));
    }
}
