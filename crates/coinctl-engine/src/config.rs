//! Engine configuration.
//!
//! Provides [`EngineConfig`] with defaults for the refresh bound and the
//! privacy policy. The CLI layers file and environment overrides on top.

use std::time::Duration;

use coinctl_core::constants::DEFAULT_REFRESH_TIMEOUT_SECS;

use crate::privacy::PrivacyPolicy;

/// Configuration for a [`CoinControlEngine`](crate::CoinControlEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on a single chain fetch during refresh. Exceeding it marks
    /// the address stale and leaves the live set unchanged.
    pub refresh_timeout: Duration,
    /// Penalty constants for the privacy scorer.
    pub privacy: PrivacyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            privacy: PrivacyPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_privacy(mut self, privacy: PrivacyPolicy) -> Self {
        self.privacy = privacy;
        self
    }
}
