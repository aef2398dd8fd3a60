use std::time::Duration;

use crate::error::CoordinatorError;

/// Upper bound on the lifelines a seat can start with.
pub const MAX_LIFELINES: u8 = 3;

/// Game rules and timings the coordinator runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Clock budget per side.
    pub time_budget_secs: u64,
    pub initial_lifelines: u8,
    /// Length of one reconnect window.
    pub countdown_secs: u64,
    /// Largest downward correction accepted from a client-reported clock.
    pub clock_tolerance_secs: u64,
    /// Interval between clock broadcasts while a clock runs.
    pub clock_sync_secs: u64,
    /// Delay between a checkmate/stalemate and finalisation.
    pub finalize_grace_ms: u64,
    pub signature_freshness_secs: u64,
    pub future_skew_secs: u64,
    pub persist_max_attempts: u32,
    pub persist_backoff_ms: u64,
    pub persist_backoff_max_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: 900,
            initial_lifelines: 3,
            countdown_secs: 30,
            clock_tolerance_secs: 60,
            clock_sync_secs: 5,
            finalize_grace_ms: 1500,
            signature_freshness_secs: 300,
            future_skew_secs: 30,
            persist_max_attempts: 5,
            persist_backoff_ms: 500,
            persist_backoff_max_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        let invalid = |msg: &str| Err(CoordinatorError::InvalidConfig(msg.to_string()));
        if self.time_budget_secs == 0 {
            return invalid("time_budget_secs must be positive");
        }
        if !(1..=MAX_LIFELINES).contains(&self.initial_lifelines) {
            return invalid("initial_lifelines must be between 1 and 3");
        }
        if self.countdown_secs == 0 {
            return invalid("countdown_secs must be positive");
        }
        if self.clock_sync_secs == 0 {
            return invalid("clock_sync_secs must be positive");
        }
        if self.persist_max_attempts == 0 {
            return invalid("persist_max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn clock_sync(&self) -> Duration {
        Duration::from_secs(self.clock_sync_secs)
    }

    pub fn finalize_grace(&self) -> Duration {
        Duration::from_millis(self.finalize_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.countdown(), Duration::from_secs(30));
        assert_eq!(config.finalize_grace(), Duration::from_millis(1500));
    }

    #[test]
    fn zero_values_rejected() {
        let config = CoordinatorConfig {
            initial_lifelines: 0,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::InvalidConfig(_))
        ));
        let config = CoordinatorConfig {
            countdown_secs: 0,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lifelines_above_three_rejected() {
        let config = CoordinatorConfig {
            initial_lifelines: MAX_LIFELINES + 1,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::InvalidConfig(_))
        ));
        let config = CoordinatorConfig {
            initial_lifelines: 1,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
