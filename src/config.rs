use std::time::Duration;

use crate::error::{Result, SweepError};

/// Tuning knobs for a sweep. Built from the command line in `main`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Maximum number of probes in flight at once.
    pub concurrency: usize,
    /// Hard upper bound for a single connect attempt.
    pub probe_timeout: Duration,
    /// Stop dispatching new probes once this much time has passed.
    pub scan_timeout: Option<Duration>,
    /// How long in-flight probes may drain after a cancel or scan timeout.
    pub grace_period: Duration,
    /// Wait before each probe, like a per-worker rate limit. Interrupted
    /// by a stop, so it never holds back an answer.
    pub probe_delay: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            probe_timeout: Duration::from_millis(1000),
            scan_timeout: None,
            grace_period: Duration::from_millis(1000),
            probe_delay: Duration::ZERO,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SweepError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(SweepError::InvalidConfig(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        if matches!(self.scan_timeout, Some(t) if t.is_zero()) {
            return Err(SweepError::InvalidConfig(
                "scan timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency_and_timeouts() {
        let config = ScanConfig {
            concurrency: 0,
            ..ScanConfig::default()
        };
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));

        let config = ScanConfig {
            probe_timeout: Duration::ZERO,
            ..ScanConfig::default()
        };
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));

        let config = ScanConfig {
            scan_timeout: Some(Duration::ZERO),
            ..ScanConfig::default()
        };
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
    }
}
