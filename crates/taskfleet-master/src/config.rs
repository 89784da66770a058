//! Master engine configuration.

use std::time::Duration;

use taskfleet_core::CoreError;

/// Configuration for the master coordination engine.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// How long an assignment attempt waits for the processor to confirm
    /// the task started. Must be positive.
    pub assign_task_timeout: Duration,
}

impl MasterConfig {
    /// Validate the configuration. Fails at startup, not mid-loop.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.assign_task_timeout.is_zero() {
            return Err(CoreError::InvalidInput(
                "assign_task_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            assign_task_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MasterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = MasterConfig {
            assign_task_timeout: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }
}
