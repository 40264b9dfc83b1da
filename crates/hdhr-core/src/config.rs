use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    pub failure_threshold: u32,
    pub fetch_timeout: Duration,
    pub discovery_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            discovery_interval: Duration::from_secs(30),
            failure_threshold: 3,
            fetch_timeout: Duration::from_millis(1500),
            discovery_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let durations = [
            ("poll_interval", self.poll_interval),
            ("discovery_interval", self.discovery_interval),
            ("fetch_timeout", self.fetch_timeout),
            ("discovery_timeout", self.discovery_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }

        if self.failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
