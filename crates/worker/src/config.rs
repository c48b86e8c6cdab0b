use std::time::Duration;

use maintenance_messaging::{BrokerConfig, ConfigError};

/// Default simulated processing time per notification.
const DEFAULT_WORK_DELAY_MS: u64 = 1000;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker: BrokerConfig,
    /// Time the notification handler spends "sending" each notification.
    pub work_delay: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Broker settings come from [`BrokerConfig::from_env`]; in addition:
    ///
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `NOTIFICATION_WORK_DELAY_MS`  | `1000`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let work_delay_ms = match lookup("NOTIFICATION_WORK_DELAY_MS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "NOTIFICATION_WORK_DELAY_MS",
                expected: "a number of milliseconds",
                value,
            })?,
            None => DEFAULT_WORK_DELAY_MS,
        };

        Ok(Self {
            broker: BrokerConfig::from_lookup(&lookup)?,
            work_delay: Duration::from_millis(work_delay_ms),
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            work_delay: Duration::from_millis(DEFAULT_WORK_DELAY_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_one_second_of_work() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.work_delay, Duration::from_secs(1));
        assert_eq!(config.broker.queue, "task_queue");
    }

    #[test]
    fn reads_work_delay_and_broker_settings() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("NOTIFICATION_WORK_DELAY_MS", "25"),
            ("RABBITMQ_PREFETCH", "4"),
        ]))
        .unwrap();
        assert_eq!(config.work_delay, Duration::from_millis(25));
        assert_eq!(config.broker.prefetch, 4);
    }

    #[test]
    fn rejects_non_numeric_delay() {
        let err = WorkerConfig::from_lookup(lookup(&[("NOTIFICATION_WORK_DELAY_MS", "soon")]))
            .unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid { var: "NOTIFICATION_WORK_DELAY_MS", .. }
        );
    }
}
