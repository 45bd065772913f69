//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::controller::conditions::TransitionPolicy;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches every namespace
    pub watch_namespace: Option<String>,
    /// Broker servers used by resources that do not list their own
    pub nats_servers: Vec<String>,
    /// Worker tasks per resource kind
    pub workers: usize,
    /// Failed passes tolerated before a key is dropped
    pub max_queue_retries: u32,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_base_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Deadline for connecting and for each broker call (seconds)
    pub broker_timeout_secs: u64,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// How `lastTransitionTime` is handled when a condition is rewritten
    pub condition_policy: TransitionPolicy,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BROKER_TIMEOUT_SECS,
            DEFAULT_MAX_QUEUE_RETRIES, DEFAULT_METRICS_PORT, DEFAULT_WATCH_RESTART_DELAY_SECS,
            DEFAULT_WORKERS,
        };
        Self {
            watch_namespace: None,
            nats_servers: Vec::new(),
            workers: DEFAULT_WORKERS,
            max_queue_retries: DEFAULT_MAX_QUEUE_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            broker_timeout_secs: DEFAULT_BROKER_TIMEOUT_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            condition_policy: TransitionPolicy::default(),
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            watch_namespace: lookup("WATCH_NAMESPACE")
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty()),
            nats_servers: lookup("NATS_SERVERS")
                .map(|servers| split_list(&servers))
                .unwrap_or_default(),
            workers: var_or_default(&lookup, "WORKERS", defaults.workers).max(1),
            max_queue_retries: var_or_default(
                &lookup,
                "MAX_QUEUE_RETRIES",
                defaults.max_queue_retries,
            ),
            backoff_base_ms: var_or_default(&lookup, "BACKOFF_BASE_MS", defaults.backoff_base_ms),
            backoff_max_ms: var_or_default(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            broker_timeout_secs: var_or_default(
                &lookup,
                "BROKER_TIMEOUT_SECS",
                defaults.broker_timeout_secs,
            ),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", defaults.metrics_port),
            condition_policy: var_or_default(
                &lookup,
                "CONDITION_TRANSITION_POLICY",
                defaults.condition_policy,
            ),
            watch_restart_delay_secs: var_or_default(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
        }
    }

    #[must_use]
    pub fn backoff_base_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn broker_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }

    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read a variable or return the default when unset or unparsable
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma separated list, blanks removed
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ControllerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = load(&[]);
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.max_queue_retries, 10);
        assert_eq!(config.backoff_base_duration(), Duration::from_millis(5));
        assert_eq!(config.backoff_max_duration(), Duration::from_secs(1000));
        assert_eq!(config.condition_policy, TransitionPolicy::PreserveOnSameStatus);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "messaging"),
            ("NATS_SERVERS", "nats://a:4222, nats://b:4222,,"),
            ("WORKERS", "4"),
            ("MAX_QUEUE_RETRIES", "3"),
            ("BROKER_TIMEOUT_SECS", "2"),
            ("METRICS_PORT", "9090"),
            ("CONDITION_TRANSITION_POLICY", "refresh"),
        ]);
        assert_eq!(config.watch_namespace.as_deref(), Some("messaging"));
        assert_eq!(config.nats_servers, vec!["nats://a:4222", "nats://b:4222"]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_queue_retries, 3);
        assert_eq!(config.broker_timeout_duration(), Duration::from_secs(2));
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.condition_policy, TransitionPolicy::AlwaysRefresh);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = load(&[
            ("WATCH_NAMESPACE", "  "),
            ("WORKERS", "0"),
            ("METRICS_PORT", "eighty"),
            ("CONDITION_TRANSITION_POLICY", "sometimes"),
        ]);
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.workers, 1);
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.condition_policy, TransitionPolicy::PreserveOnSameStatus);
    }
}
