//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables (see [`crate::config::ControllerConfig`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default number of retries before a key is dropped from a work queue
pub const DEFAULT_MAX_QUEUE_RETRIES: u32 = 10;

/// Default per-key backoff base delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Default per-key backoff ceiling (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000_000;

/// Default deadline for a single broker call, including connect (seconds)
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 10;

/// Default number of worker tasks per resource kind
pub const DEFAULT_WORKERS: usize = 2;

/// Default delay before restarting a watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Field manager name used for every write the controller makes
pub const FIELD_MANAGER: &str = "jetstream-controller";

/// Name given to broker connections so they are identifiable server-side
pub const CONNECTION_NAME: &str = "jetstream-controller";

/// Queue names, also used as the `kind` metric label
pub const STREAM_QUEUE_NAME: &str = "streams";
pub const CONSUMER_QUEUE_NAME: &str = "consumers";
