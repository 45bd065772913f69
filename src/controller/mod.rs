//! # Controller
//!
//! Core controller modules for the JetStream controller.
//!
//! - `backoff`: Per-key exponential backoff for retries
//! - `conditions`: Status condition bookkeeping
//! - `finalizers`: Finalizer list helpers
//! - `queue`: Rate-limited, deduplicating work queue
//! - `reconciler`: Core reconciliation logic
//! - `secrets`: Credential loading and wiping
//! - `server`: HTTP server for metrics and health checks
//! - `store`: Read/write access to the managed resources
//! - `validation`: Spec value validation

pub mod backoff;
pub mod conditions;
pub mod finalizers;
pub mod queue;
pub mod reconciler;
pub mod secrets;
pub mod server;
pub mod store;
pub mod validation;
