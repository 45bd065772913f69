//! # Runtime
//!
//! Everything that runs the controller: start-up, watches, workers and the
//! handling of their errors.
//!
//! - `error_policy`: Failure reporting and watch error classification
//! - `initialization`: Start-up, task wiring and graceful shutdown
//! - `watch_loop`: Reflector-backed watches feeding the work queues
//! - `worker`: Queue processing and the retry/drop policy

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
pub mod worker;
