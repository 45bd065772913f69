//! JetStream Controller Library
//!
//! Reconciles NATS JetStream streams and consumers from `Stream` and
//! `Consumer` custom resources.
//!
//! - `broker`: JetStream administrative client and an in-memory stand-in
//! - `config`: Environment configuration
//! - `controller`: Queue, reconciler, status and credential handling
//! - `crd`: Custom resource definitions
//! - `observability`: Prometheus metrics
//! - `runtime`: Start-up, watches and workers

pub mod broker;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
