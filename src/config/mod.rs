//! # Configuration
//!
//! Controller settings loaded from environment variables.
//!
//! - `controller`: Queue, broker and server settings

pub mod controller;

pub use controller::ControllerConfig;
