//! # Types
//!
//! Core types for the reconciler.

use crate::broker::BrokerError;
use crate::controller::conditions::{
    TransitionPolicy, REASON_BROKER_ERROR, REASON_CONNECTION_FAILED, REASON_CREDENTIALS_ERROR,
    REASON_INVALID_SPEC, REASON_PARENT_NOT_READY, REASON_STORE_ERROR,
};
use crate::controller::secrets::{CredentialsError, SecretSource};
use crate::controller::store::{ObjectStore, StoreError};
use crate::controller::validation::ValidationError;
use crate::crd::{Consumer, Stream};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] ValidationError),

    #[error("failed to load credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("{0}")]
    Connect(BrokerError),

    #[error("{0}")]
    Broker(BrokerError),

    #[error("failed to persist resource: {0}")]
    Store(#[from] StoreError),

    #[error("parent stream {stream:?} is not ready")]
    ParentNotReady { stream: String },

    #[error("broker {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl ReconcileError {
    /// Whether another pass may succeed without the spec changing
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ReconcileError::InvalidSpec(_))
    }

    /// Condition reason naming the failure class
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::InvalidSpec(_) => REASON_INVALID_SPEC,
            ReconcileError::Credentials(_) => REASON_CREDENTIALS_ERROR,
            ReconcileError::Connect(_) => REASON_CONNECTION_FAILED,
            ReconcileError::Timeout { operation, .. } if *operation == "connect" => {
                REASON_CONNECTION_FAILED
            }
            ReconcileError::Broker(_) | ReconcileError::Timeout { .. } => REASON_BROKER_ERROR,
            ReconcileError::Store(_) => REASON_STORE_ERROR,
            ReconcileError::ParentNotReady { .. } => REASON_PARENT_NOT_READY,
        }
    }
}

/// Result of a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing left to do until the next event
    Done,
    /// Run another pass right away (no backoff)
    Requeue,
}

/// Shared dependencies of every reconcile pass
#[derive(Clone)]
pub struct Context {
    pub streams: Arc<dyn ObjectStore<Stream>>,
    pub consumers: Arc<dyn ObjectStore<Consumer>>,
    pub secrets: Arc<dyn SecretSource>,
    /// Used when a resource lists no servers of its own
    pub default_servers: Vec<String>,
    /// Deadline for connect and for each broker call
    pub broker_timeout: Duration,
    pub condition_policy: TransitionPolicy,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("default_servers", &self.default_servers)
            .field("broker_timeout", &self.broker_timeout)
            .field("condition_policy", &self.condition_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_spec_is_permanent() {
        let invalid = ReconcileError::InvalidSpec(ValidationError::invalid_value("storage", "junk"));
        assert!(!invalid.is_retriable());
        assert_eq!(invalid.reason(), "InvalidSpec");

        let parent = ReconcileError::ParentNotReady {
            stream: "ORDERS".to_string(),
        };
        assert!(parent.is_retriable());
        assert_eq!(parent.reason(), "ParentNotReady");
    }

    #[test]
    fn test_timeout_reason_depends_on_operation() {
        let connect = ReconcileError::Timeout {
            operation: "connect",
            timeout: Duration::from_secs(10),
        };
        assert_eq!(connect.reason(), "ConnectionFailed");

        let call = ReconcileError::Timeout {
            operation: "get_stream",
            timeout: Duration::from_secs(10),
        };
        assert_eq!(call.reason(), "BrokerError");
        assert!(call.to_string().contains("get_stream"));
    }
}
