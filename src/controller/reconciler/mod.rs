//! # Reconciler
//!
//! Core reconciliation logic for `Stream` and `Consumer` resources.
//!
//! The reconciler:
//! - Guards every resource with a finalizer before touching the broker
//! - Validates the spec and converts it into broker configuration
//! - Creates, updates or leaves the broker entity so it matches the spec
//! - Deletes the broker entity before letting the resource go
//! - Records the outcome as a `Ready` condition
//!
//! ## Reconciliation Flow
//!
//! 1. Look up the resource by key (a missing resource is a no-op)
//! 2. Deleting: tear down on the broker, then remove the finalizer
//! 3. No finalizer: add it and requeue
//! 4. Validate spec, check parent readiness (consumers), load credentials
//! 5. Connect, observe, create/update/no-op
//! 6. Update status (skipped when unchanged)

pub mod consumer;
pub mod stream;
pub mod sync;
pub mod types;

pub use consumer::{ConsumerSyncer, ConsumerTarget};
pub use stream::StreamSyncer;
pub use sync::{
    open_session, process, surface_exhausted, Change, Session, SyncOutcome, Syncer,
};
pub use types::{Action, Context, ReconcileError};
