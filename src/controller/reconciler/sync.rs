//! # Sync
//!
//! The reconcile algorithm shared by every resource kind.
//!
//! A pass over one resource does exactly one of:
//!
//! | Resource state          | Action                                             |
//! |-------------------------|----------------------------------------------------|
//! | missing from the store  | nothing                                            |
//! | deleting, finalizer     | delete on broker, remove finalizer                 |
//! | deleting, no finalizer  | nothing                                            |
//! | live, no finalizer      | add finalizer, requeue                             |
//! | live, finalizer         | create / update / leave the broker entity, `Ready` |
//!
//! Kind-specific work (validation, broker calls) lives behind [`Syncer`].
//! Nothing here retries: errors go back to the worker, which owns the
//! requeue/drop decision.

use crate::broker::{BrokerClient, BrokerConnector, BrokerError, ConnectOptions};
use crate::controller::conditions::{
    build_condition, upsert_condition, CONDITION_READY, REASON_CREATED, REASON_DELETE_FAILED,
    REASON_RETRIES_EXHAUSTED, REASON_SYNCED,
};
use crate::controller::finalizers::{add_finalizer, has_finalizer, remove_finalizer};
use crate::controller::reconciler::types::{Action, Context, ReconcileError};
use crate::controller::store::{ObjectStore, StoreError};
use crate::controller::validation::{validate_broker_name, ValidationError};
use crate::crd::{BrokerState, Condition, ConditionStatus, ManagedResource};
use crate::observability::metrics;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// What a successful sync did on the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

impl Change {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Change::Created => "created",
            Change::Updated => "updated",
            Change::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub change: Change,
    pub state: BrokerState,
}

/// An open broker connection with a per-call deadline
pub struct Session {
    client: Arc<dyn BrokerClient>,
    timeout: Duration,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(client: Arc<dyn BrokerClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    #[must_use]
    pub fn client(&self) -> &dyn BrokerClient {
        self.client.as_ref()
    }

    /// Run one broker call under the session deadline
    pub async fn call<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, BrokerError>> + Send,
    ) -> Result<T, ReconcileError> {
        let (result, label) = match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => (Ok(value), "success"),
            Ok(Err(e)) if e.is_not_found() => (Err(ReconcileError::Broker(e)), "not_found"),
            Ok(Err(e)) => (Err(ReconcileError::Broker(e)), "error"),
            Err(_elapsed) => (
                Err(ReconcileError::Timeout {
                    operation,
                    timeout: self.timeout,
                }),
                "timeout",
            ),
        };
        metrics::increment_broker_operations(operation, label);
        result
    }
}

/// Kind-specific half of the reconcile algorithm
#[async_trait]
pub trait Syncer: Send + Sync {
    type Resource: ManagedResource;
    /// Validated broker-side configuration
    type Desired: Send + Sync;

    fn store<'a>(&self, ctx: &'a Context) -> &'a dyn ObjectStore<Self::Resource>;

    /// Validate the spec and build the broker configuration
    fn desired(&self, resource: &Self::Resource) -> Result<Self::Desired, ValidationError>;

    /// Checks that must pass before the broker is contacted
    async fn preflight(
        &self,
        _ctx: &Context,
        _resource: &Self::Resource,
        _desired: &Self::Desired,
    ) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Observe the broker and create, update or leave the entity
    async fn apply(
        &self,
        session: &Session,
        desired: &Self::Desired,
    ) -> Result<SyncOutcome, ReconcileError>;

    /// Whether a broker entity could ever have been created for this
    /// resource; when not, deletion skips the broker entirely
    fn may_exist_on_broker(&self, resource: &Self::Resource) -> bool {
        validate_broker_name("name", &resource.broker_name()).is_ok()
    }

    /// Remove the entity from the broker; a missing entity is success
    async fn cleanup(
        &self,
        session: &Session,
        resource: &Self::Resource,
    ) -> Result<(), ReconcileError>;
}

/// Run one reconcile pass for `namespace/name`
pub async fn process<S: Syncer>(
    syncer: &S,
    ctx: &Context,
    connector: &dyn BrokerConnector,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    let kind = <S::Resource as ManagedResource>::KIND_LABEL;
    let span = info_span!(
        "reconcile",
        resource.kind = kind,
        resource.namespace = %namespace,
        resource.name = %name
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(kind);

        let result = reconcile(syncer, ctx, connector, namespace, name).await;

        metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::increment_reconciliation_errors(kind, e.reason());
        }
        result
    }
    .instrument(span)
    .await
}

async fn reconcile<S: Syncer>(
    syncer: &S,
    ctx: &Context,
    connector: &dyn BrokerConnector,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileError> {
    let store = syncer.store(ctx);
    let Some(resource) = store.get(namespace, name).await? else {
        debug!("Resource no longer exists, nothing to do");
        return Ok(Action::Done);
    };

    let finalizer = <S::Resource as ManagedResource>::FINALIZER;
    let has = has_finalizer(resource.finalizers(), finalizer);

    if resource.is_deleting() {
        if !has {
            debug!("Resource is being deleted and carries no finalizer of ours");
            return Ok(Action::Done);
        }
        return finalize(syncer, ctx, connector, store, &resource).await;
    }

    if !has {
        let mut updated = resource.clone();
        updated.meta_mut().finalizers = Some(add_finalizer(resource.finalizers(), finalizer));
        store.update(&updated).await?;
        info!("Added finalizer {}", finalizer);
        return Ok(Action::Requeue);
    }

    match sync(syncer, ctx, connector, &resource).await {
        Ok(outcome) => {
            let kind = <S::Resource as ManagedResource>::KIND_LABEL;
            let (reason, message) = match outcome.change {
                Change::Created => (REASON_CREATED, format!("{kind} created on broker")),
                Change::Updated => (REASON_SYNCED, format!("{kind} updated on broker")),
                Change::Unchanged => (REASON_SYNCED, format!("{kind} in sync with broker")),
            };
            if outcome.change != Change::Unchanged {
                info!("Broker {} {}", kind, outcome.change.as_str());
                metrics::increment_broker_changes(kind, outcome.change.as_str());
            }
            let condition = build_condition(CONDITION_READY, ConditionStatus::True, reason, &message);
            write_status(store, ctx, &resource, condition, Some(outcome.state)).await?;
            Ok(Action::Done)
        }
        Err(error) => {
            record_failure(store, ctx, &resource, error.reason(), &error).await;
            Err(error)
        }
    }
}

async fn sync<S: Syncer>(
    syncer: &S,
    ctx: &Context,
    connector: &dyn BrokerConnector,
    resource: &S::Resource,
) -> Result<SyncOutcome, ReconcileError> {
    let desired = syncer.desired(resource)?;
    syncer.preflight(ctx, resource, &desired).await?;
    let session = open_session(ctx, connector, resource).await?;
    syncer.apply(&session, &desired).await
}

async fn finalize<S: Syncer>(
    syncer: &S,
    ctx: &Context,
    connector: &dyn BrokerConnector,
    store: &dyn ObjectStore<S::Resource>,
    resource: &S::Resource,
) -> Result<Action, ReconcileError> {
    let teardown = async {
        if !syncer.may_exist_on_broker(resource) {
            debug!("Broker names never validated, nothing to delete on the broker");
            return Ok(());
        }
        let session = open_session(ctx, connector, resource).await?;
        syncer.cleanup(&session, resource).await
    };

    match teardown.await {
        Ok(()) => {
            let kind = <S::Resource as ManagedResource>::KIND_LABEL;
            let mut updated = resource.clone();
            updated.meta_mut().finalizers = Some(remove_finalizer(
                resource.finalizers(),
                <S::Resource as ManagedResource>::FINALIZER,
            ));
            store.update(&updated).await?;
            metrics::increment_broker_changes(kind, "deleted");
            info!("Deleted {} from broker and removed finalizer", kind);
            Ok(Action::Done)
        }
        Err(error) => {
            record_failure(store, ctx, resource, REASON_DELETE_FAILED, &error).await;
            Err(error)
        }
    }
}

/// Connect using the resource's servers (or the controller default) and credentials
///
/// The credential buffer is wiped as soon as the connection attempt returns.
pub async fn open_session<K: ManagedResource>(
    ctx: &Context,
    connector: &dyn BrokerConnector,
    resource: &K,
) -> Result<Session, ReconcileError> {
    let connection = resource.connection();
    let servers = if connection.servers.is_empty() {
        &ctx.default_servers
    } else {
        &connection.servers
    };
    if servers.is_empty() {
        return Err(ValidationError::Missing {
            field: "servers",
            condition: "NATS_SERVERS is not configured",
        }
        .into());
    }

    let credentials = match &connection.credentials_secret {
        Some(secret) => {
            let namespace = resource.namespace().unwrap_or_default();
            Some(ctx.secrets.credentials(&namespace, secret).await?)
        }
        None => None,
    };

    let options = ConnectOptions {
        servers,
        credentials: credentials.as_ref().map(|c| c.as_bytes()),
    };
    let result = tokio::time::timeout(ctx.broker_timeout, connector.connect(&options)).await;
    drop(credentials);

    match result {
        Ok(Ok(client)) => Ok(Session::new(client, ctx.broker_timeout)),
        Ok(Err(e)) => Err(ReconcileError::Connect(e)),
        Err(_elapsed) => Err(ReconcileError::Timeout {
            operation: "connect",
            timeout: ctx.broker_timeout,
        }),
    }
}

/// Upsert `condition` (and on success the broker state) and persist the
/// status, skipping the write when nothing changed
async fn write_status<K: ManagedResource>(
    store: &dyn ObjectStore<K>,
    ctx: &Context,
    resource: &K,
    condition: Condition,
    broker_state: Option<BrokerState>,
) -> Result<(), StoreError> {
    let mut next = resource.resource_status().cloned().unwrap_or_default();
    next.conditions = upsert_condition(next.conditions, condition, ctx.condition_policy);
    if let Some(state) = broker_state {
        next.broker_state = Some(state);
        next.observed_generation = resource.meta().generation;
    }

    if resource.resource_status() == Some(&next) {
        debug!("Status unchanged, skipping write");
        metrics::increment_status_writes_skipped(K::KIND_LABEL);
        return Ok(());
    }

    let mut updated = resource.clone();
    *updated.resource_status_mut() = Some(next);
    store.update_status(&updated).await?;
    Ok(())
}

/// Record `Ready=False`; a failed status write is logged, the original error wins
async fn record_failure<K: ManagedResource>(
    store: &dyn ObjectStore<K>,
    ctx: &Context,
    resource: &K,
    reason: &str,
    error: &ReconcileError,
) {
    let condition = build_condition(
        CONDITION_READY,
        ConditionStatus::False,
        reason,
        &error.to_string(),
    );
    if let Err(e) = write_status(store, ctx, resource, condition, None).await {
        warn!("Failed to record {} condition: {}", reason, e);
    }
}

/// Mark a resource whose key was dropped after too many failures
pub async fn surface_exhausted<S: Syncer>(
    syncer: &S,
    ctx: &Context,
    namespace: &str,
    name: &str,
    max_retries: u32,
    error: &ReconcileError,
) -> Result<(), StoreError> {
    let store = syncer.store(ctx);
    let Some(resource) = store.get(namespace, name).await? else {
        return Ok(());
    };
    let condition = build_condition(
        CONDITION_READY,
        ConditionStatus::False,
        REASON_RETRIES_EXHAUSTED,
        &format!("giving up after {max_retries} retries: {error}"),
    );
    write_status(store, ctx, &resource, condition, None).await
}
