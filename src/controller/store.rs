//! # Object Store
//!
//! Read and write access to the managed resources.
//!
//! Writes are compare-and-swap: they carry the `resourceVersion` the caller
//! read, and a stale version fails with [`StoreError::Conflict`] so the pass
//! can be retried against fresh data.

use crate::constants::FIELD_MANAGER;
use crate::crd::ManagedResource;
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::runtime::reflector::Store;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The object changed since it was read
    #[error("conflict writing {key}: object was modified")]
    Conflict { key: String },

    #[error("{key} not found")]
    NotFound { key: String },

    #[error("kubernetes API error for {key}: {message}")]
    Api { key: String, message: String },

    #[error("failed to serialize {key}: {message}")]
    Serialization { key: String, message: String },
}

/// Access to resources of kind `K`
#[async_trait]
pub trait ObjectStore<K: ManagedResource>: Send + Sync {
    /// Look up an object; `Ok(None)` when it no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError>;

    /// Persist the object's finalizers
    async fn update(&self, object: &K) -> Result<K, StoreError>;

    /// Persist the object's status
    async fn update_status(&self, object: &K) -> Result<K, StoreError>;
}

fn map_kube_error(key: String, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(e) if e.code == 409 => StoreError::Conflict { key },
        kube::Error::Api(e) if e.code == 404 => StoreError::NotFound { key },
        other => StoreError::Api {
            key,
            message: other.to_string(),
        },
    }
}

/// Gets objects from the API, lists from the watch cache, writes merge
/// patches through the API
///
/// A single object is always read live: the pass that follows our own
/// finalizer patch must see it, and the watch cache may still be behind.
pub struct KubeStore<K: ManagedResource> {
    client: Client,
    reader: Store<K>,
}

impl<K: ManagedResource> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client, reader: Store<K>) -> Self {
        Self { client, reader }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl<K: ManagedResource> fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &K::KIND_LABEL)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(format!("{namespace}/{name}"), e))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        Ok(self
            .reader
            .state()
            .into_iter()
            .filter(|object| object.namespace().as_deref() == Some(namespace))
            .map(|object| (*object).clone())
            .collect())
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let namespace = object.namespace().unwrap_or_default();
        let patch = json!({
            "metadata": {
                "finalizers": object.finalizers(),
                "resourceVersion": object.resource_version(),
            }
        });
        self.api(&namespace)
            .patch(
                &object.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| map_kube_error(object.key(), e))
    }

    async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let namespace = object.namespace().unwrap_or_default();
        let patch = json!({
            "metadata": {
                "resourceVersion": object.resource_version(),
            },
            "status": object.resource_status(),
        });
        self.api(&namespace)
            .patch_status(
                &object.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| map_kube_error(object.key(), e))
    }
}

/// In-process store with the same compare-and-swap and finalization rules
/// as the API server
pub struct MemoryStore<K: ManagedResource> {
    objects: Mutex<BTreeMap<String, K>>,
    next_version: Mutex<u64>,
    writes: Mutex<Vec<String>>,
}

impl<K: ManagedResource> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            next_version: Mutex::new(1),
            writes: Mutex::new(Vec::new()),
        }
    }
}

impl<K: ManagedResource> fmt::Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &K::KIND_LABEL)
            .field("objects", &self.objects().len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: ManagedResource> MemoryStore<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, object: &mut K) {
        let mut next = lock(&self.next_version);
        object.meta_mut().resource_version = Some(next.to_string());
        *next += 1;
    }

    /// Create or replace an object as a user would, bumping its generation
    pub fn apply(&self, mut object: K) -> K {
        let key = object.key();
        let mut objects = lock(&self.objects);
        let generation = objects
            .get(&key)
            .and_then(|existing| existing.meta().generation)
            .unwrap_or(0);
        if let Some(existing) = objects.get(&key) {
            // Users do not own these fields
            object.meta_mut().finalizers = existing.meta().finalizers.clone();
            object.meta_mut().deletion_timestamp = existing.meta().deletion_timestamp.clone();
            *object.resource_status_mut() = existing.resource_status().cloned();
        }
        object.meta_mut().generation = Some(generation + 1);
        self.bump(&mut object);
        objects.insert(key, object.clone());
        object
    }

    /// Request deletion: the object goes away once its finalizers are cleared
    pub fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = format!("{namespace}/{name}");
        let timestamp = serde_json::from_value(json!(chrono::Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
        .map_err(|e| StoreError::Serialization {
            key: key.clone(),
            message: e.to_string(),
        })?;

        let mut objects = lock(&self.objects);
        let Some(object) = objects.get_mut(&key) else {
            return Err(StoreError::NotFound { key });
        };
        if object.finalizers().is_empty() {
            objects.remove(&key);
            return Ok(());
        }
        if object.meta().deletion_timestamp.is_none() {
            object.meta_mut().deletion_timestamp = Some(timestamp);
            let mut updated = object.clone();
            self.bump(&mut updated);
            objects.insert(key, updated);
        }
        Ok(())
    }

    /// Snapshot of every stored object
    #[must_use]
    pub fn objects(&self) -> Vec<K> {
        lock(&self.objects).values().cloned().collect()
    }

    /// Writes performed so far, e.g. `"update default/orders"`
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    fn check_version(existing: &K, object: &K, key: &str) -> Result<(), StoreError> {
        match object.resource_version() {
            Some(version) if existing.resource_version().as_deref() != Some(version.as_str()) => {
                Err(StoreError::Conflict {
                    key: key.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(lock(&self.objects).get(&format!("{namespace}/{name}")).cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        Ok(lock(&self.objects)
            .values()
            .filter(|object| object.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let key = object.key();
        let mut objects = lock(&self.objects);
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        Self::check_version(existing, object, &key)?;

        let mut updated = existing.clone();
        updated.meta_mut().finalizers = object.meta().finalizers.clone();
        self.bump(&mut updated);
        lock(&self.writes).push(format!("update {key}"));

        if updated.is_deleting() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let key = object.key();
        let mut objects = lock(&self.objects);
        let existing = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        Self::check_version(existing, object, &key)?;

        *existing.resource_status_mut() = object.resource_status().cloned();
        let mut updated = existing.clone();
        self.bump(&mut updated);
        *existing = updated.clone();
        lock(&self.writes).push(format!("update_status {key}"));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ResourceStatus, Stream, StreamSpec, STREAM_FINALIZER};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use kube::runtime::reflector;

    fn stream(name: &str) -> Stream {
        let mut stream = Stream::new(name, StreamSpec::default());
        stream.metadata.namespace = Some("default".to_string());
        stream
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_and_keeps_controller_fields() {
        let store = MemoryStore::new();
        let created = store.apply(stream("orders"));
        assert_eq!(created.metadata.generation, Some(1));

        let mut with_finalizer = created.clone();
        with_finalizer.metadata.finalizers = Some(vec!["f".to_string()]);
        store.update(&with_finalizer).await.unwrap();

        let edited = store.apply(stream("orders"));
        assert_eq!(edited.metadata.generation, Some(2));
        assert_eq!(edited.finalizers(), ["f".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MemoryStore::new();
        let created = store.apply(stream("orders"));
        let mut first = created.clone();
        first.status = Some(ResourceStatus::default());
        store.update_status(&first).await.unwrap();

        let err = store.update_status(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_does_not_touch_status() {
        let store = MemoryStore::new();
        let created = store.apply(stream("orders"));
        let mut object = created.clone();
        object.status = Some(ResourceStatus {
            observed_generation: Some(7),
            ..ResourceStatus::default()
        });
        let updated = store.update(&object).await.unwrap();
        assert!(updated.status.is_none());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut object = store.apply(stream("orders"));
        object.metadata.finalizers = Some(vec!["f".to_string()]);
        store.update(&object).await.unwrap();

        store.delete("default", "orders").unwrap();
        let deleting = store.get("default", "orders").await.unwrap().unwrap();
        assert!(deleting.is_deleting());

        let mut cleared = deleting.clone();
        cleared.metadata.finalizers = Some(Vec::new());
        store.update(&cleared).await.unwrap();
        assert!(store.get("default", "orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_removes_immediately() {
        let store = MemoryStore::new();
        store.apply(stream("orders"));
        store.delete("default", "orders").unwrap();
        assert!(store.objects().is_empty());
        assert!(store.delete("default", "orders").is_err());
    }

    async fn serve_stream(Path(name): Path<String>) -> (StatusCode, Json<serde_json::Value>) {
        if name != "orders" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "kind": "Status",
                    "apiVersion": "v1",
                    "status": "Failure",
                    "message": format!("streams.jetstream.nats.io \"{name}\" not found"),
                    "reason": "NotFound",
                    "code": 404,
                })),
            );
        }
        let mut object = stream("orders");
        object.metadata.resource_version = Some("42".to_string());
        object.metadata.finalizers = Some(vec![STREAM_FINALIZER.to_string()]);
        (StatusCode::OK, Json(serde_json::to_value(&object).unwrap()))
    }

    async fn api_client() -> Client {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let app = Router::new().route(
            "/apis/jetstream.nats.io/v1/namespaces/default/streams/{name}",
            get(serve_stream),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let config = kube::Config::new(format!("http://{addr}").parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn test_kube_store_get_reads_past_an_empty_cache() {
        // The reader is never fed, like a cache that has not caught up yet
        let (reader, _writer) = reflector::store::<Stream>();
        let store = KubeStore::new(api_client().await, reader);

        let object = store.get("default", "orders").await.unwrap().unwrap();
        assert_eq!(object.resource_version().as_deref(), Some("42"));
        assert_eq!(object.finalizers(), [STREAM_FINALIZER.to_string()]);

        assert!(store.get("default", "missing").await.unwrap().is_none());
    }
}
