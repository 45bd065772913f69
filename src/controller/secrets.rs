//! # Secrets
//!
//! Loading broker credentials from Kubernetes Secrets and wiping them after use.
//!
//! Credentials are held in a [`CredentialBuffer`], which overwrites its bytes
//! when dropped. Every other value of the Secret that was read is wiped as
//! soon as the requested key has been extracted.

use crate::crd::CredentialsSecretRef;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{compiler_fence, Ordering};
use thiserror::Error;
use tracing::debug;

/// Byte written over credentials once they are no longer needed
pub const WIPE_FILLER: u8 = b'x';

/// Overwrite every byte of `buffer` with [`WIPE_FILLER`]
///
/// Volatile writes keep the compiler from eliding the stores on a buffer
/// that is about to be freed.
pub fn wipe(buffer: &mut [u8]) {
    for byte in buffer.iter_mut() {
        // SAFETY: `byte` is a valid, aligned and exclusive reference into `buffer`.
        // Hand-rolled rather than `zeroize`, which can only write zeros while
        // wiped credentials must read back as `WIPE_FILLER`.
        unsafe { std::ptr::write_volatile(byte, WIPE_FILLER) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Credential bytes that are wiped on drop
pub struct CredentialBuffer {
    bytes: Vec<u8>,
}

impl CredentialBuffer {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for CredentialBuffer {
    fn drop(&mut self) {
        wipe(&mut self.bytes);
    }
}

impl fmt::Debug for CredentialBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBuffer(<{} bytes redacted>)", self.bytes.len())
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} has no key {key:?}")]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("failed to read secret {namespace}/{name}: {message}")]
    Api {
        namespace: String,
        name: String,
        message: String,
    },
}

/// Source of broker credentials
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn credentials(
        &self,
        namespace: &str,
        secret: &CredentialsSecretRef,
    ) -> Result<CredentialBuffer, CredentialsError>;
}

/// Take `key` out of `data` and wipe everything else
fn extract(
    mut data: BTreeMap<String, Vec<u8>>,
    namespace: &str,
    secret: &CredentialsSecretRef,
) -> Result<CredentialBuffer, CredentialsError> {
    let wanted = data.remove(&secret.key);
    for value in data.values_mut() {
        wipe(value);
    }
    wanted
        .map(CredentialBuffer::new)
        .ok_or_else(|| CredentialsError::MissingKey {
            namespace: namespace.to_string(),
            name: secret.name.clone(),
            key: secret.key.clone(),
        })
}

/// Reads credentials from the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretSource {
    client: Client,
}

impl KubeSecretSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for KubeSecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSecretSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretSource for KubeSecretSource {
    async fn credentials(
        &self,
        namespace: &str,
        secret: &CredentialsSecretRef,
    ) -> Result<CredentialBuffer, CredentialsError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let object = match api.get(&secret.name).await {
            Ok(object) => object,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(CredentialsError::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: secret.name.clone(),
                });
            }
            Err(e) => {
                return Err(CredentialsError::Api {
                    namespace: namespace.to_string(),
                    name: secret.name.clone(),
                    message: e.to_string(),
                });
            }
        };
        debug!("Loaded credentials secret {}/{}", namespace, secret.name);

        let data = object
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect();
        extract(data, namespace, secret)
    }
}

/// Fixed set of secrets, keyed by `namespace/name`
#[derive(Debug, Default, Clone)]
pub struct StaticSecretSource {
    secrets: HashMap<String, BTreeMap<String, Vec<u8>>>,
}

impl StaticSecretSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, namespace: &str, name: &str, key: &str, value: &[u8]) -> Self {
        self.secrets
            .entry(format!("{namespace}/{name}"))
            .or_default()
            .insert(key.to_string(), value.to_vec());
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn credentials(
        &self,
        namespace: &str,
        secret: &CredentialsSecretRef,
    ) -> Result<CredentialBuffer, CredentialsError> {
        let data = self
            .secrets
            .get(&format!("{namespace}/{}", secret.name))
            .cloned()
            .ok_or_else(|| CredentialsError::SecretNotFound {
                namespace: namespace.to_string(),
                name: secret.name.clone(),
            })?;
        extract(data, namespace, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_ref(name: &str, key: &str) -> CredentialsSecretRef {
        CredentialsSecretRef {
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_wipe_fills_and_keeps_length() {
        let mut buffer = b"hello".to_vec();
        wipe(&mut buffer);
        assert_eq!(buffer, b"xxxxx");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_wipe_empty_buffer() {
        let mut buffer: Vec<u8> = Vec::new();
        wipe(&mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_extract_wipes_other_values() {
        let mut data = BTreeMap::new();
        data.insert("nats.creds".to_string(), b"creds".to_vec());
        data.insert("other".to_string(), b"secret".to_vec());

        let buffer = extract(data, "default", &secret_ref("nats", "nats.creds")).unwrap();
        assert_eq!(buffer.as_bytes(), b"creds");
    }

    #[test]
    fn test_extract_missing_key() {
        let err = extract(BTreeMap::new(), "default", &secret_ref("nats", "nats.creds")).unwrap_err();
        assert!(matches!(err, CredentialsError::MissingKey { .. }));
    }

    #[test]
    fn test_credential_buffer_debug_is_redacted() {
        let buffer = CredentialBuffer::new(b"SUAKSEED".to_vec());
        let debug = format!("{buffer:?}");
        assert!(!debug.contains("SUAKSEED"));
        assert!(debug.contains("8 bytes"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSecretSource::new().with_secret("default", "nats", "nats.creds", b"creds");
        let buffer = source
            .credentials("default", &secret_ref("nats", "nats.creds"))
            .await
            .unwrap();
        assert_eq!(buffer.len(), 5);

        let err = source
            .credentials("other", &secret_ref("nats", "nats.creds"))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::SecretNotFound { .. }));
    }
}
