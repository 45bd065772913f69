//! # Connection Settings
//!
//! Broker connection settings carried by every managed resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where and how to reach the broker for a resource
///
/// An empty server list falls back to the controller-wide `NATS_SERVERS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Broker URLs, e.g. `nats://nats.nats-system:4222`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
    /// Secret holding a NATS credentials file (JWT + seed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<CredentialsSecretRef>,
}

/// Reference to a key of a Secret in the resource's namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSecretRef {
    pub name: String,
    #[serde(default = "default_credentials_key")]
    pub key: String,
}

fn default_credentials_key() -> String {
    "nats.creds".to_string()
}
