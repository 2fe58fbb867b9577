//! Credential synthesis for rollup nodes
//!
//! An [`crate::crd::OpNode`] needs two credentials that the user never has
//! to provide:
//!
//! - a JWT bearer token shared by op-node and op-geth over the authrpc port
//! - a stable P2P identity key for op-node
//!
//! Both are synthesized on first reconcile as Kubernetes Secrets owned by
//! the node. Existence is checked before creation and an existing Secret is
//! never overwritten, so a credential stays stable for the life of the node
//! and pods can restart without re-handshaking.
//!
//! # Security guarantees
//!
//! - Secret values are generated, written, and immediately dropped; they
//!   are never logged or stored in status.
//! - Log messages and errors reference secret names and keys only.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use rand::RngCore;
use std::collections::BTreeMap;
use tracing::info;

use crate::controller::resources::resource_name;
use crate::crd::types::ConfigSourceRef;
use crate::crd::OpNode;
use crate::error::{Error, Result};

/// Which generated credential a Secret holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    /// Shared authrpc token for the op-node / op-geth pair
    Jwt,
    /// op-node P2P identity private key
    P2pKey,
}

impl CredentialKind {
    /// Suffix appended to the owning node's name to form the Secret name
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Jwt => "jwt",
            Self::P2pKey => "p2p",
        }
    }

    /// Key under which the value is stored inside the Secret
    pub fn key(&self) -> &'static str {
        match self {
            Self::Jwt => "jwt-secret",
            Self::P2pKey => "p2p-key",
        }
    }

    pub fn secret_name(&self, node_name: &str) -> String {
        resource_name(node_name, self.suffix())
    }
}

/// 32 random bytes, hex-encoded without a 0x prefix. Both op-geth's JWT
/// secret file and op-node's P2P key file expect this format.
fn generate_credential() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// What to do about one credential Secret given what exists in the cluster
enum CredentialAction {
    UseExisting,
    Create(Secret),
}

/// An existing Secret always stands, whatever its content; a fresh value is
/// only generated when nothing is there.
fn plan_credential(
    existing: Option<&Secret>,
    node: &OpNode,
    secret_name: &str,
    kind: CredentialKind,
) -> CredentialAction {
    match existing {
        Some(_) => CredentialAction::UseExisting,
        None => CredentialAction::Create(build_credential_secret(node, secret_name, kind)),
    }
}

/// Ensure the Secret for one credential exists, creating it with an owner
/// reference on first sight. Never mutates an existing Secret.
///
/// Returns the Secret name for the pod builder.
pub async fn ensure_generated_secret(
    client: &Client,
    node: &OpNode,
    kind: CredentialKind,
) -> Result<String> {
    let namespace = node.namespace().unwrap_or_else(|| "default".to_string());
    let node_name = node.name_any();
    let secret_name = kind.secret_name(&node_name);

    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    match plan_credential(api.get_opt(&secret_name).await?.as_ref(), node, &secret_name, kind) {
        CredentialAction::UseExisting => Ok(secret_name),
        CredentialAction::Create(secret) => {
            match api.create(&PostParams::default(), &secret).await {
                Ok(_) => {
                    info!(
                        node = %node_name,
                        secret = %secret_name,
                        kind = ?kind,
                        "generated credential secret"
                    );
                    Ok(secret_name)
                }
                // A concurrent reconcile won the race; the existing value stands.
                Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(secret_name),
                Err(e) => Err(Error::KubeError(e)),
            }
        }
    }
}

fn build_credential_secret(node: &OpNode, secret_name: &str, kind: CredentialKind) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(kind.key().to_string(), generate_credential());

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: node.namespace(),
            owner_references: Some(vec![owner_reference(node)]),
            labels: Some(
                [(
                    "app.kubernetes.io/managed-by".to_string(),
                    "optimism-operator".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    }
}

fn owner_reference(node: &OpNode) -> OwnerReference {
    OwnerReference {
        api_version: "optimism.io/v1alpha1".to_string(),
        kind: "OpNode".to_string(),
        name: node.name_any(),
        uid: node.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Check a referenced Secret key exists without reading its value into the
/// reconciler. Used for wallet keys and rollup config inputs that only the
/// pod should consume; a missing Secret or key surfaces as
/// [`Error::SecretKeyMissing`] so the status message names exactly what to
/// create.
pub async fn verify_secret_key(
    client: &Client,
    namespace: &str,
    source: &ConfigSourceRef,
) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let secret = api.get_opt(&source.name).await?.ok_or_else(|| {
        Error::SecretKeyMissing {
            name: source.name.clone(),
            key: source.key.clone(),
        }
    })?;

    let has_key = secret
        .data
        .as_ref()
        .map(|d| d.contains_key(&source.key))
        .unwrap_or(false)
        || secret
            .string_data
            .as_ref()
            .map(|d| d.contains_key(&source.key))
            .unwrap_or(false);

    if has_key {
        Ok(())
    } else {
        Err(Error::SecretKeyMissing {
            name: source.name.clone(),
            key: source.key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> OpNode {
        let spec: crate::crd::OpNodeSpec = serde_json::from_value(serde_json::json!({
            "networkRef": {"name": "op-sepolia"}
        }))
        .unwrap();
        let mut node = OpNode::new("seq-0", spec);
        node.metadata.namespace = Some("rollup".to_string());
        node.metadata.uid = Some("abc-123".to_string());
        node
    }

    #[test]
    fn test_credential_is_32_bytes_hex() {
        let value = generate_credential();
        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(value, generate_credential());
    }

    #[test]
    fn test_secret_naming() {
        assert_eq!(CredentialKind::Jwt.secret_name("seq-0"), "seq-0-jwt");
        assert_eq!(CredentialKind::P2pKey.secret_name("seq-0"), "seq-0-p2p");
        assert_eq!(CredentialKind::Jwt.key(), "jwt-secret");
        assert_eq!(CredentialKind::P2pKey.key(), "p2p-key");
    }

    #[test]
    fn test_existing_secret_is_never_replaced() {
        let node = test_node();
        let existing = Secret {
            metadata: ObjectMeta {
                name: Some("seq-0-jwt".to_string()),
                ..Default::default()
            },
            // Content the current code would not generate; it must stand.
            string_data: Some(
                [("jwt-secret".to_string(), "old-value".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };

        let action = plan_credential(Some(&existing), &node, "seq-0-jwt", CredentialKind::Jwt);
        assert!(matches!(action, CredentialAction::UseExisting));
    }

    #[test]
    fn test_absent_secret_is_created_with_fresh_value() {
        let node = test_node();
        let action = plan_credential(None, &node, "seq-0-p2p", CredentialKind::P2pKey);
        match action {
            CredentialAction::Create(secret) => {
                assert_eq!(secret.metadata.name.as_deref(), Some("seq-0-p2p"));
                let data = secret.string_data.unwrap();
                assert_eq!(data.get("p2p-key").unwrap().len(), 64);
            }
            CredentialAction::UseExisting => panic!("expected a create"),
        }
    }

    #[test]
    fn test_built_secret_is_owned_by_node() {
        let node = test_node();
        let secret = build_credential_secret(&node, "seq-0-jwt", CredentialKind::Jwt);

        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "OpNode");
        assert_eq!(owners[0].name, "seq-0");
        assert_eq!(owners[0].uid, "abc-123");
        assert_eq!(owners[0].controller, Some(true));

        let data = secret.string_data.unwrap();
        assert!(data.contains_key("jwt-secret"));
    }
}
