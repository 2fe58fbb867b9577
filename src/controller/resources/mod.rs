//! Kubernetes resource builders and apply helpers
//!
//! Each component module builds the child objects (StatefulSets,
//! Deployments, Services) for its custom resource as pure functions; the
//! reconcilers pass the built objects through the server-side-apply helpers
//! here. Builders never talk to the API server, which keeps pod synthesis
//! unit-testable.
//!
//! Pod templates carry a hash of the inputs that affect container
//! configuration under the `optimism.io/config-hash` annotation, so a
//! config change rolls the pods even when the object diff alone would not.

pub mod batcher;
pub mod challenger;
pub mod node;
pub mod proposer;

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::crd::types::ResourceRequirements;
use crate::error::{Error, Result};

/// Field manager for all server-side-apply patches
pub const FIELD_MANAGER: &str = "optimism-operator";

/// Pod-template annotation carrying the config hash
pub const CONFIG_HASH_ANNOTATION: &str = "optimism.io/config-hash";

/// Standard labels for all child resources of a component
pub fn standard_labels(instance: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        format!("op-{component}"),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), instance.to_string());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// OwnerReference pointing at the managing custom resource, for garbage
/// collection of children.
pub fn owner_reference<K>(obj: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn resource_name(owner: &str, suffix: &str) -> String {
    format!("{owner}-{suffix}")
}

/// Hash of the configuration inputs that shape a pod template. Stamped on
/// the template so kube rolls the pods when the hash changes.
pub fn config_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(&digest[..16]))
}

/// Convert the CRD resource block into the k8s-openapi shape
pub fn to_k8s_resources(
    resources: &ResourceRequirements,
) -> k8s_openapi::api::core::v1::ResourceRequirements {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(resources.requests.cpu.clone()));
    requests.insert(
        "memory".to_string(),
        Quantity(resources.requests.memory.clone()),
    );

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(resources.limits.cpu.clone()));
    limits.insert(
        "memory".to_string(),
        Quantity(resources.limits.memory.clone()),
    );

    k8s_openapi::api::core::v1::ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

/// Server-side apply for any namespaced child object
pub async fn apply<K>(client: &Client, namespace: &str, obj: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let name = obj.name_any();
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await?;
    Ok(())
}

/// Delete the PVCs a StatefulSet's volumeClaimTemplates left behind. Only
/// called on cleanup when the retention policy is Delete.
pub async fn delete_pvcs_matching(
    client: &Client,
    namespace: &str,
    instance: &str,
) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let selector = format!("app.kubernetes.io/instance={instance}");
    let pvcs = api.list(&ListParams::default().labels(&selector)).await?;

    for pvc in pvcs {
        let name = pvc.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!(pvc = %name, "deleted retained volume claim"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_labels() {
        let labels = standard_labels("seq-0", "node");
        assert_eq!(labels["app.kubernetes.io/name"], "op-node");
        assert_eq!(labels["app.kubernetes.io/instance"], "seq-0");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "optimism-operator");
    }

    #[test]
    fn test_config_hash_is_stable_and_sensitive() {
        let a = config_hash(&serde_json::json!({"port": 8545})).unwrap();
        let b = config_hash(&serde_json::json!({"port": 8545})).unwrap();
        let c = config_hash(&serde_json::json!({"port": 8546})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_resource_conversion() {
        let converted = to_k8s_resources(&ResourceRequirements::default());
        let requests = converted.requests.unwrap();
        assert_eq!(requests["cpu"].0, "500m");
        assert_eq!(requests["memory"].0, "1Gi");
        let limits = converted.limits.unwrap();
        assert_eq!(limits["cpu"].0, "2");
    }
}
