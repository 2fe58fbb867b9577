//! Pod synthesis for OpBatcher
//!
//! The batcher is stateless, so it runs as a single-replica Deployment.
//! Its signing key is injected from the user-supplied wallet Secret as an
//! environment variable; the reconciler only verifies the key exists.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::controller::resources::{
    config_hash, owner_reference, standard_labels, to_k8s_resources, CONFIG_HASH_ANNOTATION,
};
use crate::crd::{OpBatcher, OptimismNetwork};
use crate::error::Result;

/// Inputs beyond the OpBatcher itself that shape its pod
pub struct BatcherBuildInput<'a> {
    pub batcher: &'a OpBatcher,
    pub network: &'a OptimismNetwork,
    /// Sequencer execution RPC (L2 blocks to batch)
    pub sequencer_l2_rpc: String,
    /// Sequencer rollup RPC (sync status)
    pub sequencer_rollup_rpc: String,
}

pub fn build_deployment(input: &BatcherBuildInput<'_>) -> Result<Deployment> {
    let batcher = input.batcher;
    let name = batcher.name_any();
    let labels = standard_labels(&name, "batcher");

    let replicas = if batcher.spec.stopped { 0 } else { batcher.spec.replicas };

    let hash = config_hash(&(
        &batcher.spec,
        &input.network.spec.l1_rpc_url,
        &input.sequencer_l2_rpc,
        &input.sequencer_rollup_rpc,
    ))?;
    let mut annotations = BTreeMap::new();
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: batcher.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(batcher)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![batcher_container(input)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn batcher_container(input: &BatcherBuildInput<'_>) -> Container {
    let spec = &input.batcher.spec;

    let mut args = vec![
        format!("--l1-eth-rpc={}", input.network.spec.l1_rpc_url),
        format!("--l2-eth-rpc={}", input.sequencer_l2_rpc),
        format!("--rollup-rpc={}", input.sequencer_rollup_rpc),
        "--rpc.addr=0.0.0.0".to_string(),
        format!("--rpc.port={}", spec.rpc_port),
        format!("--poll-interval={}s", spec.poll_interval_seconds),
        format!("--sub-safety-margin={}", spec.sub_safety_margin),
        format!("--num-confirmations={}", spec.num_confirmations),
    ];
    if spec.max_channel_duration_blocks > 0 {
        args.push(format!(
            "--max-channel-duration={}",
            spec.max_channel_duration_blocks
        ));
    }
    if spec.metrics.enabled {
        args.push("--metrics.enabled".to_string());
        args.push("--metrics.addr=0.0.0.0".to_string());
        args.push(format!("--metrics.port={}", spec.metrics.port));
    }

    let mut ports = vec![ContainerPort {
        name: Some("rpc".to_string()),
        container_port: i32::from(spec.rpc_port),
        ..Default::default()
    }];
    if spec.metrics.enabled {
        ports.push(ContainerPort {
            name: Some("metrics".to_string()),
            container_port: i32::from(spec.metrics.port),
            ..Default::default()
        });
    }

    Container {
        name: "op-batcher".to_string(),
        image: Some(spec.image.clone()),
        args: Some(args),
        ports: Some(ports),
        env: Some(vec![wallet_env_var(
            "OP_BATCHER_PRIVATE_KEY",
            &spec.wallet_secret_ref.name,
            &spec.wallet_secret_ref.key,
        )]),
        resources: Some(to_k8s_resources(&spec.resources)),
        ..Default::default()
    }
}

/// Env var sourced from the wallet Secret; the key value never passes
/// through the operator.
pub(super) fn wallet_env_var(name: &str, secret_name: &str, secret_key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret_name.to_string()),
                key: secret_key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{OpBatcherSpec, OptimismNetworkSpec};

    fn build() -> Deployment {
        let net_spec: OptimismNetworkSpec = serde_json::from_value(serde_json::json!({
            "chainId": 11155420u64,
            "l1ChainId": 11155111u64,
            "l1RpcUrl": "http://l1:8545",
        }))
        .unwrap();
        let network = OptimismNetwork::new("net", net_spec);

        let spec: OpBatcherSpec = serde_json::from_value(serde_json::json!({
            "networkRef": {"name": "net"},
            "sequencerRef": {"name": "seq-0"},
            "walletSecretRef": {"name": "batcher-wallet", "key": "privateKey"},
        }))
        .unwrap();
        let mut batcher = OpBatcher::new("batcher", spec);
        batcher.metadata.namespace = Some("rollup".to_string());
        batcher.metadata.uid = Some("uid-2".to_string());

        build_deployment(&BatcherBuildInput {
            batcher: &batcher,
            network: &network,
            sequencer_l2_rpc: "http://seq-0.rollup.svc.cluster.local:8545".to_string(),
            sequencer_rollup_rpc: "http://seq-0.rollup.svc.cluster.local:9545".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_batcher_points_at_both_sequencer_endpoints() {
        let deployment = build();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"--l2-eth-rpc=http://seq-0.rollup.svc.cluster.local:8545".to_string()));
        assert!(args.contains(&"--rollup-rpc=http://seq-0.rollup.svc.cluster.local:9545".to_string()));
        assert!(args.contains(&"--poll-interval=6s".to_string()));
    }

    #[test]
    fn test_wallet_key_injected_by_reference_only() {
        let deployment = build();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let env = &container.env.as_ref().unwrap()[0];
        assert_eq!(env.name, "OP_BATCHER_PRIVATE_KEY");
        assert!(env.value.is_none(), "value must come from the secret ref");
        let selector = env
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name.as_deref(), Some("batcher-wallet"));
        assert_eq!(selector.key, "privateKey");
    }

    #[test]
    fn test_unbounded_channel_duration_omits_flag() {
        let deployment = build();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert!(!container
            .args
            .as_ref()
            .unwrap()
            .iter()
            .any(|a| a.starts_with("--max-channel-duration")));
    }
}
