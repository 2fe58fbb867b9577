//! Pod synthesis for OpProposer
//!
//! Stateless single-replica Deployment. The proposal target comes from the
//! network's resolved address set: the dispute-game factory when present,
//! otherwise the legacy output oracle.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::controller::discovery::contracts;
use crate::controller::resources::{
    batcher::wallet_env_var, config_hash, owner_reference, standard_labels, to_k8s_resources,
    CONFIG_HASH_ANNOTATION,
};
use crate::crd::types::AddressSet;
use crate::crd::{OpProposer, OptimismNetwork};
use crate::error::{Error, Result};

/// Inputs beyond the OpProposer itself that shape its pod
pub struct ProposerBuildInput<'a> {
    pub proposer: &'a OpProposer,
    pub network: &'a OptimismNetwork,
    pub addresses: &'a AddressSet,
    /// Sequencer rollup RPC (output roots are read from here)
    pub sequencer_rollup_rpc: String,
}

/// Contract the proposer submits to, preferring the dispute-game factory
pub fn proposal_target(addresses: &AddressSet) -> Result<(&'static str, String)> {
    if let Some(addr) = addresses.get(contracts::DISPUTE_GAME_FACTORY) {
        return Ok(("--game-factory-address", addr.to_string()));
    }
    if let Some(addr) = addresses.get(contracts::L2_OUTPUT_ORACLE) {
        return Ok(("--l2oo-address", addr.to_string()));
    }
    Err(Error::DiscoveryError(format!(
        "address set (via {}) has neither {} nor {}",
        addresses.discovery_method,
        contracts::DISPUTE_GAME_FACTORY,
        contracts::L2_OUTPUT_ORACLE
    )))
}

pub fn build_deployment(input: &ProposerBuildInput<'_>) -> Result<Deployment> {
    let proposer = input.proposer;
    let name = proposer.name_any();
    let labels = standard_labels(&name, "proposer");

    let replicas = if proposer.spec.stopped { 0 } else { proposer.spec.replicas };

    let (target_flag, target_addr) = proposal_target(input.addresses)?;

    let hash = config_hash(&(
        &proposer.spec,
        &input.network.spec.l1_rpc_url,
        &input.sequencer_rollup_rpc,
        &target_addr,
    ))?;
    let mut annotations = BTreeMap::new();
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: proposer.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(proposer)]),
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
                    containers: vec![proposer_container(input, target_flag, &target_addr)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn proposer_container(
    input: &ProposerBuildInput<'_>,
    target_flag: &str,
    target_addr: &str,
) -> Container {
    let spec = &input.proposer.spec;

    let mut args = vec![
        format!("--l1-eth-rpc={}", input.network.spec.l1_rpc_url),
        format!("--rollup-rpc={}", input.sequencer_rollup_rpc),
        format!("{target_flag}={target_addr}"),
        "--rpc.addr=0.0.0.0".to_string(),
        format!("--rpc.port={}", spec.rpc_port),
        format!("--poll-interval={}s", spec.poll_interval_seconds),
    ];
    if spec.allow_non_finalized {
        args.push("--allow-non-finalized=true".to_string());
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
        name: "op-proposer".to_string(),
        image: Some(spec.image.clone()),
        args: Some(args),
        ports: Some(ports),
        env: Some(vec![wallet_env_var(
            "OP_PROPOSER_PRIVATE_KEY",
            &spec.wallet_secret_ref.name,
            &spec.wallet_secret_ref.key,
        )]),
        resources: Some(to_k8s_resources(&spec.resources)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{OpProposerSpec, OptimismNetworkSpec};

    fn addresses(entries: &[(&str, &str)]) -> AddressSet {
        AddressSet {
            addresses: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            discovery_method: "manual".to_string(),
            last_discovery_time: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_prefers_dispute_game_factory() {
        let set = addresses(&[
            (contracts::DISPUTE_GAME_FACTORY, "0xaaaa"),
            (contracts::L2_OUTPUT_ORACLE, "0xbbbb"),
        ]);
        let (flag, addr) = proposal_target(&set).unwrap();
        assert_eq!(flag, "--game-factory-address");
        assert_eq!(addr, "0xaaaa");
    }

    #[test]
    fn test_falls_back_to_output_oracle() {
        let set = addresses(&[(contracts::L2_OUTPUT_ORACLE, "0xbbbb")]);
        let (flag, addr) = proposal_target(&set).unwrap();
        assert_eq!(flag, "--l2oo-address");
        assert_eq!(addr, "0xbbbb");
    }

    #[test]
    fn test_no_target_is_an_error() {
        assert!(proposal_target(&addresses(&[])).is_err());
    }

    #[test]
    fn test_deployment_args_carry_target() {
        let net_spec: OptimismNetworkSpec = serde_json::from_value(serde_json::json!({
            "chainId": 11155420u64,
            "l1ChainId": 11155111u64,
            "l1RpcUrl": "http://l1:8545",
        }))
        .unwrap();
        let network = OptimismNetwork::new("net", net_spec);

        let spec: OpProposerSpec = serde_json::from_value(serde_json::json!({
            "networkRef": {"name": "net"},
            "sequencerRef": {"name": "seq-0"},
            "walletSecretRef": {"name": "proposer-wallet", "key": "privateKey"},
        }))
        .unwrap();
        let mut proposer = OpProposer::new("proposer", spec);
        proposer.metadata.namespace = Some("rollup".to_string());

        let deployment = build_deployment(&ProposerBuildInput {
            proposer: &proposer,
            network: &network,
            addresses: &addresses(&[(contracts::DISPUTE_GAME_FACTORY, "0xaaaa")]),
            sequencer_rollup_rpc: "http://seq-0.rollup.svc.cluster.local:9545".to_string(),
        })
        .unwrap();

        let args = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--game-factory-address=0xaaaa".to_string()));
        assert!(!args.contains(&"--allow-non-finalized=true".to_string()));
    }
}
