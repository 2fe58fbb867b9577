//! Pod synthesis for OpChallenger
//!
//! The challenger keeps proof material in a persistent datadir, so it runs
//! as a single-replica StatefulSet with a volumeClaimTemplate. It always
//! targets the dispute-game factory; a network without one cannot host a
//! challenger.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::controller::discovery::contracts;
use crate::controller::resources::{
    batcher::wallet_env_var, config_hash, owner_reference, standard_labels, to_k8s_resources,
    CONFIG_HASH_ANNOTATION,
};
use crate::crd::types::AddressSet;
use crate::crd::{OpChallenger, OptimismNetwork};
use crate::error::{Error, Result};

const DATA_DIR: &str = "/data";

/// Inputs beyond the OpChallenger itself that shape its pod
pub struct ChallengerBuildInput<'a> {
    pub challenger: &'a OpChallenger,
    pub network: &'a OptimismNetwork,
    pub addresses: &'a AddressSet,
    /// Sequencer rollup RPC (claims are validated against it)
    pub sequencer_rollup_rpc: String,
}

/// The dispute-game factory address; required for a challenger to exist
pub fn game_factory_address(addresses: &AddressSet) -> Result<String> {
    addresses
        .get(contracts::DISPUTE_GAME_FACTORY)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::DiscoveryError(format!(
                "address set (via {}) has no {}; this network cannot run a challenger",
                addresses.discovery_method,
                contracts::DISPUTE_GAME_FACTORY
            ))
        })
}

pub fn build_stateful_set(input: &ChallengerBuildInput<'_>) -> Result<StatefulSet> {
    let challenger = input.challenger;
    let name = challenger.name_any();
    let labels = standard_labels(&name, "challenger");

    let replicas = if challenger.spec.stopped { 0 } else { 1 };

    let factory = game_factory_address(input.addresses)?;

    let hash = config_hash(&(
        &challenger.spec,
        &input.network.spec.l1_rpc_url,
        &input.sequencer_rollup_rpc,
        &factory,
    ))?;
    let mut annotations = BTreeMap::new();
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash);

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: challenger.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(challenger)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: name.clone(),
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
                    containers: vec![challenger_container(input, &factory)],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_claim_template(challenger)]),
            ..Default::default()
        }),
        status: None,
    })
}

fn challenger_container(input: &ChallengerBuildInput<'_>, factory: &str) -> Container {
    let spec = &input.challenger.spec;

    let mut args = vec![
        format!("--l1-eth-rpc={}", input.network.spec.l1_rpc_url),
        format!("--rollup-rpc={}", input.sequencer_rollup_rpc),
        format!("--game-factory-address={factory}"),
        format!("--datadir={DATA_DIR}"),
        "--trace-type=permissioned".to_string(),
    ];
    if let Some(beacon) = &input.network.spec.l1_beacon_url {
        args.push(format!("--l1-beacon={beacon}"));
    }
    if spec.metrics.enabled {
        args.push("--metrics.enabled".to_string());
        args.push("--metrics.addr=0.0.0.0".to_string());
        args.push(format!("--metrics.port={}", spec.metrics.port));
    }

    let ports = if spec.metrics.enabled {
        Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: i32::from(spec.metrics.port),
            ..Default::default()
        }])
    } else {
        None
    };

    Container {
        name: "op-challenger".to_string(),
        image: Some(spec.image.clone()),
        args: Some(args),
        ports,
        env: Some(vec![wallet_env_var(
            "OP_CHALLENGER_PRIVATE_KEY",
            &spec.wallet_secret_ref.name,
            &spec.wallet_secret_ref.key,
        )]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        }]),
        resources: Some(to_k8s_resources(&spec.resources)),
        ..Default::default()
    }
}

fn data_claim_template(challenger: &OpChallenger) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(challenger.spec.storage.size.clone()),
    );

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            labels: Some(standard_labels(&challenger.name_any(), "challenger")),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(challenger.spec.storage.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
