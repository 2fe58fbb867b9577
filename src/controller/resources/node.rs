//! Pod synthesis for OpNode
//!
//! An OpNode becomes one StatefulSet whose pods run the op-geth execution
//! container and the op-node rollup container side by side, sharing the
//! generated JWT over localhost:8551. Data lives in a volumeClaimTemplate
//! so each pod keeps its chain database across restarts.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, Service, ServicePort, ServiceSpec, TCPSocketAction,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::controller::resources::{
    config_hash, owner_reference, standard_labels, to_k8s_resources, CONFIG_HASH_ANNOTATION,
};
use crate::controller::secrets::CredentialKind;
use crate::crd::{OpNode, OptimismNetwork};
use crate::error::Result;

const DATA_DIR: &str = "/data";
const JWT_MOUNT: &str = "/etc/optimism/jwt";
const P2P_MOUNT: &str = "/etc/optimism/p2p";
const ROLLUP_CONFIG_MOUNT: &str = "/etc/optimism/rollup";
const GENESIS_MOUNT: &str = "/etc/optimism/genesis";

/// Inputs beyond the OpNode itself that shape its pods
pub struct NodeBuildInput<'a> {
    pub node: &'a OpNode,
    pub network: &'a OptimismNetwork,
    /// Sequencer execution RPC for replicas to forward transactions to
    pub sequencer_rpc: Option<String>,
}

/// In-cluster URL of the node's rollup RPC service
pub fn rpc_endpoint(node: &OpNode, namespace: &str) -> String {
    format!(
        "http://{}.{namespace}.svc.cluster.local:{}",
        node.name_any(),
        node.spec.rpc.port
    )
}

/// In-cluster URL of the node's execution RPC service
pub fn execution_endpoint(node: &OpNode, namespace: &str) -> String {
    format!(
        "http://{}.{namespace}.svc.cluster.local:{}",
        node.name_any(),
        node.spec.execution.http_port
    )
}

pub fn build_stateful_set(input: &NodeBuildInput<'_>) -> Result<StatefulSet> {
    let node = input.node;
    let name = node.name_any();
    let labels = standard_labels(&name, "node");

    let replicas = if node.spec.stopped { 0 } else { node.spec.replicas };

    // Roll the pods whenever anything the containers read changes.
    let hash = config_hash(&(&node.spec, &input.network.spec, &input.sequencer_rpc))?;
    let mut annotations = BTreeMap::new();
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash);

    let mut volumes = vec![
        secret_volume("jwt", &CredentialKind::Jwt.secret_name(&name)),
        secret_volume("p2p", &CredentialKind::P2pKey.secret_name(&name)),
    ];
    if let Some(source) = &input.network.spec.rollup_config_ref {
        volumes.push(secret_volume("rollup-config", &source.name));
    }
    if let Some(source) = &input.network.spec.genesis_ref {
        volumes.push(secret_volume("genesis", &source.name));
    }

    let mut init_containers = Vec::new();
    if let Some(source) = &input.network.spec.genesis_ref {
        init_containers.push(genesis_init_container(node, &source.key));
    }

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: node.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(node)]),
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
                    labels: Some(labels.clone()),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    containers: vec![geth_container(input), op_node_container(input)],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_claim_template(node)]),
            ..Default::default()
        }),
        status: None,
    })
}

/// ClusterIP Service exposing the node's RPC surfaces under the node name
pub fn build_service(node: &OpNode) -> Service {
    let name = node.name_any();
    let labels = standard_labels(&name, "node");

    let mut ports = vec![
        service_port("http", node.spec.execution.http_port),
        service_port("ws", node.spec.execution.ws_port),
    ];
    if node.spec.rpc.enabled {
        ports.push(service_port("rollup-rpc", node.spec.rpc.port));
    }
    if node.spec.p2p.enabled {
        let mut p2p_tcp = service_port("p2p-tcp", node.spec.p2p.port);
        p2p_tcp.protocol = Some("TCP".to_string());
        let mut p2p_udp = service_port("p2p-udp", node.spec.p2p.port);
        p2p_udp.protocol = Some("UDP".to_string());
        ports.push(p2p_tcp);
        ports.push(p2p_udp);
    }
    if node.spec.metrics.enabled {
        ports.push(service_port("metrics", node.spec.metrics.port));
    }

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: node.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

fn geth_container(input: &NodeBuildInput<'_>) -> Container {
    let node = input.node;
    let exec = &node.spec.execution;

    let mut args = vec![
        format!("--datadir={DATA_DIR}"),
        "--http".to_string(),
        "--http.addr=0.0.0.0".to_string(),
        format!("--http.port={}", exec.http_port),
        "--http.vhosts=*".to_string(),
        "--http.corsdomain=*".to_string(),
        "--http.api=web3,eth,net,debug,txpool".to_string(),
        "--ws".to_string(),
        "--ws.addr=0.0.0.0".to_string(),
        format!("--ws.port={}", exec.ws_port),
        "--ws.origins=*".to_string(),
        "--authrpc.addr=0.0.0.0".to_string(),
        format!("--authrpc.port={}", exec.auth_rpc_port),
        "--authrpc.vhosts=*".to_string(),
        format!("--authrpc.jwtsecret={JWT_MOUNT}/{}", CredentialKind::Jwt.key()),
        "--rollup.disabletxpoolgossip=true".to_string(),
        "--nodiscover".to_string(),
        "--maxpeers=0".to_string(),
    ];

    if let Some(network_name) = &input.network.spec.network_name {
        args.push(format!("--op-network={network_name}"));
    }
    if let Some(sequencer_rpc) = &input.sequencer_rpc {
        // Replicas forward user transactions to the sequencer.
        args.push(format!("--rollup.sequencerhttp={sequencer_rpc}"));
    }
    if node.spec.metrics.enabled {
        args.push("--metrics".to_string());
        args.push("--metrics.addr=0.0.0.0".to_string());
        args.push(format!("--metrics.port={}", node.spec.metrics.port));
    }

    let mut volume_mounts = vec![
        mount("data", DATA_DIR, false),
        mount("jwt", JWT_MOUNT, true),
    ];
    if input.network.spec.genesis_ref.is_some() {
        volume_mounts.push(mount("genesis", GENESIS_MOUNT, true));
    }

    Container {
        name: "op-geth".to_string(),
        image: Some(node.spec.images.op_geth.clone()),
        args: Some(args),
        ports: Some(vec![
            container_port("http", exec.http_port),
            container_port("ws", exec.ws_port),
            container_port("authrpc", exec.auth_rpc_port),
        ]),
        volume_mounts: Some(volume_mounts),
        resources: Some(to_k8s_resources(&node.spec.resources)),
        readiness_probe: Some(tcp_probe(exec.http_port)),
        ..Default::default()
    }
}

fn op_node_container(input: &NodeBuildInput<'_>) -> Container {
    let node = input.node;
    let net = &input.network.spec;

    let mut args = vec![
        format!("--l1={}", net.l1_rpc_url),
        format!("--l2=http://127.0.0.1:{}", node.spec.execution.auth_rpc_port),
        format!("--l2.jwt-secret={JWT_MOUNT}/{}", CredentialKind::Jwt.key()),
        "--rpc.addr=0.0.0.0".to_string(),
        format!("--rpc.port={}", node.spec.rpc.port),
    ];

    match &net.l1_beacon_url {
        Some(beacon) => args.push(format!("--l1.beacon={beacon}")),
        None => args.push("--l1.beacon.ignore=true".to_string()),
    }

    if let Some(network_name) = &net.network_name {
        args.push(format!("--network={network_name}"));
    } else if let Some(source) = &net.rollup_config_ref {
        args.push(format!("--rollup.config={ROLLUP_CONFIG_MOUNT}/{}", source.key));
    }

    if node.spec.is_sequencer() {
        args.push("--sequencer.enabled".to_string());
    }

    if node.spec.p2p.enabled {
        args.push(format!("--p2p.listen.tcp.port={}", node.spec.p2p.port));
        args.push(format!("--p2p.listen.udp.port={}", node.spec.p2p.port));
        args.push(format!("--p2p.priv.path={P2P_MOUNT}/{}", CredentialKind::P2pKey.key()));
        if !node.spec.p2p.discovery_enabled {
            args.push("--p2p.no-discovery".to_string());
        }
        if !node.spec.p2p.static_peers.is_empty() {
            args.push(format!("--p2p.static={}", node.spec.p2p.static_peers.join(",")));
        }
    } else {
        args.push("--p2p.disable".to_string());
    }

    if node.spec.metrics.enabled {
        args.push("--metrics.enabled".to_string());
        args.push("--metrics.addr=0.0.0.0".to_string());
        args.push(format!("--metrics.port={}", node.spec.metrics.port));
    }

    let mut ports = vec![container_port("rollup-rpc", node.spec.rpc.port)];
    if node.spec.p2p.enabled {
        ports.push(container_port("p2p", node.spec.p2p.port));
    }
    if node.spec.metrics.enabled {
        ports.push(container_port("metrics", node.spec.metrics.port));
    }

    let mut volume_mounts = vec![mount("jwt", JWT_MOUNT, true), mount("p2p", P2P_MOUNT, true)];
    if net.rollup_config_ref.is_some() && net.network_name.is_none() {
        volume_mounts.push(mount("rollup-config", ROLLUP_CONFIG_MOUNT, true));
    }

    Container {
        name: "op-node".to_string(),
        image: Some(node.spec.images.op_node.clone()),
        args: Some(args),
        ports: Some(ports),
        volume_mounts: Some(volume_mounts),
        readiness_probe: Some(tcp_probe(node.spec.rpc.port)),
        ..Default::default()
    }
}

/// Runs `geth init` against the mounted genesis once, before the chain
/// database exists.
fn genesis_init_container(node: &OpNode, genesis_key: &str) -> Container {
    Container {
        name: "geth-init".to_string(),
        image: Some(node.spec.images.op_geth.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "test -d {DATA_DIR}/geth || geth init --datadir={DATA_DIR} {GENESIS_MOUNT}/{genesis_key}"
        )]),
        volume_mounts: Some(vec![
            mount("data", DATA_DIR, false),
            mount("genesis", GENESIS_MOUNT, true),
        ]),
        ..Default::default()
    }
}

fn data_claim_template(node: &OpNode) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(node.spec.storage.size.clone()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            labels: Some(standard_labels(&node.name_any(), "node")),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(node.spec.storage.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn container_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(port),
        ..Default::default()
    }
}

fn service_port(name: &str, port: u16) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(port))),
        ..Default::default()
    }
}

fn tcp_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(15),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NodeMode, OpNodeSpec, OptimismNetworkSpec};

    fn test_network() -> OptimismNetwork {
        let spec: OptimismNetworkSpec = serde_json::from_value(serde_json::json!({
            "networkName": "op-sepolia",
            "chainId": 11155420u64,
            "l1ChainId": 11155111u64,
            "l1RpcUrl": "http://l1:8545",
        }))
        .unwrap();
        let mut net = OptimismNetwork::new("op-sepolia", spec);
        net.metadata.namespace = Some("rollup".to_string());
        net
    }

    fn test_node(mode: NodeMode) -> OpNode {
        let spec: OpNodeSpec = serde_json::from_value(serde_json::json!({
            "networkRef": {"name": "op-sepolia"},
            "mode": mode,
            "p2p": {"discoveryEnabled": mode == NodeMode::Replica},
        }))
        .unwrap();
        let mut node = OpNode::new("seq-0", spec);
        node.metadata.namespace = Some("rollup".to_string());
        node.metadata.uid = Some("uid-1".to_string());
        node
    }

    fn args_of<'a>(sts: &'a StatefulSet, container: &str) -> &'a [String] {
        sts.spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == container)
            .unwrap()
            .args
            .as_deref()
            .unwrap()
    }

    #[test]
    fn test_sequencer_gets_sequencer_flag() {
        let network = test_network();
        let node = test_node(NodeMode::Sequencer);
        let sts = build_stateful_set(&NodeBuildInput {
            node: &node,
            network: &network,
            sequencer_rpc: None,
        })
        .unwrap();

        let args = args_of(&sts, "op-node");
        assert!(args.contains(&"--sequencer.enabled".to_string()));
        assert!(args.contains(&"--p2p.no-discovery".to_string()));
        assert!(args.contains(&"--network=op-sepolia".to_string()));
    }

    #[test]
    fn test_replica_forwards_to_sequencer() {
        let network = test_network();
        let node = test_node(NodeMode::Replica);
        let sts = build_stateful_set(&NodeBuildInput {
            node: &node,
            network: &network,
            sequencer_rpc: Some("http://seq-0.rollup.svc.cluster.local:8545".to_string()),
        })
        .unwrap();

        let geth_args = args_of(&sts, "op-geth");
        assert!(geth_args
            .iter()
            .any(|a| a.starts_with("--rollup.sequencerhttp=http://seq-0")));
        let node_args = args_of(&sts, "op-node");
        assert!(!node_args.contains(&"--sequencer.enabled".to_string()));
    }

    #[test]
    fn test_containers_share_jwt_path() {
        let network = test_network();
        let node = test_node(NodeMode::Replica);
        let sts = build_stateful_set(&NodeBuildInput {
            node: &node,
            network: &network,
            sequencer_rpc: None,
        })
        .unwrap();

        let geth_jwt = args_of(&sts, "op-geth")
            .iter()
            .find(|a| a.starts_with("--authrpc.jwtsecret="))
            .unwrap()
            .split('=')
            .nth(1)
            .unwrap()
            .to_string();
        let node_jwt = args_of(&sts, "op-node")
            .iter()
            .find(|a| a.starts_with("--l2.jwt-secret="))
            .unwrap()
            .split('=')
            .nth(1)
            .unwrap()
            .to_string();
        assert_eq!(geth_jwt, node_jwt);
    }

    #[test]
    fn test_stopped_scales_to_zero() {
        let network = test_network();
        let mut node = test_node(NodeMode::Replica);
        node.spec.stopped = true;
        let sts = build_stateful_set(&NodeBuildInput {
            node: &node,
            network: &network,
            sequencer_rpc: None,
        })
        .unwrap();
        assert_eq!(sts.spec.unwrap().replicas, Some(0));
    }

    #[test]
    fn test_config_hash_changes_with_network_spec() {
        let node = test_node(NodeMode::Replica);
        let network = test_network();
        let mut changed = test_network();
        changed.spec.l1_rpc_url = "http://other-l1:8545".to_string();

        let hash = |net: &OptimismNetwork| {
            let sts = build_stateful_set(&NodeBuildInput {
                node: &node,
                network: net,
                sequencer_rpc: None,
            })
            .unwrap();
            sts.spec
                .unwrap()
                .template
                .metadata
                .unwrap()
                .annotations
                .unwrap()[CONFIG_HASH_ANNOTATION]
                .clone()
        };
        assert_ne!(hash(&network), hash(&changed));
    }

    #[test]
    fn test_service_exposes_rpc_ports() {
        let node = test_node(NodeMode::Replica);
        let svc = build_service(&node);
        let ports = svc.spec.unwrap().ports.unwrap();
        let names: Vec<_> = ports.iter().filter_map(|p| p.name.clone()).collect();
        assert!(names.contains(&"http".to_string()));
        assert!(names.contains(&"ws".to_string()));
        assert!(names.contains(&"rollup-rpc".to_string()));
    }

    #[test]
    fn test_endpoints() {
        let node = test_node(NodeMode::Sequencer);
        assert_eq!(
            rpc_endpoint(&node, "rollup"),
            "http://seq-0.rollup.svc.cluster.local:9545"
        );
        assert_eq!(
            execution_endpoint(&node, "rollup"),
            "http://seq-0.rollup.svc.cluster.local:8545"
        );
    }
}
