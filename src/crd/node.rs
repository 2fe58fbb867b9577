//! OpNode Custom Resource Definition
//!
//! An OpNode runs one rollup node: an op-geth execution container plus an
//! op-node rollup container sharing a generated JWT. A node operates either
//! as the sequencer (single original-order producer) or as a replica that
//! follows the sequencer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::network::SpecValidationError;
use super::types::{
    ports, Condition, MetricsConfig, Phase, Reference, ResourceRequirements, StorageConfig,
};

/// Operating mode of a rollup node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NodeMode {
    /// Produces the canonical unsafe block order
    Sequencer,
    /// Follows the sequencer via P2P / the unsafe-block feed
    #[default]
    Replica,
}

impl std::fmt::Display for NodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeMode::Sequencer => write!(f, "Sequencer"),
            NodeMode::Replica => write!(f, "Replica"),
        }
    }
}

/// P2P configuration for op-node
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct P2pConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Peer discovery; must be disabled on sequencers
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    #[serde(default = "default_p2p_port")]
    pub port: u16,
    /// Multiaddrs of peers to always connect to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_peers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_p2p_port() -> u16 {
    ports::NODE_P2P
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_enabled: true,
            port: ports::NODE_P2P,
            static_peers: Vec::new(),
        }
    }
}

/// Rollup RPC configuration for op-node
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRpcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_node_rpc_port")]
    pub port: u16,
}

fn default_node_rpc_port() -> u16 {
    ports::NODE_RPC
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: ports::NODE_RPC,
        }
    }
}

/// Port layout for the op-geth execution container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// Authenticated engine API port shared with op-node
    #[serde(default = "default_authrpc_port")]
    pub auth_rpc_port: u16,
}

fn default_http_port() -> u16 {
    ports::GETH_HTTP
}

fn default_ws_port() -> u16 {
    ports::GETH_WS
}

fn default_authrpc_port() -> u16 {
    ports::GETH_AUTHRPC
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            http_port: ports::GETH_HTTP,
            ws_port: ports::GETH_WS,
            auth_rpc_port: ports::GETH_AUTHRPC,
        }
    }
}

/// Container images for the node pair
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeImages {
    #[serde(default = "default_op_node_image")]
    pub op_node: String,
    #[serde(default = "default_op_geth_image")]
    pub op_geth: String,
}

fn default_op_node_image() -> String {
    "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-node:latest".to_string()
}

fn default_op_geth_image() -> String {
    "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-geth:latest".to_string()
}

impl Default for NodeImages {
    fn default() -> Self {
        Self {
            op_node: default_op_node_image(),
            op_geth: default_op_geth_image(),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "optimism.io",
    version = "v1alpha1",
    kind = "OpNode",
    namespaced,
    status = "OpNodeStatus",
    shortname = "opn",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.networkRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpNodeSpec {
    /// The OptimismNetwork this node belongs to
    pub network_ref: Reference,

    #[serde(default)]
    pub mode: NodeMode,

    /// For replicas: the sequencer OpNode providing the unsafe-block feed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencer_ref: Option<Reference>,

    #[serde(default)]
    pub p2p: P2pConfig,

    #[serde(default)]
    pub rpc: NodeRpcConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub images: NodeImages,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Scale the workload to zero without deleting it
    #[serde(default)]
    pub stopped: bool,
}

fn default_replicas() -> i32 {
    1
}

impl OpNodeSpec {
    pub fn validate(&self, own_name: &str, own_namespace: &str) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.network_ref.name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.networkRef.name",
                "networkRef.name must not be empty",
            ));
        }

        if self.replicas < 0 {
            errors.push(SpecValidationError::new(
                "spec.replicas",
                "replicas must not be negative",
            ));
        }

        match self.mode {
            NodeMode::Sequencer => {
                // A sequencer advertising itself via discovery would fork
                // the unsafe chain; replicas connect via static peers.
                if self.p2p.enabled && self.p2p.discovery_enabled {
                    errors.push(SpecValidationError::new(
                        "spec.p2p.discoveryEnabled",
                        "sequencers must disable P2P discovery",
                    ));
                }
                if self.replicas > 1 {
                    errors.push(SpecValidationError::new(
                        "spec.replicas",
                        "sequencers must run exactly 1 replica",
                    ));
                }
                if self.sequencer_ref.is_some() {
                    errors.push(SpecValidationError::new(
                        "spec.sequencerRef",
                        "sequencerRef is only valid for replica nodes",
                    ));
                }
            }
            NodeMode::Replica => {
                if let Some(seq) = &self.sequencer_ref {
                    if seq.name == own_name && seq.namespace_or(own_namespace) == own_namespace {
                        errors.push(SpecValidationError::new(
                            "spec.sequencerRef",
                            "a node must not reference itself as sequencer",
                        ));
                    }
                }
            }
        }

        let mut ports_seen = std::collections::BTreeSet::new();
        let mut check_port = |field: &str, port: u16, errors: &mut Vec<SpecValidationError>| {
            if port == 0 {
                errors.push(SpecValidationError::new(
                    field.to_string(),
                    "port must be between 1 and 65535",
                ));
            } else if !ports_seen.insert(port) {
                errors.push(SpecValidationError::new(
                    field.to_string(),
                    format!("port {port} is used more than once"),
                ));
            }
        };
        check_port("spec.execution.httpPort", self.execution.http_port, &mut errors);
        check_port("spec.execution.wsPort", self.execution.ws_port, &mut errors);
        check_port(
            "spec.execution.authRpcPort",
            self.execution.auth_rpc_port,
            &mut errors,
        );
        if self.rpc.enabled {
            check_port("spec.rpc.port", self.rpc.port, &mut errors);
        }
        if self.p2p.enabled {
            check_port("spec.p2p.port", self.p2p.port, &mut errors);
        }
        if self.metrics.enabled {
            check_port("spec.metrics.port", self.metrics.port, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_sequencer(&self) -> bool {
        self.mode == NodeMode::Sequencer
    }

    pub fn should_delete_pvc(&self) -> bool {
        self.storage.retention_policy == super::types::RetentionPolicy::Delete
    }
}

/// Status subresource for OpNode
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpNodeStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// In-cluster URL of the node's rollup RPC
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_endpoint: Option<String>,

    /// In-cluster URL of the execution RPC
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_endpoint: Option<String>,

    #[serde(default)]
    pub ready_replicas: i32,
}

impl OpNodeStatus {
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(mode: NodeMode) -> OpNodeSpec {
        OpNodeSpec {
            network_ref: Reference {
                name: "op-sepolia".to_string(),
                namespace: None,
            },
            mode,
            sequencer_ref: None,
            p2p: P2pConfig::default(),
            rpc: NodeRpcConfig::default(),
            execution: ExecutionConfig::default(),
            metrics: MetricsConfig::default(),
            images: NodeImages::default(),
            resources: ResourceRequirements::default(),
            storage: StorageConfig::default(),
            replicas: 1,
            stopped: false,
        }
    }

    #[test]
    fn test_replica_defaults_are_valid() {
        assert!(base_spec(NodeMode::Replica).validate("replica-0", "rollup").is_ok());
    }

    #[test]
    fn test_sequencer_with_discovery_rejected() {
        let spec = base_spec(NodeMode::Sequencer);
        assert!(spec.p2p.discovery_enabled, "default discovery is on");
        let errors = spec.validate("seq", "rollup").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.field == "spec.p2p.discoveryEnabled"));
    }

    #[test]
    fn test_sequencer_without_discovery_valid() {
        let mut spec = base_spec(NodeMode::Sequencer);
        spec.p2p.discovery_enabled = false;
        assert!(spec.validate("seq", "rollup").is_ok());
    }

    #[test]
    fn test_sequencer_multiple_replicas_rejected() {
        let mut spec = base_spec(NodeMode::Sequencer);
        spec.p2p.discovery_enabled = false;
        spec.replicas = 2;
        assert!(spec.validate("seq", "rollup").is_err());
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut spec = base_spec(NodeMode::Replica);
        spec.sequencer_ref = Some(Reference {
            name: "replica-0".to_string(),
            namespace: None,
        });
        let errors = spec.validate("replica-0", "rollup").unwrap_err();
        assert!(errors.iter().any(|e| e.field == "spec.sequencerRef"));
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let mut spec = base_spec(NodeMode::Replica);
        spec.execution.ws_port = spec.execution.http_port;
        assert!(spec.validate("replica-0", "rollup").is_err());
    }

    #[test]
    fn test_default_ports_match_well_known_values() {
        let spec = base_spec(NodeMode::Replica);
        assert_eq!(spec.execution.http_port, 8545);
        assert_eq!(spec.execution.ws_port, 8546);
        assert_eq!(spec.execution.auth_rpc_port, 8551);
        assert_eq!(spec.rpc.port, 9545);
        assert_eq!(spec.p2p.port, 9003);
        assert_eq!(spec.metrics.port, 7300);
    }
}
