//! Shared types for the rollup custom resources
//!
//! These types are used across the CRD definitions and controller logic.
//! They define the status machinery (phases and conditions), cross-resource
//! references, resource requirements, storage policies, ports, and the
//! discovered contract-address set.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase reported in each resource's status
///
/// Components (OpNode, OpBatcher, OpProposer, OpChallenger) converge to
/// `Running`; an OptimismNetwork converges to `Ready`. Errors can regress
/// the phase; `Stopped` is reported while `spec.stopped` is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    /// Waiting on a dependency or not yet reconciled
    #[default]
    Pending,
    /// Child resources are being created or updated
    Initializing,
    /// All conditions are satisfied (components)
    Running,
    /// All conditions are satisfied (networks)
    Ready,
    /// Reconciliation failed; see conditions for the reason
    Error,
    /// Workloads are scaled to zero by request
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Initializing => "Initializing",
            Phase::Running => "Running",
            Phase::Ready => "Ready",
            Phase::Error => "Error",
            Phase::Stopped => "Stopped",
        };
        write!(f, "{s}")
    }
}

/// A named status condition following Kubernetes API conventions
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "ConfigurationValid", "NetworkReady")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition status changed
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation the condition was set from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Reference to another managed resource
///
/// The namespace defaults to the referrer's namespace when omitted. A
/// reference is not ownership: the referrer only reads the referent's
/// status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Name of the referenced resource
    pub name: String,
    /// Namespace of the referenced resource (defaults to the referrer's)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Reference {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

/// Which strategy produced a resolved address set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    /// Try every strategy in priority order; first success wins
    #[default]
    Auto,
    /// Query the SystemConfig contract named in the spec
    SystemConfig,
    /// Read the fixed-address predeploys from the L2 itself
    L2Predeploys,
    /// Query an external registry service over HTTP
    Registry,
    /// Use the built-in table for recognized named networks
    WellKnown,
    /// Use the addresses supplied verbatim in the spec
    Manual,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscoveryMethod::Auto => "auto",
            DiscoveryMethod::SystemConfig => "system-config",
            DiscoveryMethod::L2Predeploys => "l2-predeploys",
            DiscoveryMethod::Registry => "registry",
            DiscoveryMethod::WellKnown => "well-known",
            DiscoveryMethod::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Address discovery configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Discovery strategy, or `auto` to try all of them in order
    #[serde(default)]
    pub method: DiscoveryMethod,
    /// How long a resolved address set stays valid before it is recomputed
    #[serde(default = "default_cache_timeout_seconds")]
    pub cache_timeout_seconds: u64,
}

fn default_cache_timeout_seconds() -> u64 {
    86_400 // 24h
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::Auto,
            cache_timeout_seconds: default_cache_timeout_seconds(),
        }
    }
}

/// A resolved set of named contract addresses for a network
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressSet {
    /// Named addresses, e.g. "SystemConfigProxy" -> "0x..."
    pub addresses: BTreeMap<String, String>,
    /// Which strategy resolved this set
    pub discovery_method: String,
    /// When the set was resolved
    pub last_discovery_time: String,
}

impl AddressSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.addresses.get(name).map(String::as_str)
    }
}

/// Reference to a key inside an existing Secret
///
/// Used for configuration payloads populated by an external process
/// (wallet private keys, pre-built rollup/genesis configs).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSourceRef {
    /// Name of the Secret
    pub name: String,
    /// Key within the Secret
    pub key: String,
}

/// Kubernetes-style resource requirements
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Minimum resources requested
    pub requests: ResourceSpec,
    /// Maximum resources allowed
    pub limits: ResourceSpec,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            requests: ResourceSpec {
                cpu: "500m".to_string(),
                memory: "1Gi".to_string(),
            },
            limits: ResourceSpec {
                cpu: "2".to_string(),
                memory: "4Gi".to_string(),
            },
        }
    }
}

/// Resource specification for CPU and memory
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceSpec {
    /// CPU cores (e.g., "500m", "2")
    pub cpu: String,
    /// Memory (e.g., "1Gi", "4Gi")
    pub memory: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: "500m".to_string(),
            memory: "1Gi".to_string(),
        }
    }
}

/// Storage configuration for persistent data
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage class name (e.g., "standard", "ssd", "premium-rwo")
    pub storage_class: String,
    /// Size of the PersistentVolumeClaim (e.g., "100Gi")
    pub size: String,
    /// Retention policy when the owning resource is deleted
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: "standard".to_string(),
            size: "100Gi".to_string(),
            retention_policy: RetentionPolicy::default(),
        }
    }
}

/// PVC retention policy on resource deletion
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Delete the PVC together with the owning resource
    #[default]
    Delete,
    /// Retain the PVC for manual cleanup or data recovery
    Retain,
}

/// Metrics endpoint configuration
///
/// Only describes the port the workload binds; scraping and dashboards are
/// outside the operator.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    ports::METRICS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// Well-known default ports for the rollup stack
pub mod ports {
    /// op-geth HTTP RPC
    pub const GETH_HTTP: u16 = 8545;
    /// op-geth WebSocket RPC
    pub const GETH_WS: u16 = 8546;
    /// op-geth authenticated engine API
    pub const GETH_AUTHRPC: u16 = 8551;
    /// op-node rollup RPC
    pub const NODE_RPC: u16 = 9545;
    /// op-node P2P listen port
    pub const NODE_P2P: u16 = 9003;
    /// component metrics
    pub const METRICS: u16 = 7300;
    /// op-batcher admin RPC
    pub const BATCHER_RPC: u16 = 8548;
    /// op-proposer admin RPC
    pub const PROPOSER_RPC: u16 = 8560;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Running.to_string(), "Running");
        assert_eq!(Phase::Error.to_string(), "Error");
    }

    #[test]
    fn test_discovery_method_display_matches_wire_format() {
        assert_eq!(DiscoveryMethod::WellKnown.to_string(), "well-known");
        assert_eq!(DiscoveryMethod::L2Predeploys.to_string(), "l2-predeploys");
        let json = serde_json::to_string(&DiscoveryMethod::WellKnown).unwrap();
        assert_eq!(json, "\"well-known\"");
    }

    #[test]
    fn test_reference_namespace_default() {
        let r = Reference {
            name: "net".to_string(),
            namespace: None,
        };
        assert_eq!(r.namespace_or("rollup"), "rollup");

        let r = Reference {
            name: "net".to_string(),
            namespace: Some("other".to_string()),
        };
        assert_eq!(r.namespace_or("rollup"), "other");
    }

    #[test]
    fn test_discovery_config_default_ttl_is_24h() {
        assert_eq!(DiscoveryConfig::default().cache_timeout_seconds, 86_400);
    }
}
