//! OptimismNetwork Custom Resource Definition
//!
//! An OptimismNetwork describes the identity of one rollup (chain ids, L1
//! connection, contract addresses) and is the anchor every other component
//! resource points at. The controller validates the spec, probes the L1
//! endpoint, and resolves the contract address set via the configured
//! discovery strategy.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{
    AddressSet, Condition, ConfigSourceRef, DiscoveryConfig, DiscoveryMethod, Phase,
};

/// Structured validation error for a resource spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Render a list of validation errors as one condition message.
pub fn join_validation_errors(errors: &[SpecValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "optimism.io",
    version = "v1alpha1",
    kind = "OptimismNetwork",
    namespaced,
    status = "OptimismNetworkStatus",
    shortname = "onet",
    printcolumn = r#"{"name":"ChainID","type":"integer","jsonPath":".spec.chainId"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Discovery","type":"string","jsonPath":".status.addresses.discoveryMethod"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OptimismNetworkSpec {
    /// Recognized network name (op-mainnet, op-sepolia, base-mainnet,
    /// base-sepolia) enabling the built-in address table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,

    /// L2 chain id
    pub chain_id: u64,

    /// L1 chain id the rollup settles to
    pub l1_chain_id: u64,

    /// L1 execution-layer RPC endpoint
    pub l1_rpc_url: String,

    /// L1 consensus-layer (beacon) endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_beacon_url: Option<String>,

    /// Existing L2 RPC endpoint, used by the l2-predeploys discovery strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_rpc_url: Option<String>,

    /// Address of the SystemConfig contract on L1, used by the
    /// system-config discovery strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config_address: Option<String>,

    /// Base URL of an external address registry service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,

    /// Contract addresses supplied verbatim (the manual discovery strategy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_addresses: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Timeout for outbound RPC and HTTP calls, in seconds
    #[serde(default = "default_rpc_timeout_seconds")]
    pub rpc_timeout_seconds: u64,

    /// Pre-built rollup config payload stored in a Secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollup_config_ref: Option<ConfigSourceRef>,

    /// Pre-built L2 genesis payload stored in a Secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genesis_ref: Option<ConfigSourceRef>,
}

fn default_rpc_timeout_seconds() -> u64 {
    10
}

impl OptimismNetworkSpec {
    /// Validate static invariants of the spec.
    ///
    /// Cheap, local checks only; connectivity and discovery run later in
    /// the reconcile pipeline so that an invalid spec never triggers
    /// network calls.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.chain_id == 0 {
            errors.push(SpecValidationError::new(
                "spec.chainId",
                "chainId must be non-zero",
            ));
        }
        if self.l1_chain_id == 0 {
            errors.push(SpecValidationError::new(
                "spec.l1ChainId",
                "l1ChainId must be non-zero",
            ));
        }
        if self.chain_id != 0 && self.chain_id == self.l1_chain_id {
            errors.push(SpecValidationError::new(
                "spec.chainId",
                "chainId must differ from l1ChainId",
            ));
        }
        if self.l1_rpc_url.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.l1RpcUrl",
                "l1RpcUrl must not be empty",
            ));
        }
        if self.rpc_timeout_seconds == 0 {
            errors.push(SpecValidationError::new(
                "spec.rpcTimeoutSeconds",
                "rpcTimeoutSeconds must be greater than 0",
            ));
        }

        match self.discovery.method {
            DiscoveryMethod::Manual => {
                let empty = self
                    .contract_addresses
                    .as_ref()
                    .map(|m| m.is_empty())
                    .unwrap_or(true);
                if empty {
                    errors.push(SpecValidationError::new(
                        "spec.contractAddresses",
                        "contractAddresses is required when discovery.method is manual",
                    ));
                }
            }
            DiscoveryMethod::SystemConfig => {
                if self.system_config_address.is_none() {
                    errors.push(SpecValidationError::new(
                        "spec.systemConfigAddress",
                        "systemConfigAddress is required when discovery.method is system-config",
                    ));
                }
            }
            DiscoveryMethod::Registry => {
                if self.registry_url.is_none() {
                    errors.push(SpecValidationError::new(
                        "spec.registryUrl",
                        "registryUrl is required when discovery.method is registry",
                    ));
                }
            }
            DiscoveryMethod::L2Predeploys => {
                if self.l2_rpc_url.is_none() {
                    errors.push(SpecValidationError::new(
                        "spec.l2RpcUrl",
                        "l2RpcUrl is required when discovery.method is l2-predeploys",
                    ));
                }
            }
            DiscoveryMethod::Auto | DiscoveryMethod::WellKnown => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn rpc_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn cache_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.discovery.cache_timeout_seconds)
    }

    /// Secret references that node pods mount; each must exist in the
    /// node's namespace before the workload is applied.
    pub fn config_secret_refs(&self) -> Vec<&ConfigSourceRef> {
        self.rollup_config_ref
            .iter()
            .chain(self.genesis_ref.iter())
            .collect()
    }
}

/// Status subresource for OptimismNetwork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimismNetworkStatus {
    /// Current phase (Pending, Initializing, Ready, Error)
    #[serde(default)]
    pub phase: Phase,

    /// Human-readable message about the current state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation the status reflects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Readiness conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Resolved contract addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<AddressSet>,
}

impl OptimismNetworkStatus {
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> OptimismNetworkSpec {
        OptimismNetworkSpec {
            network_name: Some("op-sepolia".to_string()),
            chain_id: 11155420,
            l1_chain_id: 11155111,
            l1_rpc_url: "http://l1:8545".to_string(),
            l1_beacon_url: None,
            l2_rpc_url: None,
            system_config_address: None,
            registry_url: None,
            contract_addresses: None,
            discovery: DiscoveryConfig::default(),
            rpc_timeout_seconds: 10,
            rollup_config_ref: None,
            genesis_ref: None,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(base_spec().validate().is_ok());
    }

    #[test]
    fn test_equal_chain_ids_rejected() {
        let mut spec = base_spec();
        spec.chain_id = 10;
        spec.l1_chain_id = 10;
        let errors = spec.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("differ from l1ChainId")));
    }

    #[test]
    fn test_zero_chain_id_rejected() {
        let mut spec = base_spec();
        spec.chain_id = 0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_l1_rpc_rejected() {
        let mut spec = base_spec();
        spec.l1_rpc_url = "  ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_manual_discovery_requires_addresses() {
        let mut spec = base_spec();
        spec.discovery.method = DiscoveryMethod::Manual;
        assert!(spec.validate().is_err());

        spec.contract_addresses = Some(
            [(
                "SystemConfigProxy".to_string(),
                "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_config_secret_refs_collects_both_sources() {
        let mut spec = base_spec();
        assert!(spec.config_secret_refs().is_empty());

        spec.rollup_config_ref = Some(ConfigSourceRef {
            name: "custom-rollup-config".to_string(),
            key: "rollup.json".to_string(),
        });
        spec.genesis_ref = Some(ConfigSourceRef {
            name: "custom-genesis".to_string(),
            key: "genesis.json".to_string(),
        });

        let refs = spec.config_secret_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "custom-rollup-config");
        assert_eq!(refs[1].key, "genesis.json");
    }

    #[test]
    fn test_system_config_discovery_requires_address() {
        let mut spec = base_spec();
        spec.discovery.method = DiscoveryMethod::SystemConfig;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_join_validation_errors_lists_all_fields() {
        let mut spec = base_spec();
        spec.chain_id = 0;
        spec.l1_rpc_url = String::new();
        let errors = spec.validate().unwrap_err();
        let joined = join_validation_errors(&errors);
        assert!(joined.contains("spec.chainId"));
        assert!(joined.contains("spec.l1RpcUrl"));
    }
}
