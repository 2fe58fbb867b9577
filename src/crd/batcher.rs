//! OpBatcher Custom Resource Definition
//!
//! The batch submitter reads unsafe blocks from the sequencer and submits
//! compressed channel data to the batch inbox address on L1.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::network::SpecValidationError;
use super::types::{
    ports, Condition, ConfigSourceRef, MetricsConfig, Phase, Reference, ResourceRequirements,
};

fn default_batcher_image() -> String {
    "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-batcher:latest".to_string()
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "optimism.io",
    version = "v1alpha1",
    kind = "OpBatcher",
    namespaced,
    status = "OpBatcherStatus",
    shortname = "opb",
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.networkRef.name"}"#,
    printcolumn = r#"{"name":"Sequencer","type":"string","jsonPath":".spec.sequencerRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpBatcherSpec {
    /// The OptimismNetwork this batcher submits for
    pub network_ref: Reference,

    /// The sequencer OpNode whose blocks are batched
    pub sequencer_ref: Reference,

    /// Secret holding the batcher's L1 transaction signing key
    pub wallet_secret_ref: ConfigSourceRef,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// How often the batcher polls the sequencer for new blocks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum channel duration in L1 blocks (0 = unbounded)
    #[serde(default)]
    pub max_channel_duration_blocks: u64,

    /// Channel-timeout safety margin in L1 blocks
    #[serde(default = "default_sub_safety_margin")]
    pub sub_safety_margin: u64,

    /// L1 confirmations to wait for per batch transaction
    #[serde(default = "default_num_confirmations")]
    pub num_confirmations: u64,

    #[serde(default = "default_batcher_image")]
    pub image: String,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Scale the workload to zero without deleting it
    #[serde(default)]
    pub stopped: bool,
}

fn default_rpc_port() -> u16 {
    ports::BATCHER_RPC
}

fn default_poll_interval() -> u64 {
    6
}

fn default_sub_safety_margin() -> u64 {
    10
}

fn default_num_confirmations() -> u64 {
    1
}

fn default_replicas() -> i32 {
    1
}

impl OpBatcherSpec {
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.network_ref.name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.networkRef.name",
                "networkRef.name must not be empty",
            ));
        }
        if self.sequencer_ref.name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.sequencerRef.name",
                "sequencerRef.name must not be empty",
            ));
        }
        if self.wallet_secret_ref.name.trim().is_empty()
            || self.wallet_secret_ref.key.trim().is_empty()
        {
            errors.push(SpecValidationError::new(
                "spec.walletSecretRef",
                "walletSecretRef.name and walletSecretRef.key must not be empty",
            ));
        }
        if self.rpc_port == 0 {
            errors.push(SpecValidationError::new(
                "spec.rpcPort",
                "rpcPort must be between 1 and 65535",
            ));
        }
        if self.poll_interval_seconds == 0 {
            errors.push(SpecValidationError::new(
                "spec.pollIntervalSeconds",
                "pollIntervalSeconds must be greater than 0",
            ));
        }
        if self.num_confirmations == 0 {
            errors.push(SpecValidationError::new(
                "spec.numConfirmations",
                "numConfirmations must be greater than 0",
            ));
        }
        if self.replicas < 0 || self.replicas > 1 {
            // Two live batchers would double-submit the same channel data.
            errors.push(SpecValidationError::new(
                "spec.replicas",
                "batchers must run at most 1 replica",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Status subresource for OpBatcher
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpBatcherStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Batch inbox address batches are submitted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_inbox_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> OpBatcherSpec {
        OpBatcherSpec {
            network_ref: Reference {
                name: "op-sepolia".to_string(),
                namespace: None,
            },
            sequencer_ref: Reference {
                name: "sequencer".to_string(),
                namespace: None,
            },
            wallet_secret_ref: ConfigSourceRef {
                name: "batcher-wallet".to_string(),
                key: "privateKey".to_string(),
            },
            rpc_port: default_rpc_port(),
            metrics: MetricsConfig::default(),
            poll_interval_seconds: 6,
            max_channel_duration_blocks: 0,
            sub_safety_margin: 10,
            num_confirmations: 1,
            image: default_batcher_image(),
            resources: ResourceRequirements::default(),
            replicas: 1,
            stopped: false,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_spec().validate().is_ok());
    }

    #[test]
    fn test_default_rpc_port() {
        assert_eq!(base_spec().rpc_port, 8548);
    }

    #[test]
    fn test_missing_wallet_key_rejected() {
        let mut spec = base_spec();
        spec.wallet_secret_ref.key = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_two_replicas_rejected() {
        let mut spec = base_spec();
        spec.replicas = 2;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_zero_confirmations_rejected() {
        let mut spec = base_spec();
        spec.num_confirmations = 0;
        assert!(spec.validate().is_err());
    }
}
