//! OpProposer Custom Resource Definition
//!
//! The proposer submits L2 output roots to the dispute-game factory (or the
//! legacy output oracle) on L1, reading safe head state from the sequencer's
//! rollup RPC.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::network::SpecValidationError;
use super::types::{
    ports, Condition, ConfigSourceRef, MetricsConfig, Phase, Reference, ResourceRequirements,
};

fn default_proposer_image() -> String {
    "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-proposer:latest".to_string()
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "optimism.io",
    version = "v1alpha1",
    kind = "OpProposer",
    namespaced,
    status = "OpProposerStatus",
    shortname = "opp",
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.networkRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpProposerSpec {
    /// The OptimismNetwork this proposer submits for
    pub network_ref: Reference,

    /// The sequencer OpNode providing the rollup RPC
    pub sequencer_ref: Reference,

    /// Secret holding the proposer's L1 transaction signing key
    pub wallet_secret_ref: ConfigSourceRef,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// How often the proposer checks for a new proposable output
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Propose outputs derived from non-finalized L1 data
    #[serde(default)]
    pub allow_non_finalized: bool,

    #[serde(default = "default_proposer_image")]
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
    ports::PROPOSER_RPC
}

fn default_poll_interval() -> u64 {
    6
}

fn default_replicas() -> i32 {
    1
}

impl OpProposerSpec {
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
        if self.replicas < 0 || self.replicas > 1 {
            // Concurrent proposers would race to submit the same output root.
            errors.push(SpecValidationError::new(
                "spec.replicas",
                "proposers must run at most 1 replica",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Status subresource for OpProposer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpProposerStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Address of the contract proposals are submitted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_target_address: Option<String>,
}
