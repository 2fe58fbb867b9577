//! OpChallenger Custom Resource Definition
//!
//! The challenger monitors dispute games created through the dispute-game
//! factory and responds to invalid claims. It keeps a local datadir of
//! proof material, so it runs as a StatefulSet with persistent storage.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::network::SpecValidationError;
use super::types::{
    Condition, ConfigSourceRef, MetricsConfig, Phase, Reference, ResourceRequirements,
    StorageConfig,
};

fn default_challenger_image() -> String {
    "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-challenger:latest".to_string()
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "optimism.io",
    version = "v1alpha1",
    kind = "OpChallenger",
    namespaced,
    status = "OpChallengerStatus",
    shortname = "opc",
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.networkRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpChallengerSpec {
    /// The OptimismNetwork whose games this challenger plays
    pub network_ref: Reference,

    /// The sequencer OpNode providing the rollup RPC
    pub sequencer_ref: Reference,

    /// Secret holding the challenger's L1 transaction signing key
    pub wallet_secret_ref: ConfigSourceRef,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default = "default_challenger_image")]
    pub image: String,

    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Persistent datadir for game proof material
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scale the workload to zero without deleting it
    #[serde(default)]
    pub stopped: bool,
}

impl OpChallengerSpec {
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
        if self.metrics.enabled && self.metrics.port == 0 {
            errors.push(SpecValidationError::new(
                "spec.metrics.port",
                "port must be between 1 and 65535",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn should_delete_pvc(&self) -> bool {
        self.storage.retention_policy == super::types::RetentionPolicy::Delete
    }
}

/// Status subresource for OpChallenger
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpChallengerStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Address of the dispute-game factory being monitored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_factory_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> OpChallengerSpec {
        OpChallengerSpec {
            network_ref: Reference {
                name: "op-sepolia".to_string(),
                namespace: None,
            },
            sequencer_ref: Reference {
                name: "sequencer".to_string(),
                namespace: None,
            },
            wallet_secret_ref: ConfigSourceRef {
                name: "challenger-wallet".to_string(),
                key: "privateKey".to_string(),
            },
            metrics: MetricsConfig::default(),
            image: default_challenger_image(),
            resources: ResourceRequirements::default(),
            storage: StorageConfig::default(),
            stopped: false,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_network_ref_rejected() {
        let mut spec = base_spec();
        spec.network_ref.name = "  ".to_string();
        assert!(spec.validate().is_err());
    }
}
