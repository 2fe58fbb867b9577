//! Custom Resource Definitions for the rollup operator
//!
//! Five resource kinds cover one rollup deployment: the network anchor plus
//! the node, batcher, proposer, and challenger components that reference it.

mod batcher;
mod challenger;
mod network;
mod node;
mod proposer;
pub mod types;

pub use batcher::{OpBatcher, OpBatcherSpec, OpBatcherStatus};
pub use challenger::{OpChallenger, OpChallengerSpec, OpChallengerStatus};
pub use network::{
    join_validation_errors, OptimismNetwork, OptimismNetworkSpec, OptimismNetworkStatus,
    SpecValidationError,
};
pub use node::{
    ExecutionConfig, NodeImages, NodeMode, NodeRpcConfig, OpNode, OpNodeSpec, OpNodeStatus,
    P2pConfig,
};
pub use proposer::{OpProposer, OpProposerSpec, OpProposerStatus};
pub use types::*;
