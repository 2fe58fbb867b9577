//! Finalizer names for the managed custom resources
//!
//! Each controller registers its finalizer through the kube-rs `finalizer`
//! helper so that cleanup (retention-policy handling, child teardown) runs
//! before Kubernetes completes a deletion. The names here are the only
//! finalizers this operator ever adds.

/// Finalizer protecting OptimismNetwork resources
pub const NETWORK_FINALIZER: &str = "optimismnetwork.optimism.io/finalizer";

/// Finalizer protecting OpNode resources
pub const NODE_FINALIZER: &str = "opnode.optimism.io/finalizer";

/// Finalizer protecting OpBatcher resources
pub const BATCHER_FINALIZER: &str = "opbatcher.optimism.io/finalizer";

/// Finalizer protecting OpProposer resources
pub const PROPOSER_FINALIZER: &str = "opproposer.optimism.io/finalizer";

/// Finalizer protecting OpChallenger resources
pub const CHALLENGER_FINALIZER: &str = "opchallenger.optimism.io/finalizer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_names_are_domain_qualified() {
        for name in [
            NETWORK_FINALIZER,
            NODE_FINALIZER,
            BATCHER_FINALIZER,
            PROPOSER_FINALIZER,
            CHALLENGER_FINALIZER,
        ] {
            assert!(name.ends_with(".optimism.io/finalizer"));
        }
    }
}
