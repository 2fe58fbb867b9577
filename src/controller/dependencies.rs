//! Cross-resource dependency resolution
//!
//! Components point at their OptimismNetwork and sequencer OpNode through
//! [`Reference`]s. Resolution always reads current state; a cached referent
//! would propagate stale readiness. A reference is not ownership: the
//! referrer only inspects the referent's status.

use kube::api::Api;
use kube::Client;

use crate::crd::types::Reference;
use crate::crd::{NodeMode, OpNode, OptimismNetwork};
use crate::error::{Error, Result};

/// Fetch the referenced OptimismNetwork, without a readiness check.
pub async fn resolve_network(
    client: &Client,
    reference: &Reference,
    default_namespace: &str,
) -> Result<OptimismNetwork> {
    let namespace = reference.namespace_or(default_namespace);
    let api: Api<OptimismNetwork> = Api::namespaced(client.clone(), namespace);

    match api.get(&reference.name).await {
        Ok(net) => Ok(net),
        Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::DependencyNotFound {
            kind: "OptimismNetwork",
            namespace: namespace.to_string(),
            name: reference.name.clone(),
        }),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Fetch the referenced OptimismNetwork and require it to be Ready.
pub async fn resolve_ready_network(
    client: &Client,
    reference: &Reference,
    default_namespace: &str,
) -> Result<OptimismNetwork> {
    let net = resolve_network(client, reference, default_namespace).await?;
    if let Some(reason) = network_not_ready_reason(&net) {
        return Err(Error::DependencyNotReady {
            kind: "OptimismNetwork",
            namespace: reference.namespace_or(default_namespace).to_string(),
            name: reference.name.clone(),
            reason,
        });
    }
    Ok(net)
}

/// Fetch the referenced OpNode and require it to be a sequencer.
///
/// A reference resolving to a replica is a `WrongKind` error, not a
/// readiness problem; requeuing will not fix a mispointed spec.
pub async fn resolve_sequencer(
    client: &Client,
    reference: &Reference,
    default_namespace: &str,
) -> Result<OpNode> {
    let namespace = reference.namespace_or(default_namespace);
    let api: Api<OpNode> = Api::namespaced(client.clone(), namespace);

    let node = match api.get(&reference.name).await {
        Ok(node) => node,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            return Err(Error::DependencyNotFound {
                kind: "OpNode",
                namespace: namespace.to_string(),
                name: reference.name.clone(),
            })
        }
        Err(e) => return Err(Error::KubeError(e)),
    };

    if node.spec.mode != NodeMode::Sequencer {
        return Err(Error::WrongKind {
            kind: "OpNode",
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            detail: format!("expected mode Sequencer, found {}", node.spec.mode),
        });
    }

    Ok(node)
}

/// Fetch the referenced sequencer OpNode and require it to be Running.
pub async fn resolve_ready_sequencer(
    client: &Client,
    reference: &Reference,
    default_namespace: &str,
) -> Result<OpNode> {
    let node = resolve_sequencer(client, reference, default_namespace).await?;
    if let Some(reason) = node_not_running_reason(&node) {
        return Err(Error::DependencyNotReady {
            kind: "OpNode",
            namespace: reference.namespace_or(default_namespace).to_string(),
            name: reference.name.clone(),
            reason,
        });
    }
    Ok(node)
}

/// Why a network is not ready, or `None` if it is.
pub fn network_not_ready_reason(net: &OptimismNetwork) -> Option<String> {
    match net.status.as_ref() {
        None => Some("status not yet reported".to_string()),
        Some(status) if status.is_ready() => None,
        Some(status) => Some(format!("phase is {}", status.phase)),
    }
}

/// Why a node is not running, or `None` if it is.
pub fn node_not_running_reason(node: &OpNode) -> Option<String> {
    match node.status.as_ref() {
        None => Some("status not yet reported".to_string()),
        Some(status) if status.is_running() => None,
        Some(status) => Some(format!("phase is {}", status.phase)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::Phase;
    use crate::crd::{OpNodeStatus, OptimismNetworkStatus};
    use kube::core::ObjectMeta;

    fn network_with_phase(phase: Option<Phase>) -> OptimismNetwork {
        let mut net = OptimismNetwork::new(
            "op-sepolia",
            serde_json::from_value(serde_json::json!({
                "chainId": 11155420u64,
                "l1ChainId": 11155111u64,
                "l1RpcUrl": "http://l1:8545",
            }))
            .unwrap(),
        );
        net.metadata = ObjectMeta {
            name: Some("op-sepolia".to_string()),
            namespace: Some("rollup".to_string()),
            ..Default::default()
        };
        net.status = phase.map(|p| OptimismNetworkStatus {
            phase: p,
            ..Default::default()
        });
        net
    }

    fn node_with_phase(mode: NodeMode, phase: Option<Phase>) -> OpNode {
        let mut node = OpNode::new(
            "sequencer",
            serde_json::from_value(serde_json::json!({
                "networkRef": { "name": "op-sepolia" },
                "mode": mode,
            }))
            .unwrap(),
        );
        node.status = phase.map(|p| OpNodeStatus {
            phase: p,
            ..Default::default()
        });
        node
    }

    #[test]
    fn test_network_without_status_not_ready() {
        let net = network_with_phase(None);
        assert!(network_not_ready_reason(&net).is_some());
    }

    #[test]
    fn test_network_pending_not_ready() {
        let net = network_with_phase(Some(Phase::Pending));
        let reason = network_not_ready_reason(&net).unwrap();
        assert!(reason.contains("Pending"));
    }

    #[test]
    fn test_network_ready() {
        let net = network_with_phase(Some(Phase::Ready));
        assert!(network_not_ready_reason(&net).is_none());
    }

    #[test]
    fn test_node_running() {
        let node = node_with_phase(NodeMode::Sequencer, Some(Phase::Running));
        assert!(node_not_running_reason(&node).is_none());
    }

    #[test]
    fn test_node_error_not_running() {
        let node = node_with_phase(NodeMode::Sequencer, Some(Phase::Error));
        assert!(node_not_running_reason(&node).is_some());
    }
}
