//! Controller for OpNode resources
//!
//! The node pipeline validates the spec, waits for the referenced network
//! (and sequencer, for replicas), synthesizes the JWT and P2P credentials,
//! and applies the StatefulSet and Service. Status reports the in-cluster
//! RPC endpoints other components consume.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controller::conditions::{
    set_condition_bool, CONDITION_TYPE_CONFIGURATION_VALID, CONDITION_TYPE_NETWORK_READY,
    CONDITION_TYPE_READY, CONDITION_TYPE_RESOURCES_READY, CONDITION_TYPE_SECRETS_READY,
    CONDITION_TYPE_SEQUENCER_READY,
};
use crate::controller::dependencies::{resolve_ready_network, resolve_ready_sequencer};
use crate::controller::finalizers::NODE_FINALIZER;
use crate::controller::resources::node::{
    build_service, build_stateful_set, execution_endpoint, rpc_endpoint, NodeBuildInput,
};
use crate::controller::resources::{apply, delete_pvcs_matching};
use crate::controller::retry::update_status_with_retry;
use crate::controller::secrets::{ensure_generated_secret, verify_secret_key, CredentialKind};
use crate::controller::steps::{StepError, REQUEUE_SUCCESS};
use crate::controller::{emit_event, Context};
use crate::crd::types::{Condition, Phase};
use crate::crd::{join_validation_errors, OpNode, OpNodeStatus};
use crate::error::{Error, Result};

pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let nodes: Api<OpNode> = Api::all(ctx.client.clone());

    info!("starting OpNode controller");
    if let Err(e) = nodes.list(&Default::default()).await {
        error!(error = %e, "OpNode CRD not available");
        return Err(Error::ConfigError("OpNode CRD not installed".to_string()));
    }

    Controller::new(nodes, Config::default())
        .owns::<StatefulSet>(Api::all(ctx.client.clone()), Config::default())
        .owns::<Service>(Api::all(ctx.client.clone()), Config::default())
        .owns::<Secret>(Api::all(ctx.client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!(?obj, "reconciled"),
                Err(e) => error!(error = %e, "reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace(), mode = %obj.spec.mode))]
async fn reconcile(obj: Arc<OpNode>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OpNode> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, NODE_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(node) => apply_node(&ctx, &node).await,
            FinalizerEvent::Cleanup(node) => cleanup_node(&ctx, &node).await,
        }
    })
    .await
    .map_err(Error::from)
}

struct NodeOutcome {
    rpc_endpoint: String,
    execution_endpoint: String,
    ready_replicas: i32,
}

async fn apply_node(ctx: &Context, node: &OpNode) -> Result<Action> {
    let namespace = node.namespace().unwrap_or_else(|| "default".to_string());

    let mut conditions = node
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let outcome = run_steps(ctx, node, &namespace, &mut conditions).await;

    let (phase, message, requeue) = match &outcome {
        Ok(result) => {
            let (phase, reason, message) =
                availability(node.spec.stopped, result.ready_replicas, node.spec.replicas);
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                phase == Phase::Running,
                reason,
                &message,
            );
            (phase, message, REQUEUE_SUCCESS)
        }
        Err(step) => {
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                false,
                step.reason(),
                step.message(),
            );
            (step.phase(), step.message().to_string(), step.requeue_after())
        }
    };

    write_status(ctx, node, &namespace, phase, &message, conditions, outcome.as_ref().ok()).await?;

    if let Err(step) = &outcome {
        warn!(node = %node.name_any(), reason = step.reason(), "node not ready");
        if let Err(e) = emit_event(&ctx.client, node, "Warning", step.reason(), step.message()).await
        {
            warn!(error = %e, "failed to emit event");
        }
    }

    Ok(Action::requeue(requeue))
}

async fn run_steps(
    ctx: &Context,
    node: &OpNode,
    namespace: &str,
    conditions: &mut Vec<Condition>,
) -> std::result::Result<NodeOutcome, StepError> {
    let name = node.name_any();

    if let Err(errors) = node.spec.validate(&name, namespace) {
        let message = join_validation_errors(&errors);
        set_condition_bool(
            conditions,
            CONDITION_TYPE_CONFIGURATION_VALID,
            false,
            "InvalidSpec",
            &message,
        );
        return Err(StepError::Invalid(message));
    }
    set_condition_bool(
        conditions,
        CONDITION_TYPE_CONFIGURATION_VALID,
        true,
        "SpecValid",
        "spec passed validation",
    );

    let network = match resolve_ready_network(&ctx.client, &node.spec.network_ref, namespace).await
    {
        Ok(network) => {
            set_condition_bool(
                conditions,
                CONDITION_TYPE_NETWORK_READY,
                true,
                "NetworkReady",
                "referenced network is ready",
            );
            network
        }
        Err(e) => {
            let step = StepError::from(e);
            set_condition_bool(
                conditions,
                CONDITION_TYPE_NETWORK_READY,
                false,
                step.reason(),
                step.message(),
            );
            return Err(step);
        }
    };

    // Replicas pointing at a sequencer wait for it and forward transactions
    // to its execution RPC.
    let sequencer_rpc = match &node.spec.sequencer_ref {
        Some(reference) => {
            match resolve_ready_sequencer(&ctx.client, reference, namespace).await {
                Ok(sequencer) => {
                    set_condition_bool(
                        conditions,
                        CONDITION_TYPE_SEQUENCER_READY,
                        true,
                        "SequencerRunning",
                        "referenced sequencer is running",
                    );
                    let sequencer_ns = reference.namespace_or(namespace);
                    Some(execution_endpoint(&sequencer, sequencer_ns))
                }
                Err(e) => {
                    let step = StepError::from(e);
                    set_condition_bool(
                        conditions,
                        CONDITION_TYPE_SEQUENCER_READY,
                        false,
                        step.reason(),
                        step.message(),
                    );
                    return Err(step);
                }
            }
        }
        None => None,
    };

    for kind in [CredentialKind::Jwt, CredentialKind::P2pKey] {
        if let Err(e) = ensure_generated_secret(&ctx.client, node, kind).await {
            let step = StepError::from(e);
            set_condition_bool(
                conditions,
                CONDITION_TYPE_SECRETS_READY,
                false,
                step.reason(),
                step.message(),
            );
            return Err(step);
        }
    }
    // User-supplied config payloads (custom rollup config, genesis) are
    // mounted by the pods and must exist here before the apply; otherwise
    // the pods would hang in ContainerCreating with no explanation.
    for source in network.spec.config_secret_refs() {
        if let Err(e) = verify_secret_key(&ctx.client, namespace, source).await {
            let step = StepError::from(e);
            set_condition_bool(
                conditions,
                CONDITION_TYPE_SECRETS_READY,
                false,
                step.reason(),
                step.message(),
            );
            return Err(step);
        }
    }
    set_condition_bool(
        conditions,
        CONDITION_TYPE_SECRETS_READY,
        true,
        "SecretsGenerated",
        "credentials and config inputs are in place",
    );

    let input = NodeBuildInput {
        node,
        network: &network,
        sequencer_rpc,
    };
    let result = async {
        let sts = build_stateful_set(&input)?;
        apply(&ctx.client, namespace, &sts).await?;
        apply(&ctx.client, namespace, &build_service(node)).await
    }
    .await;
    if let Err(e) = result {
        let step = StepError::from(e);
        set_condition_bool(
            conditions,
            CONDITION_TYPE_RESOURCES_READY,
            false,
            step.reason(),
            step.message(),
        );
        return Err(step);
    }
    set_condition_bool(
        conditions,
        CONDITION_TYPE_RESOURCES_READY,
        true,
        "ResourcesApplied",
        "StatefulSet and Service applied",
    );

    Ok(NodeOutcome {
        rpc_endpoint: rpc_endpoint(node, namespace),
        execution_endpoint: execution_endpoint(node, namespace),
        ready_replicas: ready_replicas(ctx, node, namespace).await,
    })
}

/// Phase, Ready-condition reason, and message for a node whose children
/// applied cleanly. A stopped node is not a replica-count problem.
fn availability(stopped: bool, ready_replicas: i32, desired: i32) -> (Phase, &'static str, String) {
    if stopped {
        (
            Phase::Stopped,
            "Stopped",
            "workload scaled to zero".to_string(),
        )
    } else if ready_replicas >= desired {
        (Phase::Running, "Reconciled", "node is running".to_string())
    } else {
        (
            Phase::Initializing,
            "NotAllReplicasReady",
            format!("{ready_replicas}/{desired} replicas ready"),
        )
    }
}

/// Ready replicas from the StatefulSet status; absent counts as zero.
async fn ready_replicas(ctx: &Context, node: &OpNode, namespace: &str) -> i32 {
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    match api.get_opt(&node.name_any()).await {
        Ok(Some(sts)) => sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
        Ok(None) => 0,
        Err(e) => {
            warn!(error = %e, "could not read StatefulSet status");
            0
        }
    }
}

async fn write_status(
    ctx: &Context,
    node: &OpNode,
    namespace: &str,
    phase: Phase,
    message: &str,
    conditions: Vec<Condition>,
    outcome: Option<&NodeOutcome>,
) -> Result<()> {
    let api: Api<OpNode> = Api::namespaced(ctx.client.clone(), namespace);
    let generation = node.metadata.generation;
    let endpoints = outcome.map(|o| (o.rpc_endpoint.clone(), o.execution_endpoint.clone()));
    let ready = outcome.map(|o| o.ready_replicas).unwrap_or(0);

    update_status_with_retry(&api, &node.name_any(), |latest| {
        let status = latest.status.get_or_insert_with(OpNodeStatus::default);
        status.phase = phase;
        status.message = Some(message.to_string());
        status.observed_generation = generation;
        status.conditions = conditions.clone();
        status.ready_replicas = ready;
        if let Some((rpc, execution)) = &endpoints {
            status.rpc_endpoint = Some(rpc.clone());
            status.execution_endpoint = Some(execution.clone());
        }
    })
    .await
}

async fn cleanup_node(ctx: &Context, node: &OpNode) -> Result<Action> {
    let namespace = node.namespace().unwrap_or_else(|| "default".to_string());
    let name = node.name_any();

    // Owned children (StatefulSet, Service, generated Secrets) are garbage
    // collected; only the volumeClaimTemplate PVCs need explicit handling.
    if node.spec.should_delete_pvc() {
        info!(node = %name, "deleting data volumes (retention policy Delete)");
        delete_pvcs_matching(&ctx.client, &namespace, &name).await?;
    } else {
        info!(node = %name, "retaining data volumes (retention policy Retain)");
    }

    Ok(Action::await_change())
}

fn error_policy(node: Arc<OpNode>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(node = %node.name_any(), error = %error, "reconciliation error");
    let retry = if error.is_retriable() {
        std::time::Duration::from_secs(15)
    } else {
        std::time::Duration::from_secs(60)
    };
    Action::requeue(retry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_node_reports_stopped_not_replica_shortfall() {
        let (phase, reason, message) = availability(true, 0, 1);
        assert_eq!(phase, Phase::Stopped);
        assert_eq!(reason, "Stopped");
        assert_eq!(message, "workload scaled to zero");
    }

    #[test]
    fn test_all_replicas_ready_is_running() {
        let (phase, reason, _) = availability(false, 2, 2);
        assert_eq!(phase, Phase::Running);
        assert_eq!(reason, "Reconciled");
    }

    #[test]
    fn test_replica_shortfall_is_initializing() {
        let (phase, reason, message) = availability(false, 1, 3);
        assert_eq!(phase, Phase::Initializing);
        assert_eq!(reason, "NotAllReplicasReady");
        assert_eq!(message, "1/3 replicas ready");
    }
}
