//! Controller for OpProposer resources
//!
//! Mirrors the batcher pipeline, with one extra dependency: the proposal
//! target contract must be present in the network's resolved address set
//! before the Deployment can be built.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
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
use crate::controller::finalizers::PROPOSER_FINALIZER;
use crate::controller::resources::node::rpc_endpoint;
use crate::controller::resources::proposer::{
    build_deployment, proposal_target, ProposerBuildInput,
};
use crate::controller::resources::apply;
use crate::controller::retry::update_status_with_retry;
use crate::controller::secrets::verify_secret_key;
use crate::controller::steps::{StepError, REQUEUE_SUCCESS};
use crate::controller::{emit_event, Context};
use crate::crd::types::{AddressSet, Condition, Phase};
use crate::crd::{join_validation_errors, OpProposer, OpProposerStatus, OptimismNetwork};
use crate::error::{Error, Result};

pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let proposers: Api<OpProposer> = Api::all(ctx.client.clone());

    info!("starting OpProposer controller");
    if let Err(e) = proposers.list(&Default::default()).await {
        error!(error = %e, "OpProposer CRD not available");
        return Err(Error::ConfigError(
            "OpProposer CRD not installed".to_string(),
        ));
    }

    Controller::new(proposers, Config::default())
        .owns::<Deployment>(Api::all(ctx.client.clone()), Config::default())
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

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<OpProposer>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OpProposer> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, PROPOSER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(proposer) => apply_proposer(&ctx, &proposer).await,
            FinalizerEvent::Cleanup(proposer) => cleanup_proposer(&ctx, &proposer).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply_proposer(ctx: &Context, proposer: &OpProposer) -> Result<Action> {
    let namespace = proposer.namespace().unwrap_or_else(|| "default".to_string());

    let mut conditions = proposer
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let outcome = run_steps(ctx, proposer, &namespace, &mut conditions).await;

    let (phase, message, target, requeue) = match &outcome {
        Ok(target) => {
            let (phase, reason, message) = if proposer.spec.stopped {
                (Phase::Stopped, "Stopped", "workload scaled to zero".to_string())
            } else {
                (Phase::Running, "Reconciled", "proposer is running".to_string())
            };
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                phase == Phase::Running,
                reason,
                &message,
            );
            (phase, message, Some(target.clone()), REQUEUE_SUCCESS)
        }
        Err(step) => {
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                false,
                step.reason(),
                step.message(),
            );
            (
                step.phase(),
                step.message().to_string(),
                None,
                step.requeue_after(),
            )
        }
    };

    let api: Api<OpProposer> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = proposer.metadata.generation;
    update_status_with_retry(&api, &proposer.name_any(), |latest| {
        let status = latest.status.get_or_insert_with(OpProposerStatus::default);
        status.phase = phase;
        status.message = Some(message.clone());
        status.observed_generation = generation;
        status.conditions = conditions.clone();
        if let Some(target) = &target {
            status.proposal_target_address = Some(target.clone());
        }
    })
    .await?;

    if let Err(step) = &outcome {
        warn!(proposer = %proposer.name_any(), reason = step.reason(), "proposer not ready");
        if let Err(e) =
            emit_event(&ctx.client, proposer, "Warning", step.reason(), step.message()).await
        {
            warn!(error = %e, "failed to emit event");
        }
    }

    Ok(Action::requeue(requeue))
}

/// The network must have resolved its address set before components that
/// need specific contracts can proceed.
fn resolved_addresses(network: &OptimismNetwork) -> std::result::Result<AddressSet, StepError> {
    network
        .status
        .as_ref()
        .and_then(|s| s.addresses.clone())
        .ok_or_else(|| {
            StepError::NotReady(format!(
                "network {} has not resolved its addresses yet",
                network.name_any()
            ))
        })
}

/// Returns the proposal target address on success.
async fn run_steps(
    ctx: &Context,
    proposer: &OpProposer,
    namespace: &str,
    conditions: &mut Vec<Condition>,
) -> std::result::Result<String, StepError> {
    if let Err(errors) = proposer.spec.validate() {
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

    let network = match resolve_ready_network(&ctx.client, &proposer.spec.network_ref, namespace)
        .await
        .map_err(StepError::from)
        .and_then(|network| resolved_addresses(&network).map(|a| (network, a)))
    {
        Ok((network, addresses)) => {
            set_condition_bool(
                conditions,
                CONDITION_TYPE_NETWORK_READY,
                true,
                "NetworkReady",
                "referenced network is ready",
            );
            (network, addresses)
        }
        Err(step) => {
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
    let (network, addresses) = network;

    let sequencer =
        match resolve_ready_sequencer(&ctx.client, &proposer.spec.sequencer_ref, namespace).await {
            Ok(sequencer) => {
                set_condition_bool(
                    conditions,
                    CONDITION_TYPE_SEQUENCER_READY,
                    true,
                    "SequencerRunning",
                    "referenced sequencer is running",
                );
                sequencer
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
        };

    if let Err(e) = verify_secret_key(&ctx.client, namespace, &proposer.spec.wallet_secret_ref).await
    {
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
    set_condition_bool(
        conditions,
        CONDITION_TYPE_SECRETS_READY,
        true,
        "WalletSecretPresent",
        "wallet secret key exists",
    );

    let sequencer_ns = proposer.spec.sequencer_ref.namespace_or(namespace);
    let input = ProposerBuildInput {
        proposer,
        network: &network,
        addresses: &addresses,
        sequencer_rollup_rpc: rpc_endpoint(&sequencer, sequencer_ns),
    };
    let result = async {
        let deployment = build_deployment(&input)?;
        apply(&ctx.client, namespace, &deployment).await
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
        "Deployment applied",
    );

    let (_, target) = proposal_target(&addresses).map_err(StepError::from)?;
    Ok(target)
}

async fn cleanup_proposer(_ctx: &Context, proposer: &OpProposer) -> Result<Action> {
    info!(proposer = %proposer.name_any(), "proposer deleted");
    Ok(Action::await_change())
}

fn error_policy(proposer: Arc<OpProposer>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(proposer = %proposer.name_any(), error = %error, "reconciliation error");
    let retry = if error.is_retriable() {
        std::time::Duration::from_secs(15)
    } else {
        std::time::Duration::from_secs(60)
    };
    Action::requeue(retry)
}
