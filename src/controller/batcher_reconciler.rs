//! Controller for OpBatcher resources
//!
//! The batcher pipeline validates the spec, waits for the network and
//! sequencer, verifies the wallet Secret exists (without reading the key),
//! and applies the Deployment. Status records the batch inbox address the
//! batcher submits to.

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
use crate::controller::discovery::{batch_inbox_address, contracts};
use crate::controller::finalizers::BATCHER_FINALIZER;
use crate::controller::resources::batcher::{build_deployment, BatcherBuildInput};
use crate::controller::resources::node::{execution_endpoint, rpc_endpoint};
use crate::controller::resources::apply;
use crate::controller::retry::update_status_with_retry;
use crate::controller::secrets::verify_secret_key;
use crate::controller::steps::{StepError, REQUEUE_SUCCESS};
use crate::controller::{emit_event, Context};
use crate::crd::types::{Condition, Phase};
use crate::crd::{join_validation_errors, OpBatcher, OpBatcherStatus};
use crate::error::{Error, Result};

pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let batchers: Api<OpBatcher> = Api::all(ctx.client.clone());

    info!("starting OpBatcher controller");
    if let Err(e) = batchers.list(&Default::default()).await {
        error!(error = %e, "OpBatcher CRD not available");
        return Err(Error::ConfigError("OpBatcher CRD not installed".to_string()));
    }

    Controller::new(batchers, Config::default())
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
async fn reconcile(obj: Arc<OpBatcher>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OpBatcher> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, BATCHER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(batcher) => apply_batcher(&ctx, &batcher).await,
            FinalizerEvent::Cleanup(batcher) => cleanup_batcher(&ctx, &batcher).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply_batcher(ctx: &Context, batcher: &OpBatcher) -> Result<Action> {
    let namespace = batcher.namespace().unwrap_or_else(|| "default".to_string());

    let mut conditions = batcher
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let outcome = run_steps(ctx, batcher, &namespace, &mut conditions).await;

    let (phase, message, inbox, requeue) = match &outcome {
        Ok(inbox) => {
            let (phase, reason, message) = if batcher.spec.stopped {
                (Phase::Stopped, "Stopped", "workload scaled to zero".to_string())
            } else {
                (Phase::Running, "Reconciled", "batcher is running".to_string())
            };
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                phase == Phase::Running,
                reason,
                &message,
            );
            (phase, message, Some(inbox.clone()), REQUEUE_SUCCESS)
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

    let api: Api<OpBatcher> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = batcher.metadata.generation;
    update_status_with_retry(&api, &batcher.name_any(), |latest| {
        let status = latest.status.get_or_insert_with(OpBatcherStatus::default);
        status.phase = phase;
        status.message = Some(message.clone());
        status.observed_generation = generation;
        status.conditions = conditions.clone();
        if let Some(inbox) = &inbox {
            status.batch_inbox_address = Some(inbox.clone());
        }
    })
    .await?;

    if let Err(step) = &outcome {
        warn!(batcher = %batcher.name_any(), reason = step.reason(), "batcher not ready");
        if let Err(e) =
            emit_event(&ctx.client, batcher, "Warning", step.reason(), step.message()).await
        {
            warn!(error = %e, "failed to emit event");
        }
    }

    Ok(Action::requeue(requeue))
}

/// Returns the batch inbox address on success.
async fn run_steps(
    ctx: &Context,
    batcher: &OpBatcher,
    namespace: &str,
    conditions: &mut Vec<Condition>,
) -> std::result::Result<String, StepError> {
    if let Err(errors) = batcher.spec.validate() {
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

    let network = match resolve_ready_network(&ctx.client, &batcher.spec.network_ref, namespace)
        .await
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

    let sequencer =
        match resolve_ready_sequencer(&ctx.client, &batcher.spec.sequencer_ref, namespace).await {
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

    if let Err(e) = verify_secret_key(&ctx.client, namespace, &batcher.spec.wallet_secret_ref).await
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

    let sequencer_ns = batcher.spec.sequencer_ref.namespace_or(namespace);
    let input = BatcherBuildInput {
        batcher,
        network: &network,
        sequencer_l2_rpc: execution_endpoint(&sequencer, sequencer_ns),
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

    let inbox = network
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|a| a.get(contracts::BATCH_INBOX))
        .map(str::to_string)
        .unwrap_or_else(|| batch_inbox_address(network.spec.chain_id));

    Ok(inbox)
}

async fn cleanup_batcher(_ctx: &Context, batcher: &OpBatcher) -> Result<Action> {
    // The Deployment is garbage collected via its owner reference.
    info!(batcher = %batcher.name_any(), "batcher deleted");
    Ok(Action::await_change())
}

fn error_policy(batcher: Arc<OpBatcher>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(batcher = %batcher.name_any(), error = %error, "reconciliation error");
    let retry = if error.is_retriable() {
        std::time::Duration::from_secs(15)
    } else {
        std::time::Duration::from_secs(60)
    };
    Action::requeue(retry)
}
