//! Controller for OpChallenger resources
//!
//! Same shape as the proposer pipeline, but the dispute-game factory is a
//! hard requirement and the workload is a StatefulSet whose datadir PVCs
//! follow the retention policy on deletion.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
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
use crate::controller::finalizers::CHALLENGER_FINALIZER;
use crate::controller::resources::challenger::{
    build_stateful_set, game_factory_address, ChallengerBuildInput,
};
use crate::controller::resources::node::rpc_endpoint;
use crate::controller::resources::{apply, delete_pvcs_matching};
use crate::controller::retry::update_status_with_retry;
use crate::controller::secrets::verify_secret_key;
use crate::controller::steps::{StepError, REQUEUE_SUCCESS};
use crate::controller::{emit_event, Context};
use crate::crd::types::{AddressSet, Condition, Phase};
use crate::crd::{join_validation_errors, OpChallenger, OpChallengerStatus, OptimismNetwork};
use crate::error::{Error, Result};

pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let challengers: Api<OpChallenger> = Api::all(ctx.client.clone());

    info!("starting OpChallenger controller");
    if let Err(e) = challengers.list(&Default::default()).await {
        error!(error = %e, "OpChallenger CRD not available");
        return Err(Error::ConfigError(
            "OpChallenger CRD not installed".to_string(),
        ));
    }

    Controller::new(challengers, Config::default())
        .owns::<StatefulSet>(Api::all(ctx.client.clone()), Config::default())
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
async fn reconcile(obj: Arc<OpChallenger>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OpChallenger> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, CHALLENGER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(challenger) => apply_challenger(&ctx, &challenger).await,
            FinalizerEvent::Cleanup(challenger) => cleanup_challenger(&ctx, &challenger).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply_challenger(ctx: &Context, challenger: &OpChallenger) -> Result<Action> {
    let namespace = challenger.namespace().unwrap_or_else(|| "default".to_string());

    let mut conditions = challenger
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let outcome = run_steps(ctx, challenger, &namespace, &mut conditions).await;

    let (phase, message, factory, requeue) = match &outcome {
        Ok(factory) => {
            let (phase, reason, message) = if challenger.spec.stopped {
                (Phase::Stopped, "Stopped", "workload scaled to zero".to_string())
            } else {
                (
                    Phase::Running,
                    "Reconciled",
                    "challenger is running".to_string(),
                )
            };
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                phase == Phase::Running,
                reason,
                &message,
            );
            (phase, message, Some(factory.clone()), REQUEUE_SUCCESS)
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

    let api: Api<OpChallenger> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = challenger.metadata.generation;
    update_status_with_retry(&api, &challenger.name_any(), |latest| {
        let status = latest.status.get_or_insert_with(OpChallengerStatus::default);
        status.phase = phase;
        status.message = Some(message.clone());
        status.observed_generation = generation;
        status.conditions = conditions.clone();
        if let Some(factory) = &factory {
            status.game_factory_address = Some(factory.clone());
        }
    })
    .await?;

    if let Err(step) = &outcome {
        warn!(challenger = %challenger.name_any(), reason = step.reason(), "challenger not ready");
        if let Err(e) =
            emit_event(&ctx.client, challenger, "Warning", step.reason(), step.message()).await
        {
            warn!(error = %e, "failed to emit event");
        }
    }

    Ok(Action::requeue(requeue))
}

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

/// Returns the dispute-game factory address on success.
async fn run_steps(
    ctx: &Context,
    challenger: &OpChallenger,
    namespace: &str,
    conditions: &mut Vec<Condition>,
) -> std::result::Result<String, StepError> {
    if let Err(errors) = challenger.spec.validate() {
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

    let resolved = match resolve_ready_network(&ctx.client, &challenger.spec.network_ref, namespace)
        .await
        .map_err(StepError::from)
        .and_then(|network| resolved_addresses(&network).map(|a| (network, a)))
    {
        Ok(pair) => {
            set_condition_bool(
                conditions,
                CONDITION_TYPE_NETWORK_READY,
                true,
                "NetworkReady",
                "referenced network is ready",
            );
            pair
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
    let (network, addresses) = resolved;

    let sequencer = match resolve_ready_sequencer(
        &ctx.client,
        &challenger.spec.sequencer_ref,
        namespace,
    )
    .await
    {
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

    if let Err(e) =
        verify_secret_key(&ctx.client, namespace, &challenger.spec.wallet_secret_ref).await
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

    let sequencer_ns = challenger.spec.sequencer_ref.namespace_or(namespace);
    let input = ChallengerBuildInput {
        challenger,
        network: &network,
        addresses: &addresses,
        sequencer_rollup_rpc: rpc_endpoint(&sequencer, sequencer_ns),
    };
    let result = async {
        let sts = build_stateful_set(&input)?;
        apply(&ctx.client, namespace, &sts).await
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
        "StatefulSet applied",
    );

    game_factory_address(&addresses).map_err(StepError::from)
}

async fn cleanup_challenger(ctx: &Context, challenger: &OpChallenger) -> Result<Action> {
    let namespace = challenger.namespace().unwrap_or_else(|| "default".to_string());
    let name = challenger.name_any();

    if challenger.spec.should_delete_pvc() {
        info!(challenger = %name, "deleting datadir volumes (retention policy Delete)");
        delete_pvcs_matching(&ctx.client, &namespace, &name).await?;
    } else {
        info!(challenger = %name, "retaining datadir volumes (retention policy Retain)");
    }

    Ok(Action::await_change())
}

fn error_policy(challenger: Arc<OpChallenger>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(challenger = %challenger.name_any(), error = %error, "reconciliation error");
    let retry = if error.is_retriable() {
        std::time::Duration::from_secs(15)
    } else {
        std::time::Duration::from_secs(60)
    };
    Action::requeue(retry)
}
