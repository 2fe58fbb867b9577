//! Controller for OptimismNetwork resources
//!
//! The network pipeline validates the spec, probes the L1 endpoint, and
//! resolves the contract address set. A network owns no workloads; its job
//! is to become `Ready` so components can anchor to it.

use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controller::conditions::{
    all_conditions_true, set_condition_bool, CONDITION_TYPE_ADDRESSES_READY,
    CONDITION_TYPE_CONFIGURATION_VALID, CONDITION_TYPE_L1_CONNECTED, CONDITION_TYPE_READY,
};
use crate::controller::finalizers::NETWORK_FINALIZER;
use crate::controller::retry::update_status_with_retry;
use crate::controller::rpc::fetch_chain_id;
use crate::controller::steps::{StepError, REQUEUE_SUCCESS_NETWORK};
use crate::controller::{emit_event, Context};
use crate::crd::types::{AddressSet, Condition, Phase};
use crate::crd::{join_validation_errors, OptimismNetwork, OptimismNetworkStatus};
use crate::error::{Error, Result};

pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let networks: Api<OptimismNetwork> = Api::all(ctx.client.clone());

    info!("starting OptimismNetwork controller");
    if let Err(e) = networks.list(&Default::default()).await {
        error!(error = %e, "OptimismNetwork CRD not available");
        return Err(Error::ConfigError(
            "OptimismNetwork CRD not installed".to_string(),
        ));
    }

    Controller::new(networks, Config::default())
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
async fn reconcile(obj: Arc<OptimismNetwork>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OptimismNetwork> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, NETWORK_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(net) => apply_network(&ctx, &net).await,
            FinalizerEvent::Cleanup(net) => cleanup_network(&ctx, &net).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply_network(ctx: &Context, net: &OptimismNetwork) -> Result<Action> {
    let namespace = net.namespace().unwrap_or_else(|| "default".to_string());
    let name = net.name_any();

    let mut conditions = net
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let outcome = run_steps(ctx, net, &mut conditions).await;

    let (phase, message, addresses, requeue) = match &outcome {
        Ok(resolved) => {
            // Ready is a roll-up of the stage conditions, not a separate
            // judgement; a pipeline that succeeded with a stale False stage
            // would be a bug and must not report Ready.
            let ready = all_conditions_true(
                &conditions,
                &[
                    CONDITION_TYPE_CONFIGURATION_VALID,
                    CONDITION_TYPE_L1_CONNECTED,
                    CONDITION_TYPE_ADDRESSES_READY,
                ],
            );
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_READY,
                ready,
                "Reconciled",
                "network is ready",
            );
            (
                Phase::Ready,
                "network is ready".to_string(),
                Some(resolved.clone()),
                REQUEUE_SUCCESS_NETWORK,
            )
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

    write_status(ctx, net, phase, &message, conditions, addresses).await?;

    if let Err(step) = &outcome {
        warn!(network = %name, namespace = %namespace, reason = step.reason(), "network not ready");
        // Best effort; a missed event never blocks the requeue.
        if let Err(e) = emit_event(&ctx.client, net, "Warning", step.reason(), step.message()).await
        {
            warn!(error = %e, "failed to emit event");
        }
    }

    Ok(Action::requeue(requeue))
}

/// The reconcile pipeline proper. Sets per-stage conditions as it goes and
/// stops at the first failure.
async fn run_steps(
    ctx: &Context,
    net: &OptimismNetwork,
    conditions: &mut Vec<Condition>,
) -> std::result::Result<AddressSet, StepError> {
    // Validation first; an invalid spec never triggers network calls.
    if let Err(errors) = net.spec.validate() {
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

    // L1 connectivity probe; the endpoint must serve the declared chain.
    match fetch_chain_id(&ctx.http, &net.spec.l1_rpc_url, net.spec.rpc_timeout()).await {
        Ok(id) if id == net.spec.l1_chain_id => {
            set_condition_bool(
                conditions,
                CONDITION_TYPE_L1_CONNECTED,
                true,
                "L1Reachable",
                &format!("L1 endpoint serves chain {id}"),
            );
        }
        Ok(id) => {
            let message = format!(
                "L1 endpoint serves chain {id}, expected {}",
                net.spec.l1_chain_id
            );
            set_condition_bool(
                conditions,
                CONDITION_TYPE_L1_CONNECTED,
                false,
                "ChainIdMismatch",
                &message,
            );
            return Err(StepError::External(message));
        }
        Err(e) => {
            let message = format!("L1 probe failed: {e}");
            set_condition_bool(
                conditions,
                CONDITION_TYPE_L1_CONNECTED,
                false,
                "L1Unreachable",
                &message,
            );
            return Err(StepError::External(message));
        }
    }

    // Address discovery, served from the TTL cache when fresh.
    match ctx.discovery.resolve(net).await {
        Ok(resolved) => {
            set_condition_bool(
                conditions,
                CONDITION_TYPE_ADDRESSES_READY,
                true,
                "AddressesResolved",
                &format!(
                    "{} addresses resolved via {}",
                    resolved.addresses.len(),
                    resolved.discovery_method
                ),
            );
            Ok(resolved)
        }
        Err(e) => {
            let message = e.to_string();
            set_condition_bool(
                conditions,
                CONDITION_TYPE_ADDRESSES_READY,
                false,
                "DiscoveryFailed",
                &message,
            );
            Err(StepError::from(e))
        }
    }
}

/// Single status write per reconcile, with optimistic-concurrency retry.
/// Previously resolved addresses are kept when this round failed.
async fn write_status(
    ctx: &Context,
    net: &OptimismNetwork,
    phase: Phase,
    message: &str,
    conditions: Vec<Condition>,
    addresses: Option<AddressSet>,
) -> Result<()> {
    let namespace = net.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<OptimismNetwork> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = net.metadata.generation;

    update_status_with_retry(&api, &net.name_any(), |latest| {
        let status = latest.status.get_or_insert_with(OptimismNetworkStatus::default);
        status.phase = phase;
        status.message = Some(message.to_string());
        status.observed_generation = generation;
        status.conditions = conditions.clone();
        if let Some(resolved) = &addresses {
            status.addresses = Some(resolved.clone());
        }
    })
    .await
}

async fn cleanup_network(_ctx: &Context, net: &OptimismNetwork) -> Result<Action> {
    // Networks own no children; the address cache entry expires on its own.
    info!(network = %net.name_any(), "network deleted");
    Ok(Action::await_change())
}

fn error_policy(net: Arc<OptimismNetwork>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(network = %net.name_any(), error = %error, "reconciliation error");
    let retry = if error.is_retriable() {
        std::time::Duration::from_secs(15)
    } else {
        std::time::Duration::from_secs(60)
    };
    Action::requeue(retry)
}
