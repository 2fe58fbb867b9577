//! Controllers for the rollup custom resources
//!
//! One controller per kind, all sharing a [`Context`]. Each reconcile runs
//! a pipeline of steps (validate, resolve dependencies, synthesize
//! credentials, apply children) and ends in exactly one status write; a
//! failed step is classified by [`steps::StepError`] into the phase,
//! condition reason, and requeue interval to report.

pub mod batcher_reconciler;
pub mod challenger_reconciler;
pub mod conditions;
pub mod dependencies;
pub mod discovery;
pub mod finalizers;
pub mod network_reconciler;
pub mod node_reconciler;
pub mod proposer_reconciler;
pub mod resources;
pub mod retry;
pub mod rpc;
pub mod secrets;
pub mod steps;

use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};

use crate::controller::discovery::DiscoveryCache;
use crate::error::{Error, Result};

/// Shared state handed to every controller
pub struct Context {
    pub client: Client,
    pub http: reqwest::Client,
    pub discovery: DiscoveryCache,
}

impl Context {
    pub fn new(client: Client) -> Self {
        let http = reqwest::Client::new();
        Self {
            client,
            discovery: DiscoveryCache::new(http.clone()),
            http,
        }
    }
}

/// Emit a Kubernetes Event attached to the given resource
pub(crate) async fn emit_event<K>(
    client: &Client,
    obj: &K,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-event-", obj.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: obj.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}
