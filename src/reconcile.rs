use crate::{
    cluster::StateError,
    context::Context,
    dns::{
        heartbeat::heartbeat_to_publish,
        peers::PeerResolver,
    },
    endpoint::{
        published_heartbeat,
        Discovery,
        EndpointBuilder,
    },
    health::HealthAggregator,
    resources::{
        DNSEndpoint,
        DNSEndpointSpec,
        Endpoint,
        Gslb,
        GslbStatus,
        HealthState,
    },
    strategy::StrategyEngine,
    targets::LocalTargetCollector,
};
use chrono::prelude::*;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::ObjectMeta,
    runtime::controller::Action,
    Resource as _,
};
use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Gslb is missing metadata.{0}")]
    MissingMetadata(&'static str),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Kube(kube::Error::Api(err)) => err.code == 409,
            ReconcileError::State(err) => err.is_conflict(),
            _ => false,
        }
    }
}

#[instrument(level = "debug", skip_all)]
pub async fn apply(gslb: Arc<Gslb>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    apply_at(&gslb, &ctx, Utc::now()).await?;
    Ok(Action::requeue(ctx.config.reconcile_interval))
}

/// One full pass for `gslb` as of `now`: materialise the ingress, evaluate health, collect local and
/// peer targets, publish the DNSEndpoint and the status. Returns the status that was written.
pub async fn apply_at(gslb: &Gslb, ctx: &Context, now: DateTime<Utc>) -> Result<GslbStatus, ReconcileError> {
    let ns = gslb.metadata.namespace.as_deref().unwrap_or("default");
    let name = gslb
        .metadata
        .name
        .as_deref()
        .ok_or(ReconcileError::MissingMetadata("name"))?;
    info!("reconcile request: Gslb {ns}/{name}");

    let config = &ctx.config;
    let metrics = ctx.metrics.as_ref();

    ctx.persistence.apply_ingress(&gslb_ingress(gslb)?).await?;

    let health = HealthAggregator::new(ctx.state.as_ref(), metrics)
        .evaluate_all(gslb)
        .await?;
    let local = LocalTargetCollector::new(ctx.state.as_ref())
        .local_targets(ns, name)
        .await?;

    let healthy_hosts: Vec<&String> = health
        .iter()
        .filter(|(_, state)| **state == HealthState::Healthy)
        .map(|(host, _)| host)
        .collect();

    let peers = if healthy_hosts.is_empty() {
        debug!("No healthy hosts in Gslb {ns}/{name}, skipping peer lookups");
        vec![]
    } else {
        PeerResolver::new(
            ctx.resolver.as_ref(),
            metrics,
            config.zone(),
            config.heartbeat_threshold,
            config.dns_query_timeout,
        )
        .resolve_all(&config.peers, name, now)
        .await
    };

    let engine = StrategyEngine::new(config.cluster_geo_tag.as_deref(), metrics);
    let selected: BTreeMap<String, Vec<Ipv4Addr>> = healthy_hosts
        .into_iter()
        .map(|host| {
            let targets = engine.select(host, &local, &peers, &gslb.spec.strategy);
            (host.clone(), targets)
        })
        .collect();

    let discovery = match config.cluster_geo_tag.as_deref() {
        Some(geo_tag) => {
            let published = ctx
                .state
                .get_dns_endpoint(ns, name)
                .await?
                .and_then(|endpoint| published_heartbeat(&endpoint, name, geo_tag, config.zone()));
            Some(Discovery {
                gslb_name: name,
                geo_tag,
                zone: config.zone(),
                heartbeat: heartbeat_to_publish(published, now, config.heartbeat_refresh()),
            })
        }
        None => None,
    };
    let built = EndpointBuilder.build(&health, &selected, &local, discovery.as_ref());

    ctx.persistence
        .upsert_endpoint(&gslb_dns_endpoint(gslb, built.endpoints)?)
        .await?;

    metrics.healthy_records(ns, name, built.healthy_records.values().map(Vec::len).sum());

    let status = GslbStatus {
        service_health: health,
        healthy_records: built.healthy_records,
        geo_tag: config.geo_tag_or_unset().to_string(),
    };
    if gslb.status.as_ref() == Some(&status) {
        trace!("Status of Gslb {ns}/{name} is up to date");
    } else {
        debug!(?status, "Updating status of Gslb {ns}/{name}");
        ctx.persistence.update_status(gslb, &status).await?;
    }

    Ok(status)
}

fn owned_metadata(gslb: &Gslb) -> Result<ObjectMeta, ReconcileError> {
    let oref = gslb
        .controller_owner_ref(&())
        .ok_or(ReconcileError::MissingMetadata("uid"))?;
    Ok(ObjectMeta {
        name: gslb.metadata.name.clone(),
        namespace: Some(gslb.metadata.namespace.clone().unwrap_or_else(|| "default".to_string())),
        owner_references: Some(vec![oref]),
        ..Default::default()
    })
}

/// The Ingress serving the Gslb hostnames in this cluster.
pub fn gslb_ingress(gslb: &Gslb) -> Result<Ingress, ReconcileError> {
    let mut metadata = owned_metadata(gslb)?;
    metadata.annotations = gslb.metadata.annotations.clone();
    Ok(Ingress {
        metadata,
        spec: Some(gslb.spec.ingress.clone()),
        ..Default::default()
    })
}

pub fn gslb_dns_endpoint(gslb: &Gslb, endpoints: Vec<Endpoint>) -> Result<DNSEndpoint, ReconcileError> {
    Ok(DNSEndpoint {
        metadata: owned_metadata(gslb)?,
        spec: DNSEndpointSpec { endpoints },
    })
}
