use crate::{
    cluster::{
        ClusterState,
        StateError,
    },
    metrics::MetricsSink,
    resources::{
        Gslb,
        HealthState,
    },
};
use k8s_openapi::api::core::v1::Endpoints;
use std::collections::BTreeMap;

/// Derives the health of every managed hostname from its backing Service and Endpoints.
pub struct HealthAggregator<'a> {
    state: &'a dyn ClusterState,
    metrics: &'a dyn MetricsSink,
}

impl<'a> HealthAggregator<'a> {
    pub fn new(state: &'a dyn ClusterState, metrics: &'a dyn MetricsSink) -> Self {
        Self { state, metrics }
    }

    /// Health of a single service in `namespace`.
    pub async fn evaluate(&self, namespace: &str, service: &str) -> Result<HealthState, StateError> {
        if self.state.get_service(namespace, service).await?.is_none() {
            trace!("Service {namespace}/{service} not found");
            return Ok(HealthState::NotFound);
        }

        let endpoints = self.state.get_endpoints(namespace, service).await?;
        if endpoints.as_ref().is_some_and(has_ready_addresses) {
            Ok(HealthState::Healthy)
        } else {
            debug!("Service {namespace}/{service} has no ready endpoints");
            Ok(HealthState::Unhealthy)
        }
    }

    /// One entry per managed hostname of the Gslb.
    pub async fn evaluate_all(&self, gslb: &Gslb) -> Result<BTreeMap<String, HealthState>, StateError> {
        let ns = gslb.metadata.namespace.as_deref().unwrap_or("default");
        let name = gslb.metadata.name.as_deref().unwrap_or_default();

        let mut service_health = BTreeMap::new();
        for managed in gslb.spec.managed_hosts() {
            let state = match managed.service.as_deref() {
                Some(service) => self.evaluate(ns, service).await?,
                None => {
                    warn!("Host {:?} of Gslb {ns}/{name} has no service backend", managed.host);
                    HealthState::NotFound
                }
            };
            service_health.insert(managed.host, state);
        }

        for state in HealthState::ALL {
            let count = service_health.values().filter(|it| **it == state).count();
            self.metrics.hosts_per_status(ns, name, state, count);
        }

        Ok(service_health)
    }
}

fn has_ready_addresses(endpoints: &Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.as_ref().is_some_and(|addresses| !addresses.is_empty()))
}
