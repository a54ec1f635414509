//! Maps Service and Endpoints events to the Gslbs whose hostnames they back.

use crate::resources::Gslb;
use k8s_openapi::api::core::v1::{
    Endpoints,
    Service,
};
use kube::runtime::reflector::{
    ObjectRef,
    Store,
};
use std::sync::Arc;

/// Gslbs in `namespace` with at least one rule backed by `service`.
pub fn referencing_gslbs(gslbs: &[Arc<Gslb>], namespace: &str, service: &str) -> Vec<ObjectRef<Gslb>> {
    gslbs
        .iter()
        .filter(|gslb| gslb.metadata.namespace.as_deref().unwrap_or("default") == namespace)
        .filter(|gslb| {
            gslb.spec
                .managed_hosts()
                .iter()
                .any(|managed| managed.service.as_deref() == Some(service))
        })
        .map(|gslb| ObjectRef::from_obj(gslb.as_ref()))
        .collect()
}

pub fn gslbs_for_service(store: &Store<Gslb>, svc: &Service) -> Vec<ObjectRef<Gslb>> {
    let (Some(name), Some(ns)) = (svc.metadata.name.as_deref(), svc.metadata.namespace.as_deref()) else {
        return vec![];
    };
    referencing_gslbs(&store.state(), ns, name)
}

/// Endpoints share the name of their Service.
pub fn gslbs_for_endpoints(store: &Store<Gslb>, endpoints: &Endpoints) -> Vec<ObjectRef<Gslb>> {
    let (Some(name), Some(ns)) = (
        endpoints.metadata.name.as_deref(),
        endpoints.metadata.namespace.as_deref(),
    ) else {
        return vec![];
    };
    let refs = referencing_gslbs(&store.state(), ns, name);
    if !refs.is_empty() {
        trace!("Endpoints {ns}/{name} changed, reconciling {} Gslb(s)", refs.len());
    }
    refs
}
