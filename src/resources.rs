use k8s_openapi::api::networking::v1::IngressSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// Label put on records that are only meant for co-located tooling and peer discovery.
pub const DNSTYPE_LABEL: &str = "dnstype";
pub const DNSTYPE_LOCAL: &str = "local";

/// How traffic is distributed across the clusters serving a [`Gslb`].
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum StrategyType {
    #[default]
    #[serde(rename = "roundRobin")]
    RoundRobin,
    #[serde(rename = "failover")]
    Failover,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::RoundRobin => "roundRobin",
            StrategyType::Failover => "failover",
        }
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    /// roundRobin or failover. Defaults to roundRobin.
    #[serde(rename = "type", default)]
    pub type_: StrategyType,
    /// Geo tag of the cluster that serves traffic while it is healthy (failover only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_geo_tag: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "gslb.operator.io",
    version = "v1beta1",
    kind = "Gslb",
    namespaced,
    status = "GslbStatus",
    shortname = "gslb"
)]
pub struct GslbSpec {
    /// Ingress template. Every rule host becomes a managed hostname.
    pub ingress: IngressSpec,
    /// Traffic distribution strategy
    pub strategy: Strategy,
}

/// A managed hostname and the service backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedHost {
    pub host: String,
    pub service: Option<String>,
}

impl GslbSpec {
    /// Hostnames from the ingress rules, in rule order, each listed once. The owning service is the
    /// first HTTP path with a service backend.
    pub fn managed_hosts(&self) -> Vec<ManagedHost> {
        let mut hosts: Vec<ManagedHost> = Vec::new();
        for rule in self.ingress.rules.iter().flatten() {
            let Some(host) = rule.host.as_deref().filter(|host| !host.is_empty()) else {
                continue;
            };
            if hosts.iter().any(|it| it.host == host) {
                continue;
            }
            let service = rule.http.as_ref().and_then(|http| {
                http.paths
                    .iter()
                    .find_map(|path| path.backend.service.as_ref().map(|svc| svc.name.clone()))
            });
            hosts.push(ManagedHost {
                host: host.to_string(),
                service,
            });
        }
        hosts
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    NotFound,
}

impl HealthState {
    pub const ALL: [HealthState; 3] = [HealthState::Healthy, HealthState::Unhealthy, HealthState::NotFound];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "Healthy",
            HealthState::Unhealthy => "Unhealthy",
            HealthState::NotFound => "NotFound",
        }
    }
}

pub const GEO_TAG_UNSET: &str = "unset";

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GslbStatus {
    /// Health of every managed hostname
    #[serde(default)]
    pub service_health: BTreeMap<String, HealthState>,
    /// Targets published for every healthy hostname
    #[serde(default)]
    pub healthy_records: BTreeMap<String, Vec<String>>,
    /// Geo tag of the cluster that wrote this status
    #[serde(default)]
    pub geo_tag: String,
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// external-dns

/// The external-dns DNSEndpoint resource. We only ever write it; external-dns serves it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "externaldns.k8s.io", version = "v1alpha1", kind = "DNSEndpoint", namespaced)]
pub struct DNSEndpointSpec {
    pub endpoints: Vec<Endpoint>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub dns_name: String,
    #[serde(rename = "recordTTL")]
    pub record_ttl: i64,
    pub record_type: String,
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn is_local(&self) -> bool {
        self.labels.get(DNSTYPE_LABEL).map(String::as_str) == Some(DNSTYPE_LOCAL)
    }
}
