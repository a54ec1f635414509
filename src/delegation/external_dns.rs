//! Delegation through external-dns: the NS and glue records are published as a `DNSEndpoint` and
//! external-dns pushes them to Route53 or NS1.

use super::{
    DelegationError,
    DelegationProvider,
    NameServer,
};
use crate::{
    cluster::Persistence,
    config::{
        Config,
        ProviderKind,
    },
    resources::{
        DNSEndpoint,
        DNSEndpointSpec,
        Endpoint,
    },
};
use async_trait::async_trait;
use kube::api::ObjectMeta;
use std::{
    collections::BTreeMap,
    sync::Arc,
};

pub const EXTDNS_ENDPOINT_NAME: &str = "gslb-ns-extdns";
pub const DNSTYPE_ANNOTATION: &str = "gslb.operator.io/dnstype";
pub const DNSTYPE_EXTDNS: &str = "extdns";
const NS_RECORD_TTL: i64 = 300;

pub struct ExternalDnsProvider {
    kind: ProviderKind,
    namespace: String,
    /// This cluster's nameserver followed by the peers'.
    nameserver_names: Vec<String>,
    persistence: Arc<dyn Persistence>,
}

impl ExternalDnsProvider {
    pub fn new(kind: ProviderKind, config: &Config, persistence: Arc<dyn Persistence>) -> Self {
        let nameserver_names = config
            .own_nameserver_fqdn()
            .into_iter()
            .chain(config.peer_nameserver_fqdns())
            .collect();
        Self {
            kind,
            namespace: config.operator_namespace.clone(),
            nameserver_names,
            persistence,
        }
    }

    /// The endpoint carrying the zone's NS record and the glue of `nameservers`.
    pub fn delegation_endpoint(&self, zone: &str, nameservers: &[NameServer]) -> DNSEndpoint {
        let mut ns_targets = self.nameserver_names.clone();
        ns_targets.sort();
        ns_targets.dedup();

        let mut glue: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for ns in nameservers {
            let addresses = glue.entry(ns.name.as_str()).or_default();
            if !addresses.contains(&ns.address) {
                addresses.push(ns.address.clone());
            }
        }

        let mut endpoints = Vec::with_capacity(glue.len() + 1);
        endpoints.push(Endpoint {
            dns_name: zone.trim_end_matches('.').to_string(),
            record_ttl: NS_RECORD_TTL,
            record_type: "NS".to_string(),
            targets: ns_targets,
            labels: BTreeMap::new(),
        });
        endpoints.extend(glue.into_iter().map(|(name, targets)| Endpoint {
            dns_name: name.to_string(),
            record_ttl: NS_RECORD_TTL,
            record_type: "A".to_string(),
            targets,
            labels: BTreeMap::new(),
        }));

        DNSEndpoint {
            metadata: ObjectMeta {
                name: Some(EXTDNS_ENDPOINT_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    DNSTYPE_ANNOTATION.to_string(),
                    DNSTYPE_EXTDNS.to_string(),
                )])),
                ..Default::default()
            },
            spec: DNSEndpointSpec { endpoints },
        }
    }
}

#[async_trait]
impl DelegationProvider for ExternalDnsProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn ensure_delegation(&self, zone: &str, nameservers: &[NameServer]) -> Result<(), DelegationError> {
        if self.nameserver_names.is_empty() {
            return Err(DelegationError::Config(format!(
                "no nameserver names known for zone {zone}, set CLUSTER_GEO_TAG and EDGE_DNS_ZONE"
            )));
        }
        let endpoint = self.delegation_endpoint(zone, nameservers);
        debug!(provider = self.kind.as_str(), "Publishing delegation for {zone}");
        self.persistence.upsert_endpoint(&endpoint).await?;
        Ok(())
    }

    async fn close(&self) {}
}
