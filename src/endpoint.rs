use crate::{
    config,
    dns::heartbeat::{
        heartbeat_value,
        parse_timestamp,
    },
    resources::{
        DNSEndpoint,
        Endpoint,
        HealthState,
        DNSTYPE_LABEL,
        DNSTYPE_LOCAL,
    },
    targets::to_strings,
};
use chrono::prelude::*;
use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
};

pub const RECORD_TTL: i64 = 30;
pub const LOCAL_TARGETS_PREFIX: &str = "localtargets.";

/// Records peers query to discover this cluster.
pub struct Discovery<'a> {
    pub gslb_name: &'a str,
    pub geo_tag: &'a str,
    pub zone: &'a str,
    /// Timestamp published in the heartbeat TXT record.
    pub heartbeat: DateTime<Utc>,
}

/// The heartbeat timestamp currently stored in `endpoint` for `gslb_name` in `geo_tag`.
pub fn published_heartbeat(endpoint: &DNSEndpoint, gslb_name: &str, geo_tag: &str, zone: &str) -> Option<DateTime<Utc>> {
    let fqdn = config::heartbeat_fqdn(gslb_name, geo_tag, zone);
    endpoint
        .spec
        .endpoints
        .iter()
        .find(|record| record.dns_name == fqdn && record.record_type == "TXT")
        .and_then(|record| record.targets.first())
        .and_then(|value| parse_timestamp(value))
}

/// Everything the builder produces for one Gslb.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRecords {
    pub endpoints: Vec<Endpoint>,
    pub healthy_records: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct EndpointBuilder;

impl EndpointBuilder {
    /// For every healthy host, in host order: `localtargets.<host>` with `local_targets` followed by
    /// `<host>` with the selected targets. Other hosts get no records.
    pub fn build(
        &self,
        health: &BTreeMap<String, HealthState>,
        selected: &BTreeMap<String, Vec<Ipv4Addr>>,
        local_targets: &[Ipv4Addr],
        discovery: Option<&Discovery<'_>>,
    ) -> BuiltRecords {
        let healthy: Vec<&str> = health
            .iter()
            .filter(|(_, state)| **state == HealthState::Healthy)
            .map(|(host, _)| host.as_str())
            .collect();

        let mut endpoints = Vec::with_capacity(healthy.len() * 2 + 2);
        let mut healthy_records = BTreeMap::new();

        if let Some(discovery) = discovery {
            endpoints.extend(discovery_records(discovery, !healthy.is_empty(), local_targets));
        }

        for host in healthy {
            endpoints.push(local_record(
                format!("{LOCAL_TARGETS_PREFIX}{host}"),
                "A",
                to_strings(local_targets),
            ));

            let targets = selected.get(host).map(|it| to_strings(it)).unwrap_or_default();
            endpoints.push(Endpoint {
                dns_name: host.to_string(),
                record_ttl: RECORD_TTL,
                record_type: "A".to_string(),
                targets: targets.clone(),
                labels: BTreeMap::new(),
            });
            healthy_records.insert(host.to_string(), targets);
        }

        BuiltRecords {
            endpoints,
            healthy_records,
        }
    }
}

/// `hostsz` (only while something is healthy and there are local targets) and `heartbeat`.
fn discovery_records(discovery: &Discovery<'_>, any_healthy: bool, local_targets: &[Ipv4Addr]) -> Vec<Endpoint> {
    let Discovery {
        gslb_name,
        geo_tag,
        zone,
        heartbeat,
    } = discovery;

    let mut records = Vec::with_capacity(2);
    if any_healthy && !local_targets.is_empty() {
        records.push(local_record(
            config::targets_fqdn(gslb_name, geo_tag, zone),
            "A",
            to_strings(local_targets),
        ));
    }
    records.push(local_record(
        config::heartbeat_fqdn(gslb_name, geo_tag, zone),
        "TXT",
        vec![heartbeat_value(*heartbeat)],
    ));
    records
}

fn local_record(dns_name: String, record_type: &str, targets: Vec<String>) -> Endpoint {
    Endpoint {
        dns_name,
        record_ttl: RECORD_TTL,
        record_type: record_type.to_string(),
        targets,
        labels: BTreeMap::from([(DNSTYPE_LABEL.to_string(), DNSTYPE_LOCAL.to_string())]),
    }
}
