//! Discovery of the targets advertised by peer clusters.

use super::{
    heartbeat::HeartbeatValidator,
    lookup::{
        within,
        DnsResolver,
    },
};
use crate::{
    config::PeerCluster,
    metrics::{
        MetricsSink,
        PeerLookup,
    },
};
use chrono::prelude::*;
use futures::future::join_all;
use std::{
    net::Ipv4Addr,
    time::Duration,
};

/// What a single peer contributed during one reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTargets {
    pub geo_tag: String,
    pub liveness: PeerLookup,
    /// Always empty unless the peer is alive.
    pub targets: Vec<Ipv4Addr>,
}

impl PeerTargets {
    pub fn alive(geo_tag: impl ToString, targets: Vec<Ipv4Addr>) -> Self {
        Self {
            geo_tag: geo_tag.to_string(),
            liveness: PeerLookup::Alive,
            targets,
        }
    }

    pub fn unavailable(geo_tag: impl ToString, liveness: PeerLookup) -> Self {
        Self {
            geo_tag: geo_tag.to_string(),
            liveness,
            targets: vec![],
        }
    }

    pub fn is_alive(&self) -> bool {
        self.liveness == PeerLookup::Alive
    }
}

pub struct PeerResolver<'a> {
    resolver: &'a dyn DnsResolver,
    metrics: &'a dyn MetricsSink,
    zone: &'a str,
    threshold: Duration,
    timeout: Duration,
}

impl<'a> PeerResolver<'a> {
    pub fn new(
        resolver: &'a dyn DnsResolver,
        metrics: &'a dyn MetricsSink,
        zone: &'a str,
        threshold: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            metrics,
            zone,
            threshold,
            timeout,
        }
    }

    /// Targets advertised by one peer. Never fails: stale or unreachable peers contribute nothing.
    pub async fn peer_targets(&self, peer: &PeerCluster, gslb_name: &str, now: DateTime<Utc>) -> PeerTargets {
        let heartbeat = HeartbeatValidator::new(self.resolver, self.zone, self.threshold, self.timeout);

        let outcome = match heartbeat.is_alive(peer, gslb_name, now).await {
            Ok(true) => {
                let qname = peer.targets_fqdn(gslb_name, self.zone);
                let query = self.resolver.query_a(peer.dns_endpoint, &qname, self.timeout);
                match within(self.timeout, peer.dns_endpoint, &qname, query).await {
                    Ok(targets) => {
                        info!("Added external {targets:?} Gslb targets from {qname}");
                        PeerTargets::alive(&peer.geo_tag, targets)
                    }
                    Err(err) => {
                        warn!(peer = %peer.geo_tag, "Unable to fetch external Gslb targets: {err}");
                        PeerTargets::unavailable(&peer.geo_tag, PeerLookup::Unreachable)
                    }
                }
            }
            Ok(false) => PeerTargets::unavailable(&peer.geo_tag, PeerLookup::Stale),
            Err(err) => {
                warn!(peer = %peer.geo_tag, "Unable to validate heartbeat: {err}");
                PeerTargets::unavailable(&peer.geo_tag, PeerLookup::Unreachable)
            }
        };

        self.metrics.peer_lookup(&peer.geo_tag, outcome.liveness);
        outcome
    }

    /// Resolves all peers concurrently; results keep the configured peer order.
    pub async fn resolve_all(&self, peers: &[PeerCluster], gslb_name: &str, now: DateTime<Utc>) -> Vec<PeerTargets> {
        if peers.is_empty() {
            debug!("No other Gslb enabled clusters are configured, working standalone");
            return vec![];
        }
        join_all(peers.iter().map(|peer| self.peer_targets(peer, gslb_name, now))).await
    }
}
