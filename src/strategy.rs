//! Target selection. [`select_targets`] does no I/O and depends only on its arguments.

use crate::{
    dns::peers::PeerTargets,
    metrics::MetricsSink,
    resources::{
        Strategy,
        StrategyType,
    },
    targets::extend_unique,
};
use std::net::Ipv4Addr;

/// Targets to publish for a healthy host.
///
/// * round robin: `local`, then every alive peer in configured order, without duplicates.
/// * failover: the primary cluster publishes `local`; the others publish the alive primary's targets
///   and fall back to `local` when the primary can't be used.
///
/// An empty `local` stays empty; it is never replaced with peer targets.
pub fn select_targets(
    cluster_geo_tag: Option<&str>,
    local: &[Ipv4Addr],
    peers: &[PeerTargets],
    strategy: &Strategy,
) -> Vec<Ipv4Addr> {
    match strategy.type_ {
        StrategyType::RoundRobin => {
            let mut targets = Vec::with_capacity(local.len() + peers.iter().map(|p| p.targets.len()).sum::<usize>());
            extend_unique(&mut targets, local.iter().copied());
            for peer in peers.iter().filter(|peer| peer.is_alive()) {
                extend_unique(&mut targets, peer.targets.iter().copied());
            }
            targets
        }
        StrategyType::Failover => {
            let Some(primary) = strategy.primary_geo_tag.as_deref() else {
                warn!("Failover strategy without primaryGeoTag, publishing local targets");
                return dedup(local);
            };

            if cluster_geo_tag == Some(primary) {
                return dedup(local);
            }

            match peers.iter().find(|peer| peer.geo_tag == primary) {
                Some(peer) if peer.is_alive() && !peer.targets.is_empty() => dedup(&peer.targets),
                Some(peer) => {
                    warn!(
                        "Primary cluster {primary:?} is {}, falling back to local targets",
                        peer.liveness.as_str()
                    );
                    dedup(local)
                }
                None => {
                    warn!("Primary cluster {primary:?} is not a configured peer, publishing local targets");
                    dedup(local)
                }
            }
        }
    }
}

fn dedup(targets: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut unique = Vec::with_capacity(targets.len());
    extend_unique(&mut unique, targets.iter().copied());
    unique
}

/// [`select_targets`] bound to this cluster's geo tag, reporting to the metrics sink.
pub struct StrategyEngine<'a> {
    cluster_geo_tag: Option<&'a str>,
    metrics: &'a dyn MetricsSink,
}

impl<'a> StrategyEngine<'a> {
    pub fn new(cluster_geo_tag: Option<&'a str>, metrics: &'a dyn MetricsSink) -> Self {
        Self {
            cluster_geo_tag,
            metrics,
        }
    }

    pub fn select(&self, host: &str, local: &[Ipv4Addr], peers: &[PeerTargets], strategy: &Strategy) -> Vec<Ipv4Addr> {
        let selected = select_targets(self.cluster_geo_tag, local, peers, strategy);
        trace!(?host, strategy = strategy.type_.as_str(), ?selected, "Selected targets");
        self.metrics.selected_targets(strategy.type_, selected.len());
        selected
    }
}
