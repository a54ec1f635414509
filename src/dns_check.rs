//! Background peer heartbeat checks. Triggers a reconcile of a Gslb when one of its peers becomes
//! alive or stops being alive, instead of waiting for the next periodic requeue.

use crate::{
    config::PeerCluster,
    context::Context,
    dns::heartbeat::HeartbeatValidator,
    resources::Gslb,
};
use chrono::Utc;
use futures::{
    future::join_all,
    Stream,
};
use kube::runtime::reflector::{
    ObjectRef,
    Store,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
    time::Duration,
};

fn gslb_key(ns: &str, name: &str) -> String {
    format!("{ns}:{name}")
}

fn liveness_key(ns: &str, name: &str, geo_tag: &str) -> String {
    format!("{ns}:{name}:{geo_tag}")
}

/// Records `alive` under `key` and reports whether it differs from the last observation. Peers that
/// were never observed count as not alive.
pub fn record_liveness(observed: &mut HashMap<String, bool>, key: String, alive: bool) -> bool {
    let alive_before = observed.insert(key, alive).unwrap_or(false);
    alive_before != alive
}

/// Drops observations of Gslbs that are not in `gslbs` (`{ns}:{name}` keys) anymore.
pub fn prune_liveness(observed: &mut HashMap<String, bool>, gslbs: &HashSet<String>) {
    observed.retain(|key, _| {
        key.rsplit_once(':')
            .is_some_and(|(gslb, _)| gslbs.contains(gslb))
    });
}

/// Heartbeat liveness of each of `peers` for one Gslb, in peer order. Unreadable heartbeats count as
/// not alive.
async fn check_peers(validator: &HeartbeatValidator<'_>, peers: &[PeerCluster], gslb_name: &str) -> Vec<bool> {
    let now = Utc::now();
    join_all(peers.iter().map(|peer| async move {
        match validator.is_alive(peer, gslb_name, now).await {
            Ok(alive) => alive,
            Err(err) => {
                trace!(peer = %peer.geo_tag, "Heartbeat check failed: {err}");
                false
            }
        }
    }))
    .await
}

pub fn start_peer_check(
    ctx: Arc<Context>,
    gslbs: Store<Gslb>,
    check_interval: Option<Duration>,
) -> impl Stream<Item = ObjectRef<Gslb>> + Send + 'static {
    async_stream::stream! {
        let Some(check_interval) = check_interval else {
            return;
        };
        if ctx.config.peers.is_empty() {
            debug!("No peer clusters configured, peer heartbeat checks are disabled");
            return;
        }

        let mut timer = tokio::time::interval(check_interval);

        loop {
            timer.tick().await;

            let resources = gslbs.state();
            debug!("Checking peer heartbeats for {} Gslb resources", resources.len());

            let validator = HeartbeatValidator::new(
                ctx.resolver.as_ref(),
                ctx.config.zone(),
                ctx.config.heartbeat_threshold,
                ctx.config.dns_query_timeout,
            );

            let named: Vec<(&Gslb, &str, &str)> = resources
                .iter()
                .filter_map(|gslb| {
                    let Some(name) = gslb.metadata.name.as_deref() else {
                        error!("Resource has no name: {:?}", gslb.metadata);
                        return None;
                    };
                    let ns = gslb.metadata.namespace.as_deref().unwrap_or("default");
                    Some((gslb.as_ref(), ns, name))
                })
                .collect();

            let checks = join_all(
                named
                    .iter()
                    .map(|(_, _, name)| check_peers(&validator, &ctx.config.peers, name)),
            )
            .await;

            let mut changed = vec![];
            {
                let mut peer_liveness = ctx.peer_liveness.lock().await;
                let live: HashSet<String> = named.iter().map(|(_, ns, name)| gslb_key(ns, name)).collect();
                prune_liveness(&mut peer_liveness, &live);

                for ((gslb, ns, name), alive) in named.iter().zip(checks) {
                    let mut flipped = false;
                    for (peer, alive) in ctx.config.peers.iter().zip(alive) {
                        if record_liveness(&mut peer_liveness, liveness_key(ns, name, &peer.geo_tag), alive) {
                            info!(peer = %peer.geo_tag, alive, "Peer liveness of Gslb {ns}/{name} changed");
                            flipped = true;
                        }
                    }
                    if flipped {
                        changed.push(ObjectRef::from_obj(*gslb));
                    }
                }
            }

            for oref in changed {
                yield oref;
            }
        }
    }
}
