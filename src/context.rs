use crate::{
    cluster::{
        ClusterState,
        Persistence,
    },
    config::Config,
    dns::lookup::DnsResolver,
    metrics::MetricsSink,
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use tokio::sync::Mutex;

/// Holds state shared by the controller and other processes such as the peer heartbeat watcher.
pub struct Context {
    pub config: Config,
    pub state: Arc<dyn ClusterState>,
    pub persistence: Arc<dyn Persistence>,
    pub resolver: Arc<dyn DnsResolver>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Maps `{ns}:{gslb}:{geo_tag}` keys to the last observed peer liveness.
    pub peer_liveness: Mutex<HashMap<String, bool>>,
}
