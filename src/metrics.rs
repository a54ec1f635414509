//! Observations emitted by the reconcile engine.
//!
//! Components receive a [`MetricsSink`] at construction instead of reaching for a process-wide
//! registry. [`PrometheusMetrics`] owns its registry, so several instances can coexist.

use crate::resources::{
    HealthState,
    StrategyType,
};
use prometheus::{
    Encoder as _,
    IntCounterVec,
    IntGaugeVec,
    Opts,
    Registry,
    TextEncoder,
};

const METRICS_NAMESPACE: &str = "gslb";

/// Result of looking up a peer cluster, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLookup {
    Alive,
    Stale,
    Unreachable,
}

impl PeerLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerLookup::Alive => "alive",
            PeerLookup::Stale => "stale",
            PeerLookup::Unreachable => "unreachable",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    /// Number of hosts of one Gslb in the given health state.
    fn hosts_per_status(&self, namespace: &str, name: &str, state: HealthState, count: usize);

    /// Number of healthy records (targets over all healthy hosts) published for one Gslb.
    fn healthy_records(&self, namespace: &str, name: &str, count: usize);

    fn peer_lookup(&self, peer_geo_tag: &str, result: PeerLookup);

    fn selected_targets(&self, strategy: StrategyType, count: usize);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn hosts_per_status(&self, _namespace: &str, _name: &str, _state: HealthState, _count: usize) {}

    fn healthy_records(&self, _namespace: &str, _name: &str, _count: usize) {}

    fn peer_lookup(&self, _peer_geo_tag: &str, _result: PeerLookup) {}

    fn selected_targets(&self, _strategy: StrategyType, _count: usize) {}
}

pub struct PrometheusMetrics {
    registry: Registry,
    hosts_per_status: IntGaugeVec,
    healthy_records: IntGaugeVec,
    peer_lookups: IntCounterVec,
    selected_targets: IntGaugeVec,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let hosts_per_status = IntGaugeVec::new(
            Opts::new("ingress_hosts_per_status", "Number of managed hosts per health status")
                .namespace(METRICS_NAMESPACE),
            &["namespace", "name", "status"],
        )?;
        let healthy_records = IntGaugeVec::new(
            Opts::new("healthy_records", "Number of targets published for healthy hosts").namespace(METRICS_NAMESPACE),
            &["namespace", "name"],
        )?;
        let peer_lookups = IntCounterVec::new(
            Opts::new("peer_lookups_total", "Peer cluster lookups by result").namespace(METRICS_NAMESPACE),
            &["peer", "result"],
        )?;
        let selected_targets = IntGaugeVec::new(
            Opts::new("selected_targets", "Size of the last target selection per strategy")
                .namespace(METRICS_NAMESPACE),
            &["strategy"],
        )?;

        registry.register(Box::new(hosts_per_status.clone()))?;
        registry.register(Box::new(healthy_records.clone()))?;
        registry.register(Box::new(peer_lookups.clone()))?;
        registry.register(Box::new(selected_targets.clone()))?;

        Ok(Self {
            registry,
            hosts_per_status,
            healthy_records,
            peer_lookups,
            selected_targets,
        })
    }

    /// Text exposition of everything gathered so far.
    pub fn render(&self) -> eyre::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn hosts_per_status(&self, namespace: &str, name: &str, state: HealthState, count: usize) {
        self.hosts_per_status
            .with_label_values(&[namespace, name, state.as_str()])
            .set(count as i64);
    }

    fn healthy_records(&self, namespace: &str, name: &str, count: usize) {
        self.healthy_records
            .with_label_values(&[namespace, name])
            .set(count as i64);
    }

    fn peer_lookup(&self, peer_geo_tag: &str, result: PeerLookup) {
        self.peer_lookups
            .with_label_values(&[peer_geo_tag, result.as_str()])
            .inc();
    }

    fn selected_targets(&self, strategy: StrategyType, count: usize) {
        self.selected_targets
            .with_label_values(&[strategy.as_str()])
            .set(count as i64);
    }
}
