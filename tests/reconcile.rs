use async_trait::async_trait;
use chrono::prelude::*;
use gslb_operator::{
    cluster::{
        ClusterState,
        Persistence,
        StateError,
    },
    config::{
        Config,
        ProviderKind,
    },
    context::Context,
    dns::lookup::{
        DnsResolver,
        LookupError,
    },
    metrics::PrometheusMetrics,
    reconcile::apply_at,
    resources::{
        DNSEndpoint,
        Endpoint,
        Gslb,
        GslbSpec,
        GslbStatus,
        HealthState,
    },
};
use k8s_openapi::api::{
    core::v1::{
        Endpoints,
        Service,
    },
    networking::v1::Ingress,
};
use serde_json::json;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    net::{
        Ipv4Addr,
        SocketAddr,
    },
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

const NS: &str = "test-gslb";
const NAME: &str = "test-gslb";

#[derive(Default)]
struct FakeCluster {
    services: HashMap<String, Service>,
    endpoints: HashMap<String, Endpoints>,
    ingress: Mutex<Option<Ingress>>,
    dns_endpoints: Mutex<BTreeMap<String, DNSEndpoint>>,
    statuses: Mutex<Vec<GslbStatus>>,
    applied_ingresses: Mutex<usize>,
}

impl FakeCluster {
    fn with_service(mut self, name: &str, ready: &[&str], not_ready: &[&str]) -> Self {
        let service: Service = serde_json::from_value(json!({
            "metadata": { "name": name, "namespace": NS }
        }))
        .unwrap();
        let addresses = |ips: &[&str]| ips.iter().map(|ip| json!({ "ip": ip })).collect::<Vec<_>>();
        let endpoints: Endpoints = serde_json::from_value(json!({
            "metadata": { "name": name, "namespace": NS },
            "subsets": [{
                "addresses": addresses(ready),
                "notReadyAddresses": addresses(not_ready)
            }]
        }))
        .unwrap();
        self.services.insert(name.to_string(), service);
        self.endpoints.insert(name.to_string(), endpoints);
        self
    }

    fn with_ingress_ips(self, ips: &[&str]) -> Self {
        let ingress: Ingress = serde_json::from_value(json!({
            "metadata": { "name": NAME, "namespace": NS },
            "status": { "loadBalancer": {
                "ingress": ips.iter().map(|ip| json!({ "ip": ip })).collect::<Vec<_>>()
            } }
        }))
        .unwrap();
        *self.ingress.lock().unwrap() = Some(ingress);
        self
    }

    fn published(&self) -> Vec<Endpoint> {
        self.dns_endpoints
            .lock()
            .unwrap()
            .get(NAME)
            .map(|it| it.spec.endpoints.clone())
            .unwrap_or_default()
    }

    fn record(&self, dns_name: &str) -> Option<Vec<String>> {
        self.published()
            .into_iter()
            .find(|endpoint| endpoint.dns_name == dns_name)
            .map(|endpoint| endpoint.targets)
    }
}

#[async_trait]
impl ClusterState for FakeCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StateError> {
        Ok(self.services.get(name).filter(|_| namespace == NS).cloned())
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, StateError> {
        Ok(self.endpoints.get(name).filter(|_| namespace == NS).cloned())
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, StateError> {
        if namespace != NS || name != NAME {
            return Ok(None);
        }
        Ok(self.ingress.lock().unwrap().clone())
    }

    async fn get_dns_endpoint(&self, namespace: &str, name: &str) -> Result<Option<DNSEndpoint>, StateError> {
        if namespace != NS {
            return Ok(None);
        }
        Ok(self.dns_endpoints.lock().unwrap().get(name).cloned())
    }
}

#[async_trait]
impl Persistence for FakeCluster {
    async fn upsert_endpoint(&self, endpoint: &DNSEndpoint) -> Result<(), StateError> {
        let name = endpoint.metadata.name.clone().unwrap_or_default();
        self.dns_endpoints.lock().unwrap().insert(name, endpoint.clone());
        Ok(())
    }

    async fn update_status(&self, _gslb: &Gslb, status: &GslbStatus) -> Result<(), StateError> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn apply_ingress(&self, _ingress: &Ingress) -> Result<(), StateError> {
        *self.applied_ingresses.lock().unwrap() += 1;
        Ok(())
    }
}

/// Peer answers keyed by query name. Unknown names time out.
#[derive(Default)]
struct FakeDns {
    txt: HashMap<String, String>,
    a: HashMap<String, Vec<Ipv4Addr>>,
}

impl FakeDns {
    fn with_peer(mut self, geo_tag: &str, heartbeat: &str, targets: &[Ipv4Addr]) -> Self {
        self.txt.insert(
            format!("heartbeat.{NAME}.{geo_tag}.cloud.example.com"),
            heartbeat.to_string(),
        );
        self.a
            .insert(format!("hostsz.{NAME}.{geo_tag}.cloud.example.com"), targets.to_vec());
        self
    }
}

#[async_trait]
impl DnsResolver for FakeDns {
    async fn query_a(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<Vec<Ipv4Addr>, LookupError> {
        self.a.get(qname).cloned().ok_or_else(|| LookupError::Timeout {
            qname: qname.to_string(),
            nameserver,
            timeout,
        })
    }

    async fn query_txt(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<String, LookupError> {
        self.txt.get(qname).cloned().ok_or_else(|| LookupError::Timeout {
            qname: qname.to_string(),
            nameserver,
            timeout,
        })
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn config(geo_tag: Option<&str>) -> Config {
    Config {
        cluster_geo_tag: geo_tag.map(str::to_string),
        peers: vec!["za=10.1.0.53".parse().unwrap()],
        dns_zone: "cloud.example.com".to_string(),
        edge_dns_zone: Some("example.com".to_string()),
        edge_dns_type: ProviderKind::NoOp,
        nameserver_ips: vec![],
        heartbeat_threshold: Duration::from_secs(5 * 60),
        dns_query_timeout: Duration::from_secs(2),
        reconcile_interval: Duration::from_secs(30),
        delegation_interval: Duration::from_secs(300),
        peer_check_interval: None,
        operator_namespace: "gslb-system".to_string(),
        infoblox: None,
    }
}

fn gslb(strategy: serde_json::Value) -> Gslb {
    let rule = |host: &str, service: &str| {
        json!({
            "host": host,
            "http": { "paths": [{
                "path": "/",
                "pathType": "Prefix",
                "backend": { "service": { "name": service, "port": { "name": "http" } } }
            }] }
        })
    };
    let spec: GslbSpec = serde_json::from_value(json!({
        "ingress": { "rules": [
            rule("app.example.com", "frontend-podinfo"),
            rule("notfound.example.com", "non-existing-app"),
            rule("unhealthy.example.com", "unhealthy-app"),
        ] },
        "strategy": strategy
    }))
    .unwrap();
    let mut gslb = Gslb::new(NAME, spec);
    gslb.metadata.namespace = Some(NS.to_string());
    gslb.metadata.uid = Some("0c2b4d5e-8f1a-4b6c-9d7e-3a2f1b0c9d8e".to_string());
    gslb
}

fn cluster() -> Arc<FakeCluster> {
    Arc::new(
        FakeCluster::default()
            .with_service("frontend-podinfo", &["10.244.0.10"], &[])
            .with_service("unhealthy-app", &[], &["10.244.0.11"])
            .with_ingress_ips(&["10.0.0.1", "10.0.0.2"]),
    )
}

fn context(
    config: Config,
    cluster: Arc<FakeCluster>,
    dns: FakeDns,
    metrics: Arc<PrometheusMetrics>,
) -> Context {
    Context {
        config,
        state: cluster.clone(),
        persistence: cluster,
        resolver: Arc::new(dns),
        metrics,
        peer_liveness: Default::default(),
    }
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn round_robin_publishes_local_and_alive_peer_targets() {
    let cluster = cluster();
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let dns = FakeDns::default().with_peer("za", "2026-10-16T11:59:00Z", &[Ipv4Addr::new(10, 1, 0, 1)]);
    let ctx = context(config(Some("eu")), cluster.clone(), dns, metrics.clone());

    let status = apply_at(&gslb(json!({ "type": "roundRobin" })), &ctx, now())
        .await
        .unwrap();

    assert_eq!(
        cluster.record("app.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2", "10.1.0.1"]))
    );
    assert_eq!(
        cluster.record("localtargets.app.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2"]))
    );
    assert_eq!(cluster.record("notfound.example.com"), None);
    assert_eq!(cluster.record("unhealthy.example.com"), None);
    assert_eq!(cluster.record("localtargets.unhealthy.example.com"), None);

    // what peers read back from this cluster
    assert_eq!(
        cluster.record("hostsz.test-gslb.eu.cloud.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2"]))
    );
    assert_eq!(
        cluster.record("heartbeat.test-gslb.eu.cloud.example.com"),
        Some(strings(&["2026-10-16T12:00:00Z"]))
    );

    assert_eq!(
        status.service_health,
        BTreeMap::from([
            ("app.example.com".to_string(), HealthState::Healthy),
            ("notfound.example.com".to_string(), HealthState::NotFound),
            ("unhealthy.example.com".to_string(), HealthState::Unhealthy),
        ])
    );
    assert_eq!(
        status.healthy_records,
        BTreeMap::from([(
            "app.example.com".to_string(),
            strings(&["10.0.0.1", "10.0.0.2", "10.1.0.1"])
        )])
    );
    assert_eq!(status.geo_tag, "eu");
    assert_eq!(*cluster.statuses.lock().unwrap(), vec![status]);
    assert_eq!(*cluster.applied_ingresses.lock().unwrap(), 1);

    let text = metrics.render().unwrap();
    assert!(text.contains("gslb_peer_lookups_total{peer=\"za\",result=\"alive\"} 1"), "{text}");
}

#[tokio::test]
async fn dns_endpoint_is_owned_by_the_gslb() {
    let cluster = cluster();
    let ctx = context(
        config(Some("eu")),
        cluster.clone(),
        FakeDns::default(),
        Arc::new(PrometheusMetrics::new().unwrap()),
    );

    apply_at(&gslb(json!({ "type": "roundRobin" })), &ctx, now())
        .await
        .unwrap();

    let stored = cluster.dns_endpoints.lock().unwrap();
    let endpoint = stored.get(NAME).expect("DNSEndpoint for the Gslb");
    assert_eq!(endpoint.metadata.namespace.as_deref(), Some(NS));
    let owner = &endpoint.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "Gslb");
    assert_eq!(owner.name, NAME);
}

#[tokio::test]
async fn unreachable_and_stale_peers_leave_local_targets() {
    for dns in [
        FakeDns::default(),
        FakeDns::default().with_peer("za", "2026-10-16T11:55:00Z", &[Ipv4Addr::new(10, 1, 0, 1)]),
        FakeDns::default().with_peer("za", "not a timestamp", &[Ipv4Addr::new(10, 1, 0, 1)]),
    ] {
        let cluster = cluster();
        let ctx = context(config(Some("eu")), cluster.clone(), dns, Arc::new(PrometheusMetrics::new().unwrap()));

        apply_at(&gslb(json!({ "type": "roundRobin" })), &ctx, now())
            .await
            .unwrap();

        assert_eq!(
            cluster.record("app.example.com"),
            Some(strings(&["10.0.0.1", "10.0.0.2"]))
        );
    }
}

#[tokio::test]
async fn failover_follows_the_primary_while_it_is_alive() {
    let strategy = json!({ "type": "failover", "primaryGeoTag": "za" });

    let cluster = cluster();
    let alive = FakeDns::default().with_peer(
        "za",
        "2026-10-16T11:59:30Z",
        &[Ipv4Addr::new(10, 1, 0, 1), Ipv4Addr::new(10, 1, 0, 2)],
    );
    let ctx = context(config(Some("eu")), cluster.clone(), alive, Arc::new(PrometheusMetrics::new().unwrap()));
    apply_at(&gslb(strategy.clone()), &ctx, now()).await.unwrap();
    assert_eq!(
        cluster.record("app.example.com"),
        Some(strings(&["10.1.0.1", "10.1.0.2"]))
    );
    assert_eq!(
        cluster.record("localtargets.app.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2"]))
    );

    let cluster = self::cluster();
    let stale = FakeDns::default().with_peer("za", "2026-10-16T11:00:00Z", &[Ipv4Addr::new(10, 1, 0, 1)]);
    let ctx = context(config(Some("eu")), cluster.clone(), stale, Arc::new(PrometheusMetrics::new().unwrap()));
    apply_at(&gslb(strategy), &ctx, now()).await.unwrap();
    assert_eq!(
        cluster.record("app.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2"]))
    );
}

#[tokio::test]
async fn failover_primary_publishes_local_targets() {
    let cluster = cluster();
    let dns = FakeDns::default().with_peer("za", "2026-10-16T11:59:30Z", &[Ipv4Addr::new(10, 1, 0, 1)]);
    let ctx = context(config(Some("eu")), cluster.clone(), dns, Arc::new(PrometheusMetrics::new().unwrap()));

    apply_at(&gslb(json!({ "type": "failover", "primaryGeoTag": "eu" })), &ctx, now())
        .await
        .unwrap();

    assert_eq!(
        cluster.record("app.example.com"),
        Some(strings(&["10.0.0.1", "10.0.0.2"]))
    );
}

#[tokio::test]
async fn without_geo_tag_status_is_unset_and_no_discovery_records() {
    let cluster = cluster();
    let ctx = context(config(None), cluster.clone(), FakeDns::default(), Arc::new(PrometheusMetrics::new().unwrap()));

    let status = apply_at(&gslb(json!({ "type": "roundRobin" })), &ctx, now())
        .await
        .unwrap();

    assert_eq!(status.geo_tag, "unset");
    assert!(cluster
        .published()
        .iter()
        .all(|endpoint| !endpoint.dns_name.starts_with("hostsz.") && !endpoint.dns_name.starts_with("heartbeat.")));
}

#[tokio::test]
async fn missing_ingress_addresses_publish_empty_targets() {
    let cluster = Arc::new(FakeCluster::default().with_service("frontend-podinfo", &["10.244.0.10"], &[]));
    let ctx = context(config(Some("eu")), cluster.clone(), FakeDns::default(), Arc::new(PrometheusMetrics::new().unwrap()));

    let status = apply_at(&gslb(json!({ "type": "roundRobin" })), &ctx, now())
        .await
        .unwrap();

    assert_eq!(cluster.record("localtargets.app.example.com"), Some(vec![]));
    assert_eq!(cluster.record("hostsz.test-gslb.eu.cloud.example.com"), None);
    assert_eq!(status.service_health.get("app.example.com"), Some(&HealthState::Healthy));
}

#[tokio::test]
async fn reconciling_an_unchanged_gslb_is_stable() {
    let cluster = cluster();
    let dns = FakeDns::default().with_peer("za", "2026-10-16T11:59:00Z", &[Ipv4Addr::new(10, 1, 0, 1)]);
    let ctx = context(config(Some("eu")), cluster.clone(), dns, Arc::new(PrometheusMetrics::new().unwrap()));

    let mut gslb = gslb(json!({ "type": "roundRobin" }));
    let status = apply_at(&gslb, &ctx, now()).await.unwrap();
    let first = serde_json::to_vec(&cluster.published()).unwrap();

    gslb.status = Some(status);
    apply_at(&gslb, &ctx, now() + chrono::Duration::seconds(2)).await.unwrap();
    let second = serde_json::to_vec(&cluster.published()).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        cluster.record("heartbeat.test-gslb.eu.cloud.example.com"),
        Some(strings(&["2026-10-16T12:00:00Z"]))
    );
    // the status already matches, so only the first pass wrote it
    assert_eq!(cluster.statuses.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn heartbeat_is_rewritten_once_the_refresh_interval_passed() {
    let cluster = cluster();
    let ctx = context(config(Some("eu")), cluster.clone(), FakeDns::default(), Arc::new(PrometheusMetrics::new().unwrap()));
    let gslb = gslb(json!({ "type": "roundRobin" }));

    apply_at(&gslb, &ctx, now()).await.unwrap();
    apply_at(&gslb, &ctx, now() + chrono::Duration::seconds(29)).await.unwrap();
    assert_eq!(
        cluster.record("heartbeat.test-gslb.eu.cloud.example.com"),
        Some(strings(&["2026-10-16T12:00:00Z"]))
    );

    apply_at(&gslb, &ctx, now() + chrono::Duration::seconds(30)).await.unwrap();
    assert_eq!(
        cluster.record("heartbeat.test-gslb.eu.cloud.example.com"),
        Some(strings(&["2026-10-16T12:00:30Z"]))
    );
}
