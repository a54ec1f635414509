#[macro_use]
extern crate tracing;

use chrono::Utc;
use clap::Parser;
use eyre::Result;
use futures::StreamExt as _;
use gslb_operator::{
    cluster::KubeCluster,
    config::{
        Config,
        ControllerArgs,
    },
    context::Context,
    delegation,
    dns::{
        lookup::RsdnsResolver,
        peers::PeerResolver,
    },
    dns_check,
    metrics::{
        NoopMetrics,
        PrometheusMetrics,
    },
    reconcile::{
        self,
        ReconcileError,
    },
    resources::{
        DNSEndpoint,
        Gslb,
    },
    services,
    targets::to_strings,
};
use k8s_openapi::api::{
    core::v1::{
        Endpoints,
        Service,
    },
    networking::v1::Ingress,
};
use kube::{
    runtime::{
        controller::Action,
        watcher,
        Controller,
    },
    Api,
    CustomResourceExt as _,
};
use std::{
    sync::Arc,
    time::Duration,
};

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Print the Gslb CRD as YAML
    Crds,
    /// Run the Gslb controller and the zone delegation loop
    Controller(ControllerArgs),
    /// Resolve every configured peer once for a Gslb and print what it advertises
    CheckPeers(ArgsCheckPeers),
}

#[derive(Parser)]
struct ArgsCheckPeers {
    #[clap(long, help = "Name of the Gslb resource")]
    gslb: String,

    #[clap(flatten)]
    controller: ControllerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().expect("color_eyre init");
    tracing_subscriber::fmt::init();

    match Args::parse() {
        Args::Crds => {
            let yaml = serde_yaml::to_string(&Gslb::crd()).expect("Failed to serialize CRD");
            print!("{yaml}")
        }
        Args::Controller(args) => {
            run_controller(Config::try_from(args)?).await?;
        }
        Args::CheckPeers(args) => {
            check_peers(&args.gslb, Config::try_from(args.controller)?).await;
        }
    }

    Ok(())
}

async fn run_controller(config: Config) -> Result<()> {
    let client = kube::Client::try_default().await?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let metrics = Arc::new(PrometheusMetrics::new()?);

    let provider = delegation::provider(&config, cluster.clone())?;
    let delegation = tokio::spawn(delegation::run_delegation(
        provider.clone(),
        config.zone().to_string(),
        delegation::own_nameservers(&config),
        config.delegation_interval,
    ));

    let peer_check_interval = config.peer_check_interval;
    let context = Arc::new(Context {
        config,
        state: cluster.clone(),
        persistence: cluster,
        resolver: Arc::new(RsdnsResolver),
        metrics,
        peer_liveness: Default::default(),
    });

    let controller = Controller::new(Api::<Gslb>::all(client.clone()), watcher::Config::default());
    let gslbs = controller.store();
    let peer_changes = dns_check::start_peer_check(context.clone(), gslbs.clone(), peer_check_interval);

    info!(
        geo_tag = context.config.geo_tag_or_unset(),
        peers = context.config.peers.len(),
        "Starting controller"
    );

    let service_gslbs = gslbs.clone();
    controller
        .owns(Api::<DNSEndpoint>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Ingress>::all(client.clone()), watcher::Config::default())
        // health follows the services and endpoints backing the ingress rules
        .watches(Api::<Service>::all(client.clone()), watcher::Config::default(), move |svc| {
            services::gslbs_for_service(&service_gslbs, &svc)
        })
        .watches(Api::<Endpoints>::all(client), watcher::Config::default(), move |endpoints| {
            services::gslbs_for_endpoints(&gslbs, &endpoints)
        })
        .reconcile_on(peer_changes)
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|msg| async move {
            match msg {
                Ok((gslb, _)) => debug!("Reconciled: {gslb}"),
                Err(err) => warn!("Reconcile failed: {err}"),
            }
        })
        .await;

    info!("Controller stopped");

    delegation.abort();
    provider.close().await;

    Ok(())
}

async fn reconcile(gslb: Arc<Gslb>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    match reconcile::apply(gslb, ctx).await {
        Err(err) if err.is_conflict() => {
            warn!("Conflict when reconciling object: {err}");
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        result => result,
    }
}

fn error_policy(_gslb: Arc<Gslb>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!("Error reconciling: {:?}", err);
    Action::requeue(Duration::from_secs(15))
}

async fn check_peers(gslb: &str, config: Config) {
    let resolver = RsdnsResolver;
    let peers = PeerResolver::new(
        &resolver,
        &NoopMetrics,
        config.zone(),
        config.heartbeat_threshold,
        config.dns_query_timeout,
    );

    for peer in peers.resolve_all(&config.peers, gslb, Utc::now()).await {
        println!(
            "{}\t{}\t{}",
            peer.geo_tag,
            peer.liveness.as_str(),
            to_strings(&peer.targets).join(",")
        );
    }
}
