//! Operator configuration.
//!
//! Command line flags (with environment fallbacks) are parsed into [`ControllerArgs`] and resolved
//! once into a validated [`Config`] before the controller starts.

use crate::resources::GEO_TAG_UNSET;
use std::{
    net::{
        Ipv4Addr,
        SocketAddr,
        ToSocketAddrs as _,
    },
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid peer cluster {0:?}, expected <geo-tag>=<host>[:<port>]")]
    InvalidPeer(String),
    #[error("unable to resolve nameserver address {0:?}")]
    UnresolvableNameserver(String),
    #[error("{0} is required when the edge DNS type is {1}")]
    Missing(&'static str, &'static str),
}

/// Zone delegation backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    Infoblox,
    Route53,
    Ns1,
    #[default]
    #[value(name = "noop")]
    NoOp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Infoblox => "infoblox",
            ProviderKind::Route53 => "route53",
            ProviderKind::Ns1 => "ns1",
            ProviderKind::NoOp => "noop",
        }
    }
}

/// A sibling cluster serving the same Gslb resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCluster {
    pub geo_tag: String,
    /// Nameserver of the peer that serves its heartbeat and target records.
    pub dns_endpoint: SocketAddr,
}

impl PeerCluster {
    pub fn heartbeat_fqdn(&self, gslb_name: &str, zone: &str) -> String {
        heartbeat_fqdn(gslb_name, &self.geo_tag, zone)
    }

    pub fn targets_fqdn(&self, gslb_name: &str, zone: &str) -> String {
        targets_fqdn(gslb_name, &self.geo_tag, zone)
    }
}

impl FromStr for PeerCluster {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (geo_tag, endpoint) = s
            .trim()
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidPeer(s.to_string()))?;
        if geo_tag.is_empty() || endpoint.is_empty() {
            return Err(ConfigError::InvalidPeer(s.to_string()));
        }

        let dns_endpoint = if let Ok(addr) = endpoint.parse::<SocketAddr>() {
            addr
        } else if let Ok(ip) = endpoint.parse::<Ipv4Addr>() {
            SocketAddr::from((ip, DEFAULT_DNS_PORT))
        } else {
            let with_port = if endpoint.contains(':') {
                endpoint.to_string()
            } else {
                format!("{endpoint}:{DEFAULT_DNS_PORT}")
            };
            with_port
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| ConfigError::UnresolvableNameserver(endpoint.to_string()))?
        };

        Ok(PeerCluster {
            geo_tag: geo_tag.to_string(),
            dns_endpoint,
        })
    }
}

pub fn heartbeat_fqdn(gslb_name: &str, geo_tag: &str, zone: &str) -> String {
    format!("heartbeat.{gslb_name}.{geo_tag}.{zone}")
}

pub fn targets_fqdn(gslb_name: &str, geo_tag: &str, zone: &str) -> String {
    format!("hostsz.{gslb_name}.{geo_tag}.{zone}")
}

/// FQDN under which a cluster's nameserver is delegated the gslb zone.
pub fn nameserver_fqdn(geo_tag: &str, edge_zone: &str) -> String {
    format!("gslb-ns-{geo_tag}.{edge_zone}")
}

#[derive(Debug, Clone, clap::Args)]
pub struct ControllerArgs {
    #[clap(long, env = "CLUSTER_GEO_TAG", help = "Geo tag identifying this cluster")]
    pub cluster_geo_tag: Option<String>,

    #[clap(
        long = "peer",
        env = "EXT_GSLB_CLUSTERS",
        value_delimiter = ',',
        help = "Peer clusters as <geo-tag>=<nameserver>[:<port>], comma separated"
    )]
    pub peers: Vec<PeerCluster>,

    #[clap(long, env = "DNS_ZONE", help = "Zone served by the gslb nameservers (e.g. cloud.example.com)")]
    pub dns_zone: String,

    #[clap(long, env = "EDGE_DNS_ZONE", help = "Parent zone the gslb zone is delegated from")]
    pub edge_dns_zone: Option<String>,

    #[clap(long, env = "EDGE_DNS_TYPE", value_enum, default_value_t = ProviderKind::NoOp)]
    pub edge_dns_type: ProviderKind,

    #[clap(
        long = "nameserver-ip",
        env = "NAMESERVER_IPS",
        value_delimiter = ',',
        help = "Externally reachable addresses of this cluster's gslb nameserver"
    )]
    pub nameserver_ips: Vec<Ipv4Addr>,

    #[clap(long, env = "HEARTBEAT_THRESHOLD", default_value = "5m", value_parser = humantime::parse_duration)]
    pub heartbeat_threshold: Duration,

    #[clap(long, env = "DNS_QUERY_TIMEOUT", default_value = "2s", value_parser = humantime::parse_duration)]
    pub dns_query_timeout: Duration,

    #[clap(long, env = "RECONCILE_INTERVAL", default_value = "30s", value_parser = humantime::parse_duration)]
    pub reconcile_interval: Duration,

    #[clap(long, env = "DELEGATION_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub delegation_interval: Duration,

    #[clap(
        long,
        env = "PEER_CHECK_INTERVAL",
        help = "Check peer heartbeats in the background and reconcile on liveness changes",
        value_parser = humantime::parse_duration
    )]
    pub peer_check_interval: Option<Duration>,

    #[clap(long, env = "POD_NAMESPACE", default_value = "gslb-system")]
    pub operator_namespace: String,

    #[clap(flatten)]
    pub infoblox: InfobloxArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct InfobloxArgs {
    #[clap(long, env = "INFOBLOX_GRID_HOST")]
    pub infoblox_grid_host: Option<String>,

    #[clap(long, env = "INFOBLOX_WAPI_VERSION", default_value = "2.5")]
    pub infoblox_wapi_version: String,

    #[clap(long, env = "INFOBLOX_WAPI_PORT", default_value_t = 443)]
    pub infoblox_wapi_port: u16,

    #[clap(long, env = "INFOBLOX_WAPI_USERNAME")]
    pub infoblox_wapi_username: Option<String>,

    #[clap(long, env = "INFOBLOX_WAPI_PASSWORD", hide_env_values = true)]
    pub infoblox_wapi_password: Option<String>,

    #[clap(long, env = "INFOBLOX_HTTP_REQUEST_TIMEOUT", default_value = "20s", value_parser = humantime::parse_duration)]
    pub infoblox_http_request_timeout: Duration,

    #[clap(long, env = "INFOBLOX_SSL_VERIFY", default_value_t = true, action = clap::ArgAction::Set)]
    pub infoblox_ssl_verify: bool,
}

#[derive(Debug, Clone)]
pub struct InfobloxConfig {
    pub host: String,
    pub version: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub http_request_timeout: Duration,
    pub ssl_verify: bool,
}

/// Resolved operator configuration, shared read-only by every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_geo_tag: Option<String>,
    pub peers: Vec<PeerCluster>,
    pub dns_zone: String,
    pub edge_dns_zone: Option<String>,
    pub edge_dns_type: ProviderKind,
    pub nameserver_ips: Vec<Ipv4Addr>,
    pub heartbeat_threshold: Duration,
    pub dns_query_timeout: Duration,
    pub reconcile_interval: Duration,
    pub delegation_interval: Duration,
    pub peer_check_interval: Option<Duration>,
    pub operator_namespace: String,
    pub infoblox: Option<InfobloxConfig>,
}

impl Config {
    /// The geo tag as reported in the Gslb status.
    pub fn geo_tag_or_unset(&self) -> &str {
        self.cluster_geo_tag.as_deref().unwrap_or(GEO_TAG_UNSET)
    }

    /// How long a published heartbeat is reused before it is rewritten. Bounded by half the
    /// threshold so peers never see an expired value from a live cluster.
    pub fn heartbeat_refresh(&self) -> Duration {
        self.reconcile_interval.min(self.heartbeat_threshold / 2)
    }

    /// Zone without trailing dot.
    pub fn zone(&self) -> &str {
        self.dns_zone.trim_end_matches('.')
    }

    /// This cluster's nameserver FQDN, if geo tag and edge zone are known.
    pub fn own_nameserver_fqdn(&self) -> Option<String> {
        let geo_tag = self.cluster_geo_tag.as_deref()?;
        let edge_zone = self.edge_dns_zone.as_deref()?;
        Some(nameserver_fqdn(geo_tag, edge_zone.trim_end_matches('.')))
    }

    pub fn peer_nameserver_fqdns(&self) -> Vec<String> {
        let Some(edge_zone) = self.edge_dns_zone.as_deref() else {
            return vec![];
        };
        self.peers
            .iter()
            .map(|peer| nameserver_fqdn(&peer.geo_tag, edge_zone.trim_end_matches('.')))
            .collect()
    }
}

impl TryFrom<ControllerArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: ControllerArgs) -> Result<Self, Self::Error> {
        let cluster_geo_tag = args.cluster_geo_tag.filter(|tag| !tag.is_empty());

        let mut peers: Vec<PeerCluster> = Vec::with_capacity(args.peers.len());
        for peer in args.peers {
            if cluster_geo_tag.as_deref() == Some(peer.geo_tag.as_str()) {
                warn!("Ignoring peer cluster {:?}: it has this cluster's own geo tag", peer.geo_tag);
                continue;
            }
            if peers.iter().any(|it| it.geo_tag == peer.geo_tag) {
                warn!("Ignoring duplicate peer cluster {:?}", peer.geo_tag);
                continue;
            }
            peers.push(peer);
        }

        let provider = args.edge_dns_type;
        if provider != ProviderKind::NoOp {
            if cluster_geo_tag.is_none() {
                return Err(ConfigError::Missing("CLUSTER_GEO_TAG", provider.as_str()));
            }
            if args.edge_dns_zone.is_none() {
                return Err(ConfigError::Missing("EDGE_DNS_ZONE", provider.as_str()));
            }
            if args.nameserver_ips.is_empty() {
                return Err(ConfigError::Missing("NAMESERVER_IPS", provider.as_str()));
            }
        }

        let infoblox = if provider == ProviderKind::Infoblox {
            let InfobloxArgs {
                infoblox_grid_host,
                infoblox_wapi_version,
                infoblox_wapi_port,
                infoblox_wapi_username,
                infoblox_wapi_password,
                infoblox_http_request_timeout,
                infoblox_ssl_verify,
            } = args.infoblox;
            Some(InfobloxConfig {
                host: infoblox_grid_host.ok_or(ConfigError::Missing("INFOBLOX_GRID_HOST", "infoblox"))?,
                version: infoblox_wapi_version,
                port: infoblox_wapi_port,
                username: infoblox_wapi_username.ok_or(ConfigError::Missing("INFOBLOX_WAPI_USERNAME", "infoblox"))?,
                password: infoblox_wapi_password.ok_or(ConfigError::Missing("INFOBLOX_WAPI_PASSWORD", "infoblox"))?,
                http_request_timeout: infoblox_http_request_timeout,
                ssl_verify: infoblox_ssl_verify,
            })
        } else {
            None
        };

        Ok(Config {
            cluster_geo_tag,
            peers,
            dns_zone: args.dns_zone,
            edge_dns_zone: args.edge_dns_zone,
            edge_dns_type: provider,
            nameserver_ips: args.nameserver_ips,
            heartbeat_threshold: args.heartbeat_threshold,
            dns_query_timeout: args.dns_query_timeout,
            reconcile_interval: args.reconcile_interval,
            delegation_interval: args.delegation_interval,
            peer_check_interval: args.peer_check_interval,
            operator_namespace: args.operator_namespace,
            infoblox,
        })
    }
}
