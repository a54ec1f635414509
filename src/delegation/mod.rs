//! Delegation of the gslb zone to this cluster's nameserver.
//!
//! The backend is picked once from [`ProviderKind`]; everything else only sees the
//! [`DelegationProvider`] trait object.

pub mod external_dns;
pub mod infoblox;

use crate::{
    cluster::{
        Persistence,
        StateError,
    },
    config::{
        Config,
        ProviderKind,
    },
};
use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameServer {
    pub address: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("infoblox api error: status={status}, body={body:?}")]
    Api { status: reqwest::StatusCode, body: String },
    #[error(transparent)]
    State(#[from] StateError),
}

impl DelegationError {
    /// Configuration errors won't go away by retrying.
    pub fn is_config(&self) -> bool {
        matches!(self, DelegationError::Config(_))
    }
}

#[async_trait]
pub trait DelegationProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Makes `nameservers` delegates of `zone`. Applying the same delegation twice changes nothing.
    async fn ensure_delegation(&self, zone: &str, nameservers: &[NameServer]) -> Result<(), DelegationError>;

    async fn close(&self);
}

/// Used when no edge DNS provider is configured.
#[derive(Debug, Default)]
pub struct NoOpProvider;

#[async_trait]
impl DelegationProvider for NoOpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NoOp
    }

    async fn ensure_delegation(&self, zone: &str, _nameservers: &[NameServer]) -> Result<(), DelegationError> {
        trace!(?zone, "No edge DNS provider configured, skipping delegation");
        Ok(())
    }

    async fn close(&self) {}
}

/// Builds the provider selected by the configuration.
pub fn provider(config: &Config, persistence: Arc<dyn Persistence>) -> Result<Arc<dyn DelegationProvider>, DelegationError> {
    Ok(match config.edge_dns_type {
        ProviderKind::Infoblox => {
            let infoblox = config
                .infoblox
                .as_ref()
                .ok_or_else(|| DelegationError::Config("infoblox settings are missing".to_string()))?;
            Arc::new(infoblox::InfobloxProvider::new(infoblox)?)
        }
        kind @ (ProviderKind::Route53 | ProviderKind::Ns1) => {
            Arc::new(external_dns::ExternalDnsProvider::new(kind, config, persistence))
        }
        ProviderKind::NoOp => Arc::new(NoOpProvider),
    })
}

/// Removes every nameserver named `fqdn`, keeping the order of the others.
pub fn filter_out_delegate_to(delegate_to: Vec<NameServer>, fqdn: &str) -> Vec<NameServer> {
    delegate_to.into_iter().filter(|ns| ns.name != fqdn).collect()
}

/// This cluster's delegation entries: one per exposed nameserver address.
pub fn own_nameservers(config: &Config) -> Vec<NameServer> {
    let Some(name) = config.own_nameserver_fqdn() else {
        return vec![];
    };
    config
        .nameserver_ips
        .iter()
        .map(|ip| NameServer {
            address: ip.to_string(),
            name: name.clone(),
        })
        .collect()
}

/// Keeps the delegation in place, independent from the per-Gslb reconcile loop.
pub async fn run_delegation(provider: Arc<dyn DelegationProvider>, zone: String, nameservers: Vec<NameServer>, interval: Duration) {
    if provider.kind() == ProviderKind::NoOp {
        info!("No edge DNS provider configured, zone delegation is not managed");
        return;
    }

    let mut timer = tokio::time::interval(interval);
    loop {
        timer.tick().await;
        match provider.ensure_delegation(&zone, &nameservers).await {
            Ok(()) => debug!(provider = provider.kind().as_str(), "Zone delegation for {zone} is in place"),
            Err(err) if err.is_config() => {
                error!(provider = provider.kind().as_str(), "Unable to delegate zone {zone}: {err}")
            }
            Err(err) => warn!(
                provider = provider.kind().as_str(),
                "Zone delegation for {zone} failed, retrying in {interval:?}: {err}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(address: &str, name: &str) -> NameServer {
        NameServer {
            address: address.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn filter_out_delegate_to_removes_exact_matches_only() {
        let delegate_to = vec![
            ns("10.0.0.1", "gslb-ns-eu.example.com"),
            ns("10.0.0.2", "gslb-ns-eu.example.com"),
            ns("10.0.0.3", "gslb-ns-eu.example.com"),
            ns("10.1.0.1", "gslb-ns-za.example.com"),
            ns("10.1.0.2", "gslb-ns-za.example.com"),
            ns("10.1.0.3", "gslb-ns-za.example.com"),
        ];

        assert_eq!(
            filter_out_delegate_to(delegate_to.clone(), "gslb-ns-eu.example.com"),
            vec![
                ns("10.1.0.1", "gslb-ns-za.example.com"),
                ns("10.1.0.2", "gslb-ns-za.example.com"),
                ns("10.1.0.3", "gslb-ns-za.example.com"),
            ]
        );
        assert_eq!(
            filter_out_delegate_to(delegate_to.clone(), "gslb-ns-eu.example.com."),
            delegate_to
        );
    }

    #[tokio::test]
    async fn noop_provider_always_succeeds() {
        let provider = NoOpProvider;
        provider
            .ensure_delegation("cloud.example.com", &[ns("10.0.0.1", "gslb-ns-eu.example.com")])
            .await
            .unwrap();
        provider.close().await;
        assert_eq!(provider.kind(), ProviderKind::NoOp);
    }
}
