//! Access to Kubernetes objects. The reconcile engine only sees the [`ClusterState`] and
//! [`Persistence`] traits; [`KubeCluster`] implements both on top of a `kube::Client`.

use crate::resources::{
    DNSEndpoint,
    Gslb,
    GslbStatus,
};
use async_trait::async_trait;
use k8s_openapi::api::{
    core::v1::{
        Endpoints,
        Service,
    },
    networking::v1::Ingress,
};
use kube::{
    api::{
        Patch,
        PatchParams,
        PostParams,
    },
    Api,
    Resource as _,
};
use serde::de::DeserializeOwned;

const FIELD_MANAGER: &str = "gslb.operator.io";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("unable to serialize {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} is missing metadata.{1}")]
    MissingMetadata(&'static str, &'static str),
}

impl StateError {
    /// Optimistic-lock conflicts go away once the caller requeues with a fresh object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Kube(kube::Error::Api(err)) if err.code == 409)
    }
}

/// Read access to the objects a Gslb depends on. Absent objects are `Ok(None)`.
#[async_trait]
pub trait ClusterState: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StateError>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, StateError>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, StateError>;

    /// The DNSEndpoint last published for a Gslb.
    async fn get_dns_endpoint(&self, namespace: &str, name: &str) -> Result<Option<DNSEndpoint>, StateError>;
}

/// Write access for everything the controller produces.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Creates the DNSEndpoint or overwrites the spec of the existing one.
    async fn upsert_endpoint(&self, endpoint: &DNSEndpoint) -> Result<(), StateError>;

    /// Replaces the status subresource of the Gslb.
    async fn update_status(&self, gslb: &Gslb, status: &GslbStatus) -> Result<(), StateError>;

    async fn apply_ingress(&self, ingress: &Ingress) -> Result<(), StateError>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, StateError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

#[async_trait]
impl ClusterState for KubeCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StateError> {
        self.get_opt(namespace, name).await
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, StateError> {
        self.get_opt(namespace, name).await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, StateError> {
        self.get_opt(namespace, name).await
    }

    async fn get_dns_endpoint(&self, namespace: &str, name: &str) -> Result<Option<DNSEndpoint>, StateError> {
        self.get_opt(namespace, name).await
    }
}

#[async_trait]
impl Persistence for KubeCluster {
    async fn upsert_endpoint(&self, endpoint: &DNSEndpoint) -> Result<(), StateError> {
        let name = endpoint
            .meta()
            .name
            .as_deref()
            .ok_or(StateError::MissingMetadata("DNSEndpoint", "name"))?;
        let ns = endpoint
            .meta()
            .namespace
            .as_deref()
            .ok_or(StateError::MissingMetadata("DNSEndpoint", "namespace"))?;
        let api = Api::<DNSEndpoint>::namespaced(self.client.clone(), ns);

        match api.get_opt(name).await? {
            None => {
                info!("Creating DNSEndpoint {ns}/{name}");
                api.create(&PostParams::default(), endpoint).await?;
            }
            Some(mut found) => {
                if found.spec == endpoint.spec {
                    trace!("DNSEndpoint {ns}/{name} is up to date");
                    return Ok(());
                }
                debug!("Updating DNSEndpoint {ns}/{name}");
                found.spec = endpoint.spec.clone();
                api.replace(name, &PostParams::default(), &found).await?;
            }
        }

        Ok(())
    }

    async fn update_status(&self, gslb: &Gslb, status: &GslbStatus) -> Result<(), StateError> {
        let name = gslb
            .meta()
            .name
            .as_deref()
            .ok_or(StateError::MissingMetadata("Gslb", "name"))?;
        let ns = gslb.meta().namespace.as_deref().unwrap_or("default");
        let api = Api::<Gslb>::namespaced(self.client.clone(), ns);

        let mut updated = gslb.clone();
        updated.status = Some(status.clone());
        let data = serde_json::to_vec(&updated).map_err(|source| StateError::Serialize { kind: "Gslb", source })?;

        api.replace_status(name, &PostParams::default(), data).await?;
        Ok(())
    }

    async fn apply_ingress(&self, ingress: &Ingress) -> Result<(), StateError> {
        let name = ingress
            .meta()
            .name
            .as_deref()
            .ok_or(StateError::MissingMetadata("Ingress", "name"))?;
        let ns = ingress
            .meta()
            .namespace
            .as_deref()
            .ok_or(StateError::MissingMetadata("Ingress", "namespace"))?;

        Api::<Ingress>::namespaced(self.client.clone(), ns)
            .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(ingress))
            .await?;
        Ok(())
    }
}
