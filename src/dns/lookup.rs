use async_trait::async_trait;
use rsdns::{
    clients::{
        tokio::Client,
        ClientConfig,
    },
    records::{
        data::{
            Txt,
            A,
        },
        Class,
    },
};
use std::{
    future::Future,
    net::{
        Ipv4Addr,
        SocketAddr,
    },
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("dns query for {qname} at {nameserver} failed: {source}")]
    Query {
        qname: String,
        nameserver: SocketAddr,
        #[source]
        source: rsdns::Error,
    },
    #[error("dns query for {qname} at {nameserver} timed out after {timeout:?}")]
    Timeout {
        qname: String,
        nameserver: SocketAddr,
        timeout: Duration,
    },
    #[error("no {ty} record for {qname} at {nameserver}")]
    NoRecords {
        qname: String,
        nameserver: SocketAddr,
        ty: &'static str,
    },
}

/// DNS queries against a specific nameserver, each bounded by a timeout.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn query_a(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<Vec<Ipv4Addr>, LookupError>;

    /// Returns the first TXT string of the answer.
    async fn query_txt(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<String, LookupError>;
}

/// Bounds `query` by `timeout` whatever resolver runs it.
pub async fn within<T>(
    timeout: Duration,
    nameserver: SocketAddr,
    qname: &str,
    query: impl Future<Output = Result<T, LookupError>>,
) -> Result<T, LookupError> {
    tokio::time::timeout(timeout, query)
        .await
        .map_err(|_| LookupError::Timeout {
            qname: qname.to_string(),
            nameserver,
            timeout,
        })?
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RsdnsResolver;

impl RsdnsResolver {
    async fn client(nameserver: SocketAddr, qname: &str) -> Result<Client, LookupError> {
        let config = ClientConfig::with_nameserver(nameserver);
        Client::new(config).await.map_err(|source| LookupError::Query {
            qname: qname.to_string(),
            nameserver,
            source,
        })
    }
}

#[async_trait]
impl DnsResolver for RsdnsResolver {
    async fn query_a(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<Vec<Ipv4Addr>, LookupError> {
        debug!(?qname, %nameserver, "A record lookup...");

        let query = async {
            let mut client = Self::client(nameserver, qname).await?;
            client
                .query_rrset::<A>(qname, Class::IN)
                .await
                .map_err(|source| LookupError::Query {
                    qname: qname.to_string(),
                    nameserver,
                    source,
                })
        };

        let rrset = within(timeout, nameserver, qname, query).await?;

        Ok(rrset.rdata.iter().map(|a| a.address).collect())
    }

    async fn query_txt(&self, nameserver: SocketAddr, qname: &str, timeout: Duration) -> Result<String, LookupError> {
        debug!(?qname, %nameserver, "TXT record lookup...");

        let query = async {
            let mut client = Self::client(nameserver, qname).await?;
            client
                .query_rrset::<Txt>(qname, Class::IN)
                .await
                .map_err(|source| LookupError::Query {
                    qname: qname.to_string(),
                    nameserver,
                    source,
                })
        };

        let rrset = within(timeout, nameserver, qname, query).await?;

        rrset
            .rdata
            .first()
            .map(|txt| String::from_utf8_lossy(&txt.text).to_string())
            .ok_or_else(|| LookupError::NoRecords {
                qname: qname.to_string(),
                nameserver,
                ty: "TXT",
            })
    }
}
