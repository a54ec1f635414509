//! Zone delegation through the Infoblox WAPI `zone_delegated` object.

use super::{
    filter_out_delegate_to,
    DelegationError,
    DelegationProvider,
    NameServer,
};
use crate::config::{
    InfobloxConfig,
    ProviderKind,
};
use async_trait::async_trait;
use reqwest::{
    Method,
    StatusCode,
};
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::{
    future::Future,
    time::Duration,
};

/// A WAPI `zone_delegated` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDelegated {
    #[serde(rename = "_ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub fqdn: String,
    #[serde(default)]
    pub delegate_to: Vec<NameServer>,
}

#[derive(Debug, Serialize)]
struct DelegateToUpdate<'a> {
    delegate_to: &'a [NameServer],
}

pub struct InfobloxProvider {
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
    ssl_verify: bool,
}

impl InfobloxProvider {
    pub fn new(config: &InfobloxConfig) -> Result<Self, DelegationError> {
        if config.host.is_empty() || config.username.is_empty() || config.password.is_empty() {
            return Err(DelegationError::Config(
                "infoblox grid host, username and password are required".to_string(),
            ));
        }
        let base_url = format!("https://{}:{}/wapi/v{}/", config.host, config.port, config.version);
        Ok(Self::with_base_url(
            base_url,
            &config.username,
            &config.password,
            config.http_request_timeout,
            config.ssl_verify,
        ))
    }

    /// `base_url` is the WAPI root ending in `/`, e.g. `https://grid:443/wapi/v2.5/`.
    pub fn with_base_url(
        base_url: impl Into<String>,
        username: impl ToString,
        password: impl ToString,
        timeout: Duration,
        ssl_verify: bool,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            timeout,
            ssl_verify,
        }
    }

    fn login(&self) -> Result<Session, DelegationError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(!self.ssl_verify)
            .build()?;
        Ok(Session {
            client,
            base_url: self.base_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    /// Runs `f` inside a WAPI session. The session is logged out whatever `f` returns.
    async fn with_session<T, F, Fut>(&self, f: F) -> Result<T, DelegationError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, DelegationError>>,
    {
        let session = self.login()?;
        let result = f(session.clone()).await;
        session.logout().await;
        result
    }
}

#[async_trait]
impl DelegationProvider for InfobloxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Infoblox
    }

    async fn ensure_delegation(&self, zone: &str, nameservers: &[NameServer]) -> Result<(), DelegationError> {
        if nameservers.is_empty() {
            return Err(DelegationError::Config(format!("no nameservers to delegate {zone} to")));
        }
        let zone = zone.trim_end_matches('.').to_string();
        let nameservers = nameservers.to_vec();

        self.with_session(|session| async move {
            let Some(found) = session.find_zone_delegated(&zone).await? else {
                info!("Creating delegated zone {zone} on infoblox");
                session.create_zone_delegated(&zone, &nameservers).await?;
                return Ok(());
            };

            check_zone_delegated(&found, &zone)?;

            let delegate_to = merge_delegate_to(found.delegate_to.clone(), &nameservers);
            if delegate_to == found.delegate_to {
                debug!("Delegated zone {zone} is up to date");
                return Ok(());
            }

            let reference = found.reference.as_deref().ok_or_else(|| DelegationError::Api {
                status: StatusCode::OK,
                body: format!("zone_delegated {zone} has no _ref"),
            })?;
            info!("Updating delegated zone {zone} with {delegate_to:?}");
            session.update_zone_delegated(reference, &delegate_to).await?;
            Ok::<_, DelegationError>(())
        })
        .await
    }

    async fn close(&self) {}
}

/// A delegated zone returned for a different FQDN means the grid and this operator disagree on the
/// zone.
fn check_zone_delegated(found: &ZoneDelegated, zone: &str) -> Result<(), DelegationError> {
    if !found.fqdn.trim_end_matches('.').eq_ignore_ascii_case(zone) {
        return Err(DelegationError::Config(format!(
            "delegated zone returned from infoblox ({}) does not match requested gslb zone ({zone})",
            found.fqdn
        )));
    }
    Ok(())
}

/// Existing delegates minus our own names, followed by our entries.
fn merge_delegate_to(existing: Vec<NameServer>, ours: &[NameServer]) -> Vec<NameServer> {
    let mut merged = existing;
    for ns in ours {
        merged = filter_out_delegate_to(merged, &ns.name);
    }
    merged.extend(ours.iter().cloned());
    merged
}

#[derive(Clone)]
struct Session {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl Session {
    async fn find_zone_delegated(&self, zone: &str) -> Result<Option<ZoneDelegated>, DelegationError> {
        let found: Vec<ZoneDelegated> = self
            .request(
                Method::GET,
                "zone_delegated",
                &[("fqdn", zone), ("_return_fields", "fqdn,delegate_to")],
                None::<()>,
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn create_zone_delegated(&self, zone: &str, delegate_to: &[NameServer]) -> Result<String, DelegationError> {
        self.request(
            Method::POST,
            "zone_delegated",
            &[],
            Some(ZoneDelegated {
                reference: None,
                fqdn: zone.to_string(),
                delegate_to: delegate_to.to_vec(),
            }),
        )
        .await
    }

    async fn update_zone_delegated(&self, reference: &str, delegate_to: &[NameServer]) -> Result<String, DelegationError> {
        self.request(Method::PUT, reference, &[], Some(DelegateToUpdate { delegate_to }))
            .await
    }

    async fn logout(&self) {
        debug!("Infoblox logout");
        if let Err(err) = self
            .request::<Value, ()>(Method::POST, "logout", &[], None)
            .await
        {
            warn!("Failed to close connection to infoblox: {err}");
        }
    }

    async fn request<R, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<B>,
    ) -> Result<R, DelegationError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        let req = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query);

        let req = if let Some(body) = body { req.json(&body) } else { req };

        let res = req.send().await?;
        let status = res.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DelegationError::Config(format!(
                "infoblox rejected the configured credentials (status={status})"
            )));
        }
        if !status.is_success() {
            return Err(DelegationError::Api {
                status,
                body: res.text().await?,
            });
        }

        let text = res.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|err| DelegationError::Api {
            status,
            body: format!("failed to parse api response: {err}: {text}"),
        })
    }
}
