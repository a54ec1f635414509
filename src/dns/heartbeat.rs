//! Split brain guard: a peer is only trusted while the timestamp in its heartbeat TXT record is
//! younger than the freshness threshold.

use super::lookup::{
    within,
    DnsResolver,
    LookupError,
};
use crate::config::PeerCluster;
use chrono::{
    prelude::*,
    SecondsFormat,
};
use std::time::Duration;

pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("heartbeat {qname} has malformed timestamp {value:?}")]
    Malformed { qname: String, value: String },
}

/// Heartbeat value written for `now`.
pub fn heartbeat_value(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses RFC3339 and the looser `YYYY-MM-DD[T ]HH:MM:SS` (taken as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_matches('"').trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// A heartbeat exactly `threshold` old is already expired. Timestamps from the future are fresh.
pub fn is_fresh(timestamp: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match chrono::Duration::from_std(threshold) {
        Ok(threshold) => now.signed_duration_since(timestamp) < threshold,
        Err(_) => true,
    }
}

/// Keeps the `published` heartbeat until it is `refresh` old, so reconciles in between republish
/// the same value. A published timestamp from the future is replaced.
pub fn heartbeat_to_publish(published: Option<DateTime<Utc>>, now: DateTime<Utc>, refresh: Duration) -> DateTime<Utc> {
    match published {
        Some(published) if published <= now && is_fresh(published, now, refresh) => published,
        _ => now,
    }
}

pub struct HeartbeatValidator<'a> {
    resolver: &'a dyn DnsResolver,
    zone: &'a str,
    threshold: Duration,
    timeout: Duration,
}

impl<'a> HeartbeatValidator<'a> {
    pub fn new(resolver: &'a dyn DnsResolver, zone: &'a str, threshold: Duration, timeout: Duration) -> Self {
        Self {
            resolver,
            zone,
            threshold,
            timeout,
        }
    }

    /// `Ok(false)` for a readable but expired heartbeat, `Err` if it can't be read at all.
    pub async fn is_alive(&self, peer: &PeerCluster, gslb_name: &str, now: DateTime<Utc>) -> Result<bool, HeartbeatError> {
        let qname = peer.heartbeat_fqdn(gslb_name, self.zone);
        let value = within(
            self.timeout,
            peer.dns_endpoint,
            &qname,
            self.resolver.query_txt(peer.dns_endpoint, &qname, self.timeout),
        )
        .await?;

        let Some(timestamp) = parse_timestamp(&value) else {
            return Err(HeartbeatError::Malformed { qname, value });
        };

        let fresh = is_fresh(timestamp, now, self.threshold);
        if !fresh {
            warn!(
                peer = %peer.geo_tag,
                %timestamp,
                "Split brain TXT record {qname} expired the time threshold: ({:?})",
                self.threshold
            );
        }
        Ok(fresh)
    }
}
