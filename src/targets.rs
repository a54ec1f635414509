use crate::cluster::{
    ClusterState,
    StateError,
};
use k8s_openapi::api::networking::v1::Ingress;
use std::net::{
    IpAddr,
    Ipv4Addr,
};

/// Appends `ips` to `targets`, skipping addresses already present.
pub fn extend_unique(targets: &mut Vec<Ipv4Addr>, ips: impl IntoIterator<Item = Ipv4Addr>) {
    for ip in ips {
        if !targets.contains(&ip) {
            targets.push(ip);
        }
    }
}

pub fn to_strings(targets: &[Ipv4Addr]) -> Vec<String> {
    targets.iter().map(ToString::to_string).collect()
}

/// Reads the load balancer addresses assigned to this cluster's Gslb ingress.
pub struct LocalTargetCollector<'a> {
    state: &'a dyn ClusterState,
}

impl<'a> LocalTargetCollector<'a> {
    pub fn new(state: &'a dyn ClusterState) -> Self {
        Self { state }
    }

    /// Empty while the ingress does not exist or has no addresses yet.
    pub async fn local_targets(&self, namespace: &str, name: &str) -> Result<Vec<Ipv4Addr>, StateError> {
        let Some(ingress) = self.state.get_ingress(namespace, name).await? else {
            info!("Can't find gslb ingress {namespace}/{name}");
            return Ok(vec![]);
        };
        Ok(ingress_ips(&ingress, namespace, name))
    }
}

fn ingress_ips(ingress: &Ingress, namespace: &str, name: &str) -> Vec<Ipv4Addr> {
    let entries = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());

    let mut targets = Vec::new();
    for entry in entries.into_iter().flatten() {
        match entry.ip.as_deref().map(str::parse::<IpAddr>) {
            Some(Ok(IpAddr::V4(ip))) => extend_unique(&mut targets, [ip]),
            Some(Ok(IpAddr::V6(ip))) => {
                debug!("Ignoring ipv6 load balancer address {ip} of ingress {namespace}/{name}");
            }
            Some(Err(_)) => {
                warn!("Invalid load balancer ip {:?} on ingress {namespace}/{name}", entry.ip);
            }
            None => {
                debug!(hostname = ?entry.hostname, "Ignoring load balancer entry without ip on ingress {namespace}/{name}");
            }
        }
    }

    if targets.is_empty() {
        debug!("Ingress {namespace}/{name} has no load balancer ips yet");
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingress(status: serde_json::Value) -> Ingress {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": "test-gslb", "namespace": "test-gslb" },
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn keeps_order_and_removes_duplicates() {
        let ingress = ingress(serde_json::json!({ "loadBalancer": { "ingress": [
            { "ip": "10.0.0.2" },
            { "ip": "10.0.0.1" },
            { "ip": "10.0.0.2" },
            { "ip": "fd00::1" },
            { "hostname": "lb.example.com" },
            { "ip": "not-an-ip" }
        ] } }));

        assert_eq!(
            ingress_ips(&ingress, "test-gslb", "test-gslb"),
            vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1)]
        );
    }

    #[test]
    fn no_status_yet_is_empty() {
        assert!(ingress_ips(&ingress(serde_json::json!({})), "ns", "name").is_empty());
        assert!(ingress_ips(&ingress(serde_json::json!({ "loadBalancer": {} })), "ns", "name").is_empty());
    }

    #[test]
    fn extend_unique_preserves_first_occurrence() {
        let mut targets = vec![Ipv4Addr::new(10, 0, 0, 1)];
        extend_unique(
            &mut targets,
            [Ipv4Addr::new(10, 1, 0, 1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 1, 0, 1)],
        );
        assert_eq!(targets, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 1, 0, 1)]);
    }
}
