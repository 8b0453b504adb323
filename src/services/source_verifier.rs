//! Checks that a notification came from a host inside a gateway's trusted
//! domain: the source IP must reverse-resolve to a name in the domain, and
//! that name must forward-resolve back to the same IP.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// PTR lookup. `None` when the address has no name.
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String>;

    async fn forward_lookup(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the operating system's resolver.
pub struct SystemDnsResolver;

#[async_trait]
impl DnsResolver for SystemDnsResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        match tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await {
            Ok(Ok(host)) => Some(host),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "reverse lookup failed");
                None
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "reverse lookup task failed");
                None
            }
        }
    }

    async fn forward_lookup(&self, host: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
            Err(e) => {
                debug!(host = %host, error = %e, "forward lookup failed");
                Vec::new()
            }
        }
    }
}

pub struct NotificationSourceVerifier {
    resolver: Arc<dyn DnsResolver>,
}

impl NotificationSourceVerifier {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemDnsResolver))
    }

    pub async fn verify(&self, source_ip: Option<IpAddr>, trusted_domain: &str) -> bool {
        let Some(ip) = source_ip else {
            warn!(trusted_domain = %trusted_domain, "notification has no source address");
            return false;
        };

        let Some(host) = self.resolver.reverse_lookup(ip).await else {
            warn!(ip = %ip, trusted_domain = %trusted_domain, "notification source has no reverse DNS");
            return false;
        };

        if !host_in_domain(&host, trusted_domain) {
            warn!(ip = %ip, host = %host, trusted_domain = %trusted_domain, "notification source outside trusted domain");
            return false;
        }

        let forward = self.resolver.forward_lookup(&host).await;
        if !forward.contains(&ip) {
            warn!(ip = %ip, host = %host, "notification source reverse DNS does not resolve back");
            return false;
        }

        debug!(ip = %ip, host = %host, "notification source verified");
        true
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// `host` equals `domain` or is a subdomain of it.
pub fn host_in_domain(host: &str, domain: &str) -> bool {
    let host = normalize(host);
    let domain = normalize(domain);
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{}", domain))
}
