/*!
 * Address resolution for advertised hostnames.
 *
 * Advertised hostnames are resolved to a connectable address immediately
 * before each connection attempt, never once at discovery time, so address
 * changes (DHCP renewal, device restart) are picked up on reconnect.
 */
use std::fmt::Debug;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{HostnameResolutionEvent, ServiceDaemon};
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};

/// Default timeout for a single resolution attempt
const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolution of an advertised hostname to a connectable address.
///
/// Implementations must treat failures as non-fatal: the message channel
/// retries resolution on its reconnect schedule.
#[async_trait]
pub trait Resolve: Send + Sync + Debug {
    /// Resolve a hostname to a single connectable address
    async fn resolve(&self, hostname: &str) -> Result<IpAddr>;
}

/// Multicast-DNS hostname resolver
pub struct MdnsResolver {
    /// The mDNS daemon used for resolution queries
    daemon: ServiceDaemon,
    /// Timeout for a single resolution attempt
    timeout: Duration,
}

impl Debug for MdnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MdnsResolver {
    /// Create a new mDNS resolver with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_RESOLUTION_TIMEOUT)
    }

    /// Create a new mDNS resolver with a specific timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| BridgeError::Resolution(format!("Failed to create mDNS daemon: {}", e)))?;

        Ok(Self { daemon, timeout })
    }

    /// Normalize a hostname to the fully qualified form the daemon expects
    fn normalize(hostname: &str) -> String {
        if hostname.ends_with('.') {
            hostname.to_string()
        } else {
            format!("{}.", hostname)
        }
    }
}

#[async_trait]
impl Resolve for MdnsResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr> {
        let hostname = Self::normalize(hostname);
        let timeout_ms = self.timeout.as_millis() as u64;

        let receiver = self
            .daemon
            .resolve_hostname(&hostname, Some(timeout_ms))
            .map_err(|e| BridgeError::Resolution(format!("{}: {}", hostname, e)))?;

        loop {
            match receiver.recv_async().await {
                Ok(HostnameResolutionEvent::AddressesFound(name, addresses)) => {
                    // Prefer IPv4, matching what the controllers listen on
                    let address = addresses
                        .iter()
                        .find(|a| a.is_ipv4())
                        .or_else(|| addresses.iter().next())
                        .copied();

                    if let Some(address) = address {
                        debug!("Resolved {} to {}", name, address);
                        let _ = self.daemon.stop_resolve_hostname(&hostname);
                        return Ok(address);
                    }
                }
                Ok(HostnameResolutionEvent::SearchTimeout(name)) => {
                    return Err(BridgeError::Resolution(format!(
                        "No answer for {} within {:?}",
                        name, self.timeout
                    )));
                }
                Ok(HostnameResolutionEvent::SearchStopped(name)) => {
                    return Err(BridgeError::Resolution(format!(
                        "Resolution of {} stopped without an answer",
                        name
                    )));
                }
                Ok(event) => {
                    trace!("Ignoring resolution event: {:?}", event);
                }
                Err(e) => {
                    return Err(BridgeError::Resolution(format!("{}: {}", hostname, e)));
                }
            }
        }
    }
}

impl Drop for MdnsResolver {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

/// Resolver returning a fixed address regardless of hostname.
///
/// Useful for deployments with static addressing and as a test seam.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    address: IpAddr,
}

impl StaticResolver {
    /// Create a resolver that always answers with the given address
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr> {
        trace!("Statically resolving {} to {}", hostname, self.address);
        Ok(self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(MdnsResolver::normalize("dev1.local"), "dev1.local.");
        assert_eq!(MdnsResolver::normalize("dev1.local."), "dev1.local.");
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new("127.0.0.1".parse().unwrap());
        let address = resolver.resolve("anything.local").await.unwrap();
        assert_eq!(address, "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
