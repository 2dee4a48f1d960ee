//! Best-effort hostname enrichment for scanned hosts.
//!
//! Lookups are pluggable providers tried in order. The first one that
//! answers supplies the hostname; later answers are kept as secondary hints.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostnameHint {
    pub hostname: String,
    pub method: String,
    pub confidence: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no name found")]
    NotFound,
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} lookups are not available")]
    Unsupported(&'static str),
    #[error("resolver error: {0}")]
    Resolver(String),
}

#[async_trait]
pub trait HostnameProvider: Send + Sync {
    fn method(&self) -> &'static str;
    async fn lookup(&self, ip: IpAddr) -> Result<HostnameHint, LookupError>;
}

/// PTR lookup through the system resolver configuration.
pub struct ReverseDnsProvider {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl ReverseDnsProvider {
    pub fn new(timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "system resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver, timeout }
    }
}

#[async_trait]
impl HostnameProvider for ReverseDnsProvider {
    fn method(&self) -> &'static str {
        "reverse-dns"
    }

    async fn lookup(&self, ip: IpAddr) -> Result<HostnameHint, LookupError> {
        let answer = tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(ip))
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))?
            .map_err(|e| LookupError::Resolver(e.to_string()))?;
        let name = answer
            .iter()
            .next()
            .map(|n| n.to_string().trim_end_matches('.').to_string())
            .filter(|n| !n.is_empty())
            .ok_or(LookupError::NotFound)?;
        Ok(HostnameHint {
            hostname: name,
            method: self.method().to_string(),
            confidence: 90,
        })
    }
}

/// NetBIOS name queries. Not implemented; always reports `Unsupported`.
pub struct NetbiosProvider;

#[async_trait]
impl HostnameProvider for NetbiosProvider {
    fn method(&self) -> &'static str {
        "netbios"
    }

    async fn lookup(&self, _ip: IpAddr) -> Result<HostnameHint, LookupError> {
        Err(LookupError::Unsupported("netbios"))
    }
}

/// mDNS reverse queries. Not implemented; always reports `Unsupported`.
pub struct MdnsProvider;

#[async_trait]
impl HostnameProvider for MdnsProvider {
    fn method(&self) -> &'static str {
        "mdns"
    }

    async fn lookup(&self, _ip: IpAddr) -> Result<HostnameHint, LookupError> {
        Err(LookupError::Unsupported("mdns"))
    }
}

/// Ordered provider list.
#[derive(Clone)]
pub struct HostnameResolver {
    providers: Vec<Arc<dyn HostnameProvider>>,
}

impl HostnameResolver {
    pub fn new(providers: Vec<Arc<dyn HostnameProvider>>) -> Self {
        Self { providers }
    }

    /// Reverse DNS, then the NetBIOS and mDNS placeholders.
    pub fn system(dns_timeout: Duration) -> Self {
        Self::new(vec![
            Arc::new(ReverseDnsProvider::new(dns_timeout)),
            Arc::new(NetbiosProvider),
            Arc::new(MdnsProvider),
        ])
    }

    /// Resolver that never produces a name; useful for offline scans.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_provider(mut self, provider: Arc<dyn HostnameProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Returns `(primary, secondary)`; failures are dropped.
    pub async fn resolve(&self, ip: IpAddr) -> (Option<HostnameHint>, Vec<HostnameHint>) {
        let mut primary = None;
        let mut secondary = Vec::new();
        for provider in &self.providers {
            match provider.lookup(ip).await {
                Ok(hint) if primary.is_none() => primary = Some(hint),
                Ok(hint) => secondary.push(hint),
                Err(e) => {
                    tracing::trace!(%ip, method = provider.method(), error = %e, "hostname lookup failed");
                }
            }
        }
        (primary, secondary)
    }
}
