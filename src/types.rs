use crate::hostname::HostnameHint;
use crate::services::ServiceType;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use time::OffsetDateTime;

/// One open port found on a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    pub port: u16,
    pub latency_ms: u64,
    /// Guess based on well-known TLS ports only.
    pub likely_ssl: bool,
    pub service_hint: Option<String>,
}

/// Everything the port probe learned about one address.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HostScanResult {
    pub ip: IpAddr,
    pub hostname: Option<String>,
    /// How `hostname` was obtained, e.g. `reverse-dns`.
    pub hostname_method: Option<String>,
    pub hostname_confidence: u8,
    /// Hints from providers other than the winning one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_hints: Vec<HostnameHint>,
    pub ports: Vec<PortResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub scanned_at: OffsetDateTime,
    pub error: Option<String>,
}

impl HostScanResult {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            hostname: None,
            hostname_method: None,
            hostname_confidence: 0,
            secondary_hints: Vec::new(),
            ports: Vec::new(),
            scanned_at: OffsetDateTime::now_utc(),
            error: None,
        }
    }

    /// Host-level failure: empty port list plus the error text.
    pub fn failed(ip: IpAddr, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(ip)
        }
    }

    pub fn has_open_ports(&self) -> bool {
        !self.ports.is_empty()
    }
}

/// Best guess of what runs behind one `ip:port`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetection {
    pub ip: IpAddr,
    pub port: u16,
    pub service: ServiceType,
    pub name: String,
    /// Always within 0..=100.
    pub confidence: u8,
    pub version: Option<String>,
    pub ssl: bool,
    pub url: String,
    pub details: String,
    /// Rule (or fallback) that produced the match.
    pub method: String,
}
