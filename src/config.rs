use crate::rules::CatalogScope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
pub const MIN_TIMEOUT_MS: u64 = 1000;
pub const MAX_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HOST_CONCURRENCY: usize = 20;
pub const DEFAULT_PORT_CONCURRENCY: usize = 10;
/// Upper bound for both concurrency knobs when they come from callers.
pub const MAX_CONCURRENCY: usize = 50;

/// Per-scan options as accepted from callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    /// Per-probe timeout in milliseconds.
    pub timeout: u64,
    /// Hosts probed in parallel.
    pub concurrency: usize,
    /// Sockets opened in parallel per host.
    pub port_concurrency: usize,
    pub include_non_standard: bool,
    pub deep_detection: bool,
    /// Additional ports to probe on every host.
    pub extra_ports: Vec<u16>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            concurrency: DEFAULT_HOST_CONCURRENCY,
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            include_non_standard: false,
            deep_detection: true,
            extra_ports: Vec::new(),
        }
    }
}

impl ScanOptions {
    /// Clamp caller supplied values into safe bounds.
    pub fn normalized(mut self) -> Self {
        self.timeout = self.timeout.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        self.concurrency = self.concurrency.clamp(1, MAX_CONCURRENCY);
        self.port_concurrency = self.port_concurrency.clamp(1, MAX_CONCURRENCY);
        self.extra_ports.retain(|&p| p != 0);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Engine-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long terminal scans stay queryable.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub dns_timeout: Duration,
    pub knowledge_timeout: Duration,
    pub catalog_scope: CatalogScope,
    pub log_capacity: usize,
    /// Look up container metadata before each scan.
    pub load_external_knowledge: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            dns_timeout: Duration::from_secs(2),
            knowledge_timeout: Duration::from_secs(5),
            catalog_scope: CatalogScope::Full,
            log_capacity: 100,
            load_external_knowledge: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = ScanOptions::default();
        assert_eq!(o.timeout, 3000);
        assert_eq!(o.concurrency, 20);
        assert_eq!(o.port_concurrency, 10);
        assert!(!o.include_non_standard);
        assert!(o.deep_detection);
    }

    #[test]
    fn normalized_clamps_untrusted_values() {
        let o = ScanOptions {
            timeout: 10,
            concurrency: 10_000,
            port_concurrency: 0,
            extra_ports: vec![0, 81],
            ..Default::default()
        }
        .normalized();
        assert_eq!(o.timeout, MIN_TIMEOUT_MS);
        assert_eq!(o.concurrency, MAX_CONCURRENCY);
        assert_eq!(o.port_concurrency, 1);
        assert_eq!(o.extra_ports, vec![81]);

        let o = ScanOptions {
            timeout: 120_000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(o.timeout, MAX_TIMEOUT_MS);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let o: ScanOptions =
            serde_json::from_str(r#"{"timeout": 5000, "includeNonStandard": true}"#).unwrap();
        assert_eq!(o.timeout, 5000);
        assert!(o.include_non_standard);
        assert_eq!(o.concurrency, DEFAULT_HOST_CONCURRENCY);
        assert!(o.deep_detection);
    }
}
