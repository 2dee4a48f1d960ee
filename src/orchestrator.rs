//! Scan lifecycle: start, progress, cancel, results and housekeeping.
//!
//! Each scan is a [`ScanRecord`] in an in-memory registry owned by the
//! orchestrator. A scan moves `pending -> running -> {completed, failed,
//! cancelled}`; terminal states are final.

use crate::config::{EngineConfig, ScanOptions};
use crate::error::{Result, ScanError};
use crate::fingerprint::{DetectOptions, ServiceFingerprinter};
use crate::hostname::HostnameResolver;
use crate::knowledge::{load_external_knowledge, DockerKnowledgeSource, KnowledgeBase, KnowledgeSource};
use crate::ports::port_set;
use crate::range::{generate_ips, parse_range, TargetRange};
use crate::rules::ServiceCatalog;
use crate::scanner::{BatchObserver, BatchProgress, PortProbe, ProbeOptions};
use crate::types::{HostScanResult, ServiceDetection};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Addresses shown by a range preview.
const PREVIEW_IPS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEventType {
    ScanStarted,
    HostScan,
    PortsFound,
    ServiceDetected,
    PortScanned,
    HostComplete,
    ScanCompleted,
    ScanCancelled,
    ScanFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub event_type: LogEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl DiscoveryLogEntry {
    pub fn new(event_type: LogEventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            event_type,
            message: message.into(),
            ip: None,
            port: None,
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Rolling log that keeps only the newest `capacity` entries.
#[derive(Debug, Clone)]
pub struct DiscoveryLog {
    entries: VecDeque<DiscoveryLogEntry>,
    capacity: usize,
}

impl DiscoveryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: DiscoveryLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<DiscoveryLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    fn new(current: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((current.min(total) * 100) / total) as u8
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

/// Lifecycle state of one scan.
#[derive(Debug)]
pub struct ScanRecord {
    pub id: Uuid,
    pub range: TargetRange,
    pub targets: Vec<IpAddr>,
    pub options: ScanOptions,
    pub status: ScanStatus,
    pub progress: Progress,
    pub results: Vec<ServiceDetection>,
    pub hosts_with_open_ports: usize,
    pub log: DiscoveryLog,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    cancel: CancellationToken,
    finished: Option<Instant>,
}

impl ScanRecord {
    fn finish(&mut self, status: ScanStatus, entry: DiscoveryLogEntry) {
        self.status = status;
        self.ended_at = Some(OffsetDateTime::now_utc());
        self.finished = Some(Instant::now());
        self.log.push(entry);
    }

    fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: self.id,
            status: self.status,
            range_info: self.range.clone(),
            progress: self.progress,
            hosts_with_open_ports: self.hosts_with_open_ports,
            results: self.results.clone(),
            discovery_log: self.log.to_vec(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error.clone(),
        }
    }

    fn summary(&self) -> ScanSummary {
        ScanSummary {
            scan_id: self.id,
            status: self.status,
            range: self.range.input.clone(),
            progress: self.progress,
            results_count: self.results.len(),
            created_at: self.created_at,
        }
    }
}

/// Returned by `start_scan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHandle {
    pub scan_id: Uuid,
    pub range_info: TargetRange,
    pub total_hosts: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub range_info: TargetRange,
    pub progress: Progress,
    pub hosts_with_open_ports: usize,
    pub results: Vec<ServiceDetection>,
    pub discovery_log: Vec<DiscoveryLogEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub range: String,
    pub progress: Progress,
    pub results_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Dry-run view of a range expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangePreview {
    pub range_info: TargetRange,
    pub total_ips: usize,
    pub preview_ips: Vec<String>,
    /// Upper bound in seconds, assuming every probe times out.
    pub estimated_duration: u64,
}

pub struct OrchestratorBuilder {
    config: EngineConfig,
    catalog: Option<ServiceCatalog>,
    resolver: Option<HostnameResolver>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
}

impl OrchestratorBuilder {
    pub fn catalog(mut self, catalog: ServiceCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn resolver(mut self, resolver: HostnameResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn knowledge_source(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(source);
        self
    }

    pub fn build(self) -> Result<ScanOrchestrator> {
        let config = self.config;
        let catalog = Arc::new(self.catalog.unwrap_or_else(ServiceCatalog::builtin));
        let resolver = self
            .resolver
            .unwrap_or_else(|| HostnameResolver::system(config.dns_timeout));
        let knowledge_source: Arc<dyn KnowledgeSource> = match self.knowledge {
            Some(source) => source,
            None => Arc::new(DockerKnowledgeSource {
                timeout: config.knowledge_timeout,
            }),
        };
        let fingerprinter = ServiceFingerprinter::new(catalog.clone(), config.catalog_scope)?;
        tracing::debug!(
            services = catalog.entries().len(),
            rules = catalog.rule_count(),
            "detection catalogue loaded"
        );
        Ok(ScanOrchestrator {
            inner: Arc::new(Inner {
                scans: RwLock::new(HashMap::new()),
                catalog,
                fingerprinter,
                resolver,
                knowledge_source,
                knowledge: RwLock::new(Arc::new(KnowledgeBase::default())),
                config,
            }),
        })
    }
}

struct Inner {
    scans: RwLock<HashMap<Uuid, ScanRecord>>,
    catalog: Arc<ServiceCatalog>,
    fingerprinter: ServiceFingerprinter,
    resolver: HostnameResolver,
    knowledge_source: Arc<dyn KnowledgeSource>,
    /// Last loaded container hints, shared by all scans.
    knowledge: RwLock<Arc<KnowledgeBase>>,
    config: EngineConfig,
}

/// Owns every scan record. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl ScanOrchestrator {
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            catalog: None,
            resolver: None,
            knowledge: None,
        }
    }

    /// Orchestrator with the built-in catalogue, system DNS and Docker hints.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn port_list(&self, options: &ScanOptions) -> Vec<u16> {
        port_set(
            &self.inner.catalog.all_ports(),
            options.include_non_standard,
            &options.extra_ports,
        )
    }

    /// Parse `range`, register a pending scan and run it in the background.
    pub async fn start_scan(&self, range: &str, options: ScanOptions) -> Result<ScanHandle> {
        let target_range = parse_range(range)?;
        let options = options.normalized();
        let targets: Vec<IpAddr> = generate_ips(&target_range)
            .into_iter()
            .map(IpAddr::V4)
            .collect();

        let id = Uuid::new_v4();
        let record = ScanRecord {
            id,
            range: target_range.clone(),
            targets,
            options,
            status: ScanStatus::Pending,
            progress: Progress::default(),
            results: Vec::new(),
            hosts_with_open_ports: 0,
            log: DiscoveryLog::new(self.inner.config.log_capacity),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            ended_at: None,
            error: None,
            cancel: CancellationToken::new(),
            finished: None,
        };
        let total_hosts = record.targets.len();
        self.inner.scans.write().await.insert(id, record);
        tracing::info!(scan_id = %id, range = %target_range.describe(), total_hosts, "scan created");

        let this = self.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn({
                let this = this.clone();
                async move { this.drive(id).await }
            });
            let outcome = match worker.await {
                Ok(res) => res,
                Err(e) => Err(anyhow!("scan task aborted: {e}")),
            };
            if let Err(e) = outcome {
                this.fail(id, &e).await;
            }
        });

        Ok(ScanHandle {
            scan_id: id,
            range_info: target_range,
            total_hosts,
            status: "started".to_string(),
        })
    }

    async fn drive(&self, id: Uuid) -> anyhow::Result<()> {
        let (targets, options, cancel) = {
            let scans = self.inner.scans.read().await;
            let rec = scans
                .get(&id)
                .ok_or_else(|| anyhow!("scan {id} vanished before start"))?;
            (rec.targets.clone(), rec.options.clone(), rec.cancel.clone())
        };

        let knowledge = self.refresh_knowledge().await;

        let ports = self.port_list(&options);
        {
            let mut scans = self.inner.scans.write().await;
            let rec = scans
                .get_mut(&id)
                .ok_or_else(|| anyhow!("scan {id} vanished before start"))?;
            rec.status = ScanStatus::Running;
            rec.started_at = Some(OffsetDateTime::now_utc());
            rec.progress = Progress::new(0, targets.len());
            rec.log.push(DiscoveryLogEntry::new(
                LogEventType::ScanStarted,
                format!(
                    "Scanning {} hosts on {} ports ({} container hints)",
                    targets.len(),
                    ports.len(),
                    knowledge.len()
                ),
            ));
        }
        tracing::info!(scan_id = %id, hosts = targets.len(), ports = ports.len(), "scan started");

        let probe = PortProbe::new(ports, self.inner.resolver.clone());
        let probe_opts = ProbeOptions {
            timeout: options.timeout(),
            host_concurrency: options.concurrency,
            port_concurrency: options.port_concurrency,
        };
        let mut driver = ScanDriver {
            orchestrator: self,
            id,
            cancel: cancel.clone(),
            detect: DetectOptions {
                timeout: options.timeout(),
                deep_detection: options.deep_detection,
            },
            knowledge,
        };
        probe
            .massive_scan(&targets, &probe_opts, &cancel, &mut driver)
            .await;

        let mut scans = self.inner.scans.write().await;
        if let Some(rec) = scans.get_mut(&id) {
            if rec.status == ScanStatus::Running {
                let msg = format!(
                    "Scan complete: {} services on {} hosts with open ports",
                    rec.results.len(),
                    rec.hosts_with_open_ports
                );
                rec.finish(
                    ScanStatus::Completed,
                    DiscoveryLogEntry::new(LogEventType::ScanCompleted, msg),
                );
                tracing::info!(scan_id = %id, services = rec.results.len(), "scan completed");
            }
        }
        Ok(())
    }

    async fn refresh_knowledge(&self) -> Arc<KnowledgeBase> {
        if !self.inner.config.load_external_knowledge {
            return self.inner.knowledge.read().await.clone();
        }
        let kb = Arc::new(load_external_knowledge(self.inner.knowledge_source.as_ref()).await);
        *self.inner.knowledge.write().await = kb.clone();
        kb
    }

    async fn fail(&self, id: Uuid, error: &anyhow::Error) {
        tracing::error!(scan_id = %id, error = %error, "scan failed");
        let mut scans = self.inner.scans.write().await;
        if let Some(rec) = scans.get_mut(&id) {
            if !rec.status.is_terminal() {
                rec.error = Some(error.to_string());
                rec.finish(
                    ScanStatus::Failed,
                    DiscoveryLogEntry::new(LogEventType::ScanFailed, format!("Scan failed: {error}")),
                );
            }
        }
    }

    /// Apply `f` to a running record. Records in any other state, or
    /// missing ones, are left untouched so terminal states stay frozen.
    async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut ScanRecord),
    {
        let mut scans = self.inner.scans.write().await;
        if let Some(rec) = scans.get_mut(&id) {
            if rec.status == ScanStatus::Running {
                f(rec);
            }
        }
    }

    pub async fn get_scan_status(&self, id: Uuid) -> Result<ScanSnapshot> {
        self.inner
            .scans
            .read()
            .await
            .get(&id)
            .map(ScanRecord::snapshot)
            .ok_or_else(|| ScanError::ScanNotFound(id.to_string()))
    }

    /// Cancel a running scan. Returns `false` for scans in any other state.
    pub async fn cancel_scan(&self, id: Uuid) -> Result<bool> {
        let mut scans = self.inner.scans.write().await;
        let rec = scans
            .get_mut(&id)
            .ok_or_else(|| ScanError::ScanNotFound(id.to_string()))?;
        if rec.status != ScanStatus::Running {
            return Ok(false);
        }
        rec.cancel.cancel();
        let msg = format!(
            "Scan cancelled after {}/{} hosts",
            rec.progress.current, rec.progress.total
        );
        rec.finish(
            ScanStatus::Cancelled,
            DiscoveryLogEntry::new(LogEventType::ScanCancelled, msg),
        );
        tracing::info!(scan_id = %id, "scan cancelled");
        Ok(true)
    }

    /// Pending and running scans, oldest first.
    pub async fn list_active_scans(&self) -> Vec<ScanSummary> {
        let scans = self.inner.scans.read().await;
        let mut out: Vec<ScanSummary> = scans
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(ScanRecord::summary)
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// Parse and expand `range` without scanning anything.
    pub fn test_range_parsing(&self, range: &str) -> Result<RangePreview> {
        let target_range = parse_range(range)?;
        let ips = generate_ips(&target_range);
        let options = ScanOptions::default();
        let ports = self.port_list(&options).len();
        Ok(RangePreview {
            estimated_duration: estimate_duration_secs(ips.len(), ports, &options),
            total_ips: ips.len(),
            preview_ips: ips.iter().take(PREVIEW_IPS).map(|ip| ip.to_string()).collect(),
            range_info: target_range,
        })
    }

    /// Drop terminal scans that finished longer ago than the retention window.
    pub async fn cleanup_expired(&self) -> usize {
        let retention = self.inner.config.retention;
        let mut scans = self.inner.scans.write().await;
        let before = scans.len();
        scans.retain(|_, r| {
            !(r.status.is_terminal() && r.finished.is_some_and(|t| t.elapsed() >= retention))
        });
        let removed = before - scans.len();
        if removed > 0 {
            tracing::info!(removed, remaining = scans.len(), "expired scans removed");
        }
        removed
    }

    /// Run `cleanup_expired` every `cleanup_interval` until `shutdown` fires.
    pub fn spawn_cleanup_task(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let every = this.inner.config.cleanup_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.cleanup_expired().await;
                    }
                }
            }
        })
    }

    /// Poll until the scan reaches a terminal state.
    pub async fn wait(&self, id: Uuid, poll: Duration) -> Result<ScanSnapshot> {
        loop {
            let snap = self.get_scan_status(id).await?;
            if snap.status.is_terminal() {
                return Ok(snap);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Last container hints loaded by any scan.
    pub async fn knowledge(&self) -> Arc<KnowledgeBase> {
        self.inner.knowledge.read().await.clone()
    }
}

/// Worst-case duration: every probe of every batch times out.
pub fn estimate_duration_secs(hosts: usize, ports: usize, options: &ScanOptions) -> u64 {
    let host_batches = hosts.div_ceil(options.concurrency.max(1)) as u64;
    let port_batches = ports.div_ceil(options.port_concurrency.max(1)) as u64;
    (host_batches * port_batches * options.timeout).div_ceil(1000)
}

/// Feeds every finished host batch through logging and fingerprinting.
struct ScanDriver<'a> {
    orchestrator: &'a ScanOrchestrator,
    id: Uuid,
    cancel: CancellationToken,
    detect: DetectOptions,
    knowledge: Arc<KnowledgeBase>,
}

impl ScanDriver<'_> {
    async fn log(&self, entry: DiscoveryLogEntry) {
        self.orchestrator.update(self.id, |r| r.log.push(entry)).await;
    }

    async fn fingerprint_host(&self, host: &HostScanResult) {
        let ip = host.ip;
        self.log(
            DiscoveryLogEntry::new(
                LogEventType::PortsFound,
                format!(
                    "{} open ports on {}: {:?}",
                    host.ports.len(),
                    host.hostname.as_deref().unwrap_or(&ip.to_string()),
                    host.ports.iter().map(|p| p.port).collect::<Vec<_>>()
                ),
            )
            .with_ip(ip),
        )
        .await;
        self.orchestrator
            .update(self.id, |r| r.hosts_with_open_ports += 1)
            .await;

        for port in &host.ports {
            if self.cancel.is_cancelled() {
                return;
            }
            let found = self
                .orchestrator
                .inner
                .fingerprinter
                .detect_service(ip, port.port, &self.detect, &self.knowledge)
                .await;
            if self.cancel.is_cancelled() {
                return;
            }
            match found {
                Ok(Some(detection)) => {
                    tracing::debug!(
                        scan_id = %self.id, %ip, port = port.port,
                        service = %detection.service, confidence = detection.confidence,
                        "service detected"
                    );
                    let entry = DiscoveryLogEntry::new(
                        LogEventType::ServiceDetected,
                        format!(
                            "{} on {}:{} ({}% confidence)",
                            detection.name, ip, port.port, detection.confidence
                        ),
                    )
                    .with_ip(ip)
                    .with_port(port.port);
                    self.orchestrator
                        .update(self.id, |r| {
                            r.log.push(entry);
                            r.results.push(detection);
                        })
                        .await;
                }
                Ok(None) => {
                    let hint = port.service_hint.as_deref().unwrap_or("unknown");
                    self.log(
                        DiscoveryLogEntry::new(
                            LogEventType::PortScanned,
                            format!("{}:{} open, no service identified (hint: {})", ip, port.port, hint),
                        )
                        .with_ip(ip)
                        .with_port(port.port),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::debug!(scan_id = %self.id, %ip, port = port.port, error = %e, "fingerprinting failed");
                }
            }
        }
    }
}

#[async_trait]
impl BatchObserver for ScanDriver<'_> {
    async fn on_batch(&mut self, progress: BatchProgress, hosts: Vec<HostScanResult>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let entries: Vec<DiscoveryLogEntry> = hosts
            .iter()
            .map(|h| {
                let msg = match &h.error {
                    Some(e) => format!("Scanned {}: {}", h.ip, e),
                    None => format!("Scanned {}: {} open ports", h.ip, h.ports.len()),
                };
                DiscoveryLogEntry::new(LogEventType::HostScan, msg).with_ip(h.ip)
            })
            .collect();
        self.orchestrator
            .update(self.id, |r| {
                r.progress = Progress::new(progress.completed, progress.total);
                for e in entries {
                    r.log.push(e);
                }
            })
            .await;

        for host in &hosts {
            if self.cancel.is_cancelled() {
                return;
            }
            if host.has_open_ports() {
                self.fingerprint_host(host).await;
            } else {
                self.log(
                    DiscoveryLogEntry::new(
                        LogEventType::HostComplete,
                        format!("{}: no open ports", host.ip),
                    )
                    .with_ip(host.ip),
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::NoKnowledge;

    #[test]
    fn log_keeps_newest_entries() {
        let mut log = DiscoveryLog::new(100);
        for i in 0..175 {
            log.push(DiscoveryLogEntry::new(LogEventType::HostScan, format!("entry {i}")));
        }
        assert_eq!(log.len(), 100);
        let v = log.to_vec();
        assert_eq!(v[0].message, "entry 75");
        assert_eq!(v[99].message, "entry 174");
    }

    #[test]
    fn progress_percentage() {
        assert_eq!(Progress::new(0, 0).percentage, 0);
        assert_eq!(Progress::new(1, 3).percentage, 33);
        assert_eq!(Progress::new(3, 3).percentage, 100);
    }

    #[test]
    fn terminal_states() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(ScanStatus::Cancelled.is_terminal());
    }

    #[test]
    fn duration_estimate_is_upper_bound() {
        let o = ScanOptions::default();
        // 254 hosts / 20 = 13 batches, 25 ports / 10 = 3 batches, 3s each.
        assert_eq!(estimate_duration_secs(254, 25, &o), 13 * 3 * 3);
        assert_eq!(estimate_duration_secs(1, 1, &o), 3);
    }

    fn offline() -> ScanOrchestrator {
        ScanOrchestrator::builder(EngineConfig::default())
            .resolver(HostnameResolver::disabled())
            .knowledge_source(Arc::new(NoKnowledge))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_range_creates_no_record() {
        let orch = offline();
        let err = orch
            .start_scan("10.0.0.9-10.0.0.1", ScanOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(orch.list_active_scans().await.is_empty());
        assert!(orch.inner.scans.read().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let orch = offline();
        let id = Uuid::new_v4();
        assert!(matches!(
            orch.get_scan_status(id).await,
            Err(ScanError::ScanNotFound(_))
        ));
        assert!(matches!(
            orch.cancel_scan(id).await,
            Err(ScanError::ScanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn preview_has_no_side_effects() {
        let orch = offline();
        let p = orch.test_range_parsing("192.168.1.0/24").unwrap();
        assert_eq!(p.total_ips, 254);
        assert_eq!(p.preview_ips.len(), PREVIEW_IPS);
        assert_eq!(p.preview_ips[0], "192.168.1.1");
        assert!(p.estimated_duration > 0);
        assert!(orch.inner.scans.read().await.is_empty());
    }

    fn record(status: ScanStatus) -> (Uuid, ScanRecord) {
        let id = Uuid::new_v4();
        let mut rec = ScanRecord {
            id,
            range: parse_range("10.0.0.1").unwrap(),
            targets: Vec::new(),
            options: ScanOptions::default(),
            status: ScanStatus::Running,
            progress: Progress::default(),
            results: Vec::new(),
            hosts_with_open_ports: 0,
            log: DiscoveryLog::new(10),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            ended_at: None,
            error: None,
            cancel: CancellationToken::new(),
            finished: None,
        };
        if status.is_terminal() {
            rec.finish(status, DiscoveryLogEntry::new(LogEventType::ScanCompleted, "done"));
        }
        (id, rec)
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_terminal_scans() {
        let orch = ScanOrchestrator::builder(EngineConfig {
            retention: Duration::ZERO,
            ..EngineConfig::default()
        })
        .resolver(HostnameResolver::disabled())
        .knowledge_source(Arc::new(NoKnowledge))
        .build()
        .unwrap();

        let (done_id, done) = record(ScanStatus::Completed);
        let (live_id, live) = record(ScanStatus::Running);
        {
            let mut scans = orch.inner.scans.write().await;
            scans.insert(done_id, done);
            scans.insert(live_id, live);
        }

        assert_eq!(orch.cleanup_expired().await, 1);
        assert!(orch.get_scan_status(done_id).await.is_err());
        assert_eq!(
            orch.get_scan_status(live_id).await.unwrap().status,
            ScanStatus::Running
        );
    }

    #[tokio::test]
    async fn driver_writes_skip_finished_records() {
        let orch = offline();
        let (done_id, done) = record(ScanStatus::Cancelled);
        let (live_id, live) = record(ScanStatus::Running);
        {
            let mut scans = orch.inner.scans.write().await;
            scans.insert(done_id, done);
            scans.insert(live_id, live);
        }

        for id in [done_id, live_id] {
            orch.update(id, |r| {
                r.hosts_with_open_ports += 1;
                r.log.push(DiscoveryLogEntry::new(LogEventType::HostScan, "late"));
            })
            .await;
        }

        let done = orch.get_scan_status(done_id).await.unwrap();
        assert_eq!(done.status, ScanStatus::Cancelled);
        assert_eq!(done.hosts_with_open_ports, 0);
        assert_eq!(done.discovery_log.len(), 1);
        let live = orch.get_scan_status(live_id).await.unwrap();
        assert_eq!(live.hosts_with_open_ports, 1);
        assert_eq!(live.discovery_log.len(), 1);
    }
}
