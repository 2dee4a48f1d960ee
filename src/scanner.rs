use crate::hostname::HostnameResolver;
use crate::ports::{identify_service, is_ssl_port};
use crate::types::{HostScanResult, PortResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Knobs for one probing run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub timeout: Duration,
    /// Hosts probed at the same time.
    pub host_concurrency: usize,
    /// Sockets open at the same time per host.
    pub port_concurrency: usize,
}

/// Progress reported after every host batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    /// Last host of the batch that just finished.
    pub current_host: IpAddr,
}

/// Receives each finished batch before the next one starts.
#[async_trait]
pub trait BatchObserver: Send {
    async fn on_batch(&mut self, progress: BatchProgress, hosts: Vec<HostScanResult>);
}

/// Collects every host result; handy when no incremental handling is needed.
#[async_trait]
impl BatchObserver for Vec<HostScanResult> {
    async fn on_batch(&mut self, _progress: BatchProgress, hosts: Vec<HostScanResult>) {
        self.extend(hosts);
    }
}

/// Outcome of a single connect attempt.
enum PortOutcome {
    Open(PortResult),
    Closed,
    /// Anything other than refused/timeout, e.g. network unreachable.
    Error(io::Error),
}

/// TCP connect prober over a fixed port list.
#[derive(Clone)]
pub struct PortProbe {
    ports: Arc<Vec<u16>>,
    resolver: HostnameResolver,
}

impl PortProbe {
    pub fn new(ports: Vec<u16>, resolver: HostnameResolver) -> Self {
        Self {
            ports: Arc::new(ports),
            resolver,
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Probe every configured port on `ip` and resolve its hostname.
    ///
    /// Ports are tried in sequential batches of `port_concurrency`; each batch
    /// runs in parallel and is awaited in full before the next starts.
    pub async fn scan_host(&self, ip: IpAddr, opts: &ProbeOptions) -> HostScanResult {
        let (names, (ports, error)) =
            tokio::join!(self.resolver.resolve(ip), self.probe_ports(ip, opts));

        let mut result = HostScanResult::new(ip);
        let (primary, secondary) = names;
        if let Some(hint) = primary {
            result.hostname = Some(hint.hostname);
            result.hostname_method = Some(hint.method);
            result.hostname_confidence = hint.confidence;
        }
        result.secondary_hints = secondary;
        result.ports = ports;
        result.error = error;
        result
    }

    async fn probe_ports(&self, ip: IpAddr, opts: &ProbeOptions) -> (Vec<PortResult>, Option<String>) {
        let mut open = Vec::new();
        let mut attempted = 0usize;
        let mut errors: Vec<io::Error> = Vec::new();

        for batch in self.ports.chunks(opts.port_concurrency.max(1)) {
            let mut set = JoinSet::new();
            for &port in batch {
                let timeout = opts.timeout;
                set.spawn(async move { scan_port(ip, port, timeout).await });
            }
            while let Some(res) = set.join_next().await {
                attempted += 1;
                match res {
                    Ok(PortOutcome::Open(p)) => open.push(p),
                    Ok(PortOutcome::Closed) => {}
                    Ok(PortOutcome::Error(e)) => errors.push(e),
                    Err(e) => errors.push(io::Error::other(e.to_string())),
                }
            }
        }
        open.sort_by_key(|p| p.port);

        // Only report a host error when nothing answered and every attempt failed oddly.
        let error = if open.is_empty() && attempted > 0 && errors.len() == attempted {
            errors.first().map(|e| e.to_string())
        } else {
            None
        };
        (open, error)
    }

    /// Probe `targets` in sequential batches of `host_concurrency`.
    ///
    /// The observer sees each batch (in target order) before the next batch is
    /// started. Stops scheduling new batches once `cancel` fires. Returns the
    /// number of hosts completed.
    pub async fn massive_scan(
        &self,
        targets: &[IpAddr],
        opts: &ProbeOptions,
        cancel: &CancellationToken,
        observer: &mut dyn BatchObserver,
    ) -> usize {
        let total = targets.len();
        let mut completed = 0usize;

        for batch in targets.chunks(opts.host_concurrency.max(1)) {
            if cancel.is_cancelled() {
                break;
            }
            let mut set = JoinSet::new();
            let mut slots: Vec<Option<HostScanResult>> = vec![None; batch.len()];
            let mut task_index = std::collections::HashMap::new();
            for (idx, &ip) in batch.iter().enumerate() {
                let probe = self.clone();
                let opts = *opts;
                let handle = set.spawn(async move { probe.scan_host(ip, &opts).await });
                task_index.insert(handle.id(), idx);
            }
            while let Some(res) = set.join_next_with_id().await {
                match res {
                    Ok((id, host)) => {
                        if let Some(&idx) = task_index.get(&id) {
                            slots[idx] = Some(host);
                        }
                    }
                    Err(e) => {
                        if let Some(&idx) = task_index.get(&e.id()) {
                            tracing::warn!(ip = %batch[idx], error = %e, "host scan task failed");
                            slots[idx] = Some(HostScanResult::failed(batch[idx], e.to_string()));
                        }
                    }
                }
            }

            let hosts: Vec<HostScanResult> = slots
                .into_iter()
                .zip(batch)
                .map(|(slot, &ip)| slot.unwrap_or_else(|| HostScanResult::failed(ip, "host scan lost")))
                .collect();
            completed += hosts.len();
            let progress = BatchProgress {
                completed,
                total,
                current_host: batch[batch.len() - 1],
            };
            tracing::debug!(completed, total, "host batch finished");
            observer.on_batch(progress, hosts).await;
        }
        completed
    }
}

/// One TCP connect attempt with a hard timeout.
async fn scan_port(ip: IpAddr, port: u16, timeout: Duration) -> PortOutcome {
    let addr = SocketAddr::new(ip, port);
    let start = Instant::now();
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => PortOutcome::Open(PortResult {
            port,
            latency_ms: start.elapsed().as_millis() as u64,
            likely_ssl: is_ssl_port(port),
            service_hint: identify_service(port).map(str::to_string),
        }),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => PortOutcome::Closed,
        Ok(Err(e)) => PortOutcome::Error(e),
        Err(_) => PortOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn opts() -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(500),
            host_concurrency: 2,
            port_concurrency: 2,
        }
    }

    async fn closed_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn finds_open_port_and_skips_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let closed = closed_port().await;

        let probe = PortProbe::new(vec![closed, open], HostnameResolver::disabled());
        let host = probe
            .scan_host(IpAddr::V4(Ipv4Addr::LOCALHOST), &opts())
            .await;
        assert_eq!(host.ports.len(), 1);
        assert_eq!(host.ports[0].port, open);
        assert!(host.error.is_none());
        assert!(host.hostname.is_none());
    }

    #[tokio::test]
    async fn massive_scan_reports_every_batch_in_order() {
        struct Recorder(Vec<BatchProgress>, Vec<IpAddr>);

        #[async_trait]
        impl BatchObserver for Recorder {
            async fn on_batch(&mut self, progress: BatchProgress, hosts: Vec<HostScanResult>) {
                self.0.push(progress);
                self.1.extend(hosts.into_iter().map(|h| h.ip));
            }
        }

        let closed = closed_port().await;
        let probe = PortProbe::new(vec![closed], HostnameResolver::disabled());
        let targets: Vec<IpAddr> = (1..=5)
            .map(|i| IpAddr::V4(Ipv4Addr::new(127, 0, 0, i)))
            .collect();
        let mut rec = Recorder(Vec::new(), Vec::new());
        let done = probe
            .massive_scan(&targets, &opts(), &CancellationToken::new(), &mut rec)
            .await;

        assert_eq!(done, 5);
        assert_eq!(rec.1, targets);
        let completed: Vec<usize> = rec.0.iter().map(|p| p.completed).collect();
        assert_eq!(completed, vec![2, 4, 5]);
        assert_eq!(rec.0[2].current_host, targets[4]);
        assert!(rec.0.iter().all(|p| p.total == 5));
    }

    #[tokio::test]
    async fn cancelled_scan_schedules_nothing() {
        let probe = PortProbe::new(vec![1], HostnameResolver::disabled());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut hosts: Vec<HostScanResult> = Vec::new();
        let done = probe
            .massive_scan(
                &[IpAddr::V4(Ipv4Addr::LOCALHOST)],
                &opts(),
                &cancel,
                &mut hosts,
            )
            .await;
        assert_eq!(done, 0);
        assert!(hosts.is_empty());
    }
}
