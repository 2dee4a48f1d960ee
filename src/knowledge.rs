//! Out-of-band service hints taken from locally running containers.
//!
//! Purely advisory: a missing container runtime just means no hints.

use crate::services::ServiceType;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;
use tokio::process::Command;

/// Port ranges longer than this in a mapping are ignored.
const MAX_PUBLISHED_RANGE: u16 = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    /// `None` when published on all interfaces.
    pub host_ip: Option<IpAddr>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub ports: Vec<PublishedPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHint {
    pub service: ServiceType,
    pub container: String,
    pub image: String,
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerInfo>>;
}

/// Asks the local Docker CLI for running containers.
pub struct DockerKnowledgeSource {
    pub timeout: Duration,
}

#[async_trait]
impl KnowledgeSource for DockerKnowledgeSource {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerInfo>> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("docker")
                .args(["ps", "--format", "{{.Names}}\t{{.Image}}\t{{.Ports}}"])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("docker ps timed out")?
        .context("failed to run docker ps")?;
        if !output.status.success() {
            bail!(
                "docker ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(parse_docker_ps(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Source that knows nothing.
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeSource for NoKnowledge {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerInfo>> {
        Ok(Vec::new())
    }
}

/// Static list of containers, for callers that already have the data.
pub struct StaticKnowledge(pub Vec<ContainerInfo>);

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerInfo>> {
        Ok(self.0.clone())
    }
}

/// Parse `docker ps --format '{{.Names}}\t{{.Image}}\t{{.Ports}}'` output.
pub fn parse_docker_ps(output: &str) -> Vec<ContainerInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let name = cols.next()?.trim();
            let image = cols.next()?.trim();
            let ports = cols.next().map(parse_port_mappings).unwrap_or_default();
            (!name.is_empty()).then(|| ContainerInfo {
                name: name.to_string(),
                image: image.to_string(),
                ports,
            })
        })
        .collect()
}

/// Parse `0.0.0.0:7878->7878/tcp, :::7878->7878/tcp` into host-side ports.
///
/// Unpublished (`8080/tcp`) and UDP entries are skipped.
fn parse_port_mappings(s: &str) -> Vec<PublishedPort> {
    let mut out = Vec::new();
    for mapping in s.split(',').map(str::trim) {
        let Some((host, container)) = mapping.split_once("->") else {
            continue;
        };
        if !container.ends_with("/tcp") {
            continue;
        }
        let Some((ip, ports)) = host.rsplit_once(':') else {
            continue;
        };
        let host_ip = match ip.trim_matches(|c| c == '[' || c == ']') {
            "" | "0.0.0.0" | "::" => None,
            other => match other.parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => continue,
            },
        };
        let (start, end) = match ports.split_once('-') {
            Some((a, b)) => (a.parse::<u16>(), b.parse::<u16>()),
            None => (ports.parse::<u16>(), ports.parse::<u16>()),
        };
        let (Ok(start), Ok(end)) = (start, end) else {
            continue;
        };
        if start > end || end - start > MAX_PUBLISHED_RANGE {
            continue;
        }
        for port in start..=end {
            let p = PublishedPort { host_ip, port };
            if !out.contains(&p) {
                out.push(p);
            }
        }
    }
    out
}

/// Port -> service hints built from container metadata.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    hints: HashMap<(Option<IpAddr>, u16), ContainerHint>,
    /// Addresses of this machine; wildcard publications apply to them.
    local_ips: HashSet<IpAddr>,
}

impl KnowledgeBase {
    pub fn from_containers(containers: &[ContainerInfo], local_ips: HashSet<IpAddr>) -> Self {
        let mut hints = HashMap::new();
        for c in containers {
            let Some(service) = ServiceType::from_container(&c.name, &c.image) else {
                continue;
            };
            for p in &c.ports {
                hints.insert(
                    (p.host_ip, p.port),
                    ContainerHint {
                        service,
                        container: c.name.clone(),
                        image: c.image.clone(),
                    },
                );
            }
        }
        Self { hints, local_ips }
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn hint_for(&self, ip: IpAddr, port: u16) -> Option<&ContainerHint> {
        self.hints.get(&(Some(ip), port)).or_else(|| {
            if ip.is_loopback() || self.local_ips.contains(&ip) {
                self.hints.get(&(None, port))
            } else {
                None
            }
        })
    }
}

/// Build a knowledge base from `source`; any failure yields an empty one.
pub async fn load_external_knowledge(source: &dyn KnowledgeSource) -> KnowledgeBase {
    match source.containers().await {
        Ok(containers) => {
            let kb = KnowledgeBase::from_containers(&containers, local_addresses());
            tracing::debug!(containers = containers.len(), hints = kb.len(), "loaded container hints");
            kb
        }
        Err(e) => {
            tracing::debug!(error = %e, "container hints unavailable");
            KnowledgeBase::default()
        }
    }
}

fn local_addresses() -> HashSet<IpAddr> {
    if_addrs::get_if_addrs()
        .map(|ifaces| ifaces.into_iter().map(|i| i.ip()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const PS: &str = "radarr\tlscr.io/linuxserver/radarr:latest\t0.0.0.0:7878->7878/tcp, :::7878->7878/tcp\n\
                      postgres\tpostgres:16\t5432/tcp\n\
                      qbit\tlscr.io/linuxserver/qbittorrent\t192.168.1.10:8080->8080/tcp, 0.0.0.0:6881->6881/udp\n\
                      torrent-range\tdeluge\t0.0.0.0:58846-58848->58846-58848/tcp\n";

    #[test]
    fn parses_names_images_and_ports() {
        let c = parse_docker_ps(PS);
        assert_eq!(c.len(), 4);
        assert_eq!(c[0].name, "radarr");
        assert_eq!(c[0].ports, vec![PublishedPort { host_ip: None, port: 7878 }]);
        assert!(c[1].ports.is_empty());
        assert_eq!(
            c[2].ports,
            vec![PublishedPort {
                host_ip: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))),
                port: 8080
            }]
        );
        assert_eq!(c[3].ports.len(), 3);
    }

    #[test]
    fn hints_respect_host_binding() {
        let lan = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let remote = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 99));
        let kb = KnowledgeBase::from_containers(&parse_docker_ps(PS), HashSet::from([lan]));

        let h = kb.hint_for(IpAddr::V4(Ipv4Addr::LOCALHOST), 7878).unwrap();
        assert_eq!(h.service, ServiceType::Radarr);
        assert_eq!(kb.hint_for(lan, 7878).unwrap().container, "radarr");
        assert!(kb.hint_for(remote, 7878).is_none());

        assert_eq!(kb.hint_for(lan, 8080).unwrap().service, ServiceType::Qbittorrent);
        assert!(kb.hint_for(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080).is_none());
        // Unrecognised images produce no hints.
        assert!(kb.hint_for(lan, 5432).is_none());
    }

    struct Broken;

    #[async_trait]
    impl KnowledgeSource for Broken {
        async fn containers(&self) -> anyhow::Result<Vec<ContainerInfo>> {
            bail!("runtime not installed")
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let kb = load_external_knowledge(&Broken).await;
        assert!(kb.is_empty());
    }
}
