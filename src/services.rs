//! Closed set of service types the engine can recognise, plus the small
//! capability interface used once a service type is known.

use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Radarr,
    Sonarr,
    Lidarr,
    Readarr,
    Prowlarr,
    Bazarr,
    Overseerr,
    Jellyseerr,
    Tautulli,
    Plex,
    Jellyfin,
    Emby,
    Qbittorrent,
    Transmission,
    Deluge,
    Sabnzbd,
    Nzbget,
    Portainer,
    HomeAssistant,
    Unraid,
    Synology,
    /// Answered HTTP but matched no rule.
    Unknown,
}

impl ServiceType {
    /// Every recognisable type; `Unknown` is not part of the catalogue.
    pub const ALL: &'static [ServiceType] = &[
        ServiceType::Radarr,
        ServiceType::Sonarr,
        ServiceType::Lidarr,
        ServiceType::Readarr,
        ServiceType::Prowlarr,
        ServiceType::Bazarr,
        ServiceType::Overseerr,
        ServiceType::Jellyseerr,
        ServiceType::Tautulli,
        ServiceType::Plex,
        ServiceType::Jellyfin,
        ServiceType::Emby,
        ServiceType::Qbittorrent,
        ServiceType::Transmission,
        ServiceType::Deluge,
        ServiceType::Sabnzbd,
        ServiceType::Nzbget,
        ServiceType::Portainer,
        ServiceType::HomeAssistant,
        ServiceType::Unraid,
        ServiceType::Synology,
    ];

    /// Lowercase label used in results and APIs.
    pub fn label(self) -> &'static str {
        match self {
            ServiceType::Radarr => "radarr",
            ServiceType::Sonarr => "sonarr",
            ServiceType::Lidarr => "lidarr",
            ServiceType::Readarr => "readarr",
            ServiceType::Prowlarr => "prowlarr",
            ServiceType::Bazarr => "bazarr",
            ServiceType::Overseerr => "overseerr",
            ServiceType::Jellyseerr => "jellyseerr",
            ServiceType::Tautulli => "tautulli",
            ServiceType::Plex => "plex",
            ServiceType::Jellyfin => "jellyfin",
            ServiceType::Emby => "emby",
            ServiceType::Qbittorrent => "qbittorrent",
            ServiceType::Transmission => "transmission",
            ServiceType::Deluge => "deluge",
            ServiceType::Sabnzbd => "sabnzbd",
            ServiceType::Nzbget => "nzbget",
            ServiceType::Portainer => "portainer",
            ServiceType::HomeAssistant => "homeassistant",
            ServiceType::Unraid => "unraid",
            ServiceType::Synology => "synology",
            ServiceType::Unknown => "unknown",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ServiceType::Radarr => "Radarr",
            ServiceType::Sonarr => "Sonarr",
            ServiceType::Lidarr => "Lidarr",
            ServiceType::Readarr => "Readarr",
            ServiceType::Prowlarr => "Prowlarr",
            ServiceType::Bazarr => "Bazarr",
            ServiceType::Overseerr => "Overseerr",
            ServiceType::Jellyseerr => "Jellyseerr",
            ServiceType::Tautulli => "Tautulli",
            ServiceType::Plex => "Plex Media Server",
            ServiceType::Jellyfin => "Jellyfin",
            ServiceType::Emby => "Emby",
            ServiceType::Qbittorrent => "qBittorrent",
            ServiceType::Transmission => "Transmission",
            ServiceType::Deluge => "Deluge",
            ServiceType::Sabnzbd => "SABnzbd",
            ServiceType::Nzbget => "NZBGet",
            ServiceType::Portainer => "Portainer",
            ServiceType::HomeAssistant => "Home Assistant",
            ServiceType::Unraid => "Unraid",
            ServiceType::Synology => "Synology DSM",
            ServiceType::Unknown => "Unknown Web Service",
        }
    }

    /// Ports the service listens on out of the box.
    pub fn default_ports(self) -> &'static [u16] {
        match self {
            ServiceType::Radarr => &[7878],
            ServiceType::Sonarr => &[8989],
            ServiceType::Lidarr => &[8686],
            ServiceType::Readarr => &[8787],
            ServiceType::Prowlarr => &[9696],
            ServiceType::Bazarr => &[6767],
            ServiceType::Overseerr => &[5055],
            ServiceType::Jellyseerr => &[5055],
            ServiceType::Tautulli => &[8181],
            ServiceType::Plex => &[32400],
            ServiceType::Jellyfin => &[8096, 8920],
            ServiceType::Emby => &[8096, 8920],
            ServiceType::Qbittorrent => &[8080],
            ServiceType::Transmission => &[9091],
            ServiceType::Deluge => &[8112],
            ServiceType::Sabnzbd => &[8080, 8085],
            ServiceType::Nzbget => &[6789],
            ServiceType::Portainer => &[9000, 9443],
            ServiceType::HomeAssistant => &[8123],
            ServiceType::Unraid => &[80, 443],
            ServiceType::Synology => &[5000, 5001],
            ServiceType::Unknown => &[],
        }
    }

    /// Substrings that identify the service in container names or images.
    pub fn container_keywords(self) -> &'static [&'static str] {
        match self {
            ServiceType::Radarr => &["radarr"],
            ServiceType::Sonarr => &["sonarr"],
            ServiceType::Lidarr => &["lidarr"],
            ServiceType::Readarr => &["readarr"],
            ServiceType::Prowlarr => &["prowlarr"],
            ServiceType::Bazarr => &["bazarr"],
            ServiceType::Overseerr => &["overseerr"],
            ServiceType::Jellyseerr => &["jellyseerr"],
            ServiceType::Tautulli => &["tautulli"],
            ServiceType::Plex => &["plex", "pms-docker"],
            ServiceType::Jellyfin => &["jellyfin"],
            ServiceType::Emby => &["emby"],
            ServiceType::Qbittorrent => &["qbittorrent"],
            ServiceType::Transmission => &["transmission"],
            ServiceType::Deluge => &["deluge"],
            ServiceType::Sabnzbd => &["sabnzbd"],
            ServiceType::Nzbget => &["nzbget"],
            ServiceType::Portainer => &["portainer"],
            ServiceType::HomeAssistant => &["homeassistant", "home-assistant"],
            ServiceType::Unraid | ServiceType::Synology | ServiceType::Unknown => &[],
        }
    }

    /// Match a container name or image against the keyword table.
    ///
    /// Longer keywords win so `jellyseerr` is never reported as something shorter.
    pub fn from_container(name: &str, image: &str) -> Option<ServiceType> {
        let haystack = format!("{} {}", name, image).to_lowercase();
        let mut best: Option<(usize, ServiceType)> = None;
        for &svc in Self::ALL {
            for kw in svc.container_keywords() {
                if haystack.contains(kw) && best.map_or(true, |(len, _)| kw.len() > len) {
                    best = Some((kw.len(), svc));
                }
            }
        }
        best.map(|(_, svc)| svc)
    }

    /// Path of the endpoint that reports service health/version.
    pub fn status_path(self) -> &'static str {
        match self {
            ServiceType::Radarr | ServiceType::Sonarr => "/api/v3/system/status",
            ServiceType::Lidarr | ServiceType::Readarr | ServiceType::Prowlarr => {
                "/api/v1/system/status"
            }
            ServiceType::Bazarr => "/api/system/status",
            ServiceType::Overseerr | ServiceType::Jellyseerr => "/api/v1/status",
            ServiceType::Tautulli => "/api/v2?cmd=status",
            ServiceType::Plex => "/identity",
            ServiceType::Jellyfin | ServiceType::Emby => "/System/Info/Public",
            ServiceType::Qbittorrent => "/api/v2/app/version",
            ServiceType::Transmission => "/transmission/rpc",
            ServiceType::Deluge => "/json",
            ServiceType::Sabnzbd => "/api?mode=version&output=json",
            ServiceType::Nzbget => "/jsonrpc/version",
            ServiceType::Portainer => "/api/status",
            ServiceType::HomeAssistant => "/api/",
            ServiceType::Synology => "/webapi/query.cgi?api=SYNO.API.Info&version=1&method=query",
            ServiceType::Unraid | ServiceType::Unknown => "/",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection details for a service whose type is already known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Operations every supported service type offers once configured.
#[async_trait]
pub trait ServiceApi {
    fn headers(&self, config: &ServiceConfig) -> HeaderMap;
    async fn test_connection(&self, client: &Client, config: &ServiceConfig) -> Result<()>;
    async fn get_stats(&self, client: &Client, config: &ServiceConfig) -> Result<serde_json::Value>;
}

impl ServiceType {
    fn status_url(self, config: &ServiceConfig) -> String {
        let base = config.base_url.trim_end_matches('/');
        let mut url = format!("{}{}", base, self.status_path());
        // These two take the key as a query parameter instead of a header.
        if matches!(self, ServiceType::Tautulli | ServiceType::Sabnzbd) {
            if let Some(key) = &config.api_key {
                url.push_str("&apikey=");
                url.push_str(key);
            }
        }
        url
    }

    fn api_key_header(self) -> Option<&'static str> {
        match self {
            ServiceType::Radarr
            | ServiceType::Sonarr
            | ServiceType::Lidarr
            | ServiceType::Readarr
            | ServiceType::Prowlarr
            | ServiceType::Bazarr
            | ServiceType::Overseerr
            | ServiceType::Jellyseerr
            | ServiceType::Portainer => Some("x-api-key"),
            ServiceType::Plex => Some("x-plex-token"),
            ServiceType::Jellyfin | ServiceType::Emby => Some("x-emby-token"),
            _ => None,
        }
    }
}

#[async_trait]
impl ServiceApi for ServiceType {
    fn headers(&self, config: &ServiceConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        if let (Some(name), Some(key)) = (self.api_key_header(), config.api_key.as_deref()) {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        if *self == ServiceType::HomeAssistant {
            if let Some(key) = config.api_key.as_deref() {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
        }
        headers
    }

    async fn test_connection(&self, client: &Client, config: &ServiceConfig) -> Result<()> {
        client
            .get(self.status_url(config))
            .headers(self.headers(config))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_stats(&self, client: &Client, config: &ServiceConfig) -> Result<serde_json::Value> {
        let resp = client
            .get(self.status_url(config))
            .headers(self.headers(config))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<serde_json::Value>().await?)
    }
}
