//! Detection rule catalogue: which HTTP probes identify which service.
//!
//! The catalogue is plain data built once at startup and shared read-only.

use crate::services::ServiceType;
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Fraction of non-mandatory checks that must pass when a rule sets no threshold.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;

/// Which part of the catalogue is evaluated for an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogScope {
    /// Every service type, best match wins.
    #[default]
    Full,
    /// Service types registered on the port first; full catalogue only if none match.
    PortHintFirst,
}

/// What a response must look like for a rule to match.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    /// Mandatory: a mismatch fails the rule outright.
    pub status: Option<Vec<u16>>,
    pub body_contains: Option<String>,
    /// Dotted JSON path that scopes `body_contains` to one field.
    pub json_path: Option<String>,
    pub title: Option<Regex>,
    /// Header name plus an optional substring its value must contain.
    pub header: Option<(String, Option<String>)>,
    /// Dotted JSON paths that must all exist.
    pub json_keys: Option<Vec<String>>,
    /// Status in the set and body containing the text, checked together.
    pub status_with_body: Option<(Vec<u16>, String)>,
    pub match_threshold: Option<f64>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, codes: &[u16]) -> Self {
        self.status = Some(codes.to_vec());
        self
    }

    pub fn body(mut self, needle: &str) -> Self {
        self.body_contains = Some(needle.to_string());
        self
    }

    pub fn json_field(mut self, path: &str, needle: &str) -> Self {
        self.json_path = Some(path.to_string());
        self.body_contains = Some(needle.to_string());
        self
    }

    /// Case-insensitive regex matched against the HTML `<title>`.
    ///
    /// Panics on an invalid pattern; patterns are compile-time literals.
    pub fn title(mut self, pattern: &str) -> Self {
        let re = Regex::new(&format!("(?i){}", pattern)).expect("valid title pattern");
        self.title = Some(re);
        self
    }

    pub fn header(mut self, name: &str, contains: Option<&str>) -> Self {
        self.header = Some((name.to_lowercase(), contains.map(str::to_string)));
        self
    }

    pub fn json_keys(mut self, keys: &[&str]) -> Self {
        self.json_keys = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn status_with_body(mut self, codes: &[u16], needle: &str) -> Self {
        self.status_with_body = Some((codes.to_vec(), needle.to_string()));
        self
    }

    pub fn threshold(mut self, fraction: f64) -> Self {
        self.match_threshold = Some(fraction.clamp(0.0, 1.0));
        self
    }

    pub fn required_fraction(&self) -> f64 {
        self.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD)
    }
}

/// One HTTP probe and the response it expects.
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub id: String,
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub expect: Expectation,
    pub confidence: u8,
    /// Dotted JSON path holding the service version.
    pub version_path: Option<String>,
}

impl DetectionRule {
    pub fn get(id: &str, path: &str, confidence: u8, expect: Expectation) -> Self {
        Self {
            id: id.to_string(),
            method: Method::GET,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
            expect,
            confidence: confidence.min(100),
            version_path: None,
        }
    }

    pub fn post_json(id: &str, path: &str, body: &str, confidence: u8, expect: Expectation) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.to_string()),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            ..Self::get(id, path, confidence, expect)
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_version(mut self, path: &str) -> Self {
        self.version_path = Some(path.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub service: ServiceType,
    pub ports: Vec<u16>,
    pub rules: Vec<DetectionRule>,
}

/// Registration table mapping each service type to its ports and rules.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    entries: Vec<ServiceEntry>,
}

impl ServiceCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalogue with every built-in service type registered.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for &svc in ServiceType::ALL {
            catalog.register(svc, svc.default_ports(), builtin_rules(svc));
        }
        catalog
    }

    /// Register (or replace) a service type.
    pub fn register(&mut self, service: ServiceType, ports: &[u16], rules: Vec<DetectionRule>) {
        let entry = ServiceEntry {
            service,
            ports: ports.to_vec(),
            rules,
        };
        match self.entries.iter_mut().find(|e| e.service == service) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Treat `port` as a well-known port of `service` as well.
    pub fn add_port(&mut self, service: ServiceType, port: u16) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.service == service) {
            if !entry.ports.contains(&port) {
                entry.ports.push(port);
            }
        }
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    pub fn entry(&self, service: ServiceType) -> Option<&ServiceEntry> {
        self.entries.iter().find(|e| e.service == service)
    }

    pub fn is_well_known_port(&self, service: ServiceType, port: u16) -> bool {
        self.entry(service).is_some_and(|e| e.ports.contains(&port))
    }

    pub fn services_on_port(&self, port: u16) -> Vec<ServiceType> {
        self.entries
            .iter()
            .filter(|e| e.ports.contains(&port))
            .map(|e| e.service)
            .collect()
    }

    /// Union of every registered port, sorted and deduplicated.
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.entries.iter().flat_map(|e| e.ports.iter().copied()).collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    pub fn rule_count(&self) -> usize {
        self.entries.iter().map(|e| e.rules.len()).sum()
    }
}

fn arr_rules(name: &str, api: &str) -> Vec<DetectionRule> {
    let id = name.to_lowercase();
    vec![
        DetectionRule::get(
            &format!("{id}-system-status"),
            &format!("/api/{api}/system/status"),
            90,
            Expectation::new().status(&[200]).json_field("appName", name),
        )
        .with_version("version"),
        DetectionRule::get(
            &format!("{id}-web-title"),
            "/",
            80,
            Expectation::new().status(&[200]).title(&format!(r"^\s*{name}\b")),
        ),
        DetectionRule::get(
            &format!("{id}-initialize"),
            "/initialize.json",
            75,
            Expectation::new()
                .status(&[200])
                .json_keys(&["apiRoot", "urlBase"])
                .body(&format!("/api/{api}")),
        ),
    ]
}

fn builtin_rules(service: ServiceType) -> Vec<DetectionRule> {
    match service {
        ServiceType::Radarr => arr_rules("Radarr", "v3"),
        ServiceType::Sonarr => arr_rules("Sonarr", "v3"),
        ServiceType::Lidarr => arr_rules("Lidarr", "v1"),
        ServiceType::Readarr => arr_rules("Readarr", "v1"),
        ServiceType::Prowlarr => arr_rules("Prowlarr", "v1"),
        ServiceType::Bazarr => vec![
            DetectionRule::get(
                "bazarr-web-title",
                "/",
                80,
                Expectation::new().status(&[200]).title(r"bazarr").body("bazarr"),
            ),
            DetectionRule::get(
                "bazarr-system-status",
                "/api/system/status",
                85,
                Expectation::new().status(&[200]).json_keys(&["data.bazarr_version"]),
            )
            .with_version("data.bazarr_version"),
        ],
        ServiceType::Overseerr => vec![
            DetectionRule::get(
                "overseerr-public-settings",
                "/api/v1/settings/public",
                85,
                Expectation::new()
                    .status(&[200])
                    .json_field("applicationTitle", "Overseerr"),
            ),
            DetectionRule::get(
                "overseerr-web-title",
                "/login",
                75,
                Expectation::new().status(&[200]).title(r"overseerr"),
            ),
        ],
        ServiceType::Jellyseerr => vec![
            DetectionRule::get(
                "jellyseerr-public-settings",
                "/api/v1/settings/public",
                85,
                Expectation::new()
                    .status(&[200])
                    .json_field("applicationTitle", "Jellyseerr"),
            ),
            DetectionRule::get(
                "jellyseerr-web-title",
                "/login",
                75,
                Expectation::new().status(&[200]).title(r"jellyseerr"),
            ),
        ],
        ServiceType::Tautulli => vec![DetectionRule::get(
            "tautulli-login",
            "/auth/login",
            85,
            Expectation::new().status(&[200]).title(r"tautulli"),
        )],
        ServiceType::Plex => vec![
            DetectionRule::get(
                "plex-identity",
                "/identity",
                90,
                Expectation::new()
                    .status(&[200])
                    .body("MediaContainer")
                    .header("x-plex-protocol", None),
            ),
            DetectionRule::get(
                "plex-web",
                "/web/index.html",
                75,
                Expectation::new().status(&[200]).title(r"^\s*plex"),
            ),
        ],
        ServiceType::Jellyfin => vec![DetectionRule::get(
            "jellyfin-public-info",
            "/System/Info/Public",
            95,
            Expectation::new()
                .status(&[200])
                .json_field("ProductName", "Jellyfin")
                .json_keys(&["ServerName", "Version", "Id"]),
        )
        .with_version("Version")],
        ServiceType::Emby => vec![DetectionRule::get(
            "emby-public-info",
            "/System/Info/Public",
            95,
            Expectation::new()
                .status(&[200])
                .json_field("ProductName", "Emby")
                .json_keys(&["ServerName", "Version", "Id"]),
        )
        .with_version("Version")],
        ServiceType::Qbittorrent => vec![
            DetectionRule::get(
                "qbittorrent-web-title",
                "/",
                85,
                Expectation::new().status(&[200]).title(r"qbittorrent"),
            ),
            DetectionRule::get(
                "qbittorrent-api-forbidden",
                "/api/v2/app/version",
                55,
                Expectation::new().status(&[401, 403]).body("Forbidden"),
            ),
        ],
        ServiceType::Transmission => vec![DetectionRule::get(
            "transmission-rpc-session",
            "/transmission/rpc",
            95,
            Expectation::new()
                .status(&[409])
                .header("x-transmission-session-id", None),
        )],
        ServiceType::Deluge => vec![
            DetectionRule::get(
                "deluge-web-title",
                "/",
                85,
                Expectation::new().status(&[200]).title(r"deluge"),
            ),
            DetectionRule::post_json(
                "deluge-json-rpc",
                "/json",
                r#"{"method":"auth.check_session","params":[],"id":1}"#,
                75,
                Expectation::new().status(&[200]).json_keys(&["result", "error", "id"]),
            ),
        ],
        ServiceType::Sabnzbd => vec![
            DetectionRule::get(
                "sabnzbd-web-title",
                "/sabnzbd/",
                85,
                Expectation::new().status(&[200]).title(r"sabnzbd"),
            ),
            DetectionRule::get(
                "sabnzbd-api-version",
                "/api?mode=version&output=json",
                70,
                Expectation::new()
                    .status(&[200])
                    .json_keys(&["version"])
                    .header("content-type", Some("json")),
            )
            .with_version("version"),
        ],
        ServiceType::Nzbget => vec![DetectionRule::get(
            "nzbget-basic-auth",
            "/",
            90,
            Expectation::new()
                .status(&[401])
                .header("www-authenticate", Some("NZBGet")),
        )],
        ServiceType::Portainer => vec![
            DetectionRule::get(
                "portainer-status",
                "/api/status",
                90,
                Expectation::new()
                    .status(&[200])
                    .json_keys(&["Version", "InstanceID"]),
            )
            .with_version("Version"),
            DetectionRule::get(
                "portainer-web-title",
                "/",
                80,
                Expectation::new().status(&[200]).title(r"portainer"),
            ),
        ],
        ServiceType::HomeAssistant => vec![
            DetectionRule::get(
                "homeassistant-manifest",
                "/manifest.json",
                90,
                Expectation::new()
                    .status(&[200])
                    .json_field("name", "Home Assistant"),
            ),
            DetectionRule::get(
                "homeassistant-api-unauthorized",
                "/api/",
                70,
                Expectation::new().status_with_body(&[401], "401: Unauthorized"),
            ),
            DetectionRule::get(
                "homeassistant-web-title",
                "/",
                85,
                Expectation::new().status(&[200]).title(r"home assistant"),
            ),
        ],
        ServiceType::Unraid => vec![DetectionRule::get(
            "unraid-login",
            "/login",
            80,
            Expectation::new()
                .status(&[200])
                .body("unraid")
                .title(r"login"),
        )],
        ServiceType::Synology => vec![
            DetectionRule::get(
                "synology-api-info",
                "/webapi/query.cgi?api=SYNO.API.Info&version=1&method=query",
                90,
                Expectation::new()
                    .status(&[200])
                    .json_keys(&["data", "success"])
                    .body("SYNO.API.Auth"),
            ),
            DetectionRule::get(
                "synology-web-title",
                "/",
                80,
                Expectation::new().status(&[200]).title(r"synology"),
            ),
        ],
        ServiceType::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_service() {
        let catalog = ServiceCatalog::builtin();
        assert_eq!(catalog.entries().len(), ServiceType::ALL.len());
        for entry in catalog.entries() {
            assert!(!entry.rules.is_empty(), "{} has no rules", entry.service);
            assert!(!entry.ports.is_empty(), "{} has no ports", entry.service);
            for rule in &entry.rules {
                assert!(rule.confidence <= 100);
            }
        }
        assert!(catalog.entry(ServiceType::Unknown).is_none());
    }

    #[test]
    fn ports_and_lookup() {
        let catalog = ServiceCatalog::builtin();
        let ports = catalog.all_ports();
        assert!(ports.contains(&7878) && ports.contains(&32400));
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        assert!(catalog.is_well_known_port(ServiceType::Radarr, 7878));
        assert!(!catalog.is_well_known_port(ServiceType::Radarr, 8989));
        let on_8080 = catalog.services_on_port(8080);
        assert!(on_8080.contains(&ServiceType::Qbittorrent));
        assert!(on_8080.contains(&ServiceType::Sabnzbd));
    }

    #[test]
    fn register_replaces_and_add_port_extends() {
        let mut catalog = ServiceCatalog::builtin();
        let before = catalog.entries().len();
        catalog.register(ServiceType::Radarr, &[7878], Vec::new());
        assert_eq!(catalog.entries().len(), before);
        assert!(catalog.entry(ServiceType::Radarr).unwrap().rules.is_empty());

        catalog.add_port(ServiceType::Sonarr, 18989);
        assert!(catalog.is_well_known_port(ServiceType::Sonarr, 18989));
        assert!(catalog.all_ports().contains(&18989));
    }

    #[test]
    fn threshold_defaults_and_clamps() {
        assert_eq!(Expectation::new().required_fraction(), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(Expectation::new().threshold(3.0).required_fraction(), 1.0);
    }
}
