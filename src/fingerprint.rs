//! HTTP(S) fingerprinting of open ports.
//!
//! Every open port is probed with the rule catalogue. Each rule's response is
//! scored by [`evaluate_expectation`]; the best match across all service types
//! wins and its confidence is composed by [`compose_confidence`].

use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use crate::rules::{CatalogScope, DetectionRule, Expectation, ServiceCatalog, ServiceEntry};
use crate::services::ServiceType;
use crate::types::ServiceDetection;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Confidence reported by the generic web fallback.
pub const GENERIC_WEB_CONFIDENCE: u8 = 30;

/// Response bodies are truncated to this many bytes before matching.
const MAX_BODY_BYTES: usize = 256 * 1024;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoostSource {
    /// The probed port is one the service uses by default.
    WellKnownPort,
    /// Container metadata names the same service for this port.
    ExternalKnowledge,
}

impl BoostSource {
    pub fn max_delta(self) -> u8 {
        match self {
            BoostSource::WellKnownPort => 15,
            BoostSource::ExternalKnowledge => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfidenceBoost {
    pub source: BoostSource,
    pub delta: u8,
}

impl ConfidenceBoost {
    /// Boost of the full size allowed for `source`.
    pub fn full(source: BoostSource) -> Self {
        Self {
            source,
            delta: source.max_delta(),
        }
    }
}

/// Base confidence plus bounded boosts, clamped once to 0..=100.
pub fn compose_confidence(base: u8, boosts: &[ConfidenceBoost]) -> u8 {
    let extra: u32 = boosts
        .iter()
        .map(|b| u32::from(b.delta.min(b.source.max_delta())))
        .sum();
    (u32::from(base.min(100)) + extra).min(100) as u8
}

/// The parts of an HTTP response that rules look at.
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ProbeResponse {
    pub fn title(&self) -> Option<String> {
        extract_title(&self.body)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub passed: usize,
    pub total: usize,
}

impl MatchOutcome {
    fn failed() -> Self {
        Self {
            matched: false,
            passed: 0,
            total: 0,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// Score a response against an expectation.
///
/// The status code is mandatory: a mismatch fails immediately. Every other
/// configured axis counts as one check, and the rule matches when the share
/// of passed checks reaches the rule's threshold.
pub fn evaluate_expectation(expect: &Expectation, resp: &ProbeResponse) -> MatchOutcome {
    let mut passed = 0usize;
    let mut total = 0usize;
    let mut check = |ok: bool| {
        total += 1;
        if ok {
            passed += 1;
        }
    };

    if let Some(codes) = &expect.status {
        if !codes.contains(&resp.status) {
            return MatchOutcome::failed();
        }
        check(true);
    }

    let json = if expect.json_path.is_some() || expect.json_keys.is_some() {
        resp.json()
    } else {
        None
    };

    if let Some(needle) = &expect.body_contains {
        let ok = match &expect.json_path {
            Some(path) => json
                .as_ref()
                .and_then(|v| json_lookup(v, path))
                .map(|v| contains_ci(&json_text(v), needle))
                .unwrap_or(false),
            None => contains_ci(&resp.body, needle),
        };
        check(ok);
    }

    if let Some(re) = &expect.title {
        check(resp.title().is_some_and(|t| re.is_match(&t)));
    }

    if let Some((name, needle)) = &expect.header {
        let value = resp
            .headers
            .get(name.as_str())
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        check(match (value, needle) {
            (Some(v), Some(n)) => contains_ci(&v, n),
            (Some(_), None) => true,
            (None, _) => false,
        });
    }

    if let Some(keys) = &expect.json_keys {
        check(
            json.as_ref()
                .is_some_and(|v| keys.iter().all(|k| json_lookup(v, k).is_some())),
        );
    }

    if let Some((codes, needle)) = &expect.status_with_body {
        check(codes.contains(&resp.status) && contains_ci(&resp.body, needle));
    }

    if total == 0 {
        return MatchOutcome::failed();
    }
    let outcome = MatchOutcome {
        matched: false,
        passed,
        total,
    };
    MatchOutcome {
        matched: outcome.fraction() >= expect.required_fraction(),
        ..outcome
    }
}

/// Contents of the first `<title>` element, whitespace collapsed.
pub fn extract_title(body: &str) -> Option<String> {
    let raw = TITLE_RE.captures(body)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Walk a dotted path (`data.items.0.name`) through objects and arrays.
pub fn json_lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |cur, seg| match cur {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn json_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Schemes to try for a port: TLS ports get HTTPS only, 80 gets HTTP only.
pub fn protocols_for_port(port: u16) -> &'static [&'static str] {
    match port {
        443 | 8443 => &["https"],
        80 => &["http"],
        _ => &["http", "https"],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub timeout: Duration,
    pub deep_detection: bool,
}

/// A rule that matched, before confidence composition.
struct RuleMatch<'a> {
    rule: &'a DetectionRule,
    response: ProbeResponse,
}

/// Responses seen on one base URL; `None` marks a failed request.
type ResponseCache = HashMap<String, Option<ProbeResponse>>;

/// Cache key marking a base URL that refused or stalled.
const UNREACHABLE: &str = "";

pub struct ServiceFingerprinter {
    client: Client,
    catalog: Arc<ServiceCatalog>,
    scope: CatalogScope,
}

impl ServiceFingerprinter {
    pub fn new(catalog: Arc<ServiceCatalog>, scope: CatalogScope) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::limited(5))
            .user_agent(concat!("lan-service-scan/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            catalog,
            scope,
        })
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Identify the service on `ip:port`.
    ///
    /// `Ok(None)` means nothing recognisable answered. Errors are reserved for
    /// rules that cannot even be turned into a request.
    pub async fn detect_service(
        &self,
        ip: IpAddr,
        port: u16,
        opts: &DetectOptions,
        knowledge: &KnowledgeBase,
    ) -> Result<Option<ServiceDetection>> {
        for &scheme in protocols_for_port(port) {
            let base = format!("{}://{}", scheme, SocketAddr::new(ip, port));
            let mut cache = ResponseCache::new();

            if let Some(found) = self
                .best_match(&base, ip, port, opts, knowledge, &mut cache)
                .await?
            {
                return Ok(Some(found));
            }
            if opts.deep_detection {
                if let Some(found) = self.generic_probe(&base, ip, port, opts, &mut cache).await? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    async fn best_match(
        &self,
        base: &str,
        ip: IpAddr,
        port: u16,
        opts: &DetectOptions,
        knowledge: &KnowledgeBase,
        cache: &mut ResponseCache,
    ) -> Result<Option<ServiceDetection>> {
        let entries: Vec<&ServiceEntry> = self.catalog.entries().iter().collect();
        let passes: Vec<Vec<&ServiceEntry>> = match self.scope {
            CatalogScope::Full => vec![entries],
            CatalogScope::PortHintFirst => {
                let (hinted, rest): (Vec<&ServiceEntry>, Vec<&ServiceEntry>) =
                    entries.into_iter().partition(|e| e.ports.contains(&port));
                vec![hinted, rest]
            }
        };

        for pass in passes {
            let mut best: Option<ServiceDetection> = None;
            for entry in pass {
                let Some(m) = self.match_entry(base, entry, opts, cache).await? else {
                    continue;
                };
                let detection = self.build_detection(base, ip, port, entry.service, m, knowledge);
                tracing::trace!(
                    %ip, port, service = %detection.service, confidence = detection.confidence,
                    "candidate service match"
                );
                if best.as_ref().map_or(true, |b| detection.confidence > b.confidence) {
                    best = Some(detection);
                }
            }
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }

    /// Highest-confidence matching rule of one service type.
    async fn match_entry<'a>(
        &self,
        base: &str,
        entry: &'a ServiceEntry,
        opts: &DetectOptions,
        cache: &mut ResponseCache,
    ) -> Result<Option<RuleMatch<'a>>> {
        let mut best: Option<RuleMatch<'a>> = None;
        for rule in &entry.rules {
            let Some(response) = self.fetch(base, rule, opts, cache).await? else {
                continue;
            };
            if !evaluate_expectation(&rule.expect, &response).matched {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |b| rule.confidence > b.rule.confidence)
            {
                best = Some(RuleMatch { rule, response });
            }
        }
        Ok(best)
    }

    fn build_detection(
        &self,
        base: &str,
        ip: IpAddr,
        port: u16,
        service: ServiceType,
        m: RuleMatch<'_>,
        knowledge: &KnowledgeBase,
    ) -> ServiceDetection {
        let mut boosts = Vec::new();
        if self.catalog.is_well_known_port(service, port) {
            boosts.push(ConfidenceBoost::full(BoostSource::WellKnownPort));
        }
        let hint = knowledge.hint_for(ip, port);
        if hint.is_some_and(|h| h.service == service) {
            boosts.push(ConfidenceBoost::full(BoostSource::ExternalKnowledge));
        }
        let confidence = compose_confidence(m.rule.confidence, &boosts);

        let version = m.rule.version_path.as_deref().and_then(|path| {
            let json = m.response.json()?;
            json_lookup(&json, path).map(json_text)
        });

        let mut details = format!(
            "matched {} (HTTP {}, rule confidence {})",
            m.rule.id, m.response.status, m.rule.confidence
        );
        for b in &boosts {
            match b.source {
                BoostSource::WellKnownPort => details.push_str(&format!(", +{} well-known port", b.delta)),
                BoostSource::ExternalKnowledge => {
                    if let Some(h) = hint {
                        details.push_str(&format!(", +{} container {}", b.delta, h.container));
                    }
                }
            }
        }

        ServiceDetection {
            ip,
            port,
            service,
            name: service.display_name().to_string(),
            confidence,
            version,
            ssl: base.starts_with("https"),
            url: base.to_string(),
            details,
            method: format!("rule:{}", m.rule.id),
        }
    }

    /// Bare GET on the base URL; any 2xx/3xx answer counts as an unknown web service.
    async fn generic_probe(
        &self,
        base: &str,
        ip: IpAddr,
        port: u16,
        opts: &DetectOptions,
        cache: &mut ResponseCache,
    ) -> Result<Option<ServiceDetection>> {
        let root = DetectionRule::get("generic-web", "/", GENERIC_WEB_CONFIDENCE, Expectation::new());
        let Some(resp) = self.fetch(base, &root, opts, cache).await? else {
            return Ok(None);
        };
        if !(200..400).contains(&resp.status) {
            return Ok(None);
        }

        let title = resp.title();
        let server = resp
            .headers
            .get(reqwest::header::SERVER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let mut details = format!("HTTP {}", resp.status);
        if let Some(t) = &title {
            details.push_str(&format!(", title: {}", t));
        }
        if let Some(s) = &server {
            details.push_str(&format!(", server: {}", s));
        }

        Ok(Some(ServiceDetection {
            ip,
            port,
            service: ServiceType::Unknown,
            name: title.unwrap_or_else(|| ServiceType::Unknown.display_name().to_string()),
            confidence: GENERIC_WEB_CONFIDENCE,
            version: None,
            ssl: base.starts_with("https"),
            url: base.to_string(),
            details,
            method: "generic-web".to_string(),
        }))
    }

    /// Send a rule's request once per base URL; later rules reuse the answer.
    ///
    /// Failed requests are cached as `None`. A connect failure (refused,
    /// TLS mismatch) or a timeout marks the whole base unreachable for the
    /// remaining rules, so a port that accepts but never answers costs one
    /// timeout per protocol.
    async fn fetch(
        &self,
        base: &str,
        rule: &DetectionRule,
        opts: &DetectOptions,
        cache: &mut ResponseCache,
    ) -> Result<Option<ProbeResponse>> {
        if matches!(cache.get(UNREACHABLE), Some(None)) {
            return Ok(None);
        }
        let key = format!(
            "{} {} {:?} {:?}",
            rule.method, rule.path, rule.headers, rule.body
        );
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }

        let mut builder = self
            .client
            .request(rule.method.clone(), format!("{}{}", base, rule.path))
            .timeout(opts.timeout);
        for (name, value) in &rule.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &rule.body {
            builder = builder.body(body.clone());
        }
        let request = builder.build()?;

        let response = match self.client.execute(request).await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers = resp.headers().clone();
                let mut body = resp.text().await.unwrap_or_default();
                if body.len() > MAX_BODY_BYTES {
                    let mut cut = MAX_BODY_BYTES;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                Some(ProbeResponse {
                    status,
                    headers,
                    body,
                })
            }
            Err(e) => {
                tracing::debug!(url = %base, rule = %rule.id, error = %e, "probe request failed");
                if e.is_connect() || e.is_timeout() {
                    cache.insert(UNREACHABLE.to_string(), None);
                }
                None
            }
        };
        cache.insert(key, response.clone());
        Ok(response)
    }
}
