use crate::error::{Result, ScanError};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{ipv4_mask_to_prefix, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Hard cap on the number of addresses expanded from one contiguous block.
pub const MAX_HOSTS_PER_BLOCK: usize = 1000;

/// Subnets scanned by `auto` when no usable local interface is found.
pub const FALLBACK_SUBNETS: &[&str] = &["192.168.1.0/24", "192.168.0.0/24", "10.0.0.0/24"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeKind {
    Single,
    Cidr,
    ExplicitRange,
    Auto,
}

/// Parsed range expression. Addresses are kept in their 32-bit form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRange {
    pub kind: RangeKind,
    pub input: String,
    /// First usable address (unused for `auto`).
    pub start: u32,
    /// Last usable address (unused for `auto`).
    pub end: u32,
    /// Usable addresses described by the expression, before the per-block cap.
    pub total_addresses: u64,
    /// Local blocks discovered for `auto`, as CIDR strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
}

impl TargetRange {
    fn contiguous(kind: RangeKind, input: &str, start: u32, end: u32) -> Self {
        Self {
            kind,
            input: input.to_string(),
            start,
            end,
            total_addresses: u64::from(end - start) + 1,
            cidrs: Vec::new(),
        }
    }

    /// Number of addresses `generate_ips` will actually produce.
    pub fn capped_count(&self) -> usize {
        match self.kind {
            RangeKind::Auto => generate_ips(self).len(),
            _ => (self.total_addresses as usize).min(MAX_HOSTS_PER_BLOCK),
        }
    }

    /// Human readable one-liner, e.g. `10.0.0.1 - 10.0.0.254 (254 addresses)`.
    pub fn describe(&self) -> String {
        match self.kind {
            RangeKind::Auto => format!("auto: {}", self.cidrs.join(", ")),
            RangeKind::Single => Ipv4Addr::from(self.start).to_string(),
            _ => format!(
                "{} - {} ({} addresses)",
                Ipv4Addr::from(self.start),
                Ipv4Addr::from(self.end),
                self.total_addresses
            ),
        }
    }
}

/// Parse a range expression: `auto`, `a.b.c.d/nn`, `a.b.c.d-e.f.g.h` or a single address.
pub fn parse_range(input: &str) -> Result<TargetRange> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("auto") {
        return Ok(auto_range(trimmed, detect_local_cidrs()));
    }
    if trimmed.contains('/') {
        return parse_cidr(trimmed);
    }
    if let Some((a, b)) = trimmed.split_once('-') {
        let start = parse_ipv4(a.trim())?;
        let end = parse_ipv4(b.trim())?;
        if u32::from(start) > u32::from(end) {
            return Err(ScanError::StartAfterEnd {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        return Ok(TargetRange::contiguous(
            RangeKind::ExplicitRange,
            trimmed,
            start.into(),
            end.into(),
        ));
    }
    let ip = parse_ipv4(trimmed)?;
    Ok(TargetRange::contiguous(
        RangeKind::Single,
        trimmed,
        ip.into(),
        ip.into(),
    ))
}

/// Expand a parsed range into concrete addresses, at most `MAX_HOSTS_PER_BLOCK` per block.
pub fn generate_ips(range: &TargetRange) -> Vec<Ipv4Addr> {
    match range.kind {
        RangeKind::Auto => {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for cidr in &range.cidrs {
                let Ok(block) = parse_cidr(cidr) else { continue };
                for ip in expand_block(block.start, block.end) {
                    if seen.insert(ip) {
                        out.push(ip);
                    }
                }
            }
            out
        }
        _ => expand_block(range.start, range.end),
    }
}

/// Detect local non-loopback IPv4 networks from interface address + netmask.
///
/// Duplicates are removed and the result is sorted for stable output.
pub fn detect_local_cidrs() -> Vec<Ipv4Net> {
    let ifaces = match get_if_addrs() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate network interfaces");
            return Vec::new();
        }
    };
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in ifaces {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            if let Some(net) = network_of(v4.ip, v4.netmask) {
                set.insert(net);
            }
        }
    }
    let mut cidrs: Vec<Ipv4Net> = set.into_iter().collect();
    cidrs.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    cidrs
}

/// Network block containing `ip` under `netmask` (bitwise AND of the two).
pub fn network_of(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Net> {
    let prefix = ipv4_mask_to_prefix(netmask).ok()?;
    let network = Ipv4Addr::from(u32::from(ip) & u32::from(netmask));
    Ipv4Net::new(network, prefix).ok()
}

fn auto_range(input: &str, detected: Vec<Ipv4Net>) -> TargetRange {
    let mut cidrs: Vec<String> = Vec::new();
    for net in detected {
        let s = net.to_string();
        if !cidrs.contains(&s) {
            cidrs.push(s);
        }
    }
    if cidrs.is_empty() {
        tracing::info!("no local IPv4 networks found, using common private subnets");
        cidrs = FALLBACK_SUBNETS.iter().map(|s| s.to_string()).collect();
    }
    let total_addresses = cidrs
        .iter()
        .filter_map(|c| parse_cidr(c).ok())
        .map(|r| r.total_addresses)
        .sum();
    TargetRange {
        kind: RangeKind::Auto,
        input: input.to_string(),
        start: 0,
        end: 0,
        total_addresses,
        cidrs,
    }
}

fn parse_cidr(input: &str) -> Result<TargetRange> {
    let (ip_part, prefix_part) = input
        .split_once('/')
        .ok_or_else(|| ScanError::InvalidRangeFormat(input.to_string()))?;
    let ip = parse_ipv4(ip_part.trim())?;
    let prefix: u32 = prefix_part
        .trim()
        .parse()
        .map_err(|_| ScanError::InvalidRangeFormat(input.to_string()))?;
    if prefix > 32 {
        return Err(ScanError::InvalidPrefixLength(prefix));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(ip) & mask;
    let broadcast = network | !mask;

    // /31 and /32 have no network/broadcast pair to exclude.
    let (start, end) = if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };
    Ok(TargetRange::contiguous(RangeKind::Cidr, input, start, end))
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    s.parse::<Ipv4Addr>()
        .map_err(|_| ScanError::InvalidRangeFormat(s.to_string()))
}

fn expand_block(start: u32, end: u32) -> Vec<Ipv4Addr> {
    (start..=end)
        .take(MAX_HOSTS_PER_BLOCK)
        .map(Ipv4Addr::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_from_ip_and_mask() {
        let net = network_of(Ipv4Addr::new(10, 1, 2, 3), Ipv4Addr::new(255, 255, 255, 0)).unwrap();
        assert_eq!(net.to_string(), "10.1.2.0/24");
        let net = network_of(Ipv4Addr::new(172, 16, 9, 77), Ipv4Addr::new(255, 255, 240, 0)).unwrap();
        assert_eq!(net.to_string(), "172.16.0.0/20");
    }

    #[test]
    fn non_contiguous_mask_is_rejected() {
        assert!(network_of(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 255, 0)).is_none());
    }

    #[test]
    fn cidr_excludes_network_and_broadcast() {
        let r = parse_range("10.0.0.0/30").unwrap();
        assert_eq!(r.kind, RangeKind::Cidr);
        assert_eq!(r.total_addresses, 2);
        assert_eq!(
            generate_ips(&r),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn cidr_host_bits_are_masked() {
        let r = parse_range("192.168.1.77/24").unwrap();
        assert_eq!(Ipv4Addr::from(r.start), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(Ipv4Addr::from(r.end), Ipv4Addr::new(192, 168, 1, 254));
        assert_eq!(r.total_addresses, 254);
    }

    #[test]
    fn slash_32_and_31() {
        let r = parse_range("10.9.9.9/32").unwrap();
        assert_eq!(generate_ips(&r), vec![Ipv4Addr::new(10, 9, 9, 9)]);
        let r = parse_range("10.9.9.8/31").unwrap();
        assert_eq!(r.total_addresses, 2);
    }

    #[test]
    fn large_cidr_is_capped() {
        let r = parse_range("10.0.0.0/16").unwrap();
        assert_eq!(r.total_addresses, 65_534);
        let ips = generate_ips(&r);
        assert_eq!(ips.len(), MAX_HOSTS_PER_BLOCK);
        assert_eq!(ips[0], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(r.capped_count(), MAX_HOSTS_PER_BLOCK);
    }

    #[test]
    fn bad_prefix() {
        assert!(matches!(
            parse_range("10.0.0.0/33"),
            Err(ScanError::InvalidPrefixLength(33))
        ));
        assert!(matches!(
            parse_range("10.0.0.0/abc"),
            Err(ScanError::InvalidRangeFormat(_))
        ));
    }

    #[test]
    fn explicit_range_order() {
        let r = parse_range(" 192.168.1.10 - 192.168.1.20 ").unwrap();
        assert_eq!(r.kind, RangeKind::ExplicitRange);
        assert_eq!(generate_ips(&r).len(), 11);
        assert!(matches!(
            parse_range("192.168.1.20-192.168.1.10"),
            Err(ScanError::StartAfterEnd { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid_format() {
        for bad in ["", "hello", "192.168.1", "300.1.1.1", "1.2.3.4-nope"] {
            assert!(
                matches!(parse_range(bad), Err(ScanError::InvalidRangeFormat(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn auto_falls_back_to_private_subnets() {
        let r = auto_range("auto", Vec::new());
        assert_eq!(r.kind, RangeKind::Auto);
        assert_eq!(r.cidrs, FALLBACK_SUBNETS);
        assert_eq!(generate_ips(&r).len(), 3 * 254);
    }

    #[test]
    fn auto_dedups_blocks() {
        let net: Ipv4Net = "192.168.50.0/24".parse().unwrap();
        let r = auto_range("AUTO", vec![net, net]);
        assert_eq!(r.cidrs, vec!["192.168.50.0/24".to_string()]);
        assert_eq!(r.total_addresses, 254);
        assert_eq!(generate_ips(&r).len(), 254);
    }

    #[test]
    fn auto_keyword_is_case_insensitive() {
        let r = parse_range("  Auto ").unwrap();
        assert_eq!(r.kind, RangeKind::Auto);
        assert!(!r.cidrs.is_empty());
    }
}
