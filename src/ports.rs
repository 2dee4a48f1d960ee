use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;

/// Extra ports probed when non-standard scanning is requested: SSH, mail,
/// DNS, alt-HTTP and a couple of high ports.
pub const EXTENDED_PORTS: &[u16] = &[
    21, 22, 25, 53, 110, 143, 465, 587, 993, 995, 3000, 3001, 4040, 5080, 8000, 8008, 8081,
    8082, 8088, 8090, 8888, 9090, 10000, 49152,
];

/// Ports where TLS is the usual default.
const SSL_PORTS: &[u16] = &[443, 465, 636, 993, 995, 5001, 8443, 8920, 9443];

/// Coarse port -> common service name hints. Not authoritative.
const PORT_NAMES: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (143, "imap"),
    (443, "https"),
    (445, "smb"),
    (465, "smtps"),
    (587, "submission"),
    (993, "imaps"),
    (995, "pop3s"),
    (3000, "http-alt"),
    (5000, "synology"),
    (5001, "synology-ssl"),
    (5055, "overseerr"),
    (6767, "bazarr"),
    (6789, "nzbget"),
    (7878, "radarr"),
    (8000, "http-alt"),
    (8080, "http-proxy"),
    (8081, "http-alt"),
    (8085, "sabnzbd"),
    (8096, "jellyfin"),
    (8112, "deluge"),
    (8123, "homeassistant"),
    (8181, "tautulli"),
    (8443, "https-alt"),
    (8686, "lidarr"),
    (8787, "readarr"),
    (8888, "http-alt"),
    (8920, "jellyfin-ssl"),
    (8989, "sonarr"),
    (9000, "portainer"),
    (9091, "transmission"),
    (9443, "portainer-ssl"),
    (9696, "prowlarr"),
    (32400, "plex"),
];

/// Build the sorted, deduplicated port list for one host.
pub fn port_set(catalog_ports: &[u16], include_non_standard: bool, extra: &[u16]) -> Vec<u16> {
    let mut set: BTreeSet<u16> = catalog_ports.iter().copied().collect();
    if include_non_standard {
        set.extend(EXTENDED_PORTS.iter().copied());
    }
    set.extend(extra.iter().copied().filter(|&p| p != 0));
    set.into_iter().collect()
}

pub fn is_ssl_port(port: u16) -> bool {
    SSL_PORTS.contains(&port)
}

pub fn identify_service(port: u16) -> Option<&'static str> {
    PORT_NAMES
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

/// Parse a port list into deduplicated TCP ports (1..=65535), keeping first-seen order.
///
/// Used for both a `--ports-file` body and an inline `--extra-ports` value.
/// Entries are separated by commas or newlines; each is a single port (`80`)
/// or an inclusive range (`8000-8010`). Everything after `#` on a line is ignored.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");
        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_set_is_sorted_and_deduped() {
        let ports = port_set(&[8989, 7878, 8080, 7878], false, &[]);
        assert_eq!(ports, vec![7878, 8080, 8989]);
    }

    #[test]
    fn non_standard_adds_extended_ports() {
        let base = port_set(&[7878], false, &[]);
        let ext = port_set(&[7878], true, &[]);
        assert!(!base.contains(&22));
        assert!(ext.contains(&22) && ext.contains(&53) && ext.contains(&7878));
        assert!(ext.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn extra_ports_are_merged() {
        let ports = port_set(&[80], false, &[0, 12345, 80]);
        assert_eq!(ports, vec![80, 12345]);
    }

    #[test]
    fn ssl_and_names() {
        assert!(is_ssl_port(443) && is_ssl_port(8443));
        assert!(!is_ssl_port(80));
        assert_eq!(identify_service(7878), Some("radarr"));
        assert_eq!(identify_service(1), None);
    }

    #[test]
    fn parse_commas_ranges_and_comments() {
        let ports = parse_ports_str("8000-8002, 80\n8001 # dup\n").unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_ports_str("70000").is_err());
        assert!(parse_ports_str("90-80").is_err());
    }
}
