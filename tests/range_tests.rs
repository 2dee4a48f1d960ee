use lan_service_scan::range::{generate_ips, parse_range, RangeKind, MAX_HOSTS_PER_BLOCK};
use lan_service_scan::ScanError;
use std::net::Ipv4Addr;

#[test]
fn slash_24_excludes_network_and_broadcast() {
    let r = parse_range("192.168.7.0/24").unwrap();
    assert_eq!(r.kind, RangeKind::Cidr);
    let ips = generate_ips(&r);
    assert_eq!(ips.len(), 254);
    assert_eq!(ips[0], Ipv4Addr::new(192, 168, 7, 1));
    assert_eq!(ips[253], Ipv4Addr::new(192, 168, 7, 254));
}

#[test]
fn cidr_with_host_bits_is_masked() {
    let a = generate_ips(&parse_range("10.0.0.77/30").unwrap());
    assert_eq!(a, vec![Ipv4Addr::new(10, 0, 0, 77), Ipv4Addr::new(10, 0, 0, 78)]);
}

#[test]
fn explicit_range_is_inclusive_and_ordered() {
    let ips = generate_ips(&parse_range(" 10.0.0.250-10.0.1.2 ").unwrap());
    let expected: Vec<Ipv4Addr> = (u32::from(Ipv4Addr::new(10, 0, 0, 250))
        ..=u32::from(Ipv4Addr::new(10, 0, 1, 2)))
        .map(Ipv4Addr::from)
        .collect();
    assert_eq!(ips, expected);
}

#[test]
fn large_blocks_are_capped() {
    let r = parse_range("10.0.0.0/16").unwrap();
    assert_eq!(r.total_addresses, 65534);
    let ips = generate_ips(&r);
    assert_eq!(ips.len(), MAX_HOSTS_PER_BLOCK);
    assert_eq!(ips[0], Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(r.capped_count(), MAX_HOSTS_PER_BLOCK);
}

#[test]
fn generated_addresses_are_unique() {
    for input in ["172.16.4.0/22", "auto", "10.9.9.9"] {
        let ips = generate_ips(&parse_range(input).unwrap());
        let mut sorted = ips.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ips.len(), "duplicates for {input}");
        assert!(!ips.is_empty());
    }
}

#[test]
fn malformed_input_is_rejected() {
    assert!(matches!(
        parse_range("10.0.0.0/33"),
        Err(ScanError::InvalidPrefixLength(33))
    ));
    assert!(matches!(
        parse_range("10.0.0.5-10.0.0.1"),
        Err(ScanError::StartAfterEnd { .. })
    ));
    for bad in ["", "nonsense", "256.1.1.1", "10.0.0.1-", "10.0.0/24"] {
        let err = parse_range(bad).unwrap_err();
        assert!(err.is_input_error(), "{bad} gave {err}");
    }
}
