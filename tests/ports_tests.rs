use lan_service_scan::ports::{parse_ports_str, port_set, EXTENDED_PORTS};

#[test]
fn mixed_lines_and_commas_dedup_in_first_seen_order() {
    let input = "# media servers\n8096, 32400 # jellyfin, plex\n\n7878-7880,8096\n  8989  \n";
    let ports = parse_ports_str(input).unwrap();
    assert_eq!(ports, vec![8096, 32400, 7878, 7879, 7880, 8989]);
    assert!(parse_ports_str("# nothing here\n").unwrap().is_empty());
}

#[test]
fn comma_separated_lists() {
    let ports = parse_ports_str("8096, 9000-9002,32400").unwrap();
    assert_eq!(ports, vec![8096, 9000, 9001, 9002, 32400]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_ports_str("70000").is_err());
    assert!(parse_ports_str("9000-8000").is_err());
    assert!(parse_ports_str("http").is_err());
}

#[test]
fn extended_ports_only_when_requested() {
    let base = port_set(&[7878, 8989], false, &[]);
    assert_eq!(base, vec![7878, 8989]);

    let wide = port_set(&[7878, 8989], true, &[12345]);
    assert!(wide.contains(&12345));
    assert!(EXTENDED_PORTS.iter().all(|p| wide.contains(p)));
    assert!(wide.windows(2).all(|w| w[0] < w[1]));
}
