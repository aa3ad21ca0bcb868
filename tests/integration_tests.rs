use std::net::Ipv4Addr;
use std::time::Duration;

use netsweep::output::{export, write_report, ExportFormat};
use netsweep::scanner::{PortStatus, ScanEvent, ScanSession, Scanner};
use netsweep::utils::parse_ports;
use netsweep::{CidrRange, ScanConfig, SweepError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[test]
fn test_full_port_space() {
    let ports = parse_ports("1-65535").unwrap();
    assert_eq!(ports.len(), 65535);
    assert_eq!(ports.first(), Some(&1));
    assert_eq!(ports.last(), Some(&65535));

    assert_eq!(parse_ports("65535").unwrap(), vec![65535]);
    assert_eq!(parse_ports("65530-65535,65535").unwrap().len(), 6);
}

#[test]
fn test_whitespace_and_overlapping_ranges() {
    let ports = parse_ports(" 443 , 20-23, 22-25 ,21 ").unwrap();
    assert_eq!(ports, vec![20, 21, 22, 23, 24, 25, 443]);
}

#[test]
fn test_malformed_port_specs() {
    for spec in ["", ",", "80,,443", "-5", "5-", "1-2-3", "+80", "22/tcp", "0-10", "65535-65536"] {
        assert!(
            matches!(parse_ports(spec), Err(SweepError::InvalidPort(_))),
            "{:?}",
            spec
        );
    }
}

#[test]
fn test_port_list_feeds_session_total() {
    let ports = parse_ports("22,80-81").unwrap();
    let session = ScanSession::new(CidrRange::parse("10.0.0.0/30").unwrap(), ports).unwrap();
    assert_eq!(session.total(), 6);
}

#[test]
fn test_slash_30_example() {
    let range = CidrRange::parse("192.168.1.0/30").unwrap();
    let hosts: Vec<_> = range.hosts().collect();
    assert_eq!(hosts, vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]);
}

#[test]
fn test_yaml_is_unsupported() {
    assert!(matches!(
        "yaml".parse::<ExportFormat>(),
        Err(SweepError::UnsupportedFormat(_))
    ));
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_localhost_sweep() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = closed_port().await;

    let scanner = Scanner::new(ScanConfig {
        concurrency: 4,
        probe_timeout: Duration::from_millis(500),
        ..ScanConfig::default()
    })
    .unwrap();
    let session = ScanSession::new(CidrRange::parse("127.0.0.1/32").unwrap(), vec![open, closed]).unwrap();

    let report = scanner.run(session, CancellationToken::new()).await;

    assert!(!report.cancelled);
    assert_eq!(report.total, 2);
    assert_eq!(report.completed, 2);
    let ports = &report.hosts[&Ipv4Addr::LOCALHOST];
    assert_eq!(ports[&open].status, PortStatus::Open);
    assert_eq!(ports[&closed].status, PortStatus::Closed);
    assert_eq!(report.hosts_up(), 1);
}

#[tokio::test]
async fn test_sweep_events_and_export_to_file() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scanner = Scanner::new(ScanConfig {
        concurrency: 2,
        probe_timeout: Duration::from_millis(500),
        ..ScanConfig::default()
    })
    .unwrap()
    .with_events(tx);
    let session = ScanSession::new(CidrRange::parse("127.0.0.1").unwrap(), vec![open]).unwrap();

    let report = scanner.run(session, CancellationToken::new()).await;
    drop(scanner);

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(ScanEvent::Finished {
            completed: 1,
            total: 1,
            cancelled: false
        })
    );

    let dir = tempfile::tempdir().unwrap();
    for format in ExportFormat::ALL {
        let path = dir.path().join(format!("report.{}", format.extension()));
        write_report(&report, format, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), export(&report, format).unwrap());
    }

    let xml = std::fs::read_to_string(dir.path().join("report.xml")).unwrap();
    assert!(xml.contains(&format!("portid=\"{}\"", open)));
    assert!(xml.contains("state=\"open\""));
}
