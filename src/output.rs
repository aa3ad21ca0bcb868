use std::fmt::Write as _;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use colored::*;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, SweepError};
use crate::network::CidrRange;
use crate::scanner::results::{HostPorts, PortStatus, ProbeResult, ScanReport};

const SCANNER_NAME: &str = "netsweep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    #[value(name = "xml", help = "XML output (Nmap compatible)")]
    Xml,
    #[value(name = "json", help = "JSON output")]
    Json,
    #[value(name = "grepable", help = "One line per host, easy to grep")]
    Grepable,
    #[value(name = "normal", help = "Human-readable text report")]
    Normal,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Xml,
        ExportFormat::Json,
        ExportFormat::Grepable,
        ExportFormat::Normal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Xml => "xml",
            ExportFormat::Json => "json",
            ExportFormat::Grepable => "grepable",
            ExportFormat::Normal => "normal",
        }
    }

    /// Report files are named after the format.
    pub fn extension(&self) -> &'static str {
        self.name()
    }

    /// Lenient parse used by the interactive prompt: anything unknown becomes
    /// `xml`. Returns the format and whether a fallback happened.
    pub fn parse_or_default(input: &str) -> (ExportFormat, bool) {
        match input.parse() {
            Ok(format) => (format, false),
            Err(_) => (ExportFormat::Xml, true),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(ExportFormat::Xml),
            "json" => Ok(ExportFormat::Json),
            "grepable" => Ok(ExportFormat::Grepable),
            "normal" => Ok(ExportFormat::Normal),
            _ => Err(SweepError::UnsupportedFormat(s.trim().to_string())),
        }
    }
}

/// `nmap_scan_192_168_1_0_24_20240131_235959.xml`
pub fn report_file_name(range: &CidrRange, format: ExportFormat, at: DateTime<Local>) -> String {
    format!(
        "nmap_scan_{}_{}.{}",
        range.file_safe(),
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Serializes a finished sweep. The same report always renders to the same
/// bytes: hosts by ascending address, ports ascending, fixed field order.
pub fn export(report: &ScanReport, format: ExportFormat) -> Result<Vec<u8>> {
    let text = match format {
        ExportFormat::Xml => format_xml(report),
        ExportFormat::Json => format_json(report)?,
        ExportFormat::Grepable => format_grepable(report),
        ExportFormat::Normal => format_normal(report),
    };
    Ok(text.into_bytes())
}

/// Renders the whole report first, then swaps it into place, so a failed
/// write never leaves half a report at `path`. Returns whether an existing
/// file was replaced.
pub fn write_report(report: &ScanReport, format: ExportFormat, path: &Path) -> Result<bool> {
    let payload = export(report, format)?;
    let existed = path.exists();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(&payload)?;
    file.flush()?;
    file.persist(path).map_err(|e| SweepError::Io(e.error))?;

    tracing::info!(path = %path.display(), %format, bytes = payload.len(), replaced = existed, "report written");
    Ok(existed)
}

/// The one user-facing line shown before an existing report gets replaced.
pub fn overwrite_notice(path: &Path) -> Option<String> {
    path.exists()
        .then(|| format!("Output file {} already exists, overwriting.", path.display()))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    scanner: &'static str,
    target: String,
    ports: &'a [u16],
    started_at: String,
    finished_at: String,
    elapsed_ms: u128,
    total: u64,
    completed: u64,
    cancelled: bool,
    hosts_up: usize,
    hosts: Vec<JsonHost<'a>>,
}

#[derive(Serialize)]
struct JsonHost<'a> {
    address: Ipv4Addr,
    status: &'static str,
    ports: Vec<JsonPort<'a>>,
}

#[derive(Serialize)]
struct JsonPort<'a> {
    port: u16,
    protocol: &'static str,
    state: PortStatus,
    service: &'static str,
    reason: String,
    response_time_ms: Option<f64>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a crate::scanner::results::ProbeError>,
}

fn format_json(report: &ScanReport) -> Result<String> {
    let hosts = report
        .hosts
        .iter()
        .map(|(ip, ports)| JsonHost {
            address: *ip,
            status: host_status(ports),
            ports: ports
                .iter()
                .map(|(port, result)| JsonPort {
                    port: *port,
                    protocol: "tcp",
                    state: result.status,
                    service: get_service_name(*port),
                    reason: reason(result).to_string(),
                    response_time_ms: result.response_time,
                    timestamp: rfc3339(&result.timestamp),
                    error: result.error.as_ref(),
                })
                .collect(),
        })
        .collect();

    let json = JsonReport {
        scanner: SCANNER_NAME,
        target: report.target.to_string(),
        ports: &report.ports,
        started_at: rfc3339(&report.started_at),
        finished_at: rfc3339(&report.finished_at),
        elapsed_ms: report.elapsed().as_millis(),
        total: report.total,
        completed: report.completed,
        cancelled: report.cancelled,
        hosts_up: report.hosts_up(),
        hosts,
    };

    let mut out = serde_json::to_string_pretty(&json).map_err(std::io::Error::from)?;
    out.push('\n');
    Ok(out)
}

fn format_xml(report: &ScanReport) -> String {
    let mut xml = String::new();
    let args = format!("{} -p {} {}", SCANNER_NAME, port_spec(&report.ports), report.target);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<nmaprun scanner=\"{}\" args=\"{}\" start=\"{}\" startstr=\"{}\">",
        SCANNER_NAME,
        xml_escape(&args),
        report.started_at.timestamp(),
        rfc3339(&report.started_at)
    );
    let _ = writeln!(
        xml,
        "  <scaninfo type=\"connect\" protocol=\"tcp\" numservices=\"{}\" services=\"{}\"/>",
        report.ports.len(),
        port_spec(&report.ports)
    );

    for (ip, ports) in &report.hosts {
        xml.push_str("  <host>\n");
        let _ = writeln!(xml, "    <status state=\"{}\"/>", host_status(ports));
        let _ = writeln!(xml, "    <address addr=\"{}\" addrtype=\"ipv4\"/>", ip);
        xml.push_str("    <ports>\n");
        for (port, result) in ports {
            let _ = writeln!(xml, "      <port protocol=\"tcp\" portid=\"{}\">", port);
            match &result.error {
                Some(error) => {
                    let _ = writeln!(
                        xml,
                        "        <state state=\"{}\" reason=\"{}\" detail=\"{}\"/>",
                        result.status,
                        reason(result),
                        xml_escape(&error.to_string())
                    );
                }
                None => {
                    let _ = writeln!(
                        xml,
                        "        <state state=\"{}\" reason=\"{}\"/>",
                        result.status,
                        reason(result)
                    );
                }
            }
            let _ = writeln!(xml, "        <service name=\"{}\"/>", get_service_name(*port));
            xml.push_str("      </port>\n");
        }
        xml.push_str("    </ports>\n");
        xml.push_str("  </host>\n");
    }

    xml.push_str("  <runstats>\n");
    let _ = writeln!(
        xml,
        "    <finished time=\"{}\" timestr=\"{}\" elapsed=\"{:.2}\" exit=\"{}\"/>",
        report.finished_at.timestamp(),
        rfc3339(&report.finished_at),
        report.elapsed().as_secs_f64(),
        if report.cancelled { "cancelled" } else { "success" }
    );
    let _ = writeln!(
        xml,
        "    <hosts up=\"{}\" down=\"{}\" total=\"{}\"/>",
        report.hosts_up(),
        report.hosts.len() - report.hosts_up(),
        report.hosts.len()
    );
    xml.push_str("  </runstats>\n");
    xml.push_str("</nmaprun>\n");
    xml
}

/// Down hosts are left out, as `-oG` does without verbosity.
fn format_grepable(report: &ScanReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# {} scan initiated {} as: {} -p {} {}",
        SCANNER_NAME,
        rfc3339(&report.started_at),
        SCANNER_NAME,
        port_spec(&report.ports),
        report.target
    );

    for (ip, ports) in report.hosts.iter().filter(|(_, p)| ScanReport::is_up(p)) {
        let _ = writeln!(out, "Host: {} ()\tStatus: Up", ip);

        let listed: Vec<String> = ports
            .iter()
            .filter(|(_, r)| r.status != PortStatus::Closed)
            .map(|(port, r)| format!("{}/{}/tcp//{}///", port, r.status, get_service_name(*port)))
            .collect();
        let closed = ScanReport::count_status(ports, PortStatus::Closed);

        let _ = write!(out, "Host: {} ()\tPorts: {}", ip, listed.join(", "));
        if closed > 0 {
            let _ = write!(out, "\tIgnored State: closed ({})", closed);
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "# {} done at {} -- {} IP addresses ({} hosts up) scanned in {:.2} seconds{}",
        SCANNER_NAME,
        rfc3339(&report.finished_at),
        report.hosts.len(),
        report.hosts_up(),
        report.elapsed().as_secs_f64(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}

fn format_normal(report: &ScanReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# {} scan initiated {} as: {} -p {} {}",
        SCANNER_NAME,
        rfc3339(&report.started_at),
        SCANNER_NAME,
        port_spec(&report.ports),
        report.target
    );

    for (ip, ports) in report.hosts.iter().filter(|(_, p)| ScanReport::is_up(p)) {
        let _ = writeln!(out, "Scan report for {}", ip);
        out.push_str("Host is up.\n");

        let closed = ScanReport::count_status(ports, PortStatus::Closed);
        if closed > 0 {
            let _ = writeln!(out, "Not shown: {} closed tcp ports", closed);
        }

        let shown: Vec<_> = ports
            .iter()
            .filter(|(_, r)| r.status != PortStatus::Closed)
            .collect();
        if shown.is_empty() {
            out.push_str("All scanned ports are closed\n");
        } else {
            let _ = writeln!(out, "{:<10}{:<9}{}", "PORT", "STATE", "SERVICE");
            for (port, result) in shown {
                let _ = writeln!(
                    out,
                    "{:<10}{:<9}{}",
                    format!("{}/tcp", port),
                    result.status.to_string(),
                    get_service_name(*port)
                );
            }
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "# {} done at {} -- {} IP addresses ({} hosts up) scanned in {:.2} seconds{}",
        SCANNER_NAME,
        rfc3339(&report.finished_at),
        report.hosts.len(),
        report.hosts_up(),
        report.elapsed().as_secs_f64(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}

/// Colored per-host summary printed once the sweep is over.
pub fn format_summary(report: &ScanReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("\n{}\n\n", "SWEEP COMPLETE".truecolor(0, 255, 65).bold()));
    output.push_str(&format!(
        "{} {} {} {} {} {}\n\n",
        report.target.to_string().truecolor(255, 255, 255).bold(),
        "•".truecolor(0, 255, 65),
        format!("{}ms", report.elapsed().as_millis()).truecolor(0, 212, 255).bold(),
        "•".truecolor(0, 255, 65),
        format!("{}/{} probes", report.completed, report.total).truecolor(191, 64, 191).bold(),
        if report.cancelled {
            "(cancelled)".truecolor(255, 140, 0).bold()
        } else {
            "".normal()
        }
    ));

    for (ip, ports) in report.hosts.iter().filter(|(_, p)| ScanReport::is_up(p)) {
        let open: Vec<_> = ports
            .iter()
            .filter(|(_, r)| r.status == PortStatus::Open)
            .collect();
        let filtered = ScanReport::count_status(ports, PortStatus::Filtered);

        output.push_str(&format!(
            "{} {} {} {} {}\n",
            "▶".truecolor(0, 255, 65).bold(),
            ip.to_string().truecolor(255, 255, 255).bold(),
            "•".truecolor(64, 64, 64),
            format!("{} open ports", open.len()).truecolor(0, 212, 255).bold(),
            if filtered > 0 {
                format!("• {} filtered", filtered).truecolor(255, 140, 0)
            } else {
                "".normal()
            }
        ));

        for (port, result) in open {
            let service = match result.response_time {
                Some(rt) => format!("{} ({:.1}ms)", get_service_name(*port), rt),
                None => get_service_name(*port).to_string(),
            };
            output.push_str(&format!(
                "  {} {} {} {}\n",
                port.to_string().truecolor(255, 255, 255).bold(),
                "●".truecolor(0, 255, 65),
                "open".truecolor(0, 255, 65),
                service.truecolor(128, 128, 128)
            ));
        }
        output.push('\n');
    }

    if report.hosts_up() == 0 {
        output.push_str(&format!(
            "{} {}\n",
            "⚠".truecolor(255, 140, 0).bold(),
            "No responding hosts found".truecolor(128, 128, 128)
        ));
    } else {
        output.push_str(&format!(
            "{} {} {} {}\n",
            "⚡".truecolor(0, 255, 65).bold(),
            format!("{} hosts up", report.hosts_up()).truecolor(255, 255, 255).bold(),
            "•".truecolor(64, 64, 64),
            format!("{} open ports", report.open_ports()).truecolor(255, 255, 255).bold()
        ));
    }

    output
}

fn host_status(ports: &HostPorts) -> &'static str {
    if ScanReport::is_up(ports) {
        "up"
    } else {
        "down"
    }
}

fn reason(result: &ProbeResult) -> &'static str {
    match result.status {
        PortStatus::Open => "syn-ack",
        PortStatus::Closed => "conn-refused",
        PortStatus::Filtered => "no-response",
        PortStatus::Error => "error",
    }
}

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Collapses a sorted port list into `1-3,22,80`.
fn port_spec(ports: &[u16]) -> String {
    let mut parts = Vec::new();
    let mut iter = ports.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if u32::from(next) == u32::from(end) + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }

    parts.join(",")
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn get_service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        1521 => "oracle",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5000 => "upnp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        27017 => "mongodb",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::results::{ProbeError, Target};
    use crate::scanner::ScanSession;
    use chrono::TimeZone;
    use std::fs;
    use std::time::Duration;

    fn sample_report() -> ScanReport {
        let range = CidrRange::parse("192.168.1.0/29").unwrap();
        let mut session = ScanSession::new(range, vec![443, 22, 80]).unwrap();
        let ip = |last| Ipv4Addr::new(192, 168, 1, last);

        // Out of order on purpose, export has to sort
        session.record(Target::new(ip(3), 80), ProbeResult::closed(Duration::from_millis(2)));
        session.record(Target::new(ip(1), 443), ProbeResult::filtered(Duration::from_millis(50)));
        session.record(Target::new(ip(1), 22), ProbeResult::open(Duration::from_millis(4)));
        session.record(Target::new(ip(1), 80), ProbeResult::closed(Duration::from_millis(1)));
        session.record(
            Target::new(ip(2), 22),
            ProbeResult::error(ProbeError::Connection("network \"unreachable\" <x>".to_string())),
        );
        session.freeze(false)
    }

    #[test]
    fn test_parse_formats() {
        for format in ExportFormat::ALL {
            assert_eq!(format.name().parse::<ExportFormat>().unwrap(), format);
        }
        assert_eq!(" JSON ".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let err = "yaml".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, SweepError::UnsupportedFormat(ref f) if f == "yaml"));
    }

    #[test]
    fn test_prompt_fallback_is_xml() {
        assert_eq!(ExportFormat::parse_or_default("yaml"), (ExportFormat::Xml, true));
        assert_eq!(ExportFormat::parse_or_default("normal"), (ExportFormat::Normal, false));
    }

    #[test]
    fn test_report_file_name() {
        let range = CidrRange::parse("192.168.1.0/24").unwrap();
        let at = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap();
        assert_eq!(
            report_file_name(&range, ExportFormat::Grepable, at),
            "nmap_scan_192_168_1_0_24_20240131_235958.grepable"
        );
    }

    #[test]
    fn test_export_is_deterministic() {
        let report = sample_report();
        for format in ExportFormat::ALL {
            assert_eq!(export(&report, format).unwrap(), export(&report, format).unwrap());
        }
    }

    #[test]
    fn test_xml_orders_hosts_and_ports() {
        let xml = String::from_utf8(export(&sample_report(), ExportFormat::Xml).unwrap()).unwrap();

        let first = xml.find("addr=\"192.168.1.1\"").unwrap();
        let second = xml.find("addr=\"192.168.1.2\"").unwrap();
        let third = xml.find("addr=\"192.168.1.3\"").unwrap();
        assert!(first < second && second < third);

        let p22 = xml.find("portid=\"22\"").unwrap();
        let p80 = xml.find("portid=\"80\"").unwrap();
        let p443 = xml.find("portid=\"443\"").unwrap();
        assert!(p22 < p80 && p80 < p443);

        assert!(xml.contains("<state state=\"open\" reason=\"syn-ack\"/>"));
        assert!(xml.contains("detail=\"connection failed: network &quot;unreachable&quot; &lt;x&gt;\""));
        assert!(xml.contains("<hosts up=\"2\" down=\"1\" total=\"3\"/>"));
        assert!(xml.contains("services=\"22,80,443\""));
    }

    #[test]
    fn test_json_projection() {
        let json = export(&sample_report(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(value["target"], "192.168.1.0/29");
        assert_eq!(value["hosts_up"], 2);
        assert_eq!(value["hosts"][0]["address"], "192.168.1.1");
        assert_eq!(value["hosts"][0]["ports"][0]["port"], 22);
        assert_eq!(value["hosts"][0]["ports"][0]["state"], "open");
        assert_eq!(value["hosts"][0]["ports"][0]["service"], "ssh");
        assert_eq!(value["hosts"][0]["ports"][2]["error"]["kind"], "timeout");
        assert_eq!(value["hosts"][1]["status"], "down");
    }

    #[test]
    fn test_grepable_lists_up_hosts() {
        let text = String::from_utf8(export(&sample_report(), ExportFormat::Grepable).unwrap()).unwrap();

        assert!(text.contains("Host: 192.168.1.1 ()\tStatus: Up"));
        assert!(text.contains(
            "Host: 192.168.1.1 ()\tPorts: 22/open/tcp//ssh///, 443/filtered/tcp//https///\tIgnored State: closed (1)"
        ));
        assert!(!text.contains("192.168.1.2 ()"));
        assert!(text.contains("-- 3 IP addresses (2 hosts up)"));
    }

    #[test]
    fn test_normal_report() {
        let text = String::from_utf8(export(&sample_report(), ExportFormat::Normal).unwrap()).unwrap();

        assert!(text.contains("Scan report for 192.168.1.1\nHost is up.\nNot shown: 1 closed tcp ports\n"));
        assert!(text.contains("22/tcp    open     ssh\n"));
        assert!(text.contains("Scan report for 192.168.1.3\nHost is up.\nNot shown: 1 closed tcp ports\nAll scanned ports are closed\n"));
        assert!(!text.contains("Scan report for 192.168.1.2"));
    }

    #[test]
    fn test_port_spec_collapses_runs() {
        assert_eq!(port_spec(&[1, 2, 3, 22, 80, 81, 65535]), "1-3,22,80-81,65535");
        assert_eq!(port_spec(&[]), "");
    }

    #[test]
    fn test_write_report_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = sample_report();

        assert!(!write_report(&report, ExportFormat::Json, &path).unwrap());
        fs::write(&path, "stale").unwrap();
        assert!(write_report(&report, ExportFormat::Json, &path).unwrap());

        let written = fs::read(&path).unwrap();
        assert_eq!(written, export(&report, ExportFormat::Json).unwrap());
    }

    #[test]
    fn test_overwrite_notice_only_for_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        assert_eq!(overwrite_notice(&path), None);

        fs::write(&path, "old").unwrap();
        let notice = overwrite_notice(&path).unwrap();
        assert!(notice.contains("already exists, overwriting"));
        assert!(notice.contains("report.xml"));
    }

    #[test]
    fn test_default_format_is_xml() {
        assert_eq!(ExportFormat::default(), ExportFormat::Xml);
        assert_eq!(ExportFormat::parse_or_default("yaml"), (ExportFormat::default(), true));
    }

    #[test]
    fn test_summary_mentions_open_ports() {
        colored::control::set_override(false);
        let summary = format_summary(&sample_report());
        assert!(summary.contains("192.168.1.1"));
        assert!(summary.contains("2 hosts up"));
        assert!(summary.contains("1 open ports"));
    }
}
