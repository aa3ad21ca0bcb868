use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::*;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::network::CidrRange;
use crate::output::ExportFormat;
use crate::prompt;

const LONG_ABOUT: &str = "\
Sweeps an IPv4 CIDR range with TCP connect probes, shows live progress, prints
a per-host summary and saves a report named
nmap_scan_<cidr>_<YYYYMMDD_HHMMSS>.<format> in the current directory.

Run without a target to be asked for the range and the output format.
Press Ctrl+C to stop early; results gathered so far are still saved.

Example:
    netsweep 192.168.1.0/24 -p 22,80,443 -o json";

#[derive(Parser, Debug)]
#[command(name = "netsweep")]
#[command(version)]
#[command(about = "CIDR sweeper with live progress and nmap-style reports", long_about = LONG_ABOUT)]
pub struct Cli {
    #[arg(help = "Target IPv4 CIDR range, e.g. 192.168.1.0/24. Prompted for when omitted.")]
    pub target: Option<String>,

    #[arg(short, long, default_value = "1-1000", help = "Ports to probe: 22,80,443 or 1-1000")]
    pub ports: String,

    #[arg(short = 'o', long, value_enum, help = "Report format (default: xml)")]
    pub output_format: Option<ExportFormat>,

    #[arg(short = 'f', long, help = "Report path (default: nmap_scan_<cidr>_<timestamp>.<format>)")]
    pub output_file: Option<PathBuf>,

    #[arg(long, default_value_t = 100, help = "Maximum probes in flight")]
    pub concurrency: usize,

    #[arg(long, default_value_t = 1000, help = "Per-probe timeout in milliseconds")]
    pub timeout: u64,

    #[arg(long, help = "Stop dispatching new probes after this many seconds")]
    pub scan_timeout: Option<u64>,

    #[arg(long, default_value_t = 1000, help = "Milliseconds in-flight probes may drain after a stop")]
    pub grace_period: u64,

    #[arg(long, default_value_t = 0, help = "Milliseconds each worker waits before each probe")]
    pub rate_limit: u64,

    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Hand the scan to an installed nmap instead of the built-in sweep")]
    pub delegate: bool,

    #[arg(long = "nmap-arg", value_name = "ARG", allow_hyphen_values = true, help = "Extra nmap argument for --delegate, repeatable")]
    pub nmap_args: Vec<String>,

    #[arg(long, default_value = "nmap", help = "nmap binary used by --delegate")]
    pub nmap_path: String,
}

/// What the user asked for, after flags and prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub range: CidrRange,
    pub format: ExportFormat,
}

impl Cli {
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            concurrency: self.concurrency,
            probe_timeout: Duration::from_millis(self.timeout),
            scan_timeout: self.scan_timeout.map(Duration::from_secs),
            grace_period: Duration::from_millis(self.grace_period),
            probe_delay: Duration::from_millis(self.rate_limit),
        }
    }

    /// Fills in what the flags leave open. With a target on the command line
    /// nothing is asked. Otherwise the user is offered help first; `None`
    /// means they took it and no scan should run.
    pub fn resolve<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> Result<Option<ScanRequest>> {
        if let Some(target) = &self.target {
            return Ok(Some(ScanRequest {
                range: CidrRange::parse(target)?,
                format: self.output_format.unwrap_or_default(),
            }));
        }

        let answer = prompt::ask(input, output, "Need help? (yes/no): ")?.unwrap_or_default();
        if prompt::is_yes(&answer) {
            writeln!(output, "{}", Cli::command().render_long_help())?;
            return Ok(None);
        }

        let range = prompt::ask_until_valid(
            input,
            output,
            "Please enter the CIDR range (e.g., 192.168.1.0/24): ",
            CidrRange::parse,
        )?;

        let format = match self.output_format {
            Some(format) => format,
            None => {
                let answer = prompt::ask(input, output, "Enter output format (xml/json/grepable/normal): ")?
                    .unwrap_or_default();
                let (format, fell_back) = ExportFormat::parse_or_default(&answer);
                if fell_back {
                    tracing::warn!(%answer, "unrecognised output format, using xml");
                    writeln!(
                        output,
                        "{}",
                        "Invalid output format specified. Using default 'xml'.".yellow()
                    )?;
                }
                format
            }
        };

        Ok(Some(ScanRequest { range, format }))
    }
}
