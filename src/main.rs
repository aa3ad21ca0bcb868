use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use netsweep::cli::{Cli, ScanRequest};
use netsweep::external::NmapInvocation;
use netsweep::output::{format_summary, overwrite_notice, report_file_name, write_report};
use netsweep::scanner::{ScanEvent, ScanSession, Scanner};
use netsweep::utils::parse_ports;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let request = {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        cli.resolve(&mut input, &mut output)?
    };
    let Some(ScanRequest { range, format }) = request else {
        return Ok(());
    };

    // Validate everything before the first probe goes out
    let ports = parse_ports(&cli.ports).context("invalid --ports")?;
    let config = cli.scan_config();

    let path = cli
        .output_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(report_file_name(&range, format, chrono::Local::now())));
    if let Some(notice) = overwrite_notice(&path) {
        println!("{}", notice.yellow());
    }

    if cli.delegate {
        let mut options = vec!["-p".to_string(), cli.ports.clone()];
        options.extend(cli.nmap_args.iter().cloned());
        let invocation = NmapInvocation::new(range, options, path.clone(), format);
        return run_delegate(&invocation, &cli.nmap_path).await;
    }

    let session = ScanSession::new(range, ports)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let scanner = Scanner::new(config)?.with_events(tx);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing in-flight probes...".yellow());
            on_ctrl_c.cancel();
        }
    });

    let progress = tokio::spawn(draw_progress(rx));
    let report = scanner.run(session, cancel).await;
    drop(scanner);
    progress.await.context("progress display failed")?;

    print!("{}", format_summary(&report));

    write_report(&report, format, &path)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    println!("Scan complete. Results saved to {}", path.display());

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("⟦{spinner:.bright_magenta}⟧ [{elapsed_precise}] ⟨{bar:40.bright_green/bright_black}⟩ {pos}/{len} probes ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
}

/// Mirrors scheduler events onto a progress bar until the channel closes.
async fn draw_progress(mut events: UnboundedReceiver<ScanEvent>) {
    let mut pb: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Started { total } => {
                let bar = ProgressBar::new(total);
                bar.set_style(bar_style());
                pb = Some(bar);
            }
            ScanEvent::ProbeCompleted { completed, .. } => {
                if let Some(bar) = &pb {
                    bar.set_position(completed);
                }
            }
            ScanEvent::Finished { cancelled, .. } => {
                if let Some(bar) = pb.take() {
                    if cancelled {
                        bar.abandon_with_message("⟦CANCELLED⟧");
                    } else {
                        bar.finish_with_message("⟦SWEEP COMPLETE⟧");
                    }
                }
            }
        }
    }
}

async fn run_delegate(invocation: &NmapInvocation, program: &str) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("running {} against {}", program, invocation.target));

    let status = invocation
        .run_streaming(program, |line| {
            tracing::debug!(line, "nmap");
            spinner.set_message(line.to_string());
            spinner.tick();
        })
        .await
        .with_context(|| format!("failed to run {}", program))?;
    spinner.finish_and_clear();

    if !status.success() {
        bail!("{} exited with {}", program, status);
    }

    println!("Scan complete. Results saved to {}", invocation.output_path.display());
    Ok(())
}
