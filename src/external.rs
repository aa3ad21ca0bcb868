use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::Result;
use crate::network::CidrRange;
use crate::output::ExportFormat;

/// A run of an installed `nmap` that writes its own report file, for when
/// the built-in connect sweep is not enough.
#[derive(Debug, Clone)]
pub struct NmapInvocation {
    pub target: CidrRange,
    pub options: Vec<String>,
    pub output_path: PathBuf,
    pub format: ExportFormat,
}

impl NmapInvocation {
    pub fn new(target: CidrRange, options: Vec<String>, output_path: PathBuf, format: ExportFormat) -> Self {
        Self {
            target,
            options,
            output_path,
            format,
        }
    }

    pub fn output_flag(format: ExportFormat) -> &'static str {
        match format {
            ExportFormat::Xml => "-oX",
            ExportFormat::Json => "-oJ",
            ExportFormat::Grepable => "-oG",
            ExportFormat::Normal => "-oN",
        }
    }

    /// Arguments in the order `<flag> <path> <options...> <cidr>`. Passed
    /// straight to the process, never through a shell.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.options.len() + 3);
        args.push(OsString::from(Self::output_flag(self.format)));
        args.push(self.output_path.clone().into_os_string());
        args.extend(self.options.iter().map(OsString::from));
        args.push(OsString::from(self.target.to_string()));
        args
    }

    /// Runs `program` with [`Self::args`], handing every stdout line to
    /// `on_line` as it arrives.
    pub async fn run_streaming<F>(&self, program: &str, mut on_line: F) -> Result<ExitStatus>
    where
        F: FnMut(&str),
    {
        let args = self.args();
        tracing::info!(program, ?args, "launching external scanner");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                on_line(&line);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            tracing::warn!(program, %status, "external scanner exited unsuccessfully");
        }
        Ok(status)
    }
}
