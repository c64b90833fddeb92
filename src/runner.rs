//! Blocking execution of a single external command.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use crate::commands::ToolCommand;

/// How a step's output is handled.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stream the tool's stdout/stderr to the terminal instead of capturing.
    pub verbose: bool,
    /// Append the command line, exit status, and captured output here.
    pub log_file: Option<PathBuf>,
}

/// Captured result of a successful step. Streams are empty in verbose mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external command to completion.
pub trait CommandRunner {
    /// Returns an error when the command cannot be launched or exits
    /// unsuccessfully.
    fn run(&mut self, step: &str, cmd: &ToolCommand, opts: &RunOptions) -> Result<StepOutput>;
}

/// Launches commands with [`std::process::Command`], blocking until exit.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, step: &str, cmd: &ToolCommand, opts: &RunOptions) -> Result<StepOutput> {
        tracing::debug!(step, command = %cmd, "launching");

        let (status, output) = if opts.verbose {
            let status = cmd
                .to_command()
                .stdin(Stdio::null())
                .status()
                .map_err(|e| launch_error(cmd, e))?;
            (status, StepOutput::default())
        } else {
            let Output {
                status,
                stdout,
                stderr,
            } = cmd
                .to_command()
                .stdin(Stdio::null())
                .output()
                .map_err(|e| launch_error(cmd, e))?;
            let output = StepOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            };
            (status, output)
        };

        if let Some(log_file) = &opts.log_file {
            if let Err(e) = append_log(log_file, step, cmd, &status, &output) {
                tracing::warn!(log = %log_file.display(), "could not write step log: {:#}", e);
            }
        }

        if !status.success() {
            let mut msg = format!(
                "{} failed ({})\ncommand: {}",
                step,
                describe_status(&status),
                cmd
            );
            let stderr = output.stderr.trim();
            if !stderr.is_empty() {
                msg.push_str("\n\n");
                msg.push_str(stderr);
            }
            bail!(msg);
        }

        tracing::debug!(step, "exited successfully");
        Ok(output)
    }
}

fn launch_error(cmd: &ToolCommand, err: std::io::Error) -> anyhow::Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        anyhow::anyhow!(
            "Failed to execute '{}': not found. Is it installed and on PATH?",
            cmd.program
        )
    } else {
        anyhow::Error::new(err).context(format!("Failed to execute '{}'", cmd.program))
    }
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn append_log(
    path: &Path,
    step: &str,
    cmd: &ToolCommand,
    status: &ExitStatus,
    output: &StepOutput,
) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    writeln!(file, "# {} at {}", step, Utc::now().to_rfc3339())?;
    writeln!(file, "$ {}", cmd)?;
    writeln!(file, "# {}", describe_status(status))?;
    if !output.stdout.is_empty() {
        writeln!(file, "## stdout\n{}", output.stdout.trim_end())?;
    }
    if !output.stderr.is_empty() {
        writeln!(file, "## stderr\n{}", output.stderr.trim_end())?;
    }
    writeln!(file)?;
    Ok(())
}
