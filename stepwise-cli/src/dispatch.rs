// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, OutputWriter, StdoutStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use stepwise_metadata::{BuildMetadata, ReportSnapshot, StepStatus};
use stepwise_runner::{
    config::{BuildEnv, ReportSettings, StepwiseConfig},
    store::{merge_snapshots, read_snapshot, write_snapshot},
};
use tracing::{debug, info};

/// Merge and inspect stepwise result snapshots.
#[derive(Debug, Parser)]
#[command(version, name = "stepwise")]
pub struct StepwiseApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl StepwiseApp {
    /// Initializes logging and color output.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Merge(opts) => opts.exec(),
            Command::Show(opts) => opts.exec(output, output_writer),
            Command::ShowConfig(opts) => opts.exec(&BuildEnv::from_env(), output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge worker snapshots into a single report
    ///
    /// Snapshots are merged in the order given. If a test appears in more than one snapshot, the
    /// run that finished last is kept.
    Merge(MergeOpts),

    /// Show the tests and steps in a snapshot
    ///
    /// Exits with a non-zero code if any test failed or was blocked.
    Show(ShowOpts),

    /// Show the resolved reporting settings for a workspace
    ShowConfig(ShowConfigOpts),
}

#[derive(Debug, Args)]
struct MergeOpts {
    /// Worker snapshots to merge
    #[arg(value_name = "SNAPSHOT", required = true)]
    snapshots: Vec<Utf8PathBuf>,

    /// Path to write the merged snapshot to
    #[arg(long, short, value_name = "PATH")]
    output: Utf8PathBuf,
}

impl MergeOpts {
    fn exec(self) -> Result<i32> {
        let snapshots = self
            .snapshots
            .iter()
            .map(|path| {
                debug!("reading snapshot {path}");
                read_snapshot(path)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (merged, summary) = merge_snapshots(snapshots);
        write_snapshot(&merged, &self.output)?;

        info!(
            "merged {} snapshots into {}: {} tests ({} added, {} replaced by a later run, {} superseded)",
            self.snapshots.len(),
            self.output,
            merged.tests.len(),
            summary.added,
            summary.replaced,
            summary.kept,
        );
        Ok(0)
    }
}

#[derive(Debug, Args)]
struct ShowOpts {
    /// Snapshot to show
    #[arg(value_name = "SNAPSHOT")]
    snapshot: Utf8PathBuf,

    /// Show each test's steps
    #[arg(long)]
    steps: bool,
}

impl ShowOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let snapshot = read_snapshot(&self.snapshot)?;
        let styles = StdoutStyles::new(output.color);

        let mut writer = output_writer.stdout_writer();
        write_show(&snapshot, self.steps, &styles, &mut writer)
            .and_then(|()| writer.flush())
            .map_err(ExpectedError::write_output_error)?;

        let summary = snapshot.summary();
        if summary.has_failures() {
            Err(ExpectedError::TestRunFailed { summary })
        } else {
            Ok(0)
        }
    }
}

/// The width of the widest status name, `NOT-EXECUTED`.
const STATUS_WIDTH: usize = 12;

fn status_cell(status: StepStatus, styles: &StdoutStyles) -> String {
    let cell = format!(
        "{:>width$}",
        status.as_str().to_uppercase(),
        width = STATUS_WIDTH
    );
    cell.style(styles.status(status)).to_string()
}

fn write_show(
    snapshot: &ReportSnapshot,
    steps: bool,
    styles: &StdoutStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    if let Some(worker) = &snapshot.worker {
        writeln!(writer, "{} {worker}", "worker:".style(styles.heading))?;
    }

    for record in &snapshot.tests {
        let details = format!(
            "(attempt {}, {:.3}s)",
            record.attempt,
            record.duration().as_secs_f64()
        );
        writeln!(
            writer,
            "{} {} {}",
            status_cell(record.status, styles),
            record.test_id.style(styles.test_id),
            details.style(styles.dimmed),
        )?;
        if let Some(reason) = &record.reason {
            writeln!(writer, "{:width$}  {reason}", "", width = STATUS_WIDTH)?;
        }

        if steps {
            for step in &record.steps {
                let indent = "  ".repeat(step.depth + 1);
                writeln!(
                    writer,
                    "{} {indent}{}",
                    status_cell(step.status, styles),
                    step.step_id,
                )?;
                if let Some(comment) = &step.comment {
                    for line in comment.lines() {
                        writeln!(
                            writer,
                            "{:width$} {indent}  {}",
                            "",
                            line.style(styles.dimmed),
                            width = STATUS_WIDTH,
                        )?;
                    }
                }
            }
        }
    }

    let summary = snapshot.summary();
    writeln!(
        writer,
        "{} {} tests: {} passed, {} failed, {} blocked, {} skipped",
        "summary:".style(styles.heading),
        summary.total(),
        summary.passed.style(styles.pass),
        summary.failed.style(styles.fail),
        summary.blocked.style(styles.blocked),
        summary.skipped.style(styles.skipped),
    )
}

#[derive(Debug, Args)]
struct ShowConfigOpts {
    /// Workspace root containing `.config/stepwise.toml`
    #[arg(long, value_name = "DIR", default_value = ".")]
    workspace: Utf8PathBuf,

    /// Enable reporting, overriding the config
    #[arg(long, overrides_with = "no_report")]
    report: bool,

    /// Disable reporting, overriding the config
    #[arg(long, overrides_with = "report")]
    no_report: bool,
}

impl ShowConfigOpts {
    fn exec(
        self,
        env: &BuildEnv,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        if !self.workspace.is_dir() {
            return Err(ExpectedError::WorkspaceRootInvalid {
                workspace_root: self.workspace,
            });
        }

        let config_path = StepwiseConfig::config_path(&self.workspace);
        let config = StepwiseConfig::from_path(&config_path)?;
        let enable_override = if self.report {
            Some(true)
        } else if self.no_report {
            Some(false)
        } else {
            None
        };
        let settings = ReportSettings::resolve(&config, env, enable_override);

        let styles = StdoutStyles::new(output.color);
        let mut writer = output_writer.stdout_writer();
        let config_state = if config_path.is_file() {
            "found"
        } else {
            "not found, using defaults"
        };
        write_settings(&config_path, config_state, &settings, &styles, &mut writer)
            .and_then(|()| writer.flush())
            .map_err(ExpectedError::write_output_error)?;
        Ok(0)
    }
}

fn write_settings(
    config_path: &Utf8Path,
    config_state: &str,
    settings: &ReportSettings,
    styles: &StdoutStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    writeln!(
        writer,
        "{} {config_path} ({config_state})",
        "config:".style(styles.heading)
    )?;

    if settings.reporting_enabled() {
        writeln!(
            writer,
            "{} {}",
            "reporting:".style(styles.heading),
            "enabled".style(styles.pass)
        )?;
    } else {
        writeln!(
            writer,
            "{} {}",
            "reporting:".style(styles.heading),
            "disabled".style(styles.skipped)
        )?;
        for reason in settings.disabled_reasons() {
            writeln!(writer, "  - {reason}")?;
        }
    }

    writeln!(
        writer,
        "{} {}",
        "step timeout:".style(styles.heading),
        humantime::format_duration(settings.default_step_timeout())
    )?;
    writeln!(
        writer,
        "{} {}",
        "worker:".style(styles.heading),
        settings.worker().map_or("(unset)", |worker| worker.as_str())
    )?;

    let BuildMetadata {
        user,
        build_url,
        code_base,
        branch,
        commit,
    } = settings.build();
    writeln!(writer, "{}", "build:".style(styles.heading))?;
    for (name, value) in [
        ("user", user),
        ("build url", build_url),
        ("code base", code_base),
        ("branch", branch),
        ("commit", commit),
    ] {
        writeln!(
            writer,
            "  {name}: {}",
            value.as_deref().unwrap_or("(unset)")
        )?;
    }
    Ok(())
}
