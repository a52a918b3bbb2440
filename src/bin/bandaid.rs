// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use bandaid::{
    config::Settings,
    engine::{ApplyOptions, Bandaid, DiffOutcome},
    ledger::PatchRecord,
    patch::PatchApplier,
    path::default_config_file,
    pristine::UpstreamPristine,
    project::Project,
    vcs::{degit, regit, RegitOptions},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    io::{stdout, Write},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  bandaid [options] <command> <project>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Directory holding the projects, the top-level tree for `core`.
    #[arg(short = 'C', long, global = true, value_name = "dir")]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<Outcome> {
        let settings = match self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_config_file()?)?,
        };
        let workdir = match self.directory {
            Some(dir) => dir,
            None => std::env::current_dir().context("cannot determine working directory")?,
        };
        let workspace = Workspace { settings, workdir };

        match self.command {
            Command::Patch(opts) => run_patch(&workspace, opts),
            Command::Unpatch(opts) => run_unpatch(&workspace, opts),
            Command::Tearoff(opts) => run_tearoff(&workspace, opts),
            Command::Apply(opts) => run_apply(&workspace, opts),
            Command::Diff(opts) => run_diff(&workspace, opts),
            Command::Degit(opts) => run_degit(&workspace, opts),
            Command::Regit(opts) => run_regit(&workspace, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Apply patch to project and track it.
    #[command(override_usage = "bandaid patch [options] <source> <project>")]
    Patch(PatchOptions),

    /// Revert tracked patches and stop tracking them.
    #[command(override_usage = "bandaid unpatch [options] <project> [<source>]")]
    Unpatch(UnpatchOptions),

    /// Revert project to pristine, capturing local modifications.
    #[command(override_usage = "bandaid tearoff [options] <project>")]
    Tearoff(TearoffOptions),

    /// Replay tracked patches and local modifications onto project.
    #[command(override_usage = "bandaid apply [options] <project>")]
    Apply(ApplyCommandOptions),

    /// Show local modifications of project.
    #[command(override_usage = "bandaid diff [options] <project> [<output_file>]")]
    Diff(DiffOptions),

    /// Record git origin of project checkout and remove its git metadata.
    #[command(override_usage = "bandaid degit <project>")]
    Degit(DegitOptions),

    /// Turn project back into a git checkout of its recorded revision.
    #[command(override_usage = "bandaid regit [options] <project>")]
    Regit(RegitCommandOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PatchOptions {
    /// URL or path of patch to apply.
    #[arg(required = true, value_name = "source")]
    pub source: String,

    /// Name of project to patch.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Issue page the patch comes from.
    #[arg(long, value_name = "url")]
    pub home: Option<String>,

    /// Why the patch is needed.
    #[arg(short, long, value_name = "text")]
    pub reason: Option<String>,

    /// Info file holding the project version, relative to the project.
    #[arg(short, long, value_name = "path")]
    pub info_file: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UnpatchOptions {
    /// Name of project to unpatch.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Tracked patch to revert.
    #[arg(group = "target", value_name = "source")]
    pub source: Option<String>,

    /// Revert every tracked patch.
    #[arg(short, long, group = "target")]
    pub all: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TearoffOptions {
    /// Name of project to tear off.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Info file holding the project version, relative to the project.
    #[arg(short, long, value_name = "path")]
    pub info_file: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyCommandOptions {
    /// Name of project to rebuild.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Skip tracked patches that fail to apply.
    #[arg(long)]
    pub ignore_failing: bool,

    /// Drop skipped patches from the ledger.
    #[arg(long)]
    pub update_yaml: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Name of project to inspect.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// File to write the diff to instead of standard output.
    #[arg(value_name = "output_file")]
    pub output_file: Option<PathBuf>,

    /// Info file holding the project version, relative to the project.
    #[arg(short, long, value_name = "path")]
    pub info_file: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DegitOptions {
    /// Name of project to convert.
    #[arg(required = true, value_name = "project")]
    pub project: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RegitCommandOptions {
    /// Name of project to convert.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Origin to clone instead of the recorded one.
    #[arg(long, value_name = "url")]
    pub origin: Option<String>,

    /// Revision to check out instead of the recorded one.
    #[arg(long, value_name = "sha")]
    pub revision: Option<String>,

    /// Forget recorded git origin and revision afterwards.
    #[arg(long)]
    pub forget: bool,
}

/// Successful command outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    DiffDetected,
}

/// Settings and working directory shared by every command.
struct Workspace {
    settings: Settings,
    workdir: PathBuf,
}

impl Workspace {
    fn project(&self, name: &str) -> Project {
        Project::from_name(&self.workdir, name, &self.settings.upstream.core_name)
    }

    fn engine(&self) -> Bandaid {
        Bandaid::new(
            UpstreamPristine::new(self.settings.upstream.clone()),
            PatchApplier::default(),
        )
    }
}

fn main() {
    // INVARIANT: Standard output carries command output only, e.g., diffs.
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match Cli::parse().run() {
        Ok(Outcome::Success) => exit(0),
        Ok(Outcome::DiffDetected) => exit(1),
        Err(error) => {
            error!("{error:?}");
            exit(2);
        }
    }
}

fn run_patch(workspace: &Workspace, opts: PatchOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    let mut record = PatchRecord::new(opts.source, opts.reason.unwrap_or_default());
    record.home = opts.home;
    record.info_file = opts.info_file;

    workspace.engine().patch(&project, record)?;
    Ok(Outcome::Success)
}

fn run_unpatch(workspace: &Workspace, opts: UnpatchOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    if opts.source.is_none() && !opts.all {
        anyhow::bail!("name a tracked patch to revert, or pass --all");
    }

    let removed = workspace
        .engine()
        .unpatch(&project, opts.source.as_deref())?;
    for record in removed {
        info!("untracked {}", record.source);
    }

    Ok(Outcome::Success)
}

fn run_tearoff(workspace: &Workspace, opts: TearoffOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    let report = workspace
        .engine()
        .tearoff(&project, opts.info_file.as_deref())?;

    if let Some(path) = report.local_patch {
        info!("local modifications saved to {:?}", path.display());
    }

    Ok(Outcome::Success)
}

fn run_apply(workspace: &Workspace, opts: ApplyCommandOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    let options = ApplyOptions {
        ignore_failing: opts.ignore_failing || workspace.settings.apply.ignore_failing,
        update_ledger: opts.update_yaml || workspace.settings.apply.update_ledger,
    };
    let report = workspace.engine().apply(&project, options)?;

    for record in &report.applied {
        info!("applied {}", record.source);
    }
    for failure in &report.failed {
        warn!("failed {}: {}", failure.record.source, failure.error);
    }
    if report.local_patch_applied {
        info!("applied local modifications");
    }
    if report.ledger_rewritten {
        warn!("removed {} failed patches from ledger", report.failed.len());
    }

    Ok(Outcome::Success)
}

fn run_diff(workspace: &Workspace, opts: DiffOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    let outcome = workspace
        .engine()
        .diff(&project, opts.info_file.as_deref())?;

    let DiffOutcome::Changed(diff) = outcome else {
        return Ok(Outcome::Success);
    };

    match opts.output_file {
        Some(path) => std::fs::write(&path, &diff)
            .with_context(|| format!("cannot write diff to {:?}", path.display()))?,
        None => {
            let mut out = stdout().lock();
            out.write_all(&diff)?;
            out.flush()?;
        }
    }

    Ok(Outcome::DiffDetected)
}

fn run_degit(workspace: &Workspace, opts: DegitOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    degit(&project)?;
    Ok(Outcome::Success)
}

fn run_regit(workspace: &Workspace, opts: RegitCommandOptions) -> Result<Outcome> {
    let project = workspace.project(&opts.project);
    let options = RegitOptions {
        origin: opts.origin,
        revision: opts.revision,
        forget: opts.forget,
        progress: workspace.settings.upstream.progress,
    };
    regit(&project, &options)?;
    Ok(Outcome::Success)
}
