// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch tracking and replay engine.
//!
//! Tie ledgers, patch application, and pristine trees together into the
//! operations performed on a vendored project.
//!
//! # Three Way Comparison
//!
//! Diff and tearoff compare three states of a project:
//!
//! 1. __Pristine__: the upstream tree at the project's baseline.
//! 2. __Expected__: the pristine tree with every tracked patch replayed on top
//!    in ledger order.
//! 3. __Working__: the project tree as it is on disk.
//!
//! Whatever separates the working tree from the expected tree is a __local
//! modification__. Pristine and expected trees are built in a scratch
//! directory that is removed again no matter how the operation ends. The
//! working tree is only ever read through the manifest of paths owned by the
//! project.

use crate::{
    ledger::{Ledger, LedgerError, PatchRecord, Provenance, write_atomic},
    patch::{
        fetch::{normalize_source, FetchError},
        Direction, FailedPatch, FailurePolicy, GitApply, PatchApplier, PatchError, PatchTool,
    },
    pristine::{PristineError, PristineProvider, Upstream, UpstreamPristine},
    project::{Project, ProjectError, ProjectKind},
    tree::{restore, TreeError, TreeSnapshot},
    version::{Baseline, VersionParseError},
};

use git2::Repository;
use std::{
    fs::{read, remove_file},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

/// Outcome of comparing a working tree against its expected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Working tree matches pristine tree plus tracked patches.
    Clean,

    /// Working tree carries local modifications, as a unified diff.
    Changed(Vec<u8>),
}

impl DiffOutcome {
    /// Raw diff bytes, empty if clean.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Clean => &[],
            Self::Changed(diff) => diff,
        }
    }
}

/// What tearoff did to a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TearoffReport {
    /// Baseline the tree was restored to.
    pub baseline: Baseline,

    /// Number of paths reverted to pristine content.
    pub restored: usize,

    /// Where local modifications were captured, if there were any.
    pub local_patch: Option<PathBuf>,
}

/// Options of post-upgrade replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Keep replaying when a tracked patch fails.
    pub ignore_failing: bool,

    /// Drop failed patches from the ledger, only with `ignore_failing`.
    pub update_ledger: bool,
}

/// What post-upgrade replay did to a project.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Tracked patches that applied.
    pub applied: Vec<PatchRecord>,

    /// Tracked patches that failed and were skipped.
    pub failed: Vec<FailedPatch>,

    /// Captured local patch was applied and deleted.
    pub local_patch_applied: bool,

    /// Failed patches were dropped from the ledger.
    pub ledger_rewritten: bool,
}

/// Pristine and expected snapshots of a project.
#[derive(Debug)]
struct Reconstruction {
    baseline: Baseline,
    pristine: TreeSnapshot,
    expected: TreeSnapshot,
}

/// Patch tracking and replay engine.
///
/// Pristine trees and patch application are injected, so the engine can run
/// against fixture trees.
#[derive(Debug, Clone, Default)]
pub struct Bandaid<P = UpstreamPristine, T = GitApply>
where
    P: PristineProvider,
    T: PatchTool,
{
    pristine: P,
    applier: PatchApplier<T>,
}

impl<P, T> Bandaid<P, T>
where
    P: PristineProvider,
    T: PatchTool,
{
    /// Construct new engine.
    pub fn new(pristine: P, applier: PatchApplier<T>) -> Self {
        Self { pristine, applier }
    }

    /// Apply new patch to project and start tracking it.
    ///
    /// Local patch paths are recorded as absolute paths. If the patch fails
    /// to apply, neither the tree nor the ledger is changed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ProjectNotFound`] if project tree does not exist.
    /// - Return [`Error::AlreadyTracked`] if patch is already in the ledger.
    /// - Return [`Error::Patch`] if patch cannot be fetched or applied.
    /// - Return [`Error::Ledger`] if ledger cannot be read or written.
    #[instrument(skip(self, project, record), fields(project = project.name()), level = "debug")]
    pub fn patch(&self, project: &Project, mut record: PatchRecord) -> Result<()> {
        ensure_exists(project)?;
        record.source = normalize_source(&record.source)?;

        let ledger = project.ledger();
        if ledger.load()?.find_patch(&record.source).is_some() {
            return Err(Error::AlreadyTracked {
                patch: record.source,
            });
        }

        self.applier
            .apply_one(project.root(), &record, Direction::Forward)?;
        info!("track {} in {:?}", record.source, ledger.path().display());
        ledger.add_patch(record)?;

        Ok(())
    }

    /// Revert tracked patches and stop tracking them.
    ///
    /// Reverts only the named patch if given, otherwise every tracked patch
    /// in reverse ledger order. The ledger is only updated once every revert
    /// succeeded. Returns the dropped records.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ProjectNotFound`] if project tree does not exist.
    /// - Return [`Error::NotTracked`] if named patch is not in the ledger.
    /// - Return [`Error::Patch`] if a patch does not revert cleanly.
    /// - Return [`Error::Ledger`] if ledger cannot be read or written.
    #[instrument(skip(self, project), fields(project = project.name()), level = "debug")]
    pub fn unpatch(&self, project: &Project, source: Option<&str>) -> Result<Vec<PatchRecord>> {
        ensure_exists(project)?;
        let ledger = project.ledger();
        let current = ledger.load()?;

        match source {
            Some(source) => {
                let record = current
                    .find_patch(source)
                    .or_else(|| {
                        normalize_source(source)
                            .ok()
                            .and_then(|normalized| current.find_patch(&normalized))
                    })
                    .cloned()
                    .ok_or_else(|| Error::NotTracked {
                        patch: source.to_string(),
                    })?;

                self.applier
                    .apply_one(project.root(), &record, Direction::Reverse)?;
                ledger.remove_patch(&record.source)?;
                Ok(vec![record])
            }
            None => {
                let reversed = current.patches.iter().rev().cloned().collect::<Vec<_>>();
                self.applier.apply_all(
                    project.root(),
                    &reversed,
                    Direction::Reverse,
                    FailurePolicy::Abort,
                )?;
                Ok(ledger.remove_patches()?)
            }
        }
    }

    /// Compute local modifications of project without touching it.
    ///
    /// # Errors
    ///
    /// - Return [`Error`] if the pristine or expected tree cannot be built,
    ///   or the working tree cannot be read.
    #[instrument(skip(self, project, info_file), fields(project = project.name()), level = "debug")]
    pub fn diff(&self, project: &Project, info_file: Option<&Path>) -> Result<DiffOutcome> {
        ensure_exists(project)?;
        let ledger = project.ledger().load()?;
        let reconstruction = self.reconstruct(project, &ledger, info_file)?;
        let diff = local_modifications(project, &reconstruction)?;

        if diff.is_empty() {
            info!("{} has no local modifications", project.name());
            Ok(DiffOutcome::Clean)
        } else {
            info!("{} has local modifications", project.name());
            Ok(DiffOutcome::Changed(diff))
        }
    }

    /// Strip every tracked patch and local modification from project.
    ///
    /// Local modifications are captured into the project's local patch
    /// before the tree is reverted to pristine, and a stale local patch is
    /// removed if there are none. Tracked patches stay in the ledger.
    ///
    /// # Errors
    ///
    /// - Return [`Error`] if the pristine or expected tree cannot be built,
    ///   or the working tree cannot be read or reverted.
    #[instrument(skip(self, project, info_file), fields(project = project.name()), level = "debug")]
    pub fn tearoff(&self, project: &Project, info_file: Option<&Path>) -> Result<TearoffReport> {
        ensure_exists(project)?;
        let ledger = project.ledger().load()?;
        let reconstruction = self.reconstruct(project, &ledger, info_file)?;
        let diff = local_modifications(project, &reconstruction)?;

        // INVARIANT: Capture local modifications before the tree loses them.
        let local_patch = project.local_patch_path();
        let local_patch = if diff.is_empty() {
            remove_stale(local_patch)?;
            None
        } else {
            write_atomic(local_patch, &diff).map_err(|err| Error::Io {
                source: err,
                path: local_patch.to_path_buf(),
            })?;
            info!("captured local modifications in {:?}", local_patch.display());
            Some(local_patch.to_path_buf())
        };

        let manifest = reconstruction.pristine.manifest(&reconstruction.expected);
        let restored = restore(project.root(), &reconstruction.pristine, &manifest)?;
        info!(
            "restored {restored} paths of {} to {}",
            project.name(),
            reconstruction.baseline
        );

        Ok(TearoffReport {
            baseline: reconstruction.baseline,
            restored,
            local_patch,
        })
    }

    /// Rebuild patched project on top of a freshly fetched pristine tree.
    ///
    /// Tracked patches are replayed first, the captured local patch last.
    /// With `ignore_failing`, failing tracked patches are skipped, and also
    /// dropped from the ledger with `update_ledger` once the local patch
    /// applied as well.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Patch`] if a tracked patch fails without
    ///   `ignore_failing`.
    /// - Return [`Error::LocalPatch`] if the local patch does not apply.
    /// - Return [`Error::Ledger`] if ledger cannot be read or written.
    #[instrument(skip(self, project), fields(project = project.name()), level = "debug")]
    pub fn apply(&self, project: &Project, options: ApplyOptions) -> Result<ApplyReport> {
        ensure_exists(project)?;
        let ledger = project.ledger();
        let current = ledger.load()?;

        let policy = if options.ignore_failing {
            FailurePolicy::Skip
        } else {
            FailurePolicy::Abort
        };
        let outcome =
            self.applier
                .apply_all(project.root(), &current.patches, Direction::Forward, policy)?;

        let mut report = ApplyReport {
            applied: outcome.applied,
            failed: outcome.failed,
            ..ApplyReport::default()
        };

        let local_patch = project.local_patch_path();
        let content = match read(local_patch) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(Error::Io {
                    source: err,
                    path: local_patch.to_path_buf(),
                })
            }
        };

        if let Some(content) = content {
            self.applier
                .apply_content(
                    project.root(),
                    &local_patch.to_string_lossy(),
                    &content,
                    Direction::Forward,
                )
                .map_err(|err| Error::LocalPatch {
                    path: local_patch.to_path_buf(),
                    source: err,
                })?;
            remove_stale(local_patch)?;
            report.local_patch_applied = true;
        }

        // INVARIANT: Ledger is only rewritten once every other step succeeded.
        if options.update_ledger && !report.failed.is_empty() {
            let failed = report
                .failed
                .iter()
                .map(|failure| failure.record.source.clone())
                .collect::<Vec<_>>();
            ledger.edit(|ledger| {
                ledger
                    .patches
                    .retain(|record| !failed.contains(&record.source));
            })?;
            warn!("dropped {} failed patches from ledger", failed.len());
            report.ledger_rewritten = true;
        }

        Ok(report)
    }

    /// Resolve upstream identity of project.
    fn upstream(
        &self,
        project: &Project,
        ledger: &Ledger,
        info_file: Option<&Path>,
    ) -> Result<Upstream> {
        let (origin, baseline) = match (project.kind(), &ledger.project) {
            (ProjectKind::Git, _) => {
                let repository = Repository::open(project.root())?;
                let head = repository.head()?.peel_to_commit()?.id().to_string();
                debug!("{} is a git checkout at {head}", project.name());
                (
                    Some(project.root().to_string_lossy().into_owned()),
                    head.parse::<Baseline>()?,
                )
            }
            (ProjectKind::Plain, Some(Provenance::Git { origin, revision })) => {
                (Some(origin.clone()), revision.parse::<Baseline>()?)
            }
            (ProjectKind::Plain, None) => {
                let info_file = info_file.or(ledger.info_file());
                (None, project.info_version(info_file)?.parse::<Baseline>()?)
            }
        };

        Ok(Upstream {
            name: project.upstream_name().to_string(),
            origin,
            baseline,
        })
    }

    /// Build pristine and expected snapshots of project in scratch space.
    fn reconstruct(
        &self,
        project: &Project,
        ledger: &Ledger,
        info_file: Option<&Path>,
    ) -> Result<Reconstruction> {
        let upstream = self.upstream(project, ledger, info_file)?;
        info!("reconstruct {} at {}", project.name(), upstream.baseline);

        let scratch = TempDir::new().map_err(|err| Error::Io {
            source: err,
            path: std::env::temp_dir(),
        })?;
        let pristine_dir = scratch.path().join("pristine");
        self.pristine.materialize(&upstream, &pristine_dir)?;
        let pristine = TreeSnapshot::read(&pristine_dir)?;

        let expected_dir = scratch.path().join("expected");
        mkdirp::mkdirp(&expected_dir).map_err(|err| Error::Io {
            source: err,
            path: expected_dir.clone(),
        })?;
        pristine.write_to(&expected_dir)?;
        self.applier.apply_all(
            &expected_dir,
            &ledger.patches,
            Direction::Forward,
            FailurePolicy::Abort,
        )?;
        let expected = TreeSnapshot::read(&expected_dir)?;

        Ok(Reconstruction {
            baseline: upstream.baseline,
            pristine,
            expected,
        })
    }
}

fn local_modifications(project: &Project, reconstruction: &Reconstruction) -> Result<Vec<u8>> {
    let manifest = reconstruction.pristine.manifest(&reconstruction.expected);
    let working = TreeSnapshot::read_paths(project.root(), &manifest)?;
    Ok(reconstruction.expected.diff(&working)?)
}

fn ensure_exists(project: &Project) -> Result<()> {
    if project.exists() {
        return Ok(());
    }

    Err(Error::ProjectNotFound {
        path: project.root().to_path_buf(),
    })
}

fn remove_stale(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => {
            debug!("removed {:?}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::Io {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

/// Engine error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Project tree does not exist.
    #[error("project directory {:?} does not exist", path.display())]
    ProjectNotFound { path: PathBuf },

    /// Patch is tracked already.
    #[error("patch {patch} is already tracked")]
    AlreadyTracked { patch: String },

    /// Patch is not tracked.
    #[error("patch {patch} is not tracked")]
    NotTracked { patch: String },

    /// Captured local patch does not apply.
    #[error("local patch {:?} does not apply", path.display())]
    LocalPatch {
        path: PathBuf,
        #[source]
        source: PatchError,
    },

    /// Local patch or scratch space cannot be accessed.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Version(#[from] VersionParseError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Pristine(#[from] PristineError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
