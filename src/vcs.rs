// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Conversion between git checkouts and plain trees.
//!
//! Vendored projects are sometimes installed as git checkouts, e.g., to track
//! a development snapshot. Committing such a tree into an enclosing
//! repository needs its git metadata gone first. __Degit__ records where the
//! checkout came from in the project's ledger and removes the metadata.
//! __Regit__ turns the plain tree back into a checkout of the recorded
//! revision.
//!
//! Degit is the only writer of provenance. Regit reads it, but leaves it in
//! place unless asked to forget it, so a tree can be regitted any number of
//! times.

use crate::{
    ledger::{LedgerError, Provenance},
    pristine::{clone_repository, find_commit, PristineError},
    project::Project,
};

use git2::{Repository, ResetType};
use std::{
    fs::{rename, symlink_metadata},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{info, instrument, warn};

/// Record git provenance of project checkout and remove its git metadata.
///
/// Always overwrites previously recorded provenance. Returns the recorded
/// provenance.
///
/// The git metadata is first moved aside next to the project, and only
/// discarded once the provenance is recorded. If recording fails, the
/// metadata is moved back and the project stays a git checkout.
///
/// # Errors
///
/// - Return [`VcsError::NotAGitRepo`] if project is not a git checkout.
/// - Return [`VcsError::NoOrigin`] if checkout has no origin remote.
/// - Return [`VcsError::Ledger`] if provenance cannot be recorded.
/// - Return [`VcsError::Io`] if git metadata cannot be moved aside.
#[instrument(skip(project), fields(project = project.name()), level = "debug")]
pub fn degit(project: &Project) -> Result<Provenance> {
    let root = project.root();
    let repository = Repository::open(root).map_err(|_| VcsError::NotAGitRepo {
        path: root.to_path_buf(),
    })?;

    let origin = repository
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(ToString::to_string))
        .ok_or_else(|| VcsError::NoOrigin {
            path: root.to_path_buf(),
        })?;
    let revision = repository.head()?.peel_to_commit()?.id().to_string();
    drop(repository);

    let git_dir = root.join(".git");
    let scratch = scratch_beside(root, ".degit-")?;
    let moved = scratch.path().join("git");
    rename(&git_dir, &moved).map_err(|err| VcsError::Io {
        source: err,
        path: git_dir.clone(),
    })?;

    if let Err(err) = project.ledger().set_git_info(&origin, &revision) {
        rename(&moved, &git_dir).map_err(|err| VcsError::Io {
            source: err,
            path: git_dir.clone(),
        })?;
        return Err(err.into());
    }
    info!("recorded {origin} at {revision} for {}", project.name());

    let leftover = scratch.path().to_path_buf();
    if let Err(err) = scratch.close() {
        warn!("failed to remove old git metadata at {:?}: {err}", leftover.display());
    }

    Ok(Provenance::Git { origin, revision })
}

/// Options of turning a plain tree back into a git checkout.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegitOptions {
    /// Origin to clone instead of the recorded one.
    pub origin: Option<String>,

    /// Revision to check out instead of the recorded one.
    pub revision: Option<String>,

    /// Clear recorded provenance once the checkout is in place.
    pub forget: bool,

    /// Show clone progress.
    pub progress: bool,
}

/// Turn plain project tree into a git checkout of its recorded revision.
///
/// The origin is cloned next to the project, and its git metadata moved
/// into the project tree. The tree is then hard reset to the revision.
/// Files unknown to the revision are left alone.
///
/// # Errors
///
/// - Return [`VcsError::AlreadyGit`] if project already is a git checkout.
/// - Return [`VcsError::MissingGitInfo`] if neither recorded nor supplied
///   origin and revision exist.
/// - Return [`VcsError::Pristine`] if origin cannot be cloned.
/// - Return [`VcsError::MissingRevision`] if revision does not exist.
#[instrument(skip(project, options), fields(project = project.name()), level = "debug")]
pub fn regit(project: &Project, options: &RegitOptions) -> Result<Provenance> {
    let root = project.root();
    let git_dir = root.join(".git");
    if symlink_metadata(&git_dir).is_ok() {
        return Err(VcsError::AlreadyGit {
            path: root.to_path_buf(),
        });
    }

    let ledger = project.ledger();
    let recorded = ledger.load()?.project;
    let (recorded_origin, recorded_revision) = match recorded {
        Some(Provenance::Git { origin, revision }) => (Some(origin), Some(revision)),
        None => (None, None),
    };
    let (Some(origin), Some(revision)) = (
        options.origin.clone().or(recorded_origin),
        options.revision.clone().or(recorded_revision),
    ) else {
        return Err(VcsError::MissingGitInfo {
            project: project.name().to_string(),
        });
    };

    let scratch = scratch_beside(root, ".regit-")?;
    let checkout = scratch.path().join(project.name());
    let clone = clone_repository(&origin, &checkout, options.progress)?;

    // INVARIANT: Project only gains git metadata once the revision is known to exist.
    let commit = find_commit(&clone, &revision).ok_or_else(|| VcsError::MissingRevision {
        origin: origin.clone(),
        revision: revision.clone(),
    })?;
    drop(clone);

    rename(checkout.join(".git"), &git_dir).map_err(|err| VcsError::Io {
        source: err,
        path: git_dir.clone(),
    })?;

    let repository = Repository::open(root)?;
    let object = repository.find_object(commit, None)?;
    repository.set_head_detached(commit)?;
    repository.reset(&object, ResetType::Hard, None)?;
    info!("checked out {origin} at {commit} in {:?}", root.display());

    if options.forget {
        ledger.clear_git_info()?;
        info!("forgot recorded provenance of {}", project.name());
    }

    Ok(Provenance::Git {
        origin,
        revision: commit.to_string(),
    })
}

/// Scratch directory in the parent of root, on the same filesystem.
fn scratch_beside(root: &Path, prefix: &str) -> Result<TempDir> {
    let parent = root
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(&parent)
        .map_err(|err| VcsError::Io {
            source: err,
            path: parent,
        })
}

/// Git conversion error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Project is not a git checkout.
    #[error("{:?} is not a git repository", path.display())]
    NotAGitRepo { path: PathBuf },

    /// Project is a git checkout already.
    #[error("{:?} is a git repository already", path.display())]
    AlreadyGit { path: PathBuf },

    /// Checkout has no origin remote to record.
    #[error("git repository at {:?} has no origin remote", path.display())]
    NoOrigin { path: PathBuf },

    /// No origin and revision known for project.
    #[error("no git origin and revision recorded or given for {project}")]
    MissingGitInfo { project: String },

    /// Revision does not exist at origin.
    #[error("{origin} has no revision {revision}")]
    MissingRevision { origin: String, revision: String },

    /// Git metadata cannot be moved or removed.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pristine(#[from] PristineError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
