// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch application.
//!
//! Tracked patches are replayed onto project trees in ledger order, forward
//! when building a patched tree and in reverse when dropping a patch again.
//! The actual hunk matching is left to an external [`PatchTool`], by default
//! `git apply`.
//!
//! # All or Nothing
//!
//! Applying a single patch either succeeds completely or leaves the tree as it
//! was. Offsets and fuzzy context matching are fine, a rejected hunk never
//! results in a half patched file.
//!
//! # Failure Policy
//!
//! Replaying a list of patches either aborts on the first failure, leaving
//! every later patch unapplied, or skips failing patches and keeps going. The
//! skip policy reports applied and failed patches separately so the caller
//! can decide what to do with the failed ones.

pub mod fetch;

use crate::{
    ledger::PatchRecord,
    patch::fetch::{FetchError, SourceFetcher},
    syscall::syscall_non_interactive,
};

use std::{
    ffi::OsString,
    fs::read,
    io::Write,
    path::Path,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Direction to apply a patch in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// What to do when a patch in a list fails to apply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at first failure and report it.
    #[default]
    Abort,

    /// Record failure and continue with the next patch.
    Skip,
}

/// Mechanism that applies a patch file to a tree.
pub trait PatchTool {
    /// Apply patch file to tree.
    ///
    /// Must leave the tree untouched on failure, and return the tool's
    /// diagnostic output.
    fn apply(
        &self,
        tree: &Path,
        patch: &Path,
        direction: Direction,
    ) -> std::result::Result<(), String>;
}

/// Patch tool backed by `git apply`.
///
/// Patches with git-style `a/` and `b/` prefixes are applied at strip level
/// one only. Anything else tries strip level one first, then zero for patches
/// made against the tree root without a leading directory.
/// Repository discovery is fenced at the tree's parent directory, so an
/// enclosing repository can never change which paths the patch resolves to.
#[derive(Debug, Default, Clone)]
pub struct GitApply;

impl PatchTool for GitApply {
    fn apply(
        &self,
        tree: &Path,
        patch: &Path,
        direction: Direction,
    ) -> std::result::Result<(), String> {
        let ceiling = tree.parent().unwrap_or(tree).as_os_str().to_os_string();
        let content = read(patch).map_err(|err| err.to_string())?;
        let mut diagnostics = Vec::new();

        for strip in strip_levels(&content) {
            let mut args: Vec<OsString> =
                vec!["apply".into(), "--whitespace=nowarn".into(), strip.into()];
            if direction == Direction::Reverse {
                args.push("-R".into());
            }
            args.push(patch.as_os_str().to_os_string());

            match syscall_non_interactive(
                "git",
                &args,
                tree,
                [("GIT_CEILING_DIRECTORIES", ceiling.as_os_str())],
            ) {
                Ok(_) => return Ok(()),
                Err(err) => {
                    debug!("git apply {strip} failed: {}", err.diagnostic());
                    diagnostics.push(err.diagnostic());
                }
            }
        }

        Err(diagnostics.join("\n"))
    }
}

/// Strip levels worth trying for patch content.
///
/// Falling back to `-p0` on a prefixed patch would turn `b/<path>` into a
/// literal directory, so prefixed patches get `-p1` alone.
fn strip_levels(content: &[u8]) -> &'static [&'static str] {
    let prefixed = content.split(|byte| *byte == b'\n').any(|line| {
        line.starts_with(b"diff --git a/")
            || line.starts_with(b"--- a/")
            || line.starts_with(b"+++ b/")
    });

    if prefixed {
        &["-p1"]
    } else {
        &["-p1", "-p0"]
    }
}

/// Outcome of replaying a list of patches.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Patches that applied, in replay order.
    pub applied: Vec<PatchRecord>,

    /// Patches that failed, in replay order.
    pub failed: Vec<FailedPatch>,
}

/// Patch that failed during replay, with the reason why.
#[derive(Debug)]
pub struct FailedPatch {
    pub record: PatchRecord,
    pub error: PatchError,
}

/// Fetch and apply patches to trees.
#[derive(Debug, Clone, Default)]
pub struct PatchApplier<T = GitApply>
where
    T: PatchTool,
{
    tool: T,
    fetcher: SourceFetcher,
}

impl<T> PatchApplier<T>
where
    T: PatchTool,
{
    /// Construct new patch applier.
    pub fn new(tool: T, fetcher: SourceFetcher) -> Self {
        Self { tool, fetcher }
    }

    /// Fetch raw content of patch source.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Fetch`] if the patch cannot be fetched.
    pub fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        self.fetcher.fetch(source).map_err(|err| PatchError::Fetch {
            patch: source.to_string(),
            source: err,
        })
    }

    /// Fetch tracked patch and apply it to tree.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Fetch`] if the patch cannot be fetched.
    /// - Return [`PatchError::Apply`] if the patch does not apply.
    pub fn apply_one(&self, tree: &Path, record: &PatchRecord, direction: Direction) -> Result<()> {
        let content = self.fetch(&record.source)?;
        self.apply_content(tree, &record.source, &content, direction)
    }

    /// Apply already fetched patch content to tree.
    ///
    /// The label identifies the patch in errors.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Stage`] if the content cannot be handed to the
    ///   patch tool.
    /// - Return [`PatchError::Apply`] if the patch does not apply.
    #[instrument(skip(self, tree, content), level = "debug")]
    pub fn apply_content(
        &self,
        tree: &Path,
        label: &str,
        content: &[u8],
        direction: Direction,
    ) -> Result<()> {
        let stage_error = |err| PatchError::Stage {
            source: err,
            patch: label.to_string(),
        };

        let tree = tree.canonicalize().map_err(stage_error)?;
        let mut staged = NamedTempFile::new().map_err(stage_error)?;
        staged.write_all(content).map_err(stage_error)?;
        staged.flush().map_err(stage_error)?;

        self.tool
            .apply(&tree, staged.path(), direction)
            .map_err(|diagnostic| PatchError::Apply {
                patch: label.to_string(),
                diagnostic,
            })?;

        info!("applied {label} ({direction:?})");
        Ok(())
    }

    /// Replay patches onto tree in list order.
    ///
    /// Under [`FailurePolicy::Abort`] the first failure is returned and later
    /// patches stay unapplied. Under [`FailurePolicy::Skip`] every failure is
    /// collected into the outcome instead.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError`] of the first failing patch under
    ///   [`FailurePolicy::Abort`].
    #[instrument(skip(self, tree, records), fields(count = records.len()), level = "debug")]
    pub fn apply_all(
        &self,
        tree: &Path,
        records: &[PatchRecord],
        direction: Direction,
        policy: FailurePolicy,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        for record in records {
            match self.apply_one(tree, record, direction) {
                Ok(()) => outcome.applied.push(record.clone()),
                Err(err) if policy == FailurePolicy::Skip => {
                    warn!("skip {}: {err}", record.source);
                    outcome.failed.push(FailedPatch {
                        record: record.clone(),
                        error: err,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(outcome)
    }
}

/// Patch application error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Patch does not apply to the tree.
    #[error("patch {patch} does not apply:\n{diagnostic}")]
    Apply { patch: String, diagnostic: String },

    /// Patch content cannot be fetched.
    #[error("cannot fetch patch {patch}")]
    Fetch {
        patch: String,
        #[source]
        source: FetchError,
    },

    /// Patch content cannot be staged for the patch tool.
    #[error("failed to stage patch {patch}")]
    Stage {
        #[source]
        source: std::io::Error,
        patch: String,
    },
}

impl PatchError {
    /// Identity of the offending patch.
    pub fn patch(&self) -> &str {
        match self {
            Self::Apply { patch, .. } | Self::Fetch { patch, .. } | Self::Stage { patch, .. } => {
                patch
            }
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;
