// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch ledger layout and persistence.
//!
//! Each project carries a __ledger__: a YAML file sitting next to the project
//! directory that records the tracked patches in replay order, plus the git
//! provenance of the tree if it was converted from a checkout.
//!
//! # Ledger Layout
//!
//! ```yaml
//! patches:
//! - source: https://example.org/files/fix-1985980-5.patch
//!   home: https://example.org/node/1985980
//!   reason: For altering of new panes.
//! project:
//!   type: git
//!   origin: https://example.org/project/panels.git
//!   revision: 60d9f28801533fecc92216a60d444d89d80e7611
//! ```
//!
//! The ledger file only exists while it has something to say. It is created
//! on the first write, and deleted again once both the patch list and the
//! provenance are gone. All writes go through a temporary file in the same
//! directory that is atomically renamed over the ledger, so readers never
//! observe a half written ledger.

use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, remove_file},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Persisted record of a project's tracked patches.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Ledger {
    /// Tracked patches in replay order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchRecord>,

    /// Where the tree came from, if it used to be a git checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Provenance>,
}

impl Ledger {
    /// Ledger tracks neither patches nor provenance.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.project.is_none()
    }

    /// Find tracked patch by its source.
    pub fn find_patch(&self, source: &str) -> Option<&PatchRecord> {
        self.patches.iter().find(|record| record.source == source)
    }

    /// Info file named by the most recently tracked patch that names one.
    pub fn info_file(&self) -> Option<&Path> {
        self.patches
            .iter()
            .rev()
            .find_map(|record| record.info_file.as_deref())
    }
}

/// Single tracked patch.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PatchRecord {
    /// URL or local path of the patch.
    pub source: String,

    /// Issue page the patch was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    /// Why the patch is carried.
    #[serde(default)]
    pub reason: String,

    /// Info file holding the project version when the patch was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_file: Option<PathBuf>,
}

impl PatchRecord {
    /// Construct new patch record with no home or info file.
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            home: None,
            reason: reason.into(),
            info_file: None,
        }
    }
}

/// Origin of a tree that was converted from a version controlled checkout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provenance {
    /// Git checkout at an exact revision.
    Git { origin: String, revision: String },
}

/// Handle to a project's ledger file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    /// Construct new ledger handle.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load ledger, or an empty one if the ledger file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError::Read`] if ledger file cannot be read.
    /// - Return [`LedgerError::Corrupt`] if ledger file is not a valid ledger.
    pub fn load(&self) -> Result<Ledger> {
        let content = match read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Ledger::default()),
            Err(err) => {
                return Err(LedgerError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Ledger::default());
        }

        serde_yaml::from_str(&content).map_err(|err| LedgerError::Corrupt {
            source: err,
            path: self.path.clone(),
        })
    }

    /// Edit ledger.
    ///
    /// Loads the current ledger, lets the editor modify it, and persists the
    /// result if anything changed. Returns whatever the editor returns.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError::Read`] or [`LedgerError::Corrupt`] if current
    ///   ledger cannot be loaded.
    /// - Return [`LedgerError::Write`] if ledger cannot be persisted.
    pub fn edit<E, T>(&self, editor: E) -> Result<T>
    where
        E: FnOnce(&mut Ledger) -> T,
    {
        let current = self.load()?;
        let mut ledger = current.clone();
        let output = editor(&mut ledger);

        if ledger != current {
            self.store(&ledger)?;
        }

        Ok(output)
    }

    /// Append tracked patch to end of ledger.
    ///
    /// Creates the ledger file if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError`] if ledger cannot be loaded or persisted.
    #[instrument(skip(self, record), fields(source = %record.source), level = "debug")]
    pub fn add_patch(&self, record: PatchRecord) -> Result<()> {
        self.edit(|ledger| ledger.patches.push(record))
    }

    /// Drop every tracked patch.
    ///
    /// Deletes the ledger file if no provenance remains.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError`] if ledger cannot be loaded or persisted.
    pub fn remove_patches(&self) -> Result<Vec<PatchRecord>> {
        self.edit(|ledger| std::mem::take(&mut ledger.patches))
    }

    /// Drop one tracked patch by source, keeping the order of the rest.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError`] if ledger cannot be loaded or persisted.
    pub fn remove_patch(&self, source: &str) -> Result<Option<PatchRecord>> {
        self.edit(|ledger| {
            let position = ledger
                .patches
                .iter()
                .position(|record| record.source == source)?;
            Some(ledger.patches.remove(position))
        })
    }

    /// Record git provenance, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError`] if ledger cannot be loaded or persisted.
    pub fn set_git_info(
        &self,
        origin: impl Into<String>,
        revision: impl Into<String>,
    ) -> Result<()> {
        let provenance = Provenance::Git {
            origin: origin.into(),
            revision: revision.into(),
        };
        self.edit(|ledger| ledger.project = Some(provenance))
    }

    /// Forget git provenance.
    ///
    /// # Errors
    ///
    /// - Return [`LedgerError`] if ledger cannot be loaded or persisted.
    pub fn clear_git_info(&self) -> Result<Option<Provenance>> {
        self.edit(|ledger| ledger.project.take())
    }

    fn store(&self, ledger: &Ledger) -> Result<()> {
        if ledger.is_empty() {
            debug!("ledger is empty, remove {:?}", self.path.display());
            return match remove_file(&self.path) {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(LedgerError::Write {
                    source: err,
                    path: self.path.clone(),
                }),
                _ => Ok(()),
            };
        }

        let content = serde_yaml::to_string(ledger).map_err(LedgerError::Serialize)?;
        write_atomic(&self.path, content.as_bytes()).map_err(|err| LedgerError::Write {
            source: err,
            path: self.path.clone(),
        })
    }
}

/// Write file contents by renaming a fully written sibling temporary file over
/// the target path.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Ledger error types.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Ledger file cannot be read.
    #[error("failed to read ledger at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Ledger file does not contain a valid ledger.
    #[error("ledger at {:?} is corrupt", path.display())]
    Corrupt {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Ledger cannot be serialized.
    #[error(transparent)]
    Serialize(serde_yaml::Error),

    /// Ledger file cannot be written or removed.
    #[error("failed to write ledger at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
