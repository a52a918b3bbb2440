// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project tree snapshots.
//!
//! Tearoff and diff reason about three states of the same project: the
//! pristine upstream tree, the pristine tree with every tracked patch
//! replayed on top, and the working tree. Each state is captured as a
//! [`TreeSnapshot`], an in-memory map of relative file paths to their content
//! and mode, so the comparison never has to mutate the tree it inspects.
//!
//! # Project Manifest
//!
//! A vendored project frequently shares its directory with content that does
//! not belong to it, e.g., a contributed module nested inside the top-level
//! tree. Only paths present in the pristine or expected snapshot are owned by
//! the project. Working tree snapshots are read through that __manifest__, and
//! [`restore`] never touches anything outside of it.
//!
//! # Diff Format
//!
//! Snapshots are compared through libgit2 by writing both of them as trees
//! into a scratch bare repository. The resulting patch uses git's extended
//! headers (`diff --git a/<file> b/<file>`, `index <old>..<new> <mode>`) and
//! keeps every byte of hunk content intact, trailing whitespace included.

use git2::{DiffFormat, DiffOptions, Index, IndexEntry, IndexTime, Oid, Repository};
use ignore::WalkBuilder;
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsStr,
    fs::{self, read, read_link, remove_dir, remove_file, symlink_metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Mode of a file inside a project tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
    Symlink,
}

impl FileMode {
    fn git_mode(self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
        }
    }
}

/// File content captured by a snapshot.
///
/// Symbolic links store their target path as content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub mode: FileMode,
    pub content: Vec<u8>,
}

impl TreeFile {
    /// Construct new regular file.
    pub fn regular(content: impl Into<Vec<u8>>) -> Self {
        Self {
            mode: FileMode::Regular,
            content: content.into(),
        }
    }
}

/// In-memory snapshot of a project tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    files: BTreeMap<PathBuf, TreeFile>,
}

impl TreeSnapshot {
    /// Construct new empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every file below root.
    ///
    /// Version control metadata directories are skipped.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Walk`] if directory traversal fails.
    /// - Return [`TreeError::Io`] if a file cannot be read.
    #[instrument(skip(root), fields(root = %root.as_ref().display()), level = "debug")]
    pub fn read(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
            .build();

        let mut snapshot = Self::new();
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_some_and(|kind| kind.is_dir()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };

            if let Some(file) = read_tree_file(entry.path())? {
                snapshot.files.insert(relative.to_path_buf(), file);
            }
        }

        debug!("captured {} files", snapshot.files.len());
        Ok(snapshot)
    }

    /// Capture only the given relative paths below root.
    ///
    /// Paths that do not exist, or that are not files, are left out.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Io`] if a file cannot be read.
    pub fn read_paths<'a>(
        root: impl AsRef<Path>,
        paths: impl IntoIterator<Item = &'a PathBuf>,
    ) -> Result<Self> {
        let root = root.as_ref();
        let mut snapshot = Self::new();
        for path in paths {
            if let Some(file) = read_tree_file(&root.join(path))? {
                snapshot.files.insert(path.clone(), file);
            }
        }

        Ok(snapshot)
    }

    /// Write every file of the snapshot below root.
    ///
    /// Creates missing directories. Existing files at the same paths are
    /// replaced.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Io`] if a file cannot be written.
    pub fn write_to(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        for (path, file) in &self.files {
            write_tree_file(&root.join(path), file)?;
        }

        Ok(())
    }

    /// Insert file at relative path.
    pub fn insert(&mut self, path: impl Into<PathBuf>, file: TreeFile) {
        self.files.insert(path.into(), file);
    }

    /// Get file at relative path.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&TreeFile> {
        self.files.get(path.as_ref())
    }

    /// Relative paths of every captured file.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    /// Number of captured files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Snapshot captured no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Union of the paths captured by both snapshots.
    pub fn manifest(&self, other: &TreeSnapshot) -> BTreeSet<PathBuf> {
        self.paths().chain(other.paths()).cloned().collect()
    }

    /// Does any captured file live below the relative directory?
    fn owns_dir(&self, dir: &Path) -> bool {
        self.paths().any(|path| path.starts_with(dir))
    }

    /// Render git-style unified diff turning this snapshot into the other.
    ///
    /// Returns an empty buffer if both snapshots hold the same content.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Git2`] if libgit2 fails to compute the diff.
    /// - Return [`TreeError::Io`] if the scratch repository cannot be made.
    #[instrument(skip(self, other), level = "debug")]
    pub fn diff(&self, other: &TreeSnapshot) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir().map_err(|err| TreeError::Io {
            source: err,
            path: std::env::temp_dir(),
        })?;
        let repository = Repository::init_bare(scratch.path())?;
        let old_tree = repository.find_tree(self.write_git_tree(&repository)?)?;
        let new_tree = repository.find_tree(other.write_git_tree(&repository)?)?;

        let mut opts = DiffOptions::new();
        opts.context_lines(3).show_binary(true);
        let diff = repository.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

        let mut patch = Vec::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            // INVARIANT: Content lines carry their origin as a prefix, headers do not.
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin() as u8);
            }
            patch.extend_from_slice(line.content());
            true
        })?;

        Ok(patch)
    }

    fn write_git_tree(&self, repository: &Repository) -> Result<Oid> {
        let mut index = Index::new()?;
        for (path, file) in &self.files {
            let entry = IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: file.mode.git_mode(),
                uid: 0,
                gid: 0,
                file_size: index_file_size(file.content.len()),
                id: repository.blob(&file.content)?,
                flags: 0,
                flags_extended: 0,
                path: git_path(path),
            };
            index.add(&entry)?;
        }

        Ok(index.write_tree_to(repository)?)
    }
}

/// Overwrite manifest paths below root with their pristine content.
///
/// Paths of the manifest that are absent from the pristine snapshot are
/// deleted, along with any directory that deletion leaves empty and that the
/// pristine snapshot does not own. Files already matching the pristine
/// snapshot are left alone. Returns the number of paths changed.
///
/// # Errors
///
/// - Return [`TreeError::Io`] if a file cannot be read, written, or removed.
#[instrument(skip(root, pristine, manifest), level = "debug")]
pub fn restore(
    root: impl AsRef<Path>,
    pristine: &TreeSnapshot,
    manifest: &BTreeSet<PathBuf>,
) -> Result<usize> {
    let root = root.as_ref();
    let mut changed = 0;
    for path in manifest {
        let target = root.join(path);
        match pristine.get(path) {
            Some(file) => {
                if read_tree_file(&target)?.as_ref() != Some(file) {
                    debug!("restore {:?}", path.display());
                    write_tree_file(&target, file)?;
                    changed += 1;
                }
            }
            None => {
                if remove_tree_file(&target)? {
                    debug!("remove {:?}", path.display());
                    prune_empty_dirs(root, path, pristine)?;
                    changed += 1;
                }
            }
        }
    }

    Ok(changed)
}

fn prune_empty_dirs(root: &Path, removed: &Path, pristine: &TreeSnapshot) -> Result<()> {
    let mut dir = removed.parent();
    while let Some(relative) = dir {
        if relative.as_os_str().is_empty() || pristine.owns_dir(relative) {
            break;
        }

        let absolute = root.join(relative);
        let is_empty = fs::read_dir(&absolute)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            break;
        }

        remove_dir(&absolute).map_err(|err| TreeError::Io {
            source: err,
            path: absolute.clone(),
        })?;
        dir = relative.parent();
    }

    Ok(())
}

fn read_tree_file(path: &Path) -> Result<Option<TreeFile>> {
    let io_error = |err| TreeError::Io {
        source: err,
        path: path.to_path_buf(),
    };

    let metadata = match symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(err)),
    };

    if metadata.file_type().is_symlink() {
        let target = read_link(path).map_err(io_error)?;
        return Ok(Some(TreeFile {
            mode: FileMode::Symlink,
            content: target.to_string_lossy().into_owned().into_bytes(),
        }));
    }

    if !metadata.is_file() {
        return Ok(None);
    }

    let mode = if is_executable(&metadata) {
        FileMode::Executable
    } else {
        FileMode::Regular
    };

    Ok(Some(TreeFile {
        mode,
        content: read(path).map_err(io_error)?,
    }))
}

fn write_tree_file(path: &Path, file: &TreeFile) -> Result<()> {
    let io_error = |err| TreeError::Io {
        source: err,
        path: path.to_path_buf(),
    };

    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(io_error)?;
    }

    // INVARIANT: Never write through an existing symlink.
    if symlink_metadata(path).is_ok_and(|metadata| metadata.file_type().is_symlink()) {
        remove_file(path).map_err(io_error)?;
    }

    match file.mode {
        FileMode::Symlink => write_symlink(path, &file.content).map_err(io_error),
        FileMode::Regular | FileMode::Executable => {
            fs::write(path, &file.content).map_err(io_error)?;
            set_executable(path, file.mode == FileMode::Executable).map_err(io_error)
        }
    }
}

fn remove_tree_file(path: &Path) -> Result<bool> {
    match symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(false),
        Ok(_) => remove_file(path).map(|_| true).map_err(|err| TreeError::Io {
            source: err,
            path: path.to_path_buf(),
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(TreeError::Io {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

/// Index entry size hint, saturated for files of 4 GiB and more.
fn index_file_size(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn git_path(path: &Path) -> Vec<u8> {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .into_bytes()
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    let wanted = if executable {
        mode | ((mode & 0o444) >> 2)
    } else {
        mode & !0o111
    };

    if wanted != mode {
        permissions.set_mode(wanted);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn write_symlink(path: &Path, target: &[u8]) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(Path::new(OsStr::from_bytes(target)), path)
}

#[cfg(not(unix))]
fn write_symlink(path: &Path, target: &[u8]) -> std::io::Result<()> {
    fs::write(path, target)
}

/// Tree snapshot error types.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// File or directory cannot be accessed.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory traversal fails.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = TreeError> = std::result::Result<T, E>;
