// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Vendored project model.
//!
//! A __project__ is a directory holding a vendored upstream tree. Contributed
//! projects live in a shared working directory, with their ledger and local
//! patch sitting next to them:
//!
//! ```text
//! sites/all/modules/
//! ├── panels/
//! ├── panels.yml
//! └── panels.local.patch
//! ```
//!
//! The top-level tree is the working directory itself, so its ledger and
//! local patch are named `core.yml` and `core.local.patch` and live inside
//! of it.
//!
//! A project is either a plain tree, or a git checkout. Plain trees anchor
//! themselves to an upstream baseline through the `version` line of their
//! info file, or through git provenance recorded by degit.

use crate::ledger::LedgerFile;

use regex::Regex;
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::debug;

/// Project name that refers to the top-level tree.
pub const CORE: &str = "core";

static INFO_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*version[ \t]*[=:][ \t]*["']?([^"'\r\n]*?)["']?[ \t]*\r?$"#)
        .expect("info version pattern must compile")
});

/// How a project tree is held on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// Plain directory, no version control metadata.
    Plain,

    /// Git checkout.
    Git,
}

/// Vendored project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    name: String,
    upstream_name: String,
    root: PathBuf,
    ledger: PathBuf,
    local_patch: PathBuf,
}

impl Project {
    /// Contributed project at `<workdir>/<name>`.
    pub fn module(workdir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let workdir = workdir.as_ref();
        let name = name.into();
        Self {
            root: workdir.join(&name),
            ledger: workdir.join(format!("{name}.yml")),
            local_patch: workdir.join(format!("{name}.local.patch")),
            upstream_name: name.clone(),
            name,
        }
    }

    /// Top-level tree at root, known upstream under another name.
    pub fn core(root: impl AsRef<Path>, upstream_name: impl Into<String>) -> Self {
        let root = root.as_ref();
        Self {
            name: CORE.into(),
            upstream_name: upstream_name.into(),
            root: root.to_path_buf(),
            ledger: root.join(format!("{CORE}.yml")),
            local_patch: root.join(format!("{CORE}.local.patch")),
        }
    }

    /// Resolve project named on the command line.
    ///
    /// The name `core` refers to the working directory itself.
    pub fn from_name(workdir: impl AsRef<Path>, name: &str, core_name: &str) -> Self {
        if name == CORE {
            Self::core(workdir, core_name)
        } else {
            Self::module(workdir, name)
        }
    }

    /// Local name of project.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of project upstream.
    pub fn upstream_name(&self) -> &str {
        &self.upstream_name
    }

    /// Root directory of project tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Is this the top-level tree?
    pub fn is_core(&self) -> bool {
        self.name == CORE
    }

    /// Project tree exists on disk.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Determine how project tree is held.
    pub fn kind(&self) -> ProjectKind {
        if self.root.join(".git").exists() {
            ProjectKind::Git
        } else {
            ProjectKind::Plain
        }
    }

    /// Handle to project ledger.
    pub fn ledger(&self) -> LedgerFile {
        LedgerFile::new(&self.ledger)
    }

    /// Path of captured local patch.
    pub fn local_patch_path(&self) -> &Path {
        &self.local_patch
    }

    /// Conventional info files of project, relative to its root.
    pub fn default_info_files(&self) -> Vec<PathBuf> {
        if self.is_core() {
            vec![
                PathBuf::from("core/modules/system/system.info.yml"),
                PathBuf::from("modules/system/system.info"),
            ]
        } else {
            vec![
                PathBuf::from(format!("{}.info.yml", self.name)),
                PathBuf::from(format!("{}.info", self.name)),
            ]
        }
    }

    /// Read upstream version from project info file.
    ///
    /// Uses the preferred info file if given, otherwise the first
    /// conventional info file that exists. Packaging scripts append their
    /// own `version` line, so the last one in the file wins.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::NoInfoFile`] if no info file can be found.
    /// - Return [`ProjectError::Read`] if info file cannot be read.
    /// - Return [`ProjectError::NoVersion`] if info file names no version.
    pub fn info_version(&self, preferred: Option<&Path>) -> Result<String> {
        let candidates = match preferred {
            Some(path) => vec![path.to_path_buf()],
            None => self.default_info_files(),
        };

        for candidate in candidates {
            let path = self.root.join(&candidate);
            let content = match read_to_string(&path) {
                Ok(content) => content,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ProjectError::Read { source: err, path }),
            };

            debug!("read version from {:?}", path.display());
            return INFO_VERSION
                .captures_iter(&content)
                .last()
                .map(|captures| captures[1].trim().to_string())
                .filter(|version| !version.is_empty())
                .ok_or(ProjectError::NoVersion { path });
        }

        Err(ProjectError::NoInfoFile {
            project: self.name.clone(),
        })
    }
}

/// Project error types.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// No info file exists for project.
    #[error("no info file found for project {project}")]
    NoInfoFile { project: String },

    /// Info file does not name a version.
    #[error("info file {:?} has no version line", path.display())]
    NoVersion { path: PathBuf },

    /// Info file cannot be read.
    #[error("failed to read info file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProjectError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};

    #[test]
    fn module_layout_sits_next_to_tree() {
        let project = Project::from_name("/srv/www/sites/all/modules", "panels", "drupal");
        assert_eq!(project.root(), Path::new("/srv/www/sites/all/modules/panels"));
        assert_eq!(
            project.ledger().path(),
            Path::new("/srv/www/sites/all/modules/panels.yml")
        );
        assert_eq!(
            project.local_patch_path(),
            Path::new("/srv/www/sites/all/modules/panels.local.patch")
        );
        assert_eq!(project.upstream_name(), "panels");
    }

    #[test]
    fn core_layout_lives_inside_tree() {
        let project = Project::from_name("/srv/www", CORE, "drupal");
        assert!(project.is_core());
        assert_eq!(project.root(), Path::new("/srv/www"));
        assert_eq!(project.ledger().path(), Path::new("/srv/www/core.yml"));
        assert_eq!(project.local_patch_path(), Path::new("/srv/www/core.local.patch"));
        assert_eq!(project.upstream_name(), "drupal");
    }

    #[test]
    fn kind_follows_git_metadata() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::module(dir.path(), "views");
        create_dir_all(project.root())?;
        assert_eq!(project.kind(), ProjectKind::Plain);

        create_dir_all(project.root().join(".git"))?;
        assert_eq!(project.kind(), ProjectKind::Git);

        Ok(())
    }

    #[test]
    fn last_version_line_wins() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::module(dir.path(), "panels");
        create_dir_all(project.root())?;
        write(
            project.root().join("panels.info"),
            indoc! {r#"
                name = Panels
                core = 7.x
                version = VERSION

                ; Information added by Drupal.org packaging script on 2016-08-20
                version = "7.x-3.8"
                project = "panels"
            "#},
        )?;

        assert_eq!(project.info_version(None)?, "7.x-3.8");

        Ok(())
    }

    #[test]
    fn yaml_info_file_is_preferred() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::core(dir.path(), "drupal");
        create_dir_all(dir.path().join("core/modules/system"))?;
        create_dir_all(dir.path().join("modules/system"))?;
        write(
            dir.path().join("core/modules/system/system.info.yml"),
            "name: System\nversion: '8.9.20'\n",
        )?;
        write(dir.path().join("modules/system/system.info"), "version = \"7.56\"\n")?;

        assert_eq!(project.info_version(None)?, "8.9.20");
        assert_eq!(
            project.info_version(Some(Path::new("modules/system/system.info")))?,
            "7.56"
        );

        Ok(())
    }

    #[test]
    fn missing_info_file_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::module(dir.path(), "ctools");
        create_dir_all(project.root())?;

        assert!(matches!(
            project.info_version(None),
            Err(ProjectError::NoInfoFile { .. })
        ));

        write(project.root().join("ctools.info"), "name = Chaos tools\n")?;
        assert!(matches!(
            project.info_version(None),
            Err(ProjectError::NoVersion { .. })
        ));

        Ok(())
    }
}
