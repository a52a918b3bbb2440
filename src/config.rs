// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional settings file, and how it is loaded.
//! Every setting has a default, so a missing settings file is the same as an
//! empty one.
//!
//! # General Layout
//!
//! ```toml
//! [upstream]
//! git_url = "https://git.drupalcode.org/project/{name}.git"
//! core_name = "drupal"
//! release_command = "curl -sL https://ftp.drupal.org/files/projects/{name}-{version}.tar.gz | tar xz -C {dest} --strip-components=1"
//! progress = true
//!
//! [apply]
//! ignore_failing = false
//! update_ledger = false
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Settings layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Where pristine trees come from.
    pub upstream: UpstreamSettings,

    /// Defaults for post-upgrade patch replay.
    pub apply: ApplySettings,
}

impl Settings {
    /// Load settings file, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be read.
    /// - Return [`ConfigError`] if settings file cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => content.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on upstream git URL template.
        settings.upstream.git_url = shellexpand::full(settings.upstream.git_url.as_str())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned();

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Upstream source settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Clone URL template of upstream repositories, `{name}` is replaced by
    /// the project name.
    pub git_url: String,

    /// Upstream project name of the top-level tree.
    pub core_name: String,

    /// Shell command that downloads a tagged release into `{dest}`.
    ///
    /// Releases are checked out from the release tag of the upstream
    /// repository when this is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_command: Option<String>,

    /// Show clone progress.
    pub progress: bool,
}

impl UpstreamSettings {
    /// Upstream clone URL of named project.
    pub fn git_url_for(&self, name: &str) -> String {
        self.git_url.replace("{name}", name)
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            git_url: "https://git.drupalcode.org/project/{name}.git".into(),
            core_name: "drupal".into(),
            release_command: None,
            progress: true,
        }
    }
}

/// Post-upgrade replay settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplySettings {
    /// Keep going when a tracked patch fails to apply.
    pub ignore_failing: bool,

    /// Drop failed patches from the ledger.
    pub update_ledger: bool,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file cannot be read.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
