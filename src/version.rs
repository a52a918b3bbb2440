// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Baseline version resolution.
//!
//! Every vendored project tree is anchored to some upstream __baseline__: the
//! release it was downloaded from, a development snapshot some number of
//! commits past a release, or a raw commit hash. The baseline decides how a
//! pristine copy of the project gets materialized again later on.
//!
//! # Grammar
//!
//! - Release: `<core>-<major>.<minor>[-<pre>]`, e.g., `7.x-1.4`, or the bare
//!   top-level form `7.56`.
//! - Development snapshot: a release followed by `+<commits>-dev`, e.g.,
//!   `7.x-2.0-alpha8+33-dev`.
//! - Commit hash: 12 to 40 hexadecimal digits.
//!
//! Everything else is rejected, most notably branch-style development
//! versions like `7.x-1.x-dev` that do not pin any particular commit.

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    sync::LazyLock,
};

/// Shortest commit hash accepted as a baseline.
pub const MIN_HASH_LEN: usize = 12;

/// Longest commit hash accepted as a baseline.
pub const MAX_HASH_LEN: usize = 40;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(?:
            (?P<core>[0-9]+\.x)-(?P<version>(?P<major>[0-9]+)\.[0-9]+(?:-[A-Za-z]+[0-9]*)?)
          | (?P<core_version>(?P<core_major>[0-9]+)\.[0-9]+(?:-[A-Za-z]+[0-9]*)?)
        )
        (?:\+(?P<commits>[0-9]+)-dev)?$
        | ^(?P<hash>[0-9A-Fa-f]+)$
        ",
    )
    .expect("version pattern must compile")
});

/// Upstream baseline of a project tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Baseline {
    /// Tagged upstream release.
    Release {
        core: String,
        major: String,
        version: String,
    },

    /// Snapshot taken some number of commits after a tagged release.
    DevSnapshot {
        core: String,
        major: String,
        version: String,
        commits: u32,
    },

    /// Exact upstream commit.
    Sha { hash: String },
}

impl Baseline {
    /// Tag names that may identify the release this baseline builds upon.
    ///
    /// Contributed projects tag as `<core>-<version>`, the top-level tree
    /// tags with the bare version. Commit hashes have no tag.
    pub fn tag_candidates(&self) -> Vec<String> {
        match self {
            Self::Release { core, version, .. } | Self::DevSnapshot { core, version, .. } => {
                vec![format!("{core}-{version}"), version.clone()]
            }
            Self::Sha { .. } => Vec::new(),
        }
    }
}

impl FromStr for Baseline {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let failure = |reason| VersionParseError {
            input: input.to_string(),
            reason,
        };

        let Some(captures) = VERSION_PATTERN.captures(input) else {
            if input.ends_with("-dev") {
                return Err(failure(ParseFailure::MissingDevSuffix));
            }
            return Err(failure(ParseFailure::Malformed));
        };

        if let Some(hash) = captures.name("hash") {
            let hash = hash.as_str();
            if !(MIN_HASH_LEN..=MAX_HASH_LEN).contains(&hash.len()) {
                return Err(failure(ParseFailure::HashLength(hash.len())));
            }

            return Ok(Self::Sha {
                hash: hash.to_ascii_lowercase(),
            });
        }

        // INVARIANT: Top-level versions like "7.56" belong to core "7.x".
        let (core, major, version) = match captures.name("core") {
            Some(core) => (
                core.as_str().to_string(),
                captures["major"].to_string(),
                captures["version"].to_string(),
            ),
            None => (
                format!("{}.x", &captures["core_major"]),
                captures["core_major"].to_string(),
                captures["core_version"].to_string(),
            ),
        };

        match captures.name("commits") {
            Some(commits) => Ok(Self::DevSnapshot {
                core,
                major,
                version,
                commits: commits
                    .as_str()
                    .parse()
                    .map_err(|_| failure(ParseFailure::Malformed))?,
            }),
            None => Ok(Self::Release {
                core,
                major,
                version,
            }),
        }
    }
}

impl Display for Baseline {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Release { core, version, .. } => write!(fmt, "{core}-{version}"),
            Self::DevSnapshot {
                core,
                version,
                commits,
                ..
            } => write!(fmt, "{core}-{version}+{commits}-dev"),
            Self::Sha { hash } => fmt.write_str(hash),
        }
    }
}

/// Version string does not describe a usable baseline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot resolve baseline from version {input:?}: {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: ParseFailure,
}

/// Reason a version string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("development version lacks a `+<commits>-dev` suffix")]
    MissingDevSuffix,

    #[error("commit hash has {0} digits, expected {MIN_HASH_LEN} to {MAX_HASH_LEN}")]
    HashLength(usize),

    #[error("not a release, development snapshot, or commit hash")]
    Malformed,
}
