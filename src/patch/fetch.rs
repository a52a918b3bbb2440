// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch source fetching.
//!
//! A patch source is either an HTTP(S) URL, typically an attachment on an
//! issue tracker, or a path to a patch file on the local file system. Issue
//! pages themselves are never scraped here, only the link to the patch file
//! is consumed.

use std::{
    fs::read,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Where a patch comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchSource {
    Url(String),
    Local(PathBuf),
}

impl PatchSource {
    /// Classify raw patch source.
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            return Self::Url(source.to_string());
        }

        match source.strip_prefix("file://") {
            Some(path) => Self::Local(PathBuf::from(path)),
            None => Self::Local(PathBuf::from(source)),
        }
    }
}

/// Turn a user supplied source into the form recorded in a ledger.
///
/// URLs are kept verbatim. Local paths are made absolute so later replays do
/// not depend on the directory the command was run from.
///
/// # Errors
///
/// - Return [`FetchError::Read`] if a local patch does not exist.
pub fn normalize_source(source: &str) -> Result<String> {
    match PatchSource::parse(source) {
        PatchSource::Url(url) => Ok(url),
        PatchSource::Local(path) => path
            .canonicalize()
            .map(|path| path.to_string_lossy().into_owned())
            .map_err(|err| FetchError::Read { source: err, path }),
    }
}

/// Fetch patch contents from URLs or the local file system.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    user_agent: String,
}

impl SourceFetcher {
    /// Construct new patch fetcher.
    pub fn new() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Fetch raw patch content.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Http`] if the request cannot be made.
    /// - Return [`FetchError::Status`] if the server does not answer with success.
    /// - Return [`FetchError::Read`] if a local patch cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        match PatchSource::parse(source) {
            PatchSource::Url(url) => self.download(&url),
            PatchSource::Local(path) => read_local(&path),
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!("download {url}");
        let http_error = |err| FetchError::Http {
            source: err,
            url: url.to_string(),
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(http_error)?;
        let response = client.get(url).send().map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().map_err(http_error)?.to_vec())
    }
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn read_local(path: &Path) -> Result<Vec<u8>> {
    read(path).map_err(|err| FetchError::Read {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Patch fetching error types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request fails.
    #[error("failed to download {url}")]
    Http {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Server answers with a non-success status.
    #[error("download of {url} answered with status {status}")]
    Status { url: String, status: u16 },

    /// Local patch file cannot be read.
    #[error("failed to read patch file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
