// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pristine upstream trees.
//!
//! Materialize the unmodified upstream tree of a project at a given baseline.
//! How that happens depends on the baseline:
//!
//! - __Release__: run the configured release command, or check out the
//!   release tag of the upstream repository.
//! - __Development snapshot__: check out the commit that sits exactly the
//!   recorded number of commits past the release tag.
//! - __Commit hash__: check out that exact commit.
//!
//! Commits are always checked out detached. A development checkout must not
//! rely on any named branch existing, because the branch a snapshot was cut
//! from may have moved on, or never been fetched at all.

use crate::{
    config::UpstreamSettings,
    syscall::{syscall_non_interactive, SyscallError},
    version::Baseline,
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, Oid, RemoteCallbacks, Repository, Sort,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    collections::HashMap,
    fs::remove_dir_all,
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Upstream identity of a project tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Upstream project name.
    pub name: String,

    /// Repository to clone from, overriding the configured URL template.
    pub origin: Option<String>,

    /// Baseline the tree is anchored to.
    pub baseline: Baseline,
}

/// Source of pristine upstream trees.
pub trait PristineProvider {
    /// Materialize pristine tree of upstream at destination.
    ///
    /// The destination must not exist yet, or be an empty directory. The
    /// materialized tree carries no version control metadata.
    ///
    /// # Errors
    ///
    /// - Return [`PristineError`] if the pristine tree cannot be obtained.
    fn materialize(&self, upstream: &Upstream, dest: &Path) -> Result<()>;
}

/// Pristine trees fetched from upstream repositories and release archives.
#[derive(Debug, Clone, Default)]
pub struct UpstreamPristine {
    settings: UpstreamSettings,
}

impl UpstreamPristine {
    /// Construct new upstream pristine provider.
    pub fn new(settings: UpstreamSettings) -> Self {
        Self { settings }
    }

    fn url_of(&self, upstream: &Upstream) -> String {
        upstream
            .origin
            .clone()
            .unwrap_or_else(|| self.settings.git_url_for(&upstream.name))
    }

    fn run_release_command(
        &self,
        command: &str,
        upstream: &Upstream,
        core: &str,
        version: &str,
        dest: &Path,
    ) -> Result<()> {
        mkdirp::mkdirp(dest).map_err(|err| PristineError::Io {
            source: err,
            path: dest.to_path_buf(),
        })?;

        let command = command
            .replace("{name}", &upstream.name)
            .replace("{core}", core)
            .replace("{version}", version)
            .replace("{dest}", &dest.to_string_lossy());
        info!("fetch release {} {version}", upstream.name);
        syscall_non_interactive("sh", ["-c", command.as_str()], dest, NO_ENV).map_err(|err| {
            PristineError::ReleaseCommand {
                project: upstream.name.clone(),
                version: version.to_string(),
                source: err,
            }
        })?;

        Ok(())
    }
}

const NO_ENV: [(&str, &str); 0] = [];

impl PristineProvider for UpstreamPristine {
    #[instrument(skip(self, upstream, dest), fields(project = %upstream.name, baseline = %upstream.baseline), level = "debug")]
    fn materialize(&self, upstream: &Upstream, dest: &Path) -> Result<()> {
        if let (Some(command), Baseline::Release { core, version, .. }) =
            (&self.settings.release_command, &upstream.baseline)
        {
            return self.run_release_command(command, upstream, core, version, dest);
        }

        let url = self.url_of(upstream);
        let repository = clone_repository(&url, dest, self.settings.progress)?;
        let commit = match &upstream.baseline {
            Baseline::Sha { hash } => find_commit(&repository, hash).ok_or_else(|| {
                PristineError::MissingCommit {
                    url: url.clone(),
                    commit: hash.clone(),
                }
            })?,
            Baseline::Release { .. } => find_tag(&repository, &upstream.baseline)
                .ok_or_else(|| PristineError::MissingTag {
                    url: url.clone(),
                    tags: upstream.baseline.tag_candidates(),
                })?,
            Baseline::DevSnapshot { commits, .. } => {
                let tag = find_tag(&repository, &upstream.baseline).ok_or_else(|| {
                    PristineError::MissingTag {
                        url: url.clone(),
                        tags: upstream.baseline.tag_candidates(),
                    }
                })?;
                find_dev_commit(&repository, tag, *commits)
                    .map_err(|err| PristineError::Checkout {
                        url: url.clone(),
                        source: err,
                    })?
                    .ok_or_else(|| PristineError::MissingCommit {
                        url: url.clone(),
                        commit: upstream.baseline.to_string(),
                    })?
            }
        };

        checkout_detached(&repository, commit).map_err(|err| PristineError::Checkout {
            url: url.clone(),
            source: err,
        })?;
        drop(repository);

        let git_dir = dest.join(".git");
        remove_dir_all(&git_dir).map_err(|err| PristineError::Io {
            source: err,
            path: git_dir,
        })?;

        Ok(())
    }
}

/// Clone repository into path with a working tree.
///
/// The progress of the clone is displayed through a progress bar unless
/// disabled. If credentials are required, the user is prompted for them
/// while the progress bar is held.
///
/// # Errors
///
/// - Return [`PristineError::Clone`] if the clone fails.
/// - Return [`PristineError::IndicatifStyleTemplate`] if the progress bar
///   cannot be styled.
#[instrument(skip(url, path), fields(url = %url.as_ref()), level = "debug")]
pub fn clone_repository(
    url: impl AsRef<str>,
    path: impl AsRef<Path>,
    progress: bool,
) -> Result<Repository> {
    let url = url.as_ref();
    let clone_error = |err| PristineError::Clone {
        url: url.to_string(),
        source: err,
    };

    let bar = if progress {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(time::Duration::from_millis(100));

    let prompter = IndicatifPrompter::new(bar);
    let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
    let config = Config::open_default().map_err(clone_error)?;

    let mut throttle = time::Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    rc.transfer_progress(|progress| {
        let stats = progress.to_owned();
        let bar_size = stats.total_objects() as u64;
        let bar_pos = stats.received_objects() as u64;
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            prompter.bar.set_length(bar_size);
            prompter.bar.set_position(bar_pos);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    let repository = RepoBuilder::new()
        .fetch_options(fo)
        .clone(url, path.as_ref())
        .map_err(clone_error);
    prompter.bar.finish_and_clear();

    let repository = repository?;
    info!("cloned {url}");
    Ok(repository)
}

/// Check out commit with a detached head, discarding working tree changes.
///
/// # Errors
///
/// - Return [`git2::Error`] if checkout fails.
pub fn checkout_detached(
    repository: &Repository,
    commit: Oid,
) -> std::result::Result<(), git2::Error> {
    let object = repository.find_object(commit, None)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repository.checkout_tree(&object, Some(&mut checkout))?;
    repository.set_head_detached(commit)?;
    debug!("checked out {commit}");

    Ok(())
}

/// Find commit by full or abbreviated hash.
pub fn find_commit(repository: &Repository, hash: &str) -> Option<Oid> {
    repository
        .revparse_single(hash)
        .and_then(|object| object.peel_to_commit())
        .map(|commit| commit.id())
        .ok()
}

fn find_tag(repository: &Repository, baseline: &Baseline) -> Option<Oid> {
    baseline.tag_candidates().iter().find_map(|tag| {
        let commit = repository
            .revparse_single(&format!("refs/tags/{tag}"))
            .and_then(|object| object.peel_to_commit())
            .ok()?;
        debug!("release tag {tag} is {}", commit.id());
        Some(commit.id())
    })
}

/// Find first commit past tag that sits exactly `commits` commits ahead of it.
///
/// Every local and remote-tracking ref is walked, so the commit is found no
/// matter which branch it was cut from. Parents are visited before their
/// children, so the distance of a single-parent commit follows from its
/// parent's. Only merge commits need libgit2 to count their distance.
fn find_dev_commit(
    repository: &Repository,
    tag: Oid,
    commits: u32,
) -> std::result::Result<Option<Oid>, git2::Error> {
    let mut walk = repository.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    walk.push_glob("heads")?;
    walk.push_glob("remotes")?;
    walk.hide(tag)?;

    // INVARIANT: Only descendants of the tag are keyed, with their distance to it.
    let mut ahead = HashMap::<Oid, usize>::new();
    for oid in walk {
        let oid = oid?;
        let parents = repository.find_commit(oid)?.parent_ids().collect::<Vec<_>>();
        let distance = match parents.as_slice() {
            [parent] if *parent == tag => Some(1),
            [parent] => ahead.get(parent).map(|distance| distance + 1),
            parents
                if parents
                    .iter()
                    .any(|parent| *parent == tag || ahead.contains_key(parent)) =>
            {
                Some(repository.graph_ahead_behind(oid, tag)?.0)
            }
            _ => None,
        };

        let Some(distance) = distance else {
            continue;
        };
        if distance == commits as usize {
            return Ok(Some(oid));
        }
        ahead.insert(oid, distance);
    }

    Ok(None)
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Pristine tree error types.
///
/// Every variant means the pristine tree is unavailable.
#[derive(Debug, thiserror::Error)]
pub enum PristineError {
    /// Upstream repository cannot be cloned.
    #[error("pristine unavailable: failed to clone {url}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    /// No release tag exists for baseline.
    #[error("pristine unavailable: {url} has none of the tags {tags:?}")]
    MissingTag { url: String, tags: Vec<String> },

    /// No commit matches baseline.
    #[error("pristine unavailable: {url} has no commit {commit}")]
    MissingCommit { url: String, commit: String },

    /// Baseline commit cannot be checked out.
    #[error("pristine unavailable: failed to check out baseline of {url}")]
    Checkout {
        url: String,
        #[source]
        source: git2::Error,
    },

    /// Release command fails.
    #[error("pristine unavailable: failed to fetch release {version} of {project}")]
    ReleaseCommand {
        project: String,
        version: String,
        #[source]
        source: SyscallError,
    },

    /// Pristine tree cannot be prepared on disk.
    #[error("pristine unavailable: failed to prepare {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = PristineError> = std::result::Result<T, E>;
