// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_tree, RepoFixture};

use anyhow::Result;
use bandaid::{
    config::UpstreamSettings,
    engine::{Bandaid, DiffOutcome},
    ledger::{LedgerError, Provenance},
    patch::PatchApplier,
    pristine::UpstreamPristine,
    project::{Project, ProjectKind},
    vcs::{degit, regit, RegitOptions, VcsError},
};
use git2::Repository;
use pretty_assertions::assert_eq;
use std::fs::{read_dir, read_to_string, write};

fn quiet() -> UpstreamSettings {
    UpstreamSettings {
        progress: false,
        ..UpstreamSettings::default()
    }
}

#[test]
fn degit_then_regit_reproduces_checkout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    upstream.stage_and_commit("views.info", "version = \"7.x-3.8\"\n")?;
    let revision = upstream.stage_and_commit("views.module", "<?php\n// first\n")?;

    let project = Project::module(dir.path().join("modules"), "views");
    Repository::clone(&upstream.url(), project.root())?;
    upstream.stage_and_commit("views.module", "<?php\n// upstream moved on\n")?;
    assert_eq!(project.kind(), ProjectKind::Git);

    let provenance = degit(&project)?;
    assert_eq!(
        provenance,
        Provenance::Git {
            origin: upstream.url(),
            revision: revision.to_string(),
        }
    );
    assert_eq!(project.kind(), ProjectKind::Plain);
    assert_eq!(project.ledger().load()?.project, Some(provenance.clone()));

    write(project.root().join("views.module"), "<?php\n// edited\n")?;
    write_tree(project.root(), &[("notes.txt", "kept\n")])?;

    let options = RegitOptions::default();
    regit(&project, &options)?;
    assert_eq!(project.kind(), ProjectKind::Git);
    assert_eq!(
        read_to_string(project.root().join("views.module"))?,
        "<?php\n// first\n"
    );
    assert_eq!(read_to_string(project.root().join("notes.txt"))?, "kept\n");

    let repository = Repository::open(project.root())?;
    assert_eq!(repository.head()?.peel_to_commit()?.id(), revision);
    assert_eq!(project.ledger().load()?.project, Some(provenance));

    Ok(())
}

#[test]
fn degit_overwrites_and_regit_forget_clears_provenance() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    let revision = upstream.stage_and_commit("ctools.module", "<?php\n")?;

    let project = Project::module(dir.path().join("modules"), "ctools");
    Repository::clone(&upstream.url(), project.root())?;
    project
        .ledger()
        .set_git_info("https://example.org/stale.git", "000000000000")?;
    assert!(project.ledger().path().exists());

    degit(&project)?;
    assert_eq!(
        project.ledger().load()?.project,
        Some(Provenance::Git {
            origin: upstream.url(),
            revision: revision.to_string(),
        })
    );

    let result = regit(
        &project,
        &RegitOptions {
            forget: true,
            ..RegitOptions::default()
        },
    );
    assert!(result.is_ok());
    assert!(!project.ledger().path().exists());

    let result = regit(&project, &RegitOptions::default());
    assert!(matches!(result, Err(VcsError::AlreadyGit { .. })));
    assert!(matches!(
        degit(&Project::module(dir.path(), "missing")),
        Err(VcsError::NotAGitRepo { .. })
    ));

    Ok(())
}

#[test]
fn regit_with_unknown_revision_leaves_tree_plain() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    let revision = upstream.stage_and_commit("views.module", "<?php\n// first\n")?;

    let project = Project::module(dir.path().join("modules"), "views");
    Repository::clone(&upstream.url(), project.root())?;
    degit(&project)?;

    let result = regit(
        &project,
        &RegitOptions {
            revision: Some("deadbeefdeadbeef".into()),
            ..RegitOptions::default()
        },
    );
    assert!(matches!(result, Err(VcsError::MissingRevision { .. })));
    assert_eq!(project.kind(), ProjectKind::Plain);

    let provenance = regit(&project, &RegitOptions::default())?;
    assert_eq!(
        provenance,
        Provenance::Git {
            origin: upstream.url(),
            revision: revision.to_string(),
        }
    );
    assert_eq!(project.kind(), ProjectKind::Git);

    Ok(())
}

#[test]
fn degit_keeps_checkout_when_provenance_cannot_be_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    upstream.stage_and_commit("views.module", "<?php\n")?;

    let project = Project::module(dir.path().join("modules"), "views");
    Repository::clone(&upstream.url(), project.root())?;
    write(project.ledger().path(), "patches: [\n")?;

    let result = degit(&project);
    assert!(matches!(
        result,
        Err(VcsError::Ledger(LedgerError::Corrupt { .. }))
    ));
    assert_eq!(project.kind(), ProjectKind::Git);
    Repository::open(project.root())?;

    let mut entries = read_dir(dir.path().join("modules"))?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>>>()?;
    entries.sort();
    assert_eq!(entries, vec!["views", "views.yml"]);

    Ok(())
}

#[test]
fn git_checkout_diffs_against_its_head() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    upstream.stage_and_commit("views.module", "<?php\n// views\n")?;

    let project = Project::module(dir.path().join("modules"), "views");
    Repository::clone(&upstream.url(), project.root())?;
    let engine: Bandaid = Bandaid::new(UpstreamPristine::new(quiet()), PatchApplier::default());

    assert_eq!(engine.diff(&project, None)?, DiffOutcome::Clean);

    write(
        project.root().join("views.module"),
        "<?php\n// views\n// debugging  \n",
    )?;
    let diff = engine.diff(&project, None)?;
    let diff = String::from_utf8(diff.as_bytes().to_vec())?;
    assert!(diff.starts_with("diff --git a/views.module b/views.module\n"));
    assert!(diff.ends_with("+// debugging  \n"));

    Ok(())
}
