// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use assert_cmd::prelude::{CommandCargoExt, OutputAssertExt};
use bandaid::{
    config::UpstreamSettings, engine::Bandaid, patch::PatchApplier, pristine::UpstreamPristine,
    project::Project,
};
use git2::Repository;
use predicates::prelude::predicate;
use pretty_assertions::assert_eq;
use std::{fs::write, process::Command};

#[test]
fn diff_writes_only_the_diff_to_stdout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    upstream.stage_and_commit("views.module", "<?php\n// views\n")?;

    let workdir = dir.path().join("modules");
    let project = Project::module(&workdir, "views");
    Repository::clone(&upstream.url(), project.root())?;
    write(
        project.root().join("views.module"),
        "<?php\n// views\n// debugging  \n",
    )?;

    let engine: Bandaid = Bandaid::new(
        UpstreamPristine::new(UpstreamSettings {
            progress: false,
            ..UpstreamSettings::default()
        }),
        PatchApplier::default(),
    );
    let expect = engine.diff(&project, None)?.as_bytes().to_vec();

    let mut cmd = Command::cargo_bin("bandaid")?;
    cmd.env("RUST_LOG", "info")
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("-C")
        .arg(&workdir)
        .args(["diff", "views"]);
    let assert = cmd
        .assert()
        .code(1)
        .stderr(predicate::str::contains("views has local modifications"));
    assert_eq!(assert.get_output().stdout, expect);

    Ok(())
}

#[test]
fn clean_diff_exits_successfully_with_empty_stdout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let upstream = RepoFixture::new(dir.path().join("upstream"))?;
    upstream.stage_and_commit("views.module", "<?php\n// views\n")?;

    let workdir = dir.path().join("modules");
    Repository::clone(&upstream.url(), workdir.join("views"))?;

    let mut cmd = Command::cargo_bin("bandaid")?;
    cmd.env("RUST_LOG", "info")
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("-C")
        .arg(&workdir)
        .args(["diff", "views"]);
    cmd.assert().success().stdout(predicate::str::is_empty());

    Ok(())
}
