// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{fixture_engine, make_patch, write_tree};

use anyhow::Result;
use bandaid::{
    engine::{ApplyOptions, DiffOutcome, Error},
    ledger::PatchRecord,
    patch::{Direction, PatchApplier, PatchError},
    project::Project,
    tree::TreeSnapshot,
};
use pretty_assertions::assert_eq;
use std::{
    fs::{create_dir_all, read, read_to_string},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const INFO: &str = "name = Panels\ncore = 7.x\nversion = \"7.x-3.8\"\n";
const MODULE: &str = "<?php\n\nfunction panels_init() {\n  return TRUE;\n}\n";
const MODULE_PATCHED: &str =
    "<?php\n\nfunction panels_init() {\n  drupal_add_css('panels.css');\n  return TRUE;\n}\n";
const PLUGINS: &str = "<?php\n// plugins\n";
const PLUGINS_LOCAL: &str = "<?php\n// plugins\n// local tweak  \n";

/// Pristine panels tree, a copy of it as project, and two patches for it.
struct PanelsFixture {
    dir: TempDir,
    project: Project,
    patches: Vec<PathBuf>,
}

impl PanelsFixture {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pristine = [
            ("panels.info", INFO),
            ("panels.module", MODULE),
            ("includes/plugins.inc", PLUGINS),
        ];
        write_tree(&dir.path().join("pristine"), &pristine)?;

        let project = Project::module(dir.path().join("modules"), "panels");
        write_tree(project.root(), &pristine)?;

        create_dir_all(dir.path().join("patches"))?;
        let patches = vec![
            make_patch(
                &dir.path().join("patches/add-css-1985980-5.patch"),
                &[("panels.module", MODULE)],
                &[("panels.module", MODULE_PATCHED)],
            )?,
            make_patch(
                &dir.path().join("patches/stylesheet-2098515-3.patch"),
                &[],
                &[("css/panels.css", ".panel { margin: 0; }\n")],
            )?,
        ];

        Ok(Self {
            dir,
            project,
            patches,
        })
    }

    fn pristine_dir(&self) -> PathBuf {
        self.dir.path().join("pristine")
    }

    fn patch_all(&self) -> Result<()> {
        let engine = fixture_engine(self.pristine_dir());
        for patch in &self.patches {
            engine.patch(
                &self.project,
                PatchRecord::new(patch.to_string_lossy(), "Needed for layout."),
            )?;
        }

        Ok(())
    }

    fn modify_locally(&self) -> Result<()> {
        write_tree(
            self.project.root(),
            &[("includes/plugins.inc", PLUGINS_LOCAL)],
        )
    }
}

fn read_file(root: &Path, path: &str) -> Result<String> {
    Ok(read_to_string(root.join(path))?)
}

#[test]
fn tearoff_then_apply_restores_tree() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    fixture.patch_all()?;
    fixture.modify_locally()?;
    let before = TreeSnapshot::read(fixture.project.root())?;
    let engine = fixture_engine(fixture.pristine_dir());

    let report = engine.tearoff(&fixture.project, None)?;
    assert_eq!(
        report.local_patch.as_deref(),
        Some(fixture.project.local_patch_path())
    );
    assert_eq!(
        TreeSnapshot::read(fixture.project.root())?,
        TreeSnapshot::read(fixture.pristine_dir())?
    );
    assert_eq!(fixture.project.ledger().load()?.patches.len(), 2);

    let report = engine.apply(&fixture.project, ApplyOptions::default())?;
    assert_eq!(report.applied.len(), 2);
    assert!(report.failed.is_empty());
    assert!(report.local_patch_applied);
    assert!(!report.ledger_rewritten);

    assert_eq!(TreeSnapshot::read(fixture.project.root())?, before);
    assert!(!fixture.project.local_patch_path().exists());

    Ok(())
}

#[test]
fn diff_is_idempotent_and_matches_tearoff() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    fixture.patch_all()?;
    let engine = fixture_engine(fixture.pristine_dir());

    assert_eq!(engine.diff(&fixture.project, None)?, DiffOutcome::Clean);

    fixture.modify_locally()?;
    let first = engine.diff(&fixture.project, None)?;
    let second = engine.diff(&fixture.project, None)?;
    assert_eq!(first, second);
    assert!(matches!(first, DiffOutcome::Changed(_)));
    assert_eq!(
        read_file(fixture.project.root(), "includes/plugins.inc")?,
        PLUGINS_LOCAL
    );

    engine.tearoff(&fixture.project, None)?;
    assert_eq!(read(fixture.project.local_patch_path())?, first.as_bytes());

    Ok(())
}

#[test]
fn local_patch_reproduces_trailing_whitespace() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    fixture.patch_all()?;
    fixture.modify_locally()?;
    let engine = fixture_engine(fixture.pristine_dir());
    engine.tearoff(&fixture.project, None)?;

    let local = read_to_string(fixture.project.local_patch_path())?;
    assert!(local.contains("\n+// local tweak  \n"));

    // Rebuild pristine plus tracked patches by hand, then apply the local patch.
    let expected = fixture.dir.path().join("expected");
    TreeSnapshot::read(fixture.pristine_dir())?.write_to(&expected)?;
    let applier: PatchApplier = PatchApplier::default();
    for patch in &fixture.patches {
        let record = PatchRecord::new(patch.to_string_lossy(), "");
        applier.apply_one(&expected, &record, Direction::Forward)?;
    }
    applier.apply_content(&expected, "local", local.as_bytes(), Direction::Forward)?;

    assert_eq!(read_file(&expected, "includes/plugins.inc")?, PLUGINS_LOCAL);
    assert_eq!(read_file(&expected, "panels.module")?, MODULE_PATCHED);

    Ok(())
}

#[test]
fn incompatible_patch_leaves_tree_and_ledger_alone() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    let patch = make_patch(
        &fixture.dir.path().join("patches/stale.patch"),
        &[("panels.module", "<?php\n\nfunction panels_boot() {\n}\n")],
        &[("panels.module", "<?php\n\nfunction panels_boot() {\n  exit;\n}\n")],
    )?;
    let before = read(fixture.project.root().join("panels.module"))?;

    let result = fixture_engine(fixture.pristine_dir()).patch(
        &fixture.project,
        PatchRecord::new(patch.to_string_lossy(), "Stale."),
    );
    match result {
        Err(Error::Patch(PatchError::Apply { patch: source, .. })) => {
            assert_eq!(source, patch.canonicalize()?.to_string_lossy());
        }
        other => panic!("expected patch apply failure, got {other:?}"),
    }

    assert_eq!(read(fixture.project.root().join("panels.module"))?, before);
    assert!(!fixture.project.ledger().path().exists());

    Ok(())
}

#[test]
fn new_file_patch_over_existing_file_is_rejected() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    write_tree(
        fixture.project.root(),
        &[("css/panels.css", ".panel { padding: 0; }\n")],
    )?;
    let before = TreeSnapshot::read(fixture.project.root())?;

    let result = fixture_engine(fixture.pristine_dir()).patch(
        &fixture.project,
        PatchRecord::new(fixture.patches[1].to_string_lossy(), "Stylesheet."),
    );
    assert!(matches!(result, Err(Error::Patch(PatchError::Apply { .. }))));

    assert!(!fixture.project.root().join("b").exists());
    assert_eq!(TreeSnapshot::read(fixture.project.root())?, before);
    assert!(!fixture.project.ledger().path().exists());

    Ok(())
}

#[test]
fn skip_failing_patches_and_drop_them_from_ledger() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    let broken = make_patch(
        &fixture.dir.path().join("patches/broken.patch"),
        &[("includes/plugins.inc", "<?php\n// handlers\n")],
        &[("includes/plugins.inc", "<?php\n// handlers\n// more\n")],
    )?;
    let good = PatchRecord::new(fixture.patches[0].to_string_lossy(), "Good.");
    let bad = PatchRecord::new(broken.to_string_lossy(), "Broken.");
    let ledger = fixture.project.ledger();
    ledger.add_patch(bad.clone())?;
    ledger.add_patch(good.clone())?;
    let engine = fixture_engine(fixture.pristine_dir());

    let result = engine.apply(&fixture.project, ApplyOptions::default());
    assert!(matches!(result, Err(Error::Patch(PatchError::Apply { .. }))));
    assert_eq!(read_file(fixture.project.root(), "panels.module")?, MODULE);

    let report = engine.apply(
        &fixture.project,
        ApplyOptions {
            ignore_failing: true,
            update_ledger: true,
        },
    )?;
    assert_eq!(report.applied, vec![good.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].record, bad);
    assert!(report.ledger_rewritten);

    assert_eq!(ledger.load()?.patches, vec![good]);
    assert_eq!(read_file(fixture.project.root(), "panels.module")?, MODULE_PATCHED);
    assert_eq!(read_file(fixture.project.root(), "includes/plugins.inc")?, PLUGINS);

    Ok(())
}

#[test]
fn unpatch_single_patch_reverts_it() -> Result<()> {
    let fixture = PanelsFixture::new()?;
    fixture.patch_all()?;
    let engine = fixture_engine(fixture.pristine_dir());

    let first = fixture.patches[0].to_string_lossy().into_owned();
    let removed = engine.unpatch(&fixture.project, Some(first.as_str()))?;
    assert_eq!(removed.len(), 1);
    assert_eq!(read_file(fixture.project.root(), "panels.module")?, MODULE);
    assert!(fixture.project.root().join("css/panels.css").exists());
    assert_eq!(fixture.project.ledger().load()?.patches.len(), 1);

    engine.unpatch(&fixture.project, None)?;
    assert!(!fixture.project.root().join("css/panels.css").exists());
    assert!(!fixture.project.ledger().path().exists());

    Ok(())
}

#[test]
fn core_tearoff_keeps_nested_projects() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pristine = [
        ("index.php", "<?php\ndrupal_bootstrap();\n"),
        ("includes/common.inc", "<?php\n// common\n"),
        ("modules/system/system.info", "name = System\nversion = \"7.56\"\n"),
    ];
    write_tree(&dir.path().join("pristine"), &pristine)?;
    let project = Project::core(dir.path().join("www"), "drupal");
    write_tree(project.root(), &pristine)?;
    write_tree(
        project.root(),
        &[("sites/all/modules/panels/panels.module", MODULE)],
    )?;

    let patch = make_patch(
        &dir.path().join("common.patch"),
        &[("includes/common.inc", "<?php\n// common\n")],
        &[("includes/common.inc", "<?php\n// common\n// patched\n")],
    )?;
    let engine = fixture_engine(dir.path().join("pristine"));
    engine.patch(&project, PatchRecord::new(patch.to_string_lossy(), "Fix."))?;
    assert!(project.ledger().path().starts_with(project.root()));

    let report = engine.tearoff(&project, None)?;
    assert_eq!(report.local_patch, None);
    assert_eq!(
        read_file(project.root(), "includes/common.inc")?,
        "<?php\n// common\n"
    );
    assert_eq!(
        read_file(project.root(), "sites/all/modules/panels/panels.module")?,
        MODULE
    );

    engine.apply(&project, ApplyOptions::default())?;
    assert_eq!(
        read_file(project.root(), "includes/common.inc")?,
        "<?php\n// common\n// patched\n"
    );
    assert_eq!(
        read_file(project.root(), "sites/all/modules/panels/panels.module")?,
        MODULE
    );

    Ok(())
}
