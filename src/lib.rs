// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Track patches applied to vendored upstream trees, and replay them.
//!
//! Vendored projects drift from their upstream release as patches pile up on
//! top of them: fixes taken from issue trackers, and plain local edits. Bandaid
//! keeps a __ledger__ of the tracked patches of each project, so that
//! upgrading a project becomes a matter of:
//!
//! 1. __Tearoff__: revert the project to its pristine upstream baseline,
//!    capturing every untracked local modification as a local patch.
//! 2. Replace the pristine tree with the new upstream release.
//! 3. __Apply__: replay every tracked patch, then the local patch.
//!
//! Projects that were installed as git checkouts can be turned into plain
//! trees and back with __degit__ and __regit__.
//!
//! # See Also
//!
//! 1. [`engine::Bandaid`]
//! 2. [`ledger`]
//! 3. [`version::Baseline`]

pub mod config;
pub mod engine;
pub mod ledger;
pub mod patch;
pub mod path;
pub mod pristine;
pub mod project;
pub mod syscall;
pub mod tree;
pub mod vcs;
pub mod version;
