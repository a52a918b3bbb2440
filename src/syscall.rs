// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Patch application and release fetching are delegated to external tools.
//! Every call blocks until the tool exits. There are no retries and no
//! timeouts, a tool that hangs hangs the caller.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Command,
};
use tracing::debug;

/// Run command to completion in target directory and capture its output.
///
/// Standard output and standard error are merged into one message with the
/// trailing newline chomped. Extra environment variables are layered over the
/// current environment.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if the command cannot be started.
/// - Return [`SyscallError::Failed`] if the command exits unsuccessfully.
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: &Path,
    envs: impl IntoIterator<Item = (impl AsRef<OsStr>, impl AsRef<OsStr>)>,
) -> Result<String> {
    let program = cmd.as_ref().to_os_string();
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    debug!("run {program:?} {args:?} in {:?}", cwd.display());

    let output = Command::new(&program)
        .args(&args)
        .envs(envs)
        .current_dir(cwd)
        .output()
        .map_err(|err| SyscallError::Spawn {
            source: err,
            program: program.clone(),
        })?;

    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();
    message.push_str(&stdout);
    if !stdout.is_empty() && !stderr.is_empty() && !stdout.ends_with('\n') {
        message.push('\n');
    }
    message.push_str(&stderr);

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(SyscallError::Failed {
            program,
            status: output.status.code(),
            message,
        });
    }

    Ok(message)
}

/// External process error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Command cannot be started at all.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: OsString,
    },

    /// Command ran but reported failure.
    #[error("command {program:?} failed with status {status:?}:\n{message}")]
    Failed {
        program: OsString,
        status: Option<i32>,
        message: String,
    },
}

impl SyscallError {
    /// Diagnostic output of the failed command, or the spawn failure itself.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Spawn { source, program } => format!("cannot run {program:?}: {source}"),
            Self::Failed { message, .. } => message.clone(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
