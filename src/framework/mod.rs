//! Test framework adapters.
//!
//! An adapter discovers the cases in a set of test files and runs them
//! through a [`RunContext`], which owns selection, ids and fail-fast.

pub mod manifest;
pub mod tap;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::FrameworkKind;
use crate::engine::context::RunContext;
use crate::error::Result;

pub use manifest::ManifestFramework;
pub use tap::TapFramework;

pub trait TestFramework {
    fn name(&self) -> &'static str;

    /// Parse files ahead of time so every executor starts from a warm copy.
    /// Returns how many files were loaded.
    fn preload(&mut self, _paths: &[PathBuf]) -> Result<usize> {
        Ok(0)
    }

    /// Run every case in `paths`, in order, until the context says stop.
    fn execute(&self, paths: &[PathBuf], ctx: &mut RunContext) -> Result<()>;
}

/// Environment applied to every command the test environment launches.
#[derive(Debug, Clone, Default)]
pub struct ShellEnv {
    vars: Vec<(String, String)>,
}

impl ShellEnv {
    pub fn new(vars: Vec<(String, String)>) -> Self {
        Self { vars }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// `sh -c <script>` with the environment applied.
    pub fn shell(&self, script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        self.apply(&mut command);
        command
    }

    /// Run `program` directly with the environment applied.
    pub fn program(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        self.apply(&mut command);
        command
    }

    fn apply(&self, command: &mut Command) {
        command.envs(self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
}

/// Chooses the adapter for a configured kind and the `all` set's files.
pub type Detector = fn(FrameworkKind, &[PathBuf], ShellEnv) -> Box<dyn TestFramework>;

/// Build the adapter for `kind`, resolving `Auto` from the candidate files.
pub fn detect(
    kind: FrameworkKind,
    candidates: &[PathBuf],
    shell: ShellEnv,
) -> Box<dyn TestFramework> {
    let kind = match kind {
        FrameworkKind::Auto => detect_kind(candidates),
        explicit => explicit,
    };
    tracing::debug!(?kind, candidates = candidates.len(), "selected test framework");
    match kind {
        FrameworkKind::Tap => Box::new(TapFramework::new(shell)),
        FrameworkKind::Manifest | FrameworkKind::Auto => Box::new(ManifestFramework::new(shell)),
    }
}

/// YAML manifests win; otherwise executables mean TAP.
pub fn detect_kind(candidates: &[PathBuf]) -> FrameworkKind {
    if candidates.iter().any(|p| manifest::is_manifest(p)) {
        FrameworkKind::Manifest
    } else if candidates.iter().any(|p| is_executable(p)) {
        FrameworkKind::Tap
    } else {
        FrameworkKind::Manifest
    }
}

pub fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Suite name for files that do not declare one.
pub fn suite_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
