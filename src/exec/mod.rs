// src/exec/mod.rs

//! Variable environment and hook execution
//!
//! A hook runs as a real shell script: the named function body is lifted
//! out of the recipe text, prefixed with a fail-fast preamble, written to
//! an executable temp file, and handed to `sh` with the build variables
//! exported. Output is captured on both streams; a missing hook is an
//! immediate success, not an error.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::recipe::model::Hook;
use crate::recipe::shell::extract_hook;

/// Fail-fast preamble: exit on first failing command and on any
/// reference to an unset variable.
const SCRIPT_PREAMBLE: &str = "#!/bin/sh\nset -e\nset -u\n\n";

/// Toolchain hints exported alongside the build variables
#[derive(Debug, Clone)]
pub struct ToolchainHints {
    pub cflags: String,
    pub cxxflags: String,
    pub ldflags: String,
    pub makeflags: String,
    /// Set when building for an explicit target triple
    pub target_triple: Option<String>,
    /// Optional feature switches for the target
    pub features: Vec<String>,
}

impl Default for ToolchainHints {
    fn default() -> Self {
        let jobs = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            cflags: "-O2 -pipe".to_string(),
            cxxflags: "-O2 -pipe".to_string(),
            ldflags: String::new(),
            makeflags: format!("-j{}", jobs),
            target_triple: None,
            features: Vec::new(),
        }
    }
}

impl ToolchainHints {
    /// Hints for a fan-out target: the optimization level replaces the
    /// default in CFLAGS/CXXFLAGS and the triple and feature switches are
    /// exported.
    pub fn for_target(triple: &str, optimization: &str, features: &[String]) -> Self {
        let mut hints = Self::default();
        if !optimization.is_empty() {
            hints.cflags = format!("-{} -pipe", optimization);
            hints.cxxflags = hints.cflags.clone();
        }
        hints.target_triple = Some(triple.to_string());
        hints.features = features.to_vec();
        hints
    }
}

/// Snapshot of the recipe-visible variables for one build.
///
/// Created at pipeline start and dropped on every exit path; hooks see
/// these under exactly the field names.
#[derive(Debug, Clone)]
pub struct BuildEnv {
    pub source_directory: PathBuf,
    pub package_directory: PathBuf,
    pub start_directory: PathBuf,
    pub name: String,
    pub version: String,
    pub release: String,
    pub toolchain: ToolchainHints,
}

impl BuildEnv {
    /// The variables exported into a hook's environment
    pub fn exported(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (
                "source_directory".to_string(),
                self.source_directory.to_string_lossy().into_owned(),
            ),
            (
                "package_directory".to_string(),
                self.package_directory.to_string_lossy().into_owned(),
            ),
            (
                "start_directory".to_string(),
                self.start_directory.to_string_lossy().into_owned(),
            ),
            ("name".to_string(), self.name.clone()),
            ("version".to_string(), self.version.clone()),
            ("release".to_string(), self.release.clone()),
            ("CFLAGS".to_string(), self.toolchain.cflags.clone()),
            ("CXXFLAGS".to_string(), self.toolchain.cxxflags.clone()),
            ("LDFLAGS".to_string(), self.toolchain.ldflags.clone()),
            ("MAKEFLAGS".to_string(), self.toolchain.makeflags.clone()),
        ];
        if let Some(triple) = &self.toolchain.target_triple {
            vars.push(("target_triple".to_string(), triple.clone()));
        }
        if !self.toolchain.features.is_empty() {
            vars.push((
                "target_features".to_string(),
                self.toolchain.features.join(","),
            ));
        }
        vars
    }

    /// Working directory for a hook: the package directory for `package`,
    /// the source directory for everything else.
    pub fn workdir(&self, hook: Hook) -> &Path {
        match hook {
            Hook::Package => &self.package_directory,
            _ => &self.source_directory,
        }
    }
}

/// Result of running (or skipping) one hook
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// True when the recipe does not define the hook
    pub skipped: bool,
}

impl HookResult {
    fn skipped() -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            skipped: true,
        }
    }
}

/// Runs hooks extracted from one recipe body against one environment
pub struct HookRunner<'a> {
    recipe_body: &'a str,
    env: &'a BuildEnv,
}

impl<'a> HookRunner<'a> {
    pub fn new(recipe_body: &'a str, env: &'a BuildEnv) -> Self {
        Self { recipe_body, env }
    }

    /// Execute the named hook to completion and capture its output.
    pub fn run(&self, hook: Hook) -> Result<HookResult> {
        let body = match extract_hook(self.recipe_body, hook) {
            Some(body) if !body.trim().is_empty() => body,
            _ => {
                info!("{} hook not defined, skipped", hook);
                return Ok(HookResult::skipped());
            }
        };

        // The script dir lives only as long as this call, including on
        // error paths.
        let script_dir = TempDir::new()?;
        let script_path = script_dir.path().join(format!("{}.sh", hook));

        let script = format!("{}{}\n", SCRIPT_PREAMBLE, body);
        fs::write(&script_path, &script)?;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;

        let workdir = self.env.workdir(hook);
        debug!(
            "running {} hook in {} ({} bytes of script)",
            hook,
            workdir.display(),
            script.len()
        );

        // output() drains both pipes concurrently with the wait and reaps
        // the child before returning.
        let output = Command::new("sh")
            .arg(&script_path)
            .envs(self.env.exported())
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()?;

        let exit_code = output.status.code().unwrap_or(-1);
        let success = output.status.success();

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", hook, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("[{}] {}", hook, line);
        }

        if success {
            info!("{} hook completed", hook);
        } else {
            warn!("{} hook failed with exit code {}", hook, exit_code);
        }

        Ok(HookResult {
            success,
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            skipped: false,
        })
    }
}
