// src/pipeline/mod.rs

//! The build pipeline: one recipe in, one package artifact out
//!
//! Stages run strictly in order: dependency probe, conflict probe,
//! directory provisioning, cache lookup (a hit skips fetch and the build
//! stages), fetch + verify, prepare/build/check hooks, cache store,
//! package hook, archive composition. Every failure collapses into one
//! of the stable error kinds; `check` is the only hook allowed to fail
//! without aborting.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::ArchiveComposer;
use crate::cache::{cache_key, BuildCache};
use crate::catalog::InstalledCatalog;
use crate::error::{Error, Result};
use crate::exec::{BuildEnv, HookRunner, ToolchainHints};
use crate::fetch::{self, FetchOutcome};
use crate::recipe::model::{Hook, Recipe};
use crate::version::satisfies;

/// Progress of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Probed,
    Provisioned,
    CacheHit,
    Fetched,
    Built,
    Packaged,
    Archived,
    Done,
}

/// Caller-supplied knobs for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory of the recipe; local sources are staged from here
    pub start_directory: PathBuf,
    /// Holds the `build`, `source`, and `package` directories
    pub workdir: PathBuf,
    /// Where the finished artifact is written
    pub output_directory: PathBuf,
    /// Package names that must not be installed on the host
    pub conflicts: Vec<String>,
    /// Detached-signature key id; none means unsigned
    pub sign_key: Option<String>,
    pub toolchain: ToolchainHints,
}

impl PipelineConfig {
    pub fn new(start_directory: PathBuf, workdir: PathBuf, output_directory: PathBuf) -> Self {
        Self {
            start_directory,
            workdir,
            output_directory,
            conflicts: Vec::new(),
            sign_key: None,
            toolchain: ToolchainHints::default(),
        }
    }
}

/// What a completed pipeline produced
#[derive(Debug)]
pub struct PipelineOutcome {
    pub artifact_path: PathBuf,
    /// True when the source tree came out of the build cache
    pub from_cache: bool,
}

/// One pipeline run over one parsed recipe and its body text
pub struct BuildPipeline<'a> {
    recipe: &'a Recipe,
    recipe_body: &'a str,
    config: PipelineConfig,
    cache: &'a BuildCache,
    catalog: Option<&'a dyn InstalledCatalog>,
    composer: ArchiveComposer,
    state: PipelineState,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(
        recipe: &'a Recipe,
        recipe_body: &'a str,
        config: PipelineConfig,
        cache: &'a BuildCache,
        catalog: Option<&'a dyn InstalledCatalog>,
    ) -> Self {
        Self {
            recipe,
            recipe_body,
            config,
            cache,
            catalog,
            composer: ArchiveComposer::default(),
            state: PipelineState::Init,
        }
    }

    pub fn with_composer(mut self, composer: ArchiveComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run the pipeline to completion.
    pub fn run(&mut self) -> Result<PipelineOutcome> {
        info!(
            "building {}-{}-{}",
            self.recipe.name, self.recipe.version, self.recipe.release
        );

        // 1 + 2: probes against the installed catalog
        self.probe_dependencies()?;
        self.probe_conflicts()?;
        self.enter(PipelineState::Probed);

        // 3: directory provisioning, idempotent
        let source_dir = self.config.workdir.join("source");
        let package_dir = self.config.workdir.join("package");
        fs::create_dir_all(self.config.workdir.join("build"))?;
        fs::create_dir_all(&source_dir)?;
        fs::create_dir_all(&package_dir)?;
        fs::create_dir_all(&self.config.output_directory)?;
        self.enter(PipelineState::Provisioned);

        let env = BuildEnv {
            source_directory: source_dir.clone(),
            package_directory: package_dir.clone(),
            start_directory: self.config.start_directory.clone(),
            name: self.recipe.name.clone(),
            version: self.recipe.version.clone(),
            release: self.recipe.release.clone(),
            toolchain: self.config.toolchain.clone(),
        };
        let runner = HookRunner::new(self.recipe_body, &env);

        // 4: cache lookup; a hit repopulates the source tree and jumps
        // straight to the package stage
        let key = cache_key(self.recipe_body, &self.recipe.sources);
        let from_cache = match self.cache.lookup(&key)? {
            Some(archive) => {
                self.cache.extract(&archive, &source_dir)?;
                self.enter(PipelineState::CacheHit);
                true
            }
            None => {
                // 5: fetch and verify
                self.fetch_sources(&source_dir)?;
                self.enter(PipelineState::Fetched);

                // 6: build stages
                self.run_build_stages(&runner, &key, &source_dir)?;
                self.enter(PipelineState::Built);
                false
            }
        };

        // 7: package stage
        let result = runner.run(Hook::Package)?;
        if !result.success {
            return Err(Error::PackageFailed(result.exit_code));
        }
        self.enter(PipelineState::Packaged);

        // 8: archive composition and verification
        let artifact_name = self
            .recipe
            .artifact_name(self.composer.compression.suffix());
        let artifact_path = self.config.output_directory.join(artifact_name);

        self.composer
            .compose(self.recipe, &package_dir, &artifact_path)?;
        if !self.composer.verify(&artifact_path)? {
            return Err(Error::ArchiveVerificationFailed(format!(
                "{} is missing its metadata members",
                artifact_path.display()
            )));
        }
        self.composer
            .sign(&artifact_path, self.config.sign_key.as_deref())?;
        self.enter(PipelineState::Archived);

        self.enter(PipelineState::Done);
        info!("built {}", artifact_path.display());

        Ok(PipelineOutcome {
            artifact_path,
            from_cache,
        })
    }

    /// Best-effort dependency probe: never mutates the host, collects all
    /// unsatisfied entries, fails on the first by name.
    fn probe_dependencies(&self) -> Result<()> {
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => {
                debug!("no installed-package catalog, dependency probe skipped");
                return Ok(());
            }
        };

        if self.recipe.runtime_dependencies.is_empty() {
            return Ok(());
        }

        let installed = catalog.installed();
        let mut missing = Vec::new();

        for dep in &self.recipe.runtime_dependencies {
            let found = installed.iter().find(|p| p.name == dep.name);
            match found {
                Some(pkg) if satisfies(&pkg.version, dep.relation, dep.version.as_deref()) => {
                    debug!("dependency {} satisfied by {}", dep, pkg.version);
                }
                Some(pkg) => {
                    warn!(
                        "dependency {} unsatisfied: installed version is {}",
                        dep, pkg.version
                    );
                    missing.push(dep.name.clone());
                }
                None => {
                    warn!("dependency {} not installed", dep);
                    missing.push(dep.name.clone());
                }
            }
        }

        match missing.into_iter().next() {
            Some(name) => Err(Error::MissingDependency(name)),
            None => Ok(()),
        }
    }

    fn probe_conflicts(&self) -> Result<()> {
        if self.config.conflicts.is_empty() {
            return Ok(());
        }
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => return Ok(()),
        };

        let installed = catalog.installed();
        for conflict in &self.config.conflicts {
            if installed.iter().any(|p| &p.name == conflict) {
                return Err(Error::ConflictDetected(conflict.clone()));
            }
        }
        Ok(())
    }

    /// Stage local sources from the start directory, then fetch and
    /// verify everything.
    fn fetch_sources(&self, source_dir: &Path) -> Result<()> {
        for source in &self.recipe.sources {
            if fetch::is_url(source) {
                continue;
            }
            let staged = source_dir.join(fetch::basename(source));
            let local = self.config.start_directory.join(source);
            if !staged.exists() && local.is_file() {
                fs::copy(&local, &staged)?;
                debug!("staged local source {}", source);
            }
        }

        let records = fetch::fetch_all(&self.recipe.sources, &self.recipe.checksums, source_dir)?;

        for record in records {
            match record.outcome {
                FetchOutcome::Success => {}
                FetchOutcome::DownloadFailed(reason) => {
                    return Err(Error::DownloadFailed {
                        src: record.requested,
                        reason,
                    });
                }
                FetchOutcome::ChecksumMismatch { .. } => {
                    return Err(Error::ChecksumMismatch(record.requested));
                }
            }
        }
        Ok(())
    }

    /// prepare and build are fatal; check is logged and swallowed. A
    /// successful build stores the source tree in the cache.
    fn run_build_stages(&self, runner: &HookRunner, key: &str, source_dir: &Path) -> Result<()> {
        let prepare = runner.run(Hook::Prepare)?;
        if !prepare.success {
            return Err(Error::PrepareFailed(prepare.exit_code));
        }

        let build = runner.run(Hook::Build)?;
        if !build.success {
            return Err(Error::BuildFailed(build.exit_code));
        }

        let check = runner.run(Hook::Check)?;
        if !check.success {
            warn!(
                "check hook failed with exit code {}, continuing",
                check.exit_code
            );
        }

        // A cache store failure costs a rebuild later, not this build
        if let Err(e) = self.cache.store(key, source_dir) {
            warn!("failed to store build in cache: {}", e);
        }

        Ok(())
    }
}
