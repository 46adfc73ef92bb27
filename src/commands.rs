// src/commands.rs
//! Command handlers for the pkgforge CLI

use anyhow::{bail, Context, Result};
use pkgforge::{
    ArchiveComposer, BuildCache, BuildPipeline, CacheConfig, FanOut, InstalledCatalog,
    PacmanCatalog, PipelineConfig, Recipe, TargetSpec,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Shared cache/workspace knobs for the build-flavored commands
pub struct BuildOptions {
    pub workdir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub cache_size: u64,
    pub sign_key: Option<String>,
    pub conflicts: Vec<String>,
    /// Skip the installed-catalog probes entirely
    pub no_probe: bool,
}

/// Load a recipe from disk, picking the front-end by content.
///
/// Declarative recipes are lowered to shell text first so hook execution
/// and cache keying see one uniform body.
pub fn load_recipe(path: &Path) -> Result<(Recipe, String)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read recipe {}", path.display()))?;

    let body = if is_declarative(&content) {
        pkgforge::lower_to_shell(&content)?
    } else {
        content
    };

    let recipe = pkgforge::parse_shell_recipe(&body)?;
    Ok((recipe, body))
}

/// A recipe whose first meaningful line is a section header is
/// declarative; everything else goes through the shell front-end.
fn is_declarative(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .is_some_and(|line| line.starts_with('[') && line.ends_with(']'))
}

fn start_directory(recipe_path: &Path) -> PathBuf {
    recipe_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn open_cache(options: &BuildOptions, start: &Path) -> Result<BuildCache> {
    let cache_dir = options
        .cache_dir
        .clone()
        .unwrap_or_else(|| start.join(".pkgforge-cache"));
    let cache = BuildCache::new(CacheConfig {
        cache_dir,
        max_size: options.cache_size,
        ..CacheConfig::default()
    })?;
    Ok(cache)
}

fn catalog(options: &BuildOptions) -> Option<Box<dyn InstalledCatalog>> {
    if options.no_probe {
        None
    } else {
        Some(Box::new(PacmanCatalog))
    }
}

/// `build`: run the full pipeline on one recipe.
pub fn cmd_build(recipe_path: &Path, options: &BuildOptions) -> Result<()> {
    let (recipe, body) = load_recipe(recipe_path)?;
    let start = start_directory(recipe_path);
    let cache = open_cache(options, &start)?;
    let catalog = catalog(options);

    let workdir = options.workdir.clone().unwrap_or_else(|| start.join("work"));
    let output = options.output.clone().unwrap_or_else(|| start.clone());

    let mut config = PipelineConfig::new(start, workdir, output);
    config.conflicts = options.conflicts.clone();
    config.sign_key = options.sign_key.clone();

    let mut pipeline =
        BuildPipeline::new(&recipe, &body, config, &cache, catalog.as_deref());
    let outcome = pipeline.run()?;

    println!("{}", outcome.artifact_path.display());
    Ok(())
}

/// `package`: compose an artifact from an already-staged package
/// directory, skipping the hooks.
pub fn cmd_package(recipe_path: &Path, package_dir: &Path, options: &BuildOptions) -> Result<()> {
    let (recipe, _) = load_recipe(recipe_path)?;
    if !package_dir.is_dir() {
        bail!("package directory {} does not exist", package_dir.display());
    }

    let start = start_directory(recipe_path);
    let output = options.output.clone().unwrap_or_else(|| start.clone());
    fs::create_dir_all(&output)?;

    let composer = ArchiveComposer::default();
    let artifact = output.join(recipe.artifact_name(composer.compression.suffix()));

    composer.compose(&recipe, package_dir, &artifact)?;
    if !composer.verify(&artifact)? {
        bail!("composed archive failed verification");
    }
    composer.sign(&artifact, options.sign_key.as_deref())?;

    println!("{}", artifact.display());
    Ok(())
}

/// `clean`: drop the workdir, and the build cache when asked.
pub fn cmd_clean(recipe_path: &Path, options: &BuildOptions, clean_cache: bool) -> Result<()> {
    let start = start_directory(recipe_path);
    let workdir = options.workdir.clone().unwrap_or_else(|| start.join("work"));

    if workdir.is_dir() {
        fs::remove_dir_all(&workdir)
            .with_context(|| format!("failed to remove {}", workdir.display()))?;
        info!("removed {}", workdir.display());
    }

    if clean_cache {
        let cache = open_cache(options, &start)?;
        let removed = cache.clear()?;
        info!("cleared {} cached build(s)", removed);
    }

    Ok(())
}

/// `targets`: fan the pipeline out over a set of target specs.
pub fn cmd_targets(
    recipe_path: &Path,
    target_specs: &[String],
    max_parallel: usize,
    options: &BuildOptions,
) -> Result<()> {
    if target_specs.is_empty() {
        bail!("no targets given; pass at least one --target label:triple");
    }

    let targets: Vec<TargetSpec> = target_specs
        .iter()
        .map(|s| s.parse::<TargetSpec>().map_err(anyhow::Error::from))
        .collect::<Result<_>>()?;

    let (recipe, body) = load_recipe(recipe_path)?;
    let start = start_directory(recipe_path);
    let cache = open_cache(options, &start)?;
    let catalog = catalog(options);
    let output_root = options.output.clone().unwrap_or_else(|| start.join("targets"));

    let mut fanout = FanOut::new(max_parallel);
    fanout.conflicts = options.conflicts.clone();
    fanout.sign_key = options.sign_key.clone();

    let report = fanout.run(
        &recipe,
        &body,
        &start,
        &output_root,
        &cache,
        catalog.as_deref(),
        &targets,
    )?;

    for target in &report.targets {
        match (&target.artifact_path, &target.reason) {
            (Some(path), _) => println!(
                "ok   {:12} {:>8} ms  {}",
                target.label,
                target.build_millis,
                path.display()
            ),
            (None, Some(reason)) => {
                println!("FAIL {:12} {:>8} ms  {}", target.label, target.build_millis, reason)
            }
            (None, None) => println!("FAIL {:12}", target.label),
        }
    }
    println!(
        "{} ok, {} failed, {} ms mean, {} bytes total",
        report.succeeded(),
        report.failed(),
        report.mean_build_millis(),
        report.total_artifact_bytes()
    );

    if !report.all_succeeded() {
        bail!("{} target(s) failed", report.failed());
    }
    Ok(())
}
