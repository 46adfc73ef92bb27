// src/fanout/mod.rs

//! Bounded-parallel pipeline fan-out over a set of build targets
//!
//! One pipeline per target, at most `max_parallel` at a time, drained in
//! input order. A failing or panicking worker becomes a failure record;
//! siblings always run to completion. The report aggregates outcome
//! counts, build times, and artifact sizes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cache::BuildCache;
use crate::catalog::{InstalledCatalog, StaticCatalog};
use crate::error::{Error, Result};
use crate::exec::ToolchainHints;
use crate::pipeline::{BuildPipeline, PipelineConfig};
use crate::recipe::model::Recipe;

/// One build target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Names the output subdirectory and the report row
    pub label: String,
    /// Target triple exported to hooks
    pub triple: String,
    /// Optimization level, e.g. `O2`
    pub optimization: String,
    pub features: Vec<String>,
}

impl FromStr for TargetSpec {
    type Err = Error;

    /// Parse `label:triple[:optimization[:feature,feature]]`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let label = parts.next().unwrap_or_default();
        let triple = parts.next().unwrap_or_default();
        if label.is_empty() || triple.is_empty() {
            return Err(Error::InvalidRecipeFormat(format!(
                "malformed target spec '{}', expected label:triple[:opt[:features]]",
                s
            )));
        }
        let optimization = parts.next().unwrap_or("O2").to_string();
        let features = parts
            .next()
            .map(|f| f.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            label: label.to_string(),
            triple: triple.to_string(),
            optimization,
            features,
        })
    }
}

/// Outcome of one target's pipeline
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub label: String,
    pub triple: String,
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    /// Error kind and detail on failure
    pub reason: Option<String>,
    pub build_millis: u64,
    pub artifact_bytes: u64,
}

/// Aggregate result of a fan-out
#[derive(Debug)]
pub struct FanOutReport {
    /// Per-target records, in input order
    pub targets: Vec<TargetReport>,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.targets.iter().filter(|t| t.success).count()
    }

    pub fn failed(&self) -> usize {
        self.targets.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn total_build_millis(&self) -> u64 {
        self.targets.iter().map(|t| t.build_millis).sum()
    }

    pub fn mean_build_millis(&self) -> u64 {
        if self.targets.is_empty() {
            0
        } else {
            self.total_build_millis() / self.targets.len() as u64
        }
    }

    pub fn total_artifact_bytes(&self) -> u64 {
        self.targets.iter().map(|t| t.artifact_bytes).sum()
    }
}

/// Runs the pipeline once per target with bounded concurrency
pub struct FanOut {
    pub max_parallel: usize,
    /// Conflict list forwarded to every pipeline
    pub conflicts: Vec<String>,
    pub sign_key: Option<String>,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            conflicts: Vec::new(),
            sign_key: None,
        }
    }
}

impl FanOut {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            ..Default::default()
        }
    }

    /// Build every target. Each target gets its own workdir and output
    /// subdirectory (named by label) under `output_root`. The installed
    /// catalog is snapshotted once and shared across siblings.
    pub fn run(
        &self,
        recipe: &Recipe,
        recipe_body: &str,
        start_directory: &Path,
        output_root: &Path,
        cache: &BuildCache,
        catalog: Option<&dyn InstalledCatalog>,
        targets: &[TargetSpec],
    ) -> Result<FanOutReport> {
        info!(
            "fan-out: {} target(s), at most {} in parallel",
            targets.len(),
            self.max_parallel
        );

        let snapshot = catalog.map(StaticCatalog::snapshot);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_parallel)
            .build()
            .map_err(|e| std::io::Error::other(format!("worker pool: {e}")))?;

        let reports: Vec<TargetReport> = pool.install(|| {
            targets
                .par_iter()
                .map(|target| {
                    self.run_one(
                        recipe,
                        recipe_body,
                        start_directory,
                        output_root,
                        cache,
                        snapshot.as_ref(),
                        target,
                    )
                })
                .collect()
        });

        let report = FanOutReport { targets: reports };
        info!(
            "fan-out finished: {} ok, {} failed, {} ms total, {} bytes of artifacts",
            report.succeeded(),
            report.failed(),
            report.total_build_millis(),
            report.total_artifact_bytes()
        );
        Ok(report)
    }

    fn run_one(
        &self,
        recipe: &Recipe,
        recipe_body: &str,
        start_directory: &Path,
        output_root: &Path,
        cache: &BuildCache,
        catalog: Option<&StaticCatalog>,
        target: &TargetSpec,
    ) -> TargetReport {
        let started = Instant::now();
        let target_dir = output_root.join(&target.label);

        let mut config = PipelineConfig::new(
            start_directory.to_path_buf(),
            target_dir.join("work"),
            target_dir.clone(),
        );
        config.conflicts = self.conflicts.clone();
        config.sign_key = self.sign_key.clone();
        config.toolchain =
            ToolchainHints::for_target(&target.triple, &target.optimization, &target.features);

        // A panicking worker must degrade to a failure record, never
        // take the coordinator down
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut pipeline = BuildPipeline::new(
                recipe,
                recipe_body,
                config,
                cache,
                catalog.map(|c| c as &dyn InstalledCatalog),
            );
            pipeline.run()
        }));

        let build_millis = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(done)) => {
                let artifact_bytes = std::fs::metadata(&done.artifact_path)
                    .map(|m| m.len())
                    .unwrap_or(0);
                info!(
                    "target {} built in {} ms ({} bytes)",
                    target.label, build_millis, artifact_bytes
                );
                TargetReport {
                    label: target.label.clone(),
                    triple: target.triple.clone(),
                    success: true,
                    artifact_path: Some(done.artifact_path),
                    reason: None,
                    build_millis,
                    artifact_bytes,
                }
            }
            Ok(Err(e)) => {
                warn!("target {} failed: {}", target.label, e);
                TargetReport {
                    label: target.label.clone(),
                    triple: target.triple.clone(),
                    success: false,
                    artifact_path: None,
                    reason: Some(format!("{}: {}", e.kind_id(), e)),
                    build_millis,
                    artifact_bytes: 0,
                }
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string());
                warn!("target {} worker panicked: {}", target.label, detail);
                TargetReport {
                    label: target.label.clone(),
                    triple: target.triple.clone(),
                    success: false,
                    artifact_path: None,
                    reason: Some(format!("worker panic: {detail}")),
                    build_millis,
                    artifact_bytes: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BuildCache, CacheConfig};
    use crate::compression::CompressionFormat;
    use crate::recipe::parse_shell_recipe;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_target_spec_parse() {
        let t: TargetSpec = "native:x86_64-linux-gnu".parse().unwrap();
        assert_eq!(t.label, "native");
        assert_eq!(t.triple, "x86_64-linux-gnu");
        assert_eq!(t.optimization, "O2");
        assert!(t.features.is_empty());

        let t: TargetSpec = "arm:aarch64-linux-gnu:O3:neon,lto".parse().unwrap();
        assert_eq!(t.optimization, "O3");
        assert_eq!(t.features, vec!["neon", "lto"]);

        assert!("justalabel".parse::<TargetSpec>().is_err());
        assert!(":missing-label".parse::<TargetSpec>().is_err());
    }

    #[test]
    fn test_report_aggregates() {
        let report = FanOutReport {
            targets: vec![
                TargetReport {
                    label: "a".into(),
                    triple: "t".into(),
                    success: true,
                    artifact_path: None,
                    reason: None,
                    build_millis: 100,
                    artifact_bytes: 10,
                },
                TargetReport {
                    label: "b".into(),
                    triple: "t".into(),
                    success: false,
                    artifact_path: None,
                    reason: Some("build-failed: x".into()),
                    build_millis: 300,
                    artifact_bytes: 0,
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.total_build_millis(), 400);
        assert_eq!(report.mean_build_millis(), 200);
        assert_eq!(report.total_artifact_bytes(), 10);
    }

    const BODY: &str = r#"
name=multi
version=1.0
release=1
architectures=(x86_64)
sources=(payload.txt)
checksums=(SKIP)

build() {
    if [ "$target_triple" = "broken-triple" ]; then
        echo "this target is known broken" >&2
        exit 1
    fi
    # Long enough that a failing sibling always misses the shared cache
    sleep 1
    cp payload.txt built.txt
}

package() {
    mkdir -p "$package_directory/usr/share/multi"
    cp "$source_directory/built.txt" "$package_directory/usr/share/multi/built.txt"
}
"#;

    #[test]
    fn test_fanout_partial_failure() {
        let temp = TempDir::new().unwrap();
        let start = temp.path().join("start");
        fs::create_dir_all(&start).unwrap();
        fs::write(start.join("payload.txt"), b"payload").unwrap();

        let cache = BuildCache::new(CacheConfig {
            cache_dir: temp.path().join("cache"),
            max_size: u64::MAX,
            compression: CompressionFormat::Zstd,
        })
        .unwrap();

        let recipe = parse_shell_recipe(BODY).unwrap();
        let targets: Vec<TargetSpec> = [
            "first:x86_64-linux-gnu",
            "second:broken-triple",
            "third:aarch64-linux-gnu",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let fanout = FanOut::new(2);
        let report = fanout
            .run(
                &recipe,
                BODY,
                &start,
                &temp.path().join("out"),
                &cache,
                None,
                &targets,
            )
            .unwrap();

        assert_eq!(report.targets.len(), 3);
        // Records come back in input order regardless of completion order
        assert_eq!(report.targets[0].label, "first");
        assert_eq!(report.targets[1].label, "second");
        assert_eq!(report.targets[2].label, "third");

        assert!(report.targets[0].success);
        assert!(!report.targets[1].success);
        assert!(report.targets[2].success);
        assert!(!report.all_succeeded());

        let reason = report.targets[1].reason.as_deref().unwrap();
        assert!(reason.contains("build-failed"), "reason was: {reason}");

        // Successful targets produced artifacts in their own directories
        let first = report.targets[0].artifact_path.as_ref().unwrap();
        assert!(first.starts_with(temp.path().join("out/first")));
        assert!(first.is_file());
        assert!(report.targets[0].artifact_bytes > 0);
        assert!(report.targets[1].artifact_path.is_none());
    }

    #[test]
    fn test_fanout_single_worker_still_drains_all() {
        let temp = TempDir::new().unwrap();
        let start = temp.path().join("start");
        fs::create_dir_all(&start).unwrap();
        fs::write(start.join("payload.txt"), b"p").unwrap();

        let cache = BuildCache::new(CacheConfig {
            cache_dir: temp.path().join("cache"),
            max_size: u64::MAX,
            compression: CompressionFormat::Zstd,
        })
        .unwrap();

        let recipe = parse_shell_recipe(BODY).unwrap();
        let targets: Vec<TargetSpec> = ["a:t1", "b:t2", "c:t3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        let report = FanOut::new(1)
            .run(
                &recipe,
                BODY,
                &start,
                &temp.path().join("out"),
                &cache,
                None,
                &targets,
            )
            .unwrap();
        assert_eq!(report.succeeded(), 3);
    }
}
