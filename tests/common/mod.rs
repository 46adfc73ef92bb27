// tests/common/mod.rs

//! Shared fixtures for integration tests.

use pkgforge::{BuildCache, BuildPipeline, CacheConfig, PipelineConfig, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The hello.c used by the build scenarios.
pub const HELLO_C: &str = "#include <stdio.h>\n\nint main(void) {\n    printf(\"hello\\n\");\n    return 0;\n}\n";

/// The classic hello recipe, compiling with a real C compiler.
pub fn hello_recipe_gcc() -> String {
    r#"name=hello
version=1.0.0
release=1
architectures=(x86_64)
sources=(hello.c)
checksums=(SKIP)

build() {
    gcc -o hello hello.c
}

package() {
    install -Dm755 "$source_directory/hello" "$package_directory/usr/bin/hello"
}
"#
    .to_string()
}

/// The same scenario with tool-independent hooks, for hosts without a
/// compiler toolchain.
pub fn hello_recipe_portable() -> String {
    r#"name=hello
version=1.0.0
release=1
architectures=(x86_64)
sources=(hello.c)
checksums=(SKIP)

build() {
    cp hello.c hello
    chmod 755 hello
}

package() {
    mkdir -p "$package_directory/usr/bin"
    cp "$source_directory/hello" "$package_directory/usr/bin/hello"
}
"#
    .to_string()
}

/// A project directory holding the recipe's local source.
pub fn stage_project(root: &Path) -> PathBuf {
    let start = root.join("project");
    fs::create_dir_all(&start).unwrap();
    fs::write(start.join("hello.c"), HELLO_C).unwrap();
    start
}

pub fn open_cache(dir: &Path) -> BuildCache {
    BuildCache::new(CacheConfig {
        cache_dir: dir.to_path_buf(),
        max_size: u64::MAX,
        ..CacheConfig::default()
    })
    .unwrap()
}

/// Run one pipeline over a recipe body, with its own workdir and output
/// directory under `root`.
pub fn run_pipeline(
    body: &str,
    start: &Path,
    root: &Path,
    run_name: &str,
    cache: &BuildCache,
) -> Result<pkgforge::PipelineOutcome> {
    let recipe = pkgforge::parse_shell_recipe(body)?;
    let config = PipelineConfig::new(
        start.to_path_buf(),
        root.join(run_name).join("work"),
        root.join(run_name).join("out"),
    );
    let mut pipeline = BuildPipeline::new(&recipe, body, config, cache, None);
    pipeline.run()
}

/// Member names of a compressed tar archive.
pub fn archive_members(path: &Path) -> Vec<String> {
    let mut archive = pkgforge::compression::open_tar(path).unwrap();
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            entry
                .unwrap()
                .path()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// Is a C compiler available on this host?
pub fn have_gcc() -> bool {
    std::process::Command::new("gcc")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A scratch directory for one test.
pub fn scratch() -> TempDir {
    TempDir::new().unwrap()
}
