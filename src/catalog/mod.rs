// src/catalog/mod.rs

//! Read-only queries against the installed-package catalog
//!
//! The dependency and conflict probes only ever need `{name, version}`
//! pairs. The catalog sits behind a trait so the pipeline can run against
//! the host installer, a pre-taken snapshot (fan-out siblings share one
//! query), or a fixture in tests. An unavailable catalog yields no
//! records; the probe's policy decides what that means.

use std::process::Command;
use tracing::{debug, warn};

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Read-only view of what is installed on the host
pub trait InstalledCatalog: Send + Sync {
    /// All installed `{name, version}` records. Unavailability is an
    /// empty list, never an error.
    fn installed(&self) -> Vec<InstalledPackage>;

    /// Version of one installed package, if present
    fn version_of(&self, name: &str) -> Option<String> {
        self.installed()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.version)
    }
}

/// Catalog backed by the host's `pacman` database
#[derive(Debug, Default)]
pub struct PacmanCatalog;

impl InstalledCatalog for PacmanCatalog {
    fn installed(&self) -> Vec<InstalledPackage> {
        let output = match Command::new("pacman").arg("-Q").output() {
            Ok(output) => output,
            Err(e) => {
                warn!("installed-package catalog unavailable: {}", e);
                return Vec::new();
            }
        };

        if !output.status.success() {
            warn!(
                "pacman -Q failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Vec::new();
        }

        let packages = parse_query_output(&String::from_utf8_lossy(&output.stdout));
        debug!("catalog query returned {} packages", packages.len());
        packages
    }
}

/// Fixed catalog contents: a snapshot of another catalog, or a fixture.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    packages: Vec<InstalledPackage>,
}

impl StaticCatalog {
    pub fn new(packages: Vec<InstalledPackage>) -> Self {
        Self { packages }
    }

    /// Take one snapshot of a live catalog, so repeated probes (fan-out
    /// siblings in particular) do not re-query the host.
    pub fn snapshot(catalog: &dyn InstalledCatalog) -> Self {
        Self {
            packages: catalog.installed(),
        }
    }
}

impl InstalledCatalog for StaticCatalog {
    fn installed(&self) -> Vec<InstalledPackage> {
        self.packages.clone()
    }
}

/// Parse `name version` lines as emitted by the query tool
fn parse_query_output(text: &str) -> Vec<InstalledPackage> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some(InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}
