// src/lib.rs

//! pkgforge: a package-building engine
//!
//! Takes a declarative package recipe and a working directory, fetches
//! and verifies sources, executes the staged recipe (prepare / build /
//! check / package) in a controlled variable environment, and emits a
//! compressed, metadata-bearing package artifact.
//!
//! # Architecture
//!
//! - Dual recipe surface: shell-style and declarative, with lowering so
//!   hook execution has one uniform path
//! - Parallel source fetching with per-source SHA-256 verification
//! - Content-addressable build cache with LRU eviction, keyed over the
//!   recipe body and sorted source list
//! - Archive composer producing `package-info` and `manifest` sidecars
//!   inside a compressed tar artifact
//! - Bounded-parallel fan-out of the pipeline over multiple targets

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod compression;
mod error;
pub mod exec;
pub mod fanout;
pub mod fetch;
pub mod hash;
pub mod pipeline;
pub mod recipe;
pub mod version;

pub use archive::ArchiveComposer;
pub use cache::{cache_key, BuildCache, CacheConfig};
pub use catalog::{InstalledCatalog, PacmanCatalog, StaticCatalog};
pub use error::{Error, Result};
pub use exec::{BuildEnv, HookRunner, ToolchainHints};
pub use fanout::{FanOut, FanOutReport, TargetSpec};
pub use fetch::{fetch_all, FetchOutcome, FetchRecord};
pub use pipeline::{BuildPipeline, PipelineConfig, PipelineOutcome, PipelineState};
pub use recipe::{lower_to_shell, parse_decl_recipe, parse_shell_recipe, DepSpec, Hook, Recipe};
