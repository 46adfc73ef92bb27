// src/recipe/mod.rs

//! Recipe system: how a package is described
//!
//! A recipe names a package, its sources and checksums, its dependency
//! lists, and up to four staged hooks (`prepare`, `build`, `check`,
//! `package`). Two front-ends produce the same in-memory model:
//!
//! - the **shell recipe**: makepkg-style assignments and function bodies;
//! - the **declarative recipe**: bracketed sections with `key = value`
//!   lines, which can also be lowered to shell-recipe text so that hook
//!   execution has a single uniform path.

pub mod decl;
pub mod model;
pub mod shell;

pub use decl::{lower_to_shell, parse_decl_recipe};
pub use model::{DepSpec, Hook, Recipe};
pub use shell::{extract_hook, parse_shell_recipe};
