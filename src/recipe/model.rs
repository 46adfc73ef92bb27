// src/recipe/model.rs

//! In-memory recipe model and validation

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::hash::{is_valid_digest, HashAlgorithm};
use crate::version::Relation;

/// Checksum sentinel that disables verification for one source
pub const SKIP_CHECKSUM: &str = "SKIP";

/// The four staged hooks a recipe may define
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    Prepare,
    Build,
    Check,
    Package,
}

impl Hook {
    /// All hooks in pipeline execution order
    pub const ALL: [Hook; 4] = [Hook::Prepare, Hook::Build, Hook::Check, Hook::Package];

    /// Shell function name of this hook inside a recipe
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::Check => "check",
            Self::Package => "package",
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "prepare" => Some(Self::Prepare),
            "build" => Some(Self::Build),
            "check" => Some(Self::Check),
            "package" => Some(Self::Package),
            _ => None,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function_name())
    }
}

/// A dependency name with an optional version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepSpec {
    pub name: String,
    pub relation: Relation,
    pub version: Option<String>,
}

impl DepSpec {
    /// Parse a constrained name like `compiler>=4.7`.
    ///
    /// The relation is the longest matching operator: `>=` and `<=` are
    /// tried before their single-character prefixes, then `=`. No operator
    /// means any version satisfies the dependency.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidRecipeFormat("empty dependency".to_string()));
        }

        for (op, relation) in [
            (">=", Relation::Ge),
            ("<=", Relation::Le),
            (">", Relation::Gt),
            ("<", Relation::Lt),
            ("=", Relation::Eq),
        ] {
            if let Some(pos) = s.find(op) {
                let name = s[..pos].trim();
                let version = s[pos + op.len()..].trim();
                if name.is_empty() || version.is_empty() {
                    return Err(Error::InvalidRecipeFormat(format!(
                        "malformed dependency '{}'",
                        s
                    )));
                }
                return Ok(Self {
                    name: name.to_string(),
                    relation,
                    version: Some(version.to_string()),
                });
            }
        }

        Ok(Self {
            name: s.to_string(),
            relation: Relation::None,
            version: None,
        })
    }
}

impl fmt::Display for DepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}{}{}", self.name, self.relation.operator(), v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A parsed package recipe, immutable once validated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    pub release: String,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Ordered; the first entry is the default build architecture
    pub architectures: Vec<String>,
    pub licenses: Vec<String>,
    pub runtime_dependencies: Vec<DepSpec>,
    pub build_dependencies: Vec<DepSpec>,
    /// URLs or bare local filenames, in declaration order
    pub sources: Vec<String>,
    /// Aligned 1:1 with `sources`, or empty to skip all verification
    pub checksums: Vec<String>,
    pub hooks: BTreeMap<Hook, String>,
}

impl Recipe {
    /// Validate the model invariants.
    ///
    /// Rejects an absent or empty `name`, `version`, `release`, or
    /// `architectures`; a checksum list whose length matches neither zero
    /// nor the source count; and any non-`SKIP` checksum that is not a
    /// 64-character lowercase hex digest.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::MissingRequiredField("name"));
        }
        if self.version.is_empty() {
            return Err(Error::MissingRequiredField("version"));
        }
        if self.release.is_empty() {
            return Err(Error::MissingRequiredField("release"));
        }
        if self.architectures.is_empty() {
            return Err(Error::MissingRequiredField("architectures"));
        }

        if !self.checksums.is_empty() && self.checksums.len() != self.sources.len() {
            return Err(Error::InvalidRecipeFormat(format!(
                "{} checksums for {} sources",
                self.checksums.len(),
                self.sources.len()
            )));
        }

        for checksum in &self.checksums {
            if checksum == SKIP_CHECKSUM {
                continue;
            }
            if !is_valid_digest(HashAlgorithm::Sha256, checksum) {
                return Err(Error::InvalidRecipeFormat(format!(
                    "malformed checksum '{}'",
                    checksum
                )));
            }
        }

        Ok(())
    }

    /// The architecture baked into the artifact name: the first declared
    /// architecture, or `any` when none is declared.
    pub fn default_architecture(&self) -> &str {
        self.architectures
            .first()
            .map(String::as_str)
            .unwrap_or("any")
    }

    /// Artifact file name, e.g. `hello-1.0.0-1-x86_64.pkg.tar.zst`
    pub fn artifact_name(&self, compressor_suffix: &str) -> String {
        format!(
            "{}-{}-{}-{}.pkg.tar.{}",
            self.name,
            self.version,
            self.release,
            self.default_architecture(),
            compressor_suffix
        )
    }

    /// Hook body, if the recipe defines one
    pub fn hook(&self, hook: Hook) -> Option<&str> {
        self.hooks.get(&hook).map(String::as_str)
    }
}
