// src/recipe/decl.rs

//! Declarative-recipe front-end and lowering
//!
//! The declarative surface is a bracketed-section, `key = value` format
//! that is deliberately more lenient than TOML: list values accept both
//! `[a, b, c]` and bare comma-separated forms, and elements need no
//! quoting. It parses into the same recipe model as the shell surface and
//! can be lowered to shell-recipe text so hook execution and cache keying
//! work identically for both.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::recipe::model::{DepSpec, Hook, Recipe};

/// Build flavors the lowering knows conventional hooks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildFlavor {
    /// The engine's own toolchain: cargo
    Rust,
    C,
    Cpp,
}

impl BuildFlavor {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rust" | "cargo" => Some(Self::Rust),
            "c" => Some(Self::C),
            "cpp" | "c++" => Some(Self::Cpp),
            _ => None,
        }
    }

    /// Conventional (build, package) hook bodies for this flavor.
    ///
    /// Paths go through the exported variables so the bodies are valid in
    /// any working directory.
    fn default_hooks(&self) -> (String, String) {
        let package = concat!(
            "install -Dm755 \"$source_directory/$name\" ",
            "\"$package_directory/usr/bin/$name\""
        )
        .to_string();

        match self {
            Self::Rust => (
                "cargo build --release --locked\ncp \"target/release/$name\" \"$name\""
                    .to_string(),
                package,
            ),
            Self::C => ("gcc $CFLAGS -o \"$name\" *.c".to_string(), package),
            Self::Cpp => ("g++ $CXXFLAGS -o \"$name\" *.cpp".to_string(), package),
        }
    }
}

/// Parsed declarative document, before conversion or lowering
#[derive(Debug, Default)]
struct DeclDocument {
    name: String,
    version: String,
    release: String,
    description: Option<String>,
    url: Option<String>,
    architectures: Vec<String>,
    licenses: Vec<String>,
    runtime: Vec<String>,
    build: Vec<String>,
    sources: Vec<String>,
    checksums: Vec<String>,
    hooks: BTreeMap<Hook, String>,
    build_type: Option<String>,
}

impl DeclDocument {
    fn parse(content: &str) -> Result<Self> {
        let mut doc = DeclDocument::default();
        let mut section = String::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_lowercase();
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), strip_quotes(v.trim()).to_string()),
                None => continue,
            };

            match (section.as_str(), key) {
                ("package", "name") => doc.name = value,
                ("package", "version") => doc.version = value,
                ("package", "release") => doc.release = value,
                ("package", "description") => doc.description = Some(value),
                ("package", "url") => doc.url = Some(value),
                ("package", "license") => doc.licenses = split_list(&value),
                ("package", "arch") => doc.architectures = split_list(&value),
                ("build", "sources") => doc.sources = split_list(&value),
                ("build", "checksums") => doc.checksums = split_list(&value),
                ("build", "type") => doc.build_type = Some(value),
                ("build", "prepare_script") => {
                    doc.hooks.insert(Hook::Prepare, value);
                }
                ("build", "build_script") => {
                    doc.hooks.insert(Hook::Build, value);
                }
                ("build", "check_script") => {
                    doc.hooks.insert(Hook::Check, value);
                }
                ("build", "package_script") => {
                    doc.hooks.insert(Hook::Package, value);
                }
                ("dependencies", "runtime") => doc.runtime = split_list(&value),
                ("dependencies", "build") => doc.build = split_list(&value),
                _ => {}
            }
        }

        if doc.release.is_empty() {
            doc.release = "1".to_string();
        }

        // A recognized build flavor supplies conventional hooks where the
        // recipe gives none.
        if let Some(flavor) = doc.build_type.as_deref().and_then(BuildFlavor::parse) {
            let (build, package) = flavor.default_hooks();
            doc.hooks.entry(Hook::Build).or_insert(build);
            doc.hooks.entry(Hook::Package).or_insert(package);
        }

        Ok(doc)
    }

    fn to_recipe(&self) -> Result<Recipe> {
        let recipe = Recipe {
            name: self.name.clone(),
            version: self.version.clone(),
            release: self.release.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            architectures: self.architectures.clone(),
            licenses: self.licenses.clone(),
            runtime_dependencies: parse_deps(&self.runtime)?,
            build_dependencies: parse_deps(&self.build)?,
            sources: self.sources.clone(),
            checksums: self.checksums.clone(),
            hooks: self.hooks.clone(),
        };
        recipe.validate()?;
        Ok(recipe)
    }

    /// Emit shell-recipe text: scalars as `key=value`, lists as
    /// `key=('a' 'b')`, hooks as function blocks.
    fn to_shell_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "name={}", self.name);
        let _ = writeln!(out, "version={}", self.version);
        let _ = writeln!(out, "release={}", self.release);
        if let Some(desc) = &self.description {
            let _ = writeln!(out, "description='{}'", desc);
        }
        if let Some(url) = &self.url {
            let _ = writeln!(out, "url='{}'", url);
        }

        write_array(&mut out, "architectures", &self.architectures);
        write_array(&mut out, "licenses", &self.licenses);
        write_array(&mut out, "runtime_dependencies", &self.runtime);
        write_array(&mut out, "build_dependencies", &self.build);
        write_array(&mut out, "sources", &self.sources);
        write_array(&mut out, "checksums", &self.checksums);

        for hook in Hook::ALL {
            if let Some(body) = self.hooks.get(&hook) {
                let _ = writeln!(out, "\n{}() {{", hook.function_name());
                for line in body.lines() {
                    let _ = writeln!(out, "    {}", line);
                }
                let _ = writeln!(out, "}}");
            }
        }

        out
    }
}

fn write_array(out: &mut String, key: &str, items: &[String]) {
    let quoted: Vec<String> = items.iter().map(|item| format!("'{}'", item)).collect();
    let _ = writeln!(out, "{}=({})", key, quoted.join(" "));
}

fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split a list value: accepts `[a, b, c]` and bare `a, b, c` forms.
fn split_list(value: &str) -> Vec<String> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);

    inner
        .split(',')
        .map(|item| strip_quotes(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_deps(items: &[String]) -> Result<Vec<DepSpec>> {
    items.iter().map(|item| DepSpec::parse(item)).collect()
}

/// Parse a declarative recipe into the recipe model.
pub fn parse_decl_recipe(content: &str) -> Result<Recipe> {
    let doc = DeclDocument::parse(content)?;
    if doc.name.is_empty() && doc.version.is_empty() {
        return Err(Error::InvalidRecipeFormat(
            "no [package] section found".to_string(),
        ));
    }
    doc.to_recipe()
}

/// Lower a declarative recipe to shell-recipe text.
///
/// The result parses through the shell front-end into a field-wise equal
/// recipe, and is the body text used for hook execution and cache keying
/// when a declarative recipe is built.
pub fn lower_to_shell(content: &str) -> Result<String> {
    let doc = DeclDocument::parse(content)?;
    // Surface model errors (missing fields, bad checksums) at lowering time
    doc.to_recipe()?;
    Ok(doc.to_shell_text())
}
