// src/recipe/shell.rs

//! Shell-recipe front-end
//!
//! Line-oriented scan of makepkg-style recipes: scalar assignments,
//! parenthesized array assignments, and function-shaped hook bodies.
//! Unknown lines are ignored.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::recipe::model::{DepSpec, Hook, Recipe};

/// Matches a hook header line such as `build()` or `package () {`
fn hook_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\w+)\s*\(\)").expect("static regex"))
}

/// Strip one enclosing layer of single or double quotes, if balanced.
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

/// Split the inside of a parenthesized array into trimmed, unquoted items.
fn split_items(inner: &str) -> Vec<String> {
    inner
        .split_whitespace()
        .map(|item| strip_quotes(item).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Extract the body of a named hook from recipe text.
///
/// Locates a line beginning with `<name>()` and captures the following
/// lines. A brace-depth counter starts at zero and tracks every `{` and
/// `}` in the captured text; the body ends at the first line that drives
/// the depth negative (that line is excluded).
pub fn extract_hook(content: &str, hook: Hook) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let re = hook_header_re();

    let mut start = None;
    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = re.captures(line) {
            if &caps[1] == hook.function_name() {
                start = Some(idx + 1);
                break;
            }
        }
    }
    let start = start?;

    let mut depth: i32 = 0;
    let mut body = Vec::new();
    for line in &lines[start..] {
        let mut closed = false;
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        closed = true;
                        break;
                    }
                }
                _ => {}
            }
        }
        if closed {
            break;
        }
        body.push(*line);
    }

    Some(body.join("\n"))
}

/// Parse a shell-style recipe into the recipe model.
///
/// The returned recipe is validated; a text without the required fields
/// is rejected here rather than downstream.
pub fn parse_shell_recipe(content: &str) -> Result<Recipe> {
    let mut recipe = Recipe::default();
    let lines: Vec<&str> = content.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let key = key.trim();

        if let Some(rest) = value.trim_start().strip_prefix('(') {
            // Array assignment, possibly spanning lines up to the closing paren
            let mut acc = rest.to_string();
            while !acc.contains(')') && i < lines.len() {
                acc.push(' ');
                acc.push_str(lines[i].trim());
                i += 1;
            }
            let inner = acc.split(')').next().unwrap_or("");
            let items = split_items(inner);

            match key {
                "architectures" => recipe.architectures = items,
                "licenses" => recipe.licenses = items,
                "runtime_dependencies" => {
                    recipe.runtime_dependencies = parse_deps(&items)?;
                }
                "build_dependencies" => {
                    recipe.build_dependencies = parse_deps(&items)?;
                }
                "sources" => recipe.sources = items,
                "checksums" => recipe.checksums = items,
                _ => {}
            }
        } else {
            let scalar = strip_quotes(value.trim()).to_string();
            match key {
                "name" => recipe.name = scalar,
                "version" => recipe.version = scalar,
                "release" => recipe.release = scalar,
                "description" => recipe.description = Some(scalar),
                "url" => recipe.url = Some(scalar),
                _ => {}
            }
        }
    }

    for hook in Hook::ALL {
        if let Some(body) = extract_hook(content, hook) {
            recipe.hooks.insert(hook, body);
        }
    }

    recipe.validate()?;
    Ok(recipe)
}

fn parse_deps(items: &[String]) -> Result<Vec<DepSpec>> {
    items.iter().map(|item| DepSpec::parse(item)).collect()
}
