// src/archive/mod.rs

//! Package archive composition, verification, and signing
//!
//! The composer stages two sidecar files inside the package directory —
//! `package-info` (installer metadata, `key = value` lines) and `manifest`
//! (an mtree-style file list) — then rolls the directory into a
//! compressed tar archive rooted at `.`. The sidecars are removed from
//! the directory again on every exit path.
//!
//! The manifest's digest field keeps the historical `md5digest` spelling
//! for installer compatibility; the value is an XXH128 digest, which has
//! the same 32-hex-character width.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::compression::{open_tar, pack_dir, CompressionFormat};
use crate::error::{Error, Result};
use crate::hash::{hash_file, HashAlgorithm};
use crate::recipe::model::Recipe;

/// Sidecar member: installer metadata
pub const PACKAGE_INFO: &str = "package-info";
/// Sidecar member: file manifest
pub const MANIFEST: &str = "manifest";

/// Composes, verifies, and signs package archives
#[derive(Debug, Clone)]
pub struct ArchiveComposer {
    pub compression: CompressionFormat,
    /// Written into `package-info`; from `$PACKAGER` when set
    pub packager: String,
}

impl Default for ArchiveComposer {
    fn default() -> Self {
        Self {
            compression: CompressionFormat::Zstd,
            packager: std::env::var("PACKAGER").unwrap_or_else(|_| "Unknown Packager".to_string()),
        }
    }
}

/// A regular file under the package directory
struct PackagedFile {
    /// Relative path with `/` separators
    rel: String,
    size: u64,
    path: PathBuf,
}

impl ArchiveComposer {
    /// Write the sidecars into `package_dir` and compose the compressed
    /// archive at `output_path`.
    pub fn compose(&self, recipe: &Recipe, package_dir: &Path, output_path: &Path) -> Result<()> {
        let files = collect_files(package_dir)?;
        info!(
            "composing {} from {} file(s)",
            output_path.display(),
            files.len()
        );

        let result = (|| {
            let info = self.render_package_info(recipe, &files);
            fs::write(package_dir.join(PACKAGE_INFO), info)?;

            let manifest = render_manifest(&files)?;
            fs::write(package_dir.join(MANIFEST), manifest)?;

            pack_dir(package_dir, output_path, self.compression)
                .map_err(|e| Error::ArchiveCreationFailed(e.to_string()))?;
            Ok(())
        })();

        // Sidecars never outlive composition, even on failure
        let _ = fs::remove_file(package_dir.join(PACKAGE_INFO));
        let _ = fs::remove_file(package_dir.join(MANIFEST));

        result
    }

    /// List the archive without extracting and check that both sidecar
    /// members are present.
    pub fn verify(&self, output_path: &Path) -> Result<bool> {
        let mut archive = open_tar(output_path)?;

        let mut has_info = false;
        let mut has_manifest = false;
        for entry in archive
            .entries()
            .map_err(|e| Error::ArchiveVerificationFailed(e.to_string()))?
        {
            let entry = entry.map_err(|e| Error::ArchiveVerificationFailed(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| Error::ArchiveVerificationFailed(e.to_string()))?;
            match path.to_string_lossy().trim_start_matches("./") {
                PACKAGE_INFO => has_info = true,
                MANIFEST => has_manifest = true,
                _ => {}
            }
        }

        debug!(
            "verified {}: package-info={} manifest={}",
            output_path.display(),
            has_info,
            has_manifest
        );
        Ok(has_info && has_manifest)
    }

    /// Produce a detached signature at `<archive>.sig` using the external
    /// signer. A missing key id is a warning-level skip, not an error.
    pub fn sign(&self, output_path: &Path, key_id: Option<&str>) -> Result<Option<PathBuf>> {
        let key_id = match key_id {
            Some(id) => id,
            None => {
                warn!("no signing key configured, skipping signature");
                return Ok(None);
            }
        };

        let mut sig_name = output_path.as_os_str().to_owned();
        sig_name.push(".sig");
        let sig_path = PathBuf::from(sig_name);

        let output = Command::new("gpg")
            .args(["--batch", "--yes", "--detach-sign", "--local-user", key_id, "--output"])
            .arg(&sig_path)
            .arg(output_path)
            .output()
            .map_err(|e| Error::SigningFailed(format!("failed to run gpg: {e}")))?;

        if !output.status.success() {
            return Err(Error::SigningFailed(format!(
                "gpg exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("signed {} with key {}", output_path.display(), key_id);
        Ok(Some(sig_path))
    }

    /// Render `package-info`: singular fields first, in fixed order, then
    /// one line per license and per runtime dependency in declared order.
    fn render_package_info(&self, recipe: &Recipe, files: &[PackagedFile]) -> String {
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        let builddate = chrono::Utc::now().timestamp();

        let mut out = String::new();
        let _ = writeln!(out, "name = {}", recipe.name);
        let _ = writeln!(out, "version = {}", recipe.version);
        let _ = writeln!(out, "release = {}", recipe.release);
        let _ = writeln!(out, "builddate = {}", builddate);
        let _ = writeln!(out, "packager = {}", self.packager);
        let _ = writeln!(out, "size = {}", total_size);
        let _ = writeln!(out, "architecture = {}", recipe.default_architecture());
        if let Some(description) = &recipe.description {
            let _ = writeln!(out, "description = {}", description);
        }
        if let Some(url) = &recipe.url {
            let _ = writeln!(out, "url = {}", url);
        }
        for license in &recipe.licenses {
            let _ = writeln!(out, "license = {}", license);
        }
        for dep in &recipe.runtime_dependencies {
            let _ = writeln!(out, "depend = {}", dep);
        }
        out
    }
}

/// Collect regular files under the package directory, skipping any stale
/// sidecars from an interrupted earlier run.
fn collect_files(package_dir: &Path) -> Result<Vec<PackagedFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(package_dir) {
        let entry = entry.map_err(|e| Error::ArchiveCreationFailed(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(package_dir)
            .expect("walkdir yields children of its root")
            .to_string_lossy()
            .into_owned();
        if rel == PACKAGE_INFO || rel == MANIFEST {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| Error::ArchiveCreationFailed(e.to_string()))?
            .len();
        files.push(PackagedFile {
            rel,
            size,
            path: entry.path().to_path_buf(),
        });
    }

    Ok(files)
}

/// Render the manifest: an `#mtree` header, a `/set` defaults line, then
/// one entry per file. Dot-prefixed paths are excluded and the entry
/// lines are sorted so the manifest is reproducible across hosts.
fn render_manifest(files: &[PackagedFile]) -> Result<String> {
    let mut lines = Vec::new();
    for file in files {
        if file.rel.starts_with('.') {
            continue;
        }
        let digest = hash_file(HashAlgorithm::Xxh128, &file.path)?;
        lines.push(format!(
            "./{} size={} md5digest={}",
            file.rel, file.size, digest
        ));
    }
    lines.sort();

    let mut out = String::from("#mtree\n/set type=file uid=0 gid=0 mode=644\n");
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::unpack_into;
    use tempfile::TempDir;

    fn test_recipe() -> Recipe {
        let mut recipe = Recipe {
            name: "hello".to_string(),
            version: "1.0.0".to_string(),
            release: "1".to_string(),
            description: Some("The classic".to_string()),
            url: Some("https://example.com".to_string()),
            architectures: vec!["x86_64".to_string()],
            licenses: vec!["MIT".to_string(), "Apache-2.0".to_string()],
            ..Default::default()
        };
        recipe.runtime_dependencies =
            vec![crate::recipe::model::DepSpec::parse("libc>=2.30").unwrap()];
        recipe
    }

    fn stage_package(root: &Path) -> PathBuf {
        let pkg = root.join("package");
        fs::create_dir_all(pkg.join("usr/bin")).unwrap();
        fs::create_dir_all(pkg.join("usr/share/doc")).unwrap();
        fs::write(pkg.join("usr/bin/hello"), b"\x7fELF fake binary").unwrap();
        fs::write(pkg.join("usr/share/doc/README"), b"docs").unwrap();
        pkg
    }

    #[test]
    fn test_compose_and_verify() {
        let temp = TempDir::new().unwrap();
        let pkg = stage_package(temp.path());
        let composer = ArchiveComposer::default();
        let out = temp.path().join("hello-1.0.0-1-x86_64.pkg.tar.zst");

        composer.compose(&test_recipe(), &pkg, &out).unwrap();
        assert!(out.is_file());
        assert!(composer.verify(&out).unwrap());

        // Sidecars are cleaned out of the package directory afterwards
        assert!(!pkg.join(PACKAGE_INFO).exists());
        assert!(!pkg.join(MANIFEST).exists());
    }

    #[test]
    fn test_archive_members() {
        let temp = TempDir::new().unwrap();
        let pkg = stage_package(temp.path());
        let composer = ArchiveComposer::default();
        let out = temp.path().join("pkg.tar.zst");
        composer.compose(&test_recipe(), &pkg, &out).unwrap();

        let dest = temp.path().join("extracted");
        unpack_into(&out, &dest).unwrap();
        assert!(dest.join(PACKAGE_INFO).is_file());
        assert!(dest.join(MANIFEST).is_file());
        assert_eq!(
            fs::read(dest.join("usr/bin/hello")).unwrap(),
            b"\x7fELF fake binary"
        );
    }

    #[test]
    fn test_package_info_contents() {
        let temp = TempDir::new().unwrap();
        let pkg = stage_package(temp.path());
        let composer = ArchiveComposer {
            compression: CompressionFormat::Zstd,
            packager: "Test Packager".to_string(),
        };
        let out = temp.path().join("pkg.tar.zst");
        composer.compose(&test_recipe(), &pkg, &out).unwrap();

        let dest = temp.path().join("extracted");
        unpack_into(&out, &dest).unwrap();
        let info = fs::read_to_string(dest.join(PACKAGE_INFO)).unwrap();
        let lines: Vec<&str> = info.lines().collect();

        // Singular fields come first, in fixed order
        assert_eq!(lines[0], "name = hello");
        assert_eq!(lines[1], "version = 1.0.0");
        assert_eq!(lines[2], "release = 1");
        assert!(lines[3].starts_with("builddate = "));
        let builddate: i64 = lines[3].trim_start_matches("builddate = ").parse().unwrap();
        assert!(builddate > 0);
        assert_eq!(lines[4], "packager = Test Packager");
        assert_eq!(lines[5], format!("size = {}", 16 + 4)); // hello + README
        assert_eq!(lines[6], "architecture = x86_64");
        assert_eq!(lines[7], "description = The classic");
        assert_eq!(lines[8], "url = https://example.com");
        assert_eq!(lines[9], "license = MIT");
        assert_eq!(lines[10], "license = Apache-2.0");
        assert_eq!(lines[11], "depend = libc>=2.30");
    }

    #[test]
    fn test_manifest_format_and_order() {
        let temp = TempDir::new().unwrap();
        let pkg = stage_package(temp.path());
        // A dot-prefixed entry stays out of the manifest
        fs::write(pkg.join(".hidden"), b"secret").unwrap();

        let composer = ArchiveComposer::default();
        let out = temp.path().join("pkg.tar.zst");
        composer.compose(&test_recipe(), &pkg, &out).unwrap();

        let dest = temp.path().join("extracted");
        unpack_into(&out, &dest).unwrap();
        let manifest = fs::read_to_string(dest.join(MANIFEST)).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();

        assert_eq!(lines[0], "#mtree");
        assert_eq!(lines[1], "/set type=file uid=0 gid=0 mode=644");

        let entries = &lines[2..];
        assert_eq!(entries.len(), 2);
        let mut sorted = entries.to_vec();
        sorted.sort();
        assert_eq!(entries, &sorted[..], "entries must be sorted");

        assert!(entries[0].starts_with("./usr/bin/hello size=16 md5digest="));
        assert!(entries[1].starts_with("./usr/share/doc/README size=4 md5digest="));
        // The digest field keeps MD5's 32-hex width
        let digest = entries[0].rsplit('=').next().unwrap();
        assert_eq!(digest.len(), 32);
        assert!(!manifest.contains(".hidden"));
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let composer = ArchiveComposer::default();

        // Two directories with identical content under identical paths
        let mut manifests = Vec::new();
        for side in ["left", "right"] {
            let pkg = temp.path().join(side);
            fs::create_dir_all(pkg.join("usr/bin")).unwrap();
            fs::create_dir_all(pkg.join("etc")).unwrap();
            fs::write(pkg.join("usr/bin/tool"), b"same bytes").unwrap();
            fs::write(pkg.join("etc/tool.conf"), b"key=value\n").unwrap();

            let out = temp.path().join(format!("{side}.pkg.tar.zst"));
            composer.compose(&test_recipe(), &pkg, &out).unwrap();

            let dest = temp.path().join(format!("{side}-extracted"));
            unpack_into(&out, &dest).unwrap();
            manifests.push(fs::read(dest.join(MANIFEST)).unwrap());
        }

        assert_eq!(manifests[0], manifests[1]);
    }

    #[test]
    fn test_verify_rejects_archive_without_sidecars() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        fs::create_dir_all(&plain).unwrap();
        fs::write(plain.join("file.txt"), b"no sidecars here").unwrap();

        let out = temp.path().join("plain.tar.zst");
        pack_dir(&plain, &out, CompressionFormat::Zstd).unwrap();

        let composer = ArchiveComposer::default();
        assert!(!composer.verify(&out).unwrap());
    }

    #[test]
    fn test_sign_without_key_is_skipped() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("pkg.tar.zst");
        fs::write(&out, b"archive bytes").unwrap();

        let composer = ArchiveComposer::default();
        let sig = composer.sign(&out, None).unwrap();
        assert!(sig.is_none());
    }

    #[test]
    fn test_compose_empty_package_dir() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("package");
        fs::create_dir_all(&pkg).unwrap();

        let composer = ArchiveComposer::default();
        let out = temp.path().join("empty.pkg.tar.zst");
        composer.compose(&test_recipe(), &pkg, &out).unwrap();

        // Even an empty package carries its metadata members
        assert!(composer.verify(&out).unwrap());
    }
}
