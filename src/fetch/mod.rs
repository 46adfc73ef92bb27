// src/fetch/mod.rs

//! Parallel source fetching with checksum verification
//!
//! Each source is retrieved by its own worker: URL sources stream over
//! HTTP to `destination_directory/basename`, bare filenames must already
//! be present there. Verification runs after all fetches return, so a
//! slow mirror never blocks a checksum failure report for its peers.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hash::{hash_file, HashAlgorithm};
use crate::recipe::model::SKIP_CHECKSUM;

/// HTTP request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Copy buffer for streaming downloads
const STREAM_BUFFER_SIZE: usize = 8192;

/// Outcome of fetching and verifying one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    DownloadFailed(String),
    ChecksumMismatch { expected: String, actual: String },
}

/// Record of one source fetch
#[derive(Debug, Clone)]
pub struct FetchRecord {
    /// The source reference as written in the recipe
    pub requested: String,
    /// Where the bytes landed (or should have)
    pub destination: PathBuf,
    pub outcome: FetchOutcome,
}

impl FetchRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == FetchOutcome::Success
    }
}

/// Is this source reference a URL rather than a local filename?
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Final path component of a source reference
pub fn basename(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}

/// Fetch every source into `dest_dir` and verify each against its checksum.
///
/// `checksums` is either empty (no verification at all) or aligned 1:1
/// with `sources`; a `SKIP` entry disables verification for that source
/// only. Per-item failures are recorded, never raised mid-flight; the
/// caller decides the aggregate policy.
pub fn fetch_all(sources: &[String], checksums: &[String], dest_dir: &Path) -> Result<Vec<FetchRecord>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(dest_dir)?;

    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| std::io::Error::other(format!("http client: {e}")))?;

    let progress = MultiProgress::new();

    info!("fetching {} source(s)", sources.len());

    let mut records: Vec<FetchRecord> = sources
        .par_iter()
        .map(|source| fetch_one(&client, &progress, source, dest_dir))
        .collect();

    // Verification pass, after all fetches have returned
    for (i, record) in records.iter_mut().enumerate() {
        if record.outcome != FetchOutcome::Success {
            continue;
        }
        let expected = match checksums.get(i) {
            Some(c) if c != SKIP_CHECKSUM => c,
            _ => {
                debug!("skipping verification for {}", record.requested);
                continue;
            }
        };

        let actual = hash_file(HashAlgorithm::Sha256, &record.destination)?;
        if actual != *expected {
            warn!(
                "checksum mismatch for {}: expected {}, got {}",
                record.requested, expected, actual
            );
            record.outcome = FetchOutcome::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            };
        }
    }

    Ok(records)
}

fn fetch_one(
    client: &Client,
    progress: &MultiProgress,
    source: &str,
    dest_dir: &Path,
) -> FetchRecord {
    let destination = dest_dir.join(basename(source));

    let outcome = if is_url(source) {
        match download(client, progress, source, &destination) {
            Ok(bytes) => {
                info!("downloaded {} ({} bytes)", source, bytes);
                FetchOutcome::Success
            }
            Err(reason) => {
                warn!("download failed for {}: {}", source, reason);
                // A half-written destination must not satisfy a re-run
                let _ = std::fs::remove_file(&destination);
                FetchOutcome::DownloadFailed(reason)
            }
        }
    } else if destination.is_file() {
        debug!("local source present: {}", destination.display());
        FetchOutcome::Success
    } else {
        FetchOutcome::DownloadFailed(format!("local file not found: {}", destination.display()))
    };

    FetchRecord {
        requested: source.to_string(),
        destination,
        outcome,
    }
}

/// Stream a URL to a file, reporting progress; returns bytes written.
fn download(
    client: &Client,
    progress: &MultiProgress,
    url: &str,
    destination: &Path,
) -> std::result::Result<u64, String> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }

    let total = response.content_length().unwrap_or(0);
    let bar = progress.add(ProgressBar::new(total));
    bar.set_style(
        ProgressStyle::with_template("{msg:30!} {bytes:>10}/{total_bytes:10} {bar:30}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(basename(url).to_string());

    let mut file = File::create(destination).map_err(|e| format!("create failed: {e}"))?;

    let mut written = 0u64;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = response
            .read(&mut buffer)
            .map_err(|e| format!("read failed: {e}"))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])
            .map_err(|e| format!("write failed: {e}"))?;
        written += n as u64;
        bar.set_position(written);
    }

    bar.finish_and_clear();
    Ok(written)
}
