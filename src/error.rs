// src/error.rs

//! Central error type for the build engine
//!
//! Every failure class that can surface to a caller has its own variant with
//! a stable string identifier and a stable process exit code, so scripts
//! driving the CLI can branch on outcomes.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Build-engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// The parser could not produce a minimally-valid recipe
    #[error("invalid recipe format: {0}")]
    InvalidRecipeFormat(String),

    /// A required recipe field is absent or empty
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// The dependency probe found an unsatisfied runtime dependency
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A declared conflict is present in the installed catalog
    #[error("conflict detected: {0} is installed")]
    ConflictDetected(String),

    /// A source could not be retrieved
    #[error("download failed for {src}: {reason}")]
    DownloadFailed { src: String, reason: String },

    /// Retrieved bytes did not match the expected digest
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// The prepare hook exited non-zero
    #[error("prepare hook failed with exit code {0}")]
    PrepareFailed(i32),

    /// The build hook exited non-zero
    #[error("build hook failed with exit code {0}")]
    BuildFailed(i32),

    /// The package hook exited non-zero
    #[error("package hook failed with exit code {0}")]
    PackageFailed(i32),

    /// The cache index refers to a missing or unreadable backing file
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    #[error("archive creation failed: {0}")]
    ArchiveCreationFailed(String),

    #[error("archive verification failed: {0}")]
    ArchiveVerificationFailed(String),

    /// Only raised when signing was requested
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable identifier for the error kind, suitable for log grepping
    /// and assertions in tests.
    pub fn kind_id(&self) -> &'static str {
        match self {
            Self::InvalidRecipeFormat(_) => "invalid-recipe-format",
            Self::MissingRequiredField(_) => "missing-required-field",
            Self::MissingDependency(_) => "missing-dependency",
            Self::ConflictDetected(_) => "conflict-detected",
            Self::DownloadFailed { .. } => "download-failed",
            Self::ChecksumMismatch(_) => "checksum-mismatch",
            Self::PrepareFailed(_) => "prepare-failed",
            Self::BuildFailed(_) => "build-failed",
            Self::PackageFailed(_) => "package-failed",
            Self::CacheCorruption(_) => "cache-corruption",
            Self::ArchiveCreationFailed(_) => "archive-creation-failed",
            Self::ArchiveVerificationFailed(_) => "archive-verification-failed",
            Self::SigningFailed(_) => "signing-failed",
            Self::Io(_) => "io",
        }
    }

    /// Stable process exit code for the CLI dispatcher.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRecipeFormat(_) => 2,
            Self::MissingRequiredField(_) => 3,
            Self::MissingDependency(_) => 4,
            Self::ConflictDetected(_) => 5,
            Self::DownloadFailed { .. } => 6,
            Self::ChecksumMismatch(_) => 7,
            Self::PrepareFailed(_) => 8,
            Self::BuildFailed(_) => 9,
            Self::PackageFailed(_) => 10,
            Self::CacheCorruption(_) => 11,
            Self::ArchiveCreationFailed(_) => 12,
            Self::ArchiveVerificationFailed(_) => 13,
            Self::SigningFailed(_) => 14,
            Self::Io(_) => 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids_are_distinct() {
        let errors = vec![
            Error::InvalidRecipeFormat("x".into()),
            Error::MissingRequiredField("name"),
            Error::MissingDependency("x".into()),
            Error::ConflictDetected("x".into()),
            Error::DownloadFailed {
                src: "x".into(),
                reason: "y".into(),
            },
            Error::ChecksumMismatch("x".into()),
            Error::PrepareFailed(1),
            Error::BuildFailed(1),
            Error::PackageFailed(1),
            Error::CacheCorruption("x".into()),
            Error::ArchiveCreationFailed("x".into()),
            Error::ArchiveVerificationFailed("x".into()),
            Error::SigningFailed("x".into()),
        ];

        let mut ids: Vec<&str> = errors.iter().map(|e| e.kind_id()).collect();
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        ids.sort();
        ids.dedup();
        codes.sort();
        codes.dedup();
        assert_eq!(ids.len(), errors.len());
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_display_names_entity() {
        let e = Error::ChecksumMismatch("hello.c".into());
        assert!(e.to_string().contains("hello.c"));

        let e = Error::DownloadFailed {
            src: "https://example.com/a.tar.gz".into(),
            reason: "timeout".into(),
        };
        assert!(e.to_string().contains("a.tar.gz"));
        assert!(e.to_string().contains("timeout"));
    }
}
