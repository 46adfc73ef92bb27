// src/compression/mod.rs

//! Compression formats and compressed-tar helpers
//!
//! One interface over the three streaming compressors the engine emits and
//! consumes (gzip, xz, zstd), plus the pack/unpack helpers shared by the
//! build cache and the archive composer.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Supported streaming compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Gzip (.gz)
    Gzip,
    /// XZ/LZMA (.xz)
    Xz,
    /// Zstandard (.zst)
    Zstd,
}

impl CompressionFormat {
    /// Detect compression format from a file name.
    pub fn from_extension(path: &str) -> Option<Self> {
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if path.ends_with(".xz") {
            Some(Self::Xz)
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Some(Self::Zstd)
        } else {
            None
        }
    }

    /// Detect compression format from magic bytes.
    ///
    /// Gzip: `1f 8b`; XZ: `fd 37 7a 58 5a 00`; Zstd: `28 b5 2f fd`.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Some(Self::Gzip)
        } else if data.len() >= 6 && data[..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
            Some(Self::Xz)
        } else if data.len() >= 4 && data[..4] == [0x28, 0xb5, 0x2f, 0xfd] {
            Some(Self::Zstd)
        } else {
            None
        }
    }

    /// File name suffix for this format, without a leading dot
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Xz => "xz",
            Self::Zstd => "zst",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>> {
    match format {
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader)?;
            Ok(Box::new(decoder))
        }
    }
}

/// Pack a directory into a compressed tar archive rooted at `.`.
///
/// Returns the byte size of the finished archive.
pub fn pack_dir(src_dir: &Path, dest: &Path, format: CompressionFormat) -> Result<u64> {
    let file = File::create(dest)?;

    match format {
        CompressionFormat::Gzip => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", src_dir)?;
            let encoder = builder.into_inner()?;
            encoder.finish()?;
        }
        CompressionFormat::Xz => {
            let encoder = xz2::write::XzEncoder::new(file, 6);
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", src_dir)?;
            let encoder = builder.into_inner()?;
            encoder.finish()?;
        }
        CompressionFormat::Zstd => {
            let encoder = zstd::Encoder::new(file, 0)
                .map_err(|e| Error::ArchiveCreationFailed(format!("zstd encoder: {e}")))?;
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", src_dir)?;
            let encoder = builder.into_inner()?;
            encoder.finish()?;
        }
    }

    Ok(fs::metadata(dest)?.len())
}

/// Unpack a compressed tar archive into a destination directory.
///
/// The format is taken from the file name, falling back to magic-byte
/// sniffing for archives with unhelpful names.
pub fn unpack_into(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    let name = archive.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let format = match CompressionFormat::from_extension(name) {
        Some(f) => f,
        None => {
            let mut head = [0u8; 6];
            let mut file = File::open(archive)?;
            let n = file.read(&mut head)?;
            CompressionFormat::from_magic_bytes(&head[..n]).ok_or_else(|| {
                Error::CacheCorruption(format!(
                    "unrecognized archive format: {}",
                    archive.display()
                ))
            })?
        }
    };

    let file = File::open(archive)?;
    let decoder = create_decoder(file, format)?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest)?;
    Ok(())
}

/// Open a compressed tar archive for entry-by-entry reading.
pub fn open_tar(archive: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let name = archive.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let format = CompressionFormat::from_extension(name).ok_or_else(|| {
        Error::ArchiveVerificationFailed(format!(
            "unrecognized archive suffix: {}",
            archive.display()
        ))
    })?;

    let file: Box<dyn Read> = Box::new(File::open(archive)?);
    let decoder = create_decoder(file, format)?;
    Ok(tar::Archive::new(decoder))
}
