//! Download checksums.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Digest algorithms a formula may declare for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// SHA-256, the upstream-facing default.
    Sha256,
    /// BLAKE3, used for locally produced artifacts.
    Blake3,
}

impl ChecksumKind {
    /// Lowercase algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl std::fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expected digest of a downloaded file.
///
/// The hex string is stored lowercased. An empty digest is representable
/// (a bottle with no checksum for the current platform) and reports
/// [`is_empty`](Self::is_empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Digest algorithm.
    pub kind: ChecksumKind,
    /// Lowercase hex digest.
    pub hex: String,
}

impl Checksum {
    /// A checksum of the given kind.
    pub fn new(kind: ChecksumKind, hex: &str) -> Self {
        Self {
            kind,
            hex: hex.trim().to_lowercase(),
        }
    }

    /// A SHA-256 checksum.
    pub fn sha256(hex: &str) -> Self {
        Self::new(ChecksumKind::Sha256, hex)
    }

    /// A BLAKE3 checksum.
    pub fn blake3(hex: &str) -> Self {
        Self::new(ChecksumKind::Blake3, hex)
    }

    /// True when no digest was supplied.
    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }

    /// Compute the digest of `path` with this checksum's algorithm.
    ///
    /// The file is streamed, so large archives are not loaded into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(kind: ChecksumKind, path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = [0u8; 64 * 1024];
        let hex = match kind {
            ChecksumKind::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                hex::encode(hasher.finalize())
            }
            ChecksumKind::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                hasher.finalize().to_hex().to_string()
            }
        };
        Ok(Self { kind, hex })
    }

    /// Check whether `path` hashes to this checksum.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn matches_file(&self, path: &Path) -> std::io::Result<bool> {
        Ok(Self::compute_file(self.kind, path)?.hex == self.hex)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.hex)
    }
}
