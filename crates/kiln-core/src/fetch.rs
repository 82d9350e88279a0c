//! Download and checksum collaborator.
//!
//! The engine never talks to the network itself. It asks a [`Fetcher`] for
//! a local copy of a URL and for a verdict on a checksum; what happens in
//! between belongs to the implementation.

use std::path::{Path, PathBuf};
use tracing::debug;

use kiln_schema::Checksum;

use crate::error::{BuildError, Result};
use crate::paths::filename_from_url;

pub trait Fetcher {
    /// Produce a local copy of `url` (or the first mirror that works) inside
    /// `dest_dir` and return its path.
    ///
    /// # Errors
    ///
    /// [`BuildError::Fetch`] when neither the URL nor any mirror yields a file.
    fn fetch(&self, url: &str, mirrors: &[String], dest_dir: &Path) -> Result<PathBuf>;

    /// Whether the file at `path` hashes to `checksum`.
    ///
    /// # Errors
    ///
    /// I/O errors while reading the file.
    fn verify(&self, path: &Path, checksum: &Checksum) -> Result<bool> {
        Ok(checksum.matches_file(path)?)
    }
}

impl<T: Fetcher + ?Sized> Fetcher for &T {
    fn fetch(&self, url: &str, mirrors: &[String], dest_dir: &Path) -> Result<PathBuf> {
        (**self).fetch(url, mirrors, dest_dir)
    }

    fn verify(&self, path: &Path, checksum: &Checksum) -> Result<bool> {
        (**self).verify(path, checksum)
    }
}

/// Fetches `file://` URLs and plain filesystem paths by copying them.
/// Anything with another scheme is reported as unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFetcher;

impl LocalFetcher {
    fn local_path(url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        (!url.contains("://")).then(|| PathBuf::from(url))
    }
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, url: &str, mirrors: &[String], dest_dir: &Path) -> Result<PathBuf> {
        let mut last_reason = String::from("no candidate locations");

        for candidate in std::iter::once(url).chain(mirrors.iter().map(String::as_str)) {
            let Some(source) = Self::local_path(candidate) else {
                last_reason = format!("unsupported URL scheme in {candidate}");
                continue;
            };
            if !source.is_file() {
                last_reason = format!("{} does not exist", source.display());
                continue;
            }

            std::fs::create_dir_all(dest_dir)?;
            let dest = dest_dir.join(filename_from_url(candidate));
            if source != dest {
                std::fs::copy(&source, &dest)?;
            }
            debug!("fetched {candidate} -> {}", dest.display());
            return Ok(dest);
        }

        Err(BuildError::Fetch {
            url: url.to_string(),
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fetch_file_url() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let file = src.path().join("fix.diff");
        std::fs::write(&file, "--- a\n+++ b\n").unwrap();

        let url = format!("file://{}", file.display());
        let fetched = LocalFetcher.fetch(&url, &[], dest.path()).unwrap();
        assert_eq!(fetched, dest.path().join("fix.diff"));
        assert_eq!(std::fs::read_to_string(fetched).unwrap(), "--- a\n+++ b\n");
    }

    #[test]
    fn test_fetch_falls_back_to_mirror() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let file = src.path().join("pkg-1.0.tar.gz");
        std::fs::write(&file, b"archive").unwrap();

        let mirrors = vec![file.display().to_string()];
        let fetched = LocalFetcher
            .fetch("https://example.com/pkg-1.0.tar.gz", &mirrors, dest.path())
            .unwrap();
        assert!(fetched.exists());
    }

    #[test]
    fn test_fetch_reports_failure() {
        let dest = tempdir().unwrap();
        let err = LocalFetcher
            .fetch("https://example.com/pkg.tar.gz", &[], dest.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::Fetch { .. }));
    }

    #[test]
    fn test_verify() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"hello").unwrap();

        let good = Checksum::compute_file(kiln_schema::ChecksumKind::Sha256, &file).unwrap();
        assert!(LocalFetcher.verify(&file, &good).unwrap());
        assert!(!LocalFetcher.verify(&file, &Checksum::sha256("00")).unwrap());
    }
}
