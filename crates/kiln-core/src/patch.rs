//! Patch application.
//!
//! Patches are applied to the unpacked source tree before the first build
//! step, in declaration order, with the system `patch` tool. Remote patches
//! are fetched together up front; compressed ones are unpacked with
//! `gunzip` or `bunzip2` right before they are applied. The first tool that
//! exits nonzero aborts the build: a half-patched tree is not something a
//! retry can fix.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::debug;

use kiln_schema::Checksum;

use crate::error::{BuildError, Result};
use crate::fetch::Fetcher;
use crate::reporter::{NullReporter, Reporter};

/// How a patch body is compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Infer from a URL's extension.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".gz") {
            Self::Gzip
        } else if path.ends_with(".bz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gz"),
            Self::Bzip2 => Some("bz2"),
        }
    }
}

/// Where a patch body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchSource {
    /// Diff text embedded in the formula.
    Inline(String),
    /// A diff to download.
    Remote {
        url: String,
        checksum: Option<Checksum>,
    },
}

/// One source modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub source: PatchSource,
    /// Leading path components to strip (`patch -pN`).
    pub strip: u32,
    pub compression: Compression,
}

impl Patch {
    /// An inline diff applied with `-p1`.
    pub fn inline(body: &str) -> Self {
        Self {
            source: PatchSource::Inline(body.to_string()),
            strip: 1,
            compression: Compression::None,
        }
    }

    /// A remote diff applied with `-p1`, its compression guessed from the URL.
    pub fn remote(url: &str) -> Self {
        Self {
            source: PatchSource::Remote {
                url: url.to_string(),
                checksum: None,
            },
            strip: 1,
            compression: Compression::from_url(url),
        }
    }

    pub fn with_strip(mut self, strip: u32) -> Self {
        self.strip = strip;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// No effect on inline patches.
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        if let PatchSource::Remote { checksum: c, .. } = &mut self.source {
            *c = Some(checksum);
        }
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, PatchSource::Remote { .. })
    }

    fn display_name(&self, index: usize) -> String {
        match &self.source {
            PatchSource::Inline(_) => format!("inline patch #{}", index + 1),
            PatchSource::Remote { url, .. } => url.clone(),
        }
    }
}

/// Patches in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchList(Vec<Patch>);

impl PatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, patch: Patch) {
        self.0.push(patch);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_remote(&self) -> bool {
        self.0.iter().any(Patch::is_remote)
    }
}

impl FromIterator<Patch> for PatchList {
    fn from_iter<I: IntoIterator<Item = Patch>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PatchList {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Progress of a [`PatchPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Empty,
    Downloading,
    Applying,
    Done,
}

/// External programs the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTools {
    pub patch: PathBuf,
    pub gunzip: PathBuf,
    pub bunzip2: PathBuf,
}

impl Default for PatchTools {
    fn default() -> Self {
        Self {
            patch: PathBuf::from("patch"),
            gunzip: PathBuf::from("gunzip"),
            bunzip2: PathBuf::from("bunzip2"),
        }
    }
}

impl PatchTools {
    /// Resolve each tool on `PATH`, keeping the bare name when it is missing
    /// so the failure surfaces when (and if) the tool is needed.
    pub fn from_path() -> Self {
        let resolve = |name: &str| which::which(name).unwrap_or_else(|_| PathBuf::from(name));
        Self {
            patch: resolve("patch"),
            gunzip: resolve("gunzip"),
            bunzip2: resolve("bunzip2"),
        }
    }
}

/// Applies a [`PatchList`] to a source tree.
pub struct PatchPipeline<'a> {
    patches: &'a PatchList,
    tools: PatchTools,
    reporter: Arc<dyn Reporter>,
    state: PatchState,
}

impl<'a> PatchPipeline<'a> {
    pub fn new(patches: &'a PatchList, tools: PatchTools) -> Self {
        Self {
            patches,
            tools,
            reporter: Arc::new(NullReporter),
            state: PatchState::Empty,
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    /// Fetch and apply every patch inside `workdir`.
    ///
    /// An empty list goes straight to [`PatchState::Done`] without touching
    /// the fetcher or running any tool.
    ///
    /// # Errors
    ///
    /// - Whatever the fetcher returns for a download.
    /// - [`BuildError::ChecksumMismatch`] when a declared checksum fails.
    /// - [`BuildError::PatchApplicationFailed`] when `patch` or a
    ///   decompressor exits nonzero; later patches are not attempted.
    pub fn apply(&mut self, workdir: &Path, fetcher: &dyn Fetcher) -> Result<()> {
        if self.patches.is_empty() {
            self.state = PatchState::Done;
            return Ok(());
        }

        let downloads = tempfile::tempdir()?;
        let mut fetched: Vec<Option<PathBuf>> = vec![None; self.patches.len()];
        if self.patches.has_remote() {
            self.state = PatchState::Downloading;
            for (i, patch) in self.patches.iter().enumerate() {
                let PatchSource::Remote { url, checksum } = &patch.source else {
                    continue;
                };
                let dest = downloads.path().join(format!("{i:03}"));
                let path = fetcher.fetch(url, &[], &dest)?;
                if let Some(checksum) = checksum {
                    if !fetcher.verify(&path, checksum)? {
                        return Err(BuildError::ChecksumMismatch {
                            path,
                            expected: checksum.clone(),
                        });
                    }
                }
                fetched[i] = Some(path);
            }
        }

        self.state = PatchState::Applying;
        self.reporter.step("Patching");
        for (i, patch) in self.patches.iter().enumerate() {
            let staged = self.stage(i, patch, fetched[i].as_deref(), workdir)?;
            self.run_patch(i, patch, &staged, workdir)?;
        }

        self.state = PatchState::Done;
        Ok(())
    }

    /// Write the patch to `NNN-kiln.diff` in `workdir`, decompressing it
    /// there if needed.
    fn stage(
        &self,
        index: usize,
        patch: &Patch,
        fetched: Option<&Path>,
        workdir: &Path,
    ) -> Result<PathBuf> {
        let diff = workdir.join(format!("{index:03}-kiln.diff"));
        let target = match patch.compression.extension() {
            Some(ext) => diff.with_extension(format!("diff.{ext}")),
            None => diff.clone(),
        };

        match (&patch.source, fetched) {
            (PatchSource::Inline(body), _) => std::fs::write(&target, body)?,
            (PatchSource::Remote { .. }, Some(path)) => {
                std::fs::copy(path, &target)?;
            }
            (PatchSource::Remote { url, .. }, None) => {
                return Err(BuildError::Fetch {
                    url: url.clone(),
                    reason: "patch was not downloaded".to_string(),
                });
            }
        }

        let decompressor = match patch.compression {
            Compression::None => return Ok(diff),
            Compression::Gzip => &self.tools.gunzip,
            Compression::Bzip2 => &self.tools.bunzip2,
        };
        debug!("{} {}", decompressor.display(), target.display());
        let status = Command::new(decompressor)
            .arg("-f")
            .arg(&target)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(BuildError::PatchApplicationFailed {
                patch: patch.display_name(index),
                tool: tool_name(decompressor),
                status: status.code(),
            });
        }
        Ok(diff)
    }

    fn run_patch(&self, index: usize, patch: &Patch, diff: &Path, workdir: &Path) -> Result<()> {
        let strip = format!("-p{}", patch.strip);
        debug!(
            "{} -g0 -f {strip} < {}",
            self.tools.patch.display(),
            diff.display()
        );
        let output = Command::new(&self.tools.patch)
            .args(["-g0", "-f", &strip])
            .current_dir(workdir)
            .stdin(File::open(diff)?)
            .output()?;

        for line in String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
        {
            debug!("patch: {line}");
        }

        if !output.status.success() {
            return Err(BuildError::PatchApplicationFailed {
                patch: patch.display_name(index),
                tool: tool_name(&self.tools.patch),
                status: output.status.code(),
            });
        }
        Ok(())
    }
}

fn tool_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Counts calls and fails every one of them.
    #[derive(Default)]
    struct CountingFetcher {
        fetches: Cell<usize>,
        verifies: Cell<usize>,
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, url: &str, _: &[String], _: &Path) -> Result<PathBuf> {
            self.fetches.set(self.fetches.get() + 1);
            Err(BuildError::Fetch {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }

        fn verify(&self, _: &Path, _: &Checksum) -> Result<bool> {
            self.verifies.set(self.verifies.get() + 1);
            Ok(false)
        }
    }

    #[test]
    fn test_compression_from_url() {
        assert_eq!(Compression::from_url("https://x.org/a.diff.gz"), Compression::Gzip);
        assert_eq!(Compression::from_url("https://x.org/a.patch.bz2?raw=1"), Compression::Bzip2);
        assert_eq!(Compression::from_url("https://x.org/a.diff"), Compression::None);
    }

    #[test]
    fn test_empty_list_does_nothing() {
        let dir = tempdir().unwrap();
        let patches = PatchList::new();
        let tools = PatchTools {
            patch: PathBuf::from("/nonexistent/patch"),
            ..PatchTools::default()
        };
        let fetcher = CountingFetcher::default();

        let mut pipeline = PatchPipeline::new(&patches, tools);
        assert_eq!(pipeline.state(), PatchState::Empty);
        pipeline.apply(dir.path(), &fetcher).unwrap();

        assert_eq!(pipeline.state(), PatchState::Done);
        assert_eq!(fetcher.fetches.get(), 0);
        assert_eq!(fetcher.verifies.get(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_fetch_failure_stops_before_applying() {
        let dir = tempdir().unwrap();
        let patches: PatchList = [
            Patch::inline("--- a/x\n+++ b/x\n"),
            Patch::remote("https://example.com/fix.diff"),
        ]
        .into_iter()
        .collect();
        let fetcher = CountingFetcher::default();

        let mut pipeline = PatchPipeline::new(&patches, PatchTools::default());
        let err = pipeline.apply(dir.path(), &fetcher).unwrap_err();

        assert!(matches!(err, BuildError::Fetch { .. }));
        assert_eq!(pipeline.state(), PatchState::Downloading);
        assert_eq!(fetcher.fetches.get(), 1);
        assert!(!dir.path().join("000-kiln.diff").exists());
    }

    #[test]
    fn test_checksum_is_builder_only_for_remote() {
        let inline = Patch::inline("x").with_checksum(Checksum::sha256("ab"));
        assert_eq!(inline.source, PatchSource::Inline("x".to_string()));

        let remote = Patch::remote("https://e.com/p.diff.gz").with_checksum(Checksum::sha256("ab"));
        assert!(matches!(
            remote.source,
            PatchSource::Remote { checksum: Some(_), .. }
        ));
        assert_eq!(remote.compression, Compression::Gzip);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_patch_aborts_remaining() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let patch_tool = bin.path().join("patch");
        let marker = bin.path().join("calls");
        std::fs::write(
            &patch_tool,
            format!("#!/bin/sh\necho call >> {}\nexit 1\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&patch_tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let patches: PatchList = [Patch::inline("one"), Patch::inline("two")]
            .into_iter()
            .collect();
        let tools = PatchTools {
            patch: patch_tool,
            ..PatchTools::default()
        };
        let mut pipeline = PatchPipeline::new(&patches, tools);
        let err = pipeline.apply(dir.path(), &CountingFetcher::default()).unwrap_err();

        match err {
            BuildError::PatchApplicationFailed { patch, tool, status } => {
                assert_eq!(patch, "inline patch #1");
                assert_eq!(tool, "patch");
                assert_eq!(status, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_to_string(marker).unwrap().lines().count(), 1);
        assert!(!dir.path().join("001-kiln.diff").exists());
    }
    #[cfg(unix)]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_compressed_patches_are_unpacked_and_applied() {
        use crate::fetch::LocalFetcher;

        let tools = ["patch", "gzip", "gunzip", "bzip2", "bunzip2"];
        if tools.iter().any(|t| which::which(t).is_err()) {
            eprintln!("skipping: needs {}", tools.join(", "));
            return;
        }

        let dir = tempdir().unwrap();
        let remote = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "old\n").unwrap();

        let mut urls = Vec::new();
        for (file, compressor, ext) in [("a.txt", "gzip", "gz"), ("b.txt", "bzip2", "bz2")] {
            let plain = remote.path().join(format!("{file}.diff"));
            std::fs::write(
                &plain,
                format!("--- a/{file}\n+++ b/{file}\n@@ -1 +1 @@\n-old\n+new\n"),
            )
            .unwrap();
            let status = Command::new(compressor).arg(&plain).status().unwrap();
            assert!(status.success());
            urls.push(format!("file://{}.{ext}", plain.display()));
        }

        let patches: PatchList = urls.iter().map(|u| Patch::remote(u)).collect();
        assert_eq!(patches.iter().next().unwrap().compression, Compression::Gzip);

        let mut pipeline = PatchPipeline::new(&patches, PatchTools::from_path());
        pipeline.apply(dir.path(), &LocalFetcher).unwrap();

        assert_eq!(pipeline.state(), PatchState::Done);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.txt")).unwrap(), "new\n");
        assert!(dir.path().join("000-kiln.diff").exists());
        assert!(dir.path().join("001-kiln.diff").exists());
        assert!(!dir.path().join("000-kiln.diff.gz").exists());
        assert!(!dir.path().join("001-kiln.diff.bz2").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_decompressor_aborts_before_patch() {
        let dir = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let marker = bin.path().join("patch-calls");
        let gunzip = bin.path().join("gunzip");
        let patch_tool = bin.path().join("patch");
        write_script(&gunzip, "#!/bin/sh\nexit 3\n");
        write_script(
            &patch_tool,
            &format!("#!/bin/sh\necho call >> {}\n", marker.display()),
        );

        let patches: PatchList = [Patch::inline("not gzip").with_compression(Compression::Gzip)]
            .into_iter()
            .collect();
        let tools = PatchTools {
            patch: patch_tool,
            gunzip,
            ..PatchTools::default()
        };
        let mut pipeline = PatchPipeline::new(&patches, tools);
        let err = pipeline.apply(dir.path(), &CountingFetcher::default()).unwrap_err();

        match err {
            BuildError::PatchApplicationFailed { patch, tool, status } => {
                assert_eq!(patch, "inline patch #1");
                assert_eq!(tool, "gunzip");
                assert_eq!(status, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipeline.state(), PatchState::Applying);
        assert!(dir.path().join("000-kiln.diff.gz").exists());
        assert!(!marker.exists());
    }
}
