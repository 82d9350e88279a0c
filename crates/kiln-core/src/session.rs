//! One build of one formula.
//!
//! A [`BuildSession`] stages the source and its resources into a build
//! directory, applies the formula's patches and runs its build steps through
//! an [`Executor`], in that order and nothing concurrently. The directories a step works in are
//! passed explicitly as a [`BuildContext`] or [`TestContext`]; the formula
//! itself never holds them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BuildError, Result};
use crate::exec::{BuildSnapshot, Executor, preserve_auxiliary_logs};
use crate::fetch::Fetcher;
use crate::formula::Formula;
use crate::paths;
use crate::patch::{PatchPipeline, PatchTools};
use crate::reporter::Reporter;
use crate::spec::is_tarball;

/// A command declared by a formula. Arguments may use `{prefix}`,
/// `{buildpath}` and `{jobs}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new<S: AsRef<str>>(command: &str, args: &[S]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        }
    }

    /// The arguments with placeholders filled in from `ctx`.
    pub fn expand_args(&self, ctx: &BuildContext) -> Vec<String> {
        let prefix = ctx.prefix.display().to_string();
        let buildpath = ctx.buildpath.display().to_string();
        let jobs = num_cpus::get().to_string();
        self.args
            .iter()
            .map(|a| {
                a.replace("{prefix}", &prefix)
                    .replace("{buildpath}", &buildpath)
                    .replace("{jobs}", &jobs)
            })
            .collect()
    }
}

/// Directories of the build stage.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The unpacked and patched source tree; build steps run here.
    pub buildpath: PathBuf,
    /// Install destination.
    pub prefix: PathBuf,
}

/// Scratch directory of a test run, removed when the context is dropped.
#[derive(Debug)]
pub struct TestContext {
    dir: tempfile::TempDir,
}

impl TestContext {
    pub fn testpath(&self) -> &Path {
        self.dir.path()
    }
}

/// Drives one formula's build.
pub struct BuildSession<'a> {
    formula: &'a Formula,
    reporter: Arc<dyn Reporter>,
    tools: PatchTools,
    log_dir: PathBuf,
    verbose: bool,
    tail_lines: usize,
    env: Vec<(String, String)>,
}

impl<'a> BuildSession<'a> {
    /// Settings come from the environment (see [`crate::paths`]).
    pub fn new(formula: &'a Formula, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            formula,
            reporter,
            tools: PatchTools::from_path(),
            log_dir: paths::formula_log_dir(formula.name()),
            verbose: paths::verbose_from_env(),
            tail_lines: paths::fail_log_lines(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn patch_tools(mut self, tools: PatchTools) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn fail_log_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    /// Set a variable for every command of the build and test stages.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Copy or unpack `source` into `into` and return the directory the
    /// build should run in: the single top-level directory of the unpacked
    /// tree if there is one, else `into` itself.
    ///
    /// # Errors
    ///
    /// I/O errors, or [`BuildError::Fetch`] when `tar` cannot unpack the
    /// archive.
    pub fn stage(&self, source: &Path, into: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(into)?;
        if source.is_dir() {
            copy_tree(source, into)?;
            return Ok(into.to_path_buf());
        }

        unpack(source, into)?;

        let mut entries = std::fs::read_dir(into)?.collect::<std::io::Result<Vec<_>>>()?;
        if entries.len() == 1 && entries[0].file_type()?.is_dir() {
            if let Some(only) = entries.pop() {
                return Ok(only.path());
            }
        }
        Ok(into.to_path_buf())
    }

    /// Fetch, verify and stage every resource of the active specification.
    ///
    /// Each one lands in `<buildpath>/<name>-<version>` (just `<name>` when
    /// no version is known): tarballs are unpacked there, anything else is
    /// copied in under its file name.
    ///
    /// # Errors
    ///
    /// - Whatever the fetcher returns for a download.
    /// - [`BuildError::ChecksumMismatch`] when a declared checksum fails.
    /// - I/O errors, or [`BuildError::Fetch`] when `tar` cannot unpack.
    pub fn stage_resources(
        &self,
        ctx: &BuildContext,
        fetcher: &dyn Fetcher,
    ) -> Result<Vec<PathBuf>> {
        let Some(spec) = self.formula.active_source() else {
            return Ok(Vec::new());
        };
        if spec.resources.is_empty() {
            return Ok(Vec::new());
        }

        let downloads = tempfile::tempdir()?;
        let mut staged = Vec::with_capacity(spec.resources.len());
        for resource in &spec.resources {
            self.reporter.step(&format!("Staging resource {}", resource.name));
            let path = fetcher.fetch(
                &resource.url,
                &resource.mirrors,
                &downloads.path().join(&resource.name),
            )?;
            if let Some(checksum) = &resource.checksum {
                if !fetcher.verify(&path, checksum)? {
                    return Err(BuildError::ChecksumMismatch {
                        path,
                        expected: checksum.clone(),
                    });
                }
            }

            let dir_name = match spec.resource_version(resource) {
                Some(version) => format!("{}-{version}", resource.name),
                None => resource.name.clone(),
            };
            let dest = ctx.buildpath.join(dir_name);
            std::fs::create_dir_all(&dest)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if is_tarball(&file_name) {
                unpack(&path, &dest)?;
            } else {
                std::fs::copy(&path, dest.join(&file_name))?;
            }
            debug!("staged resource {} in {}", resource.name, dest.display());
            staged.push(dest);
        }
        Ok(staged)
    }

    /// Stage resources, apply patches, then run every build step in order.
    ///
    /// When a step fails, `config.log` and `CMakeCache.txt` files from the
    /// build tree are copied next to the logs before the error is returned.
    ///
    /// # Errors
    ///
    /// The first resource, patch or step failure; nothing after it runs.
    pub fn build(&self, ctx: &BuildContext, fetcher: &dyn Fetcher) -> Result<Executor> {
        info!(
            "building {} {} in {}",
            self.formula.name(),
            self.formula.version(),
            ctx.buildpath.display()
        );

        self.stage_resources(ctx, fetcher)?;
        PatchPipeline::new(self.formula.patches(), self.tools.clone())
            .with_reporter(self.reporter.clone())
            .apply(&ctx.buildpath, fetcher)?;

        let mut exec = self
            .executor(&ctx.buildpath, &self.log_dir)
            .env("PREFIX", &ctx.prefix.display().to_string());
        for step in self.formula.steps() {
            if let Err(err) = exec.run(&step.command, &step.expand_args(ctx)) {
                if err.is_build_failure() {
                    for kept in preserve_auxiliary_logs(&ctx.buildpath, &self.log_dir)? {
                        self.reporter.info(&format!("Preserved {}", kept.display()));
                    }
                }
                return Err(err);
            }
        }
        Ok(exec)
    }

    /// Run `test` in a fresh scratch directory with an executor logging to
    /// `<log dir>/test`.
    ///
    /// # Errors
    ///
    /// Whatever `test` returns, or I/O errors creating the directory.
    pub fn test<F>(&self, test: F) -> Result<()>
    where
        F: FnOnce(&TestContext, &mut Executor) -> Result<()>,
    {
        let ctx = TestContext {
            dir: tempfile::Builder::new().prefix("kiln-test").tempdir()?,
        };
        let mut exec = self.executor(ctx.testpath(), &self.log_dir.join("test"));
        test(&ctx, &mut exec)
    }

    fn executor(&self, cwd: &Path, log_dir: &Path) -> Executor {
        let makeflags = format!("-j{}", num_cpus::get());
        let mut snapshot = BuildSnapshot::for_formula(self.formula);
        snapshot.push("MAKEFLAGS", &makeflags);

        let mut exec = Executor::new(log_dir)
            .current_dir(cwd)
            .verbose(self.verbose)
            .tail_lines(self.tail_lines)
            .env("MAKEFLAGS", &makeflags);
        for (key, value) in &self.env {
            snapshot.push(key, value);
            exec = exec.env(key, value);
        }
        exec.reporter(self.reporter.clone())
            .snapshot(Box::new(snapshot))
    }
}

fn unpack(archive: &Path, into: &Path) -> Result<()> {
    debug!("unpacking {} into {}", archive.display(), into.display());
    let output = Command::new("tar")
        .arg("-xf")
        .arg(archive)
        .arg("-C")
        .arg(into)
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(BuildError::Fetch {
            url: archive.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).into_iter().filter_map(std::result::Result::ok) {
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
