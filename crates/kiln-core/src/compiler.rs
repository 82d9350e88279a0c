//! Known compiler incompatibilities.
//!
//! A formula may declare that certain compiler releases cannot build it
//! (`fails_with gcc 4.8 from 4.8.1`). Records match on compiler name and
//! major version; a different major version of the same compiler is
//! unaffected unless it has its own record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use kiln_schema::{PackageName, Version};

use crate::error::{BuildError, Result};

/// A compiler available to a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiler {
    pub name: String,
    /// Release series, e.g. `4.8` for gcc 4.8.2. Compared as a version, so
    /// `15` and `15.0` name the same series.
    pub major_version: Version,
    pub version: Version,
}

impl Compiler {
    pub fn new(name: &str, version: &str) -> Self {
        let version = Version::new(version);
        Self {
            name: name.to_string(),
            major_version: Version::from(version.major_minor()),
            version,
        }
    }

    /// Override the derived release series (clang build numbers have none).
    pub fn with_major(mut self, major: &str) -> Self {
        self.major_version = Version::new(major);
        self
    }
}

impl std::fmt::Display for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// "This formula does not build with `compiler` at `major_version`,
/// from `version` onwards." No `version` means every release fails.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompilerFailure {
    pub compiler: String,
    pub major_version: Version,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub cause: String,
}

impl CompilerFailure {
    pub fn new(compiler: &str, major_version: &str, version: Option<&str>) -> Self {
        Self {
            compiler: compiler.to_string(),
            major_version: Version::new(major_version),
            version: version.map(Version::new),
            cause: String::new(),
        }
    }

    pub fn with_cause(mut self, cause: &str) -> Self {
        self.cause = cause.to_string();
        self
    }

    pub fn matches(&self, compiler: &Compiler) -> bool {
        self.compiler == compiler.name
            && self.major_version == compiler.major_version
            && self.version.as_ref().is_none_or(|v| compiler.version >= *v)
    }
}

/// Compilers found on `PATH`, in preference order (clang, then gcc), with
/// the version each reports for `-dumpversion`.
pub fn detect_compilers() -> Vec<Compiler> {
    let mut found = Vec::new();
    for name in ["clang", "gcc"] {
        let Ok(path) = which::which(name) else {
            continue;
        };
        let output = match std::process::Command::new(&path).arg("-dumpversion").output() {
            Ok(output) if output.status.success() => output,
            _ => {
                debug!("{} did not report a version", path.display());
                continue;
            }
        };
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !version.is_empty() {
            found.push(Compiler::new(name, &version));
        }
    }
    found
}

/// True iff some record in `failures` matches `compiler`.
pub fn is_incompatible(failures: &BTreeSet<CompilerFailure>, compiler: &Compiler) -> bool {
    failures.iter().any(|f| f.matches(compiler))
}

/// Picks the first compiler, in priority order, that a formula builds with.
#[derive(Debug)]
pub struct CompilerSelector<'a> {
    name: &'a PackageName,
    failures: &'a BTreeSet<CompilerFailure>,
}

impl<'a> CompilerSelector<'a> {
    pub fn new(name: &'a PackageName, failures: &'a BTreeSet<CompilerFailure>) -> Self {
        Self { name, failures }
    }

    /// # Errors
    ///
    /// [`BuildError::NoCompatibleCompiler`] when every candidate is
    /// blacklisted, listing the declared causes.
    pub fn select<'c>(&self, candidates: &'c [Compiler]) -> Result<&'c Compiler> {
        if let Some(compiler) = candidates
            .iter()
            .find(|c| !is_incompatible(self.failures, c))
        {
            return Ok(compiler);
        }

        let causes = candidates
            .iter()
            .flat_map(|c| {
                self.failures.iter().filter(move |f| f.matches(c)).map(move |f| {
                    if f.cause.is_empty() {
                        format!("{c} is known to fail")
                    } else {
                        format!("{c}: {}", f.cause)
                    }
                })
            })
            .collect();
        Err(BuildError::NoCompatibleCompiler {
            name: self.name.clone(),
            causes,
        })
    }
}
