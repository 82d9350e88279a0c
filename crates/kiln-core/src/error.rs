//! Errors raised by the build engine.
//!
//! Every variant is fatal to the operation that raised it and propagates
//! synchronously to the caller; nothing in this crate retries.

use std::path::PathBuf;
use thiserror::Error;

use kiln_schema::{Checksum, PackageName};

/// Errors that can occur while resolving or building a formula.
#[derive(Error, Debug)]
pub enum BuildError {
    /// No stable, devel, head or installable bottle specification exists.
    #[error("{name}: formula declares no usable source")]
    MissingSourceSpecification {
        /// Formula that was being constructed.
        name: PackageName,
    },

    /// An identity field (`url`, `name`, `version`) is empty or has whitespace.
    #[error("invalid attribute for formula '{name}': {field} ({value:?})")]
    InvalidSpecificationAttribute {
        /// Formula that was being constructed.
        name: String,
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A bottle was selected but there is no stable version to derive its version from.
    #[error("{name}: bottle selected but no stable version to derive its version from")]
    BottleVersionUnset {
        /// Formula that was being constructed.
        name: PackageName,
    },

    /// The dependency graph loops back on itself.
    #[error("circular dependency detected: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// The traversal path from the first revisited package back to itself.
        cycle: Vec<PackageName>,
    },

    /// A dependency names a formula the lookup does not know.
    #[error("no available formula named '{0}'")]
    UnknownFormula(PackageName),

    /// Every candidate compiler is blacklisted for this formula.
    #[error("{name} cannot be built with any available compiler: {}", .causes.join("; "))]
    NoCompatibleCompiler {
        /// Formula being built.
        name: PackageName,
        /// Human-readable reasons taken from the matching failure records.
        causes: Vec<String>,
    },

    /// A downloaded file does not hash to the declared checksum.
    #[error("checksum mismatch for {}: expected {expected}", .path.display())]
    ChecksumMismatch {
        /// The downloaded file.
        path: PathBuf,
        /// The declared checksum.
        expected: Checksum,
    },

    /// The fetch collaborator could not produce a local copy.
    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        /// The URL that failed.
        url: String,
        /// Collaborator-provided reason.
        reason: String,
    },

    /// The system patch tool (or a decompressor) exited nonzero.
    #[error("failed to apply patch {patch} with {tool} (exit status {})", format_status(.status))]
    PatchApplicationFailed {
        /// Display name of the patch (URL or staged file name).
        patch: String,
        /// The tool that failed (`patch`, `gunzip`, `bunzip2`).
        tool: String,
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
    },

    /// A supervised build command exited nonzero.
    #[error("failed executing: {command} {} (exit status {})", .args.join(" "), format_status(.status))]
    BuildCommandFailed {
        /// The program that was run.
        command: String,
        /// Its arguments, as passed to the child.
        args: Vec<String>,
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
        /// Log file holding the captured output and the build snapshot.
        log: PathBuf,
    },

    /// A formula definition could not be parsed.
    #[error("invalid formula definition {}: {message}", .path.display())]
    Definition {
        /// File that was being loaded.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// True for failures of the build itself (patching or a build step), as
    /// opposed to resolution errors raised before anything ran.
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::PatchApplicationFailed { .. } | Self::BuildCommandFailed { .. }
        )
    }

    /// The log file of a failed build command, if this is one.
    pub fn log_path(&self) -> Option<&std::path::Path> {
        match self {
            Self::BuildCommandFailed { log, .. } => Some(log),
            _ => None,
        }
    }
}

fn format_cycle(cycle: &[PackageName]) -> String {
    cycle
        .iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_status(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Shorthand for results carrying a [`BuildError`].
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_path() {
        let err = BuildError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_command_failure_message() {
        let err = BuildError::BuildCommandFailed {
            command: "make".into(),
            args: vec!["install".into()],
            status: Some(2),
            log: PathBuf::from("/tmp/logs/02.make"),
        };
        assert_eq!(err.to_string(), "failed executing: make install (exit status 2)");
        assert!(err.is_build_failure());
        assert_eq!(err.log_path(), Some(std::path::Path::new("/tmp/logs/02.make")));
    }
}
