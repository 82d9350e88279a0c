//! Filesystem locations and environment-driven settings.
//!
//! | Variable | Default |
//! |---|---|
//! | `KILN_HOME` | `~/.kiln` |
//! | `KILN_LOGS` | `$KILN_HOME/logs` |
//! | `KILN_CACHE` | `$KILN_HOME/cache` |
//! | `KILN_PREFIX` | `$KILN_HOME/prefix` |
//! | `KILN_FAIL_LOG_LINES` | `5` |
//! | `KILN_VERBOSE` | unset (quiet) |

use dirs::home_dir;
use std::path::PathBuf;

use kiln_schema::PackageName;

/// Number of log lines echoed when a build command fails.
pub const DEFAULT_FAIL_LOG_LINES: usize = 5;

/// Returns the primary configuration directory, or None if the user's home cannot be resolved.
pub fn try_kiln_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("KILN_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".kiln"))
}

/// Returns the kiln home directory, falling back to a directory under the
/// system temp dir when no home can be determined.
pub fn kiln_home() -> PathBuf {
    try_kiln_home().unwrap_or_else(|| std::env::temp_dir().join("kiln"))
}

/// Logs root: `$KILN_LOGS` or `~/.kiln/logs`
pub fn log_root() -> PathBuf {
    std::env::var_os("KILN_LOGS").map_or_else(|| kiln_home().join("logs"), PathBuf::from)
}

/// Per-formula build log directory: `<log root>/<name>`
pub fn formula_log_dir(name: &PackageName) -> PathBuf {
    log_root().join(name.as_str())
}

/// Download cache: `$KILN_CACHE` or `~/.kiln/cache`
pub fn cache_path() -> PathBuf {
    std::env::var_os("KILN_CACHE").map_or_else(|| kiln_home().join("cache"), PathBuf::from)
}

/// Install root: `$KILN_PREFIX` or `~/.kiln/prefix`
pub fn prefix_root() -> PathBuf {
    std::env::var_os("KILN_PREFIX").map_or_else(|| kiln_home().join("prefix"), PathBuf::from)
}

/// Default install prefix of one formula version: `<prefix root>/<name>/<version>`
pub fn install_prefix(name: &PackageName, version: &str) -> PathBuf {
    prefix_root().join(name.as_str()).join(version)
}

/// How many trailing log lines to show for a failed command.
pub fn fail_log_lines() -> usize {
    std::env::var("KILN_FAIL_LOG_LINES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_FAIL_LOG_LINES)
}

/// Whether verbose output was requested through the environment.
pub fn verbose_from_env() -> bool {
    std::env::var("KILN_VERBOSE").is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("")
}
