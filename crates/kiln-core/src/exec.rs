//! Supervised execution of build commands.
//!
//! Each [`Executor::run`] spawns one child with stdout and stderr merged
//! into a single pipe, copies every line into a numbered log file
//! (`01.configure`, `02.make`, ...) and, in verbose mode, echoes it through
//! the [`Reporter`]. A nonzero exit shows the tail of the log, appends a
//! snapshot of the build configuration to it and returns
//! [`BuildError::BuildCommandFailed`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use kiln_schema::{PackageName, Platform};

use crate::error::{BuildError, Result};
use crate::formula::Formula;
use crate::paths::DEFAULT_FAIL_LOG_LINES;
use crate::reporter::{NullReporter, Reporter};

/// Variables that steer compiler selection. `xcodebuild` picks its own
/// toolchain and breaks when these leak in.
const COMPILER_ENV: [&str; 12] = [
    "CC",
    "CXX",
    "OBJC",
    "OBJCXX",
    "CPP",
    "LD",
    "CFLAGS",
    "CXXFLAGS",
    "OBJCFLAGS",
    "OBJCXXFLAGS",
    "LDFLAGS",
    "CPPFLAGS",
];

/// `./configure` flags hidden from the displayed command line.
const BORING_CONFIGURE_ARGS: [&str; 2] = ["--disable-dependency-tracking", "--disable-debug"];

/// Build outputs worth keeping next to the logs when a build fails.
const AUXILIARY_LOGS: [&str; 2] = ["config.log", "CMakeCache.txt"];

/// Writes a human-readable description of the build for failed logs.
pub trait Snapshot {
    /// # Errors
    ///
    /// Propagates write errors.
    fn write_to(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

/// Formula identity, build configuration, platform and the compiler
/// environment, captured when the executor is created.
#[derive(Debug, Clone, Default)]
pub struct BuildSnapshot {
    entries: Vec<(String, String)>,
}

impl BuildSnapshot {
    pub fn for_formula(formula: &Formula) -> Self {
        let mut snapshot = Self::default();
        snapshot.push("KILN_VERSION", env!("CARGO_PKG_VERSION"));
        snapshot.push("FORMULA", formula.name().as_str());
        snapshot.push("VERSION", &formula.version().to_string());
        snapshot.push("SPEC", formula.active_spec().as_str());
        snapshot.push("OPTIONS", &formula.build_configuration().to_string());
        snapshot.push("PLATFORM", &Platform::current().tag());
        snapshot.push("CPU_COUNT", &num_cpus::get().to_string());
        for var in COMPILER_ENV.iter().copied().chain(["PATH", "MAKEFLAGS"]) {
            if let Ok(value) = std::env::var(var) {
                snapshot.push(var, &value);
            }
        }
        snapshot
    }

    /// Record an extra entry; later entries with the same key win.
    pub fn push(&mut self, key: &str, value: &str) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl Snapshot for BuildSnapshot {
    fn write_to(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for (key, value) in &self.entries {
            writeln!(out, "{key}: {value}")?;
        }
        Ok(())
    }
}

/// Kills and reaps the child unless it was waited for.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn wait(mut self) -> std::io::Result<ExitStatus> {
        let Some(child) = self.0.as_mut() else {
            return Err(std::io::Error::other("child already reaped"));
        };
        let status = child.wait()?;
        self.0 = None;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Runs the commands of one build, numbering their logs.
pub struct Executor {
    log_dir: PathBuf,
    counter: u32,
    verbose: bool,
    tail_lines: usize,
    current_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    reporter: Arc<dyn Reporter>,
    snapshot: Option<Box<dyn Snapshot>>,
}

impl Executor {
    /// An executor writing logs into `log_dir`, which is created on first use.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            counter: 0,
            verbose: false,
            tail_lines: DEFAULT_FAIL_LOG_LINES,
            current_dir: None,
            env: Vec::new(),
            reporter: Arc::new(NullReporter),
            snapshot: None,
        }
    }

    /// Logs go to `<log root>/<name>`.
    pub fn for_package(name: &PackageName) -> Self {
        Self::new(crate::paths::formula_log_dir(name))
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Set a variable for every command this executor runs.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.retain(|(k, _)| k != key);
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn snapshot(mut self, snapshot: Box<dyn Snapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Number of commands run so far.
    pub fn invocations(&self) -> u32 {
        self.counter
    }

    /// Run `command` to completion.
    ///
    /// # Errors
    ///
    /// - [`BuildError::BuildCommandFailed`] on a nonzero exit, or with
    ///   status 127 when the command could not be started.
    /// - [`BuildError::Io`] when the log cannot be written.
    pub fn run<S: AsRef<str>>(&mut self, command: &str, args: &[S]) -> Result<()> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();

        self.counter += 1;
        let base = base_name(command);
        let log_path = self.log_dir.join(format!("{:02}.{base}", self.counter));
        std::fs::create_dir_all(&self.log_dir)?;

        let full = command_line(command, &args);
        let shown = if !self.verbose && base == "configure" {
            let kept: Vec<String> = args
                .iter()
                .filter(|a| !BORING_CONFIGURE_ARGS.contains(&a.as_str()))
                .cloned()
                .collect();
            command_line(command, &kept)
        } else {
            full.clone()
        };
        self.reporter.step(&shown);

        let mut log = BufWriter::new(File::create(&log_path)?);
        writeln!(log, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z"))?;
        writeln!(log)?;
        writeln!(log, "{full}")?;
        writeln!(log)?;

        let status = match self.spawn_and_tee(command, base, &args, &mut log) {
            Ok(status) => status.code(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                writeln!(log, "{command}: {err}")?;
                Some(127)
            }
            Err(err) => return Err(err.into()),
        };
        log.flush()?;
        drop(log);

        if status == Some(0) {
            return Ok(());
        }

        if !self.verbose {
            let lines = read_last_lines(&log_path, self.tail_lines)?;
            self.reporter.tail(&log_path, &lines);
        }
        if let Some(snapshot) = &self.snapshot {
            let mut file = OpenOptions::new().append(true).open(&log_path)?;
            writeln!(file)?;
            snapshot.write_to(&mut file)?;
        }

        Err(BuildError::BuildCommandFailed {
            command: command.to_string(),
            args,
            status,
            log: log_path,
        })
    }

    fn spawn_and_tee(
        &self,
        command: &str,
        base: &str,
        args: &[String],
        log: &mut impl Write,
    ) -> std::io::Result<ExitStatus> {
        let (reader, writer) = std::io::pipe()?;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if base == "xcodebuild" {
            for var in COMPILER_ENV {
                cmd.env_remove(var);
            }
        }

        debug!("spawning {}", command_line(command, args));
        let child = cmd.spawn()?;
        // The parent's copies of the write end live in `cmd`; the reader only
        // sees EOF once they are closed.
        drop(cmd);
        let guard = ChildGuard(Some(child));

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            writeln!(log, "{line}")?;
            if self.verbose {
                self.reporter.output(line);
            }
        }

        guard.wait()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("log_dir", &self.log_dir)
            .field("counter", &self.counter)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

fn base_name(command: &str) -> &str {
    command.rsplit('/').next().unwrap_or(command)
}

fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    }
}

/// Read the last `n` lines of a log without loading all of it.
fn read_last_lines(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let text = String::from_utf8_lossy(&bytes);
    // Skip the partial first line after seeking into the middle.
    let content = if start > 0 {
        text.find('\n').map_or(&text[..], |i| &text[i + 1..])
    } else {
        &text[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let from = lines.len().saturating_sub(n);
    Ok(lines[from..].iter().map(|l| (*l).to_string()).collect())
}

/// Copy `config.log` and `CMakeCache.txt` files found under `build_dir`
/// into `log_dir`, keeping their relative paths. Returns the copies.
///
/// # Errors
///
/// I/O errors from creating directories or copying.
pub fn preserve_auxiliary_logs(build_dir: &Path, log_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    for entry in WalkDir::new(build_dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !AUXILIARY_LOGS.contains(&name.as_ref()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(build_dir) else {
            continue;
        };
        let dest = log_dir.join(relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::copy(entry.path(), &dest) {
            Ok(_) => copied.push(dest),
            Err(err) => warn!("could not preserve {}: {err}", entry.path().display()),
        }
    }
    Ok(copied)
}
