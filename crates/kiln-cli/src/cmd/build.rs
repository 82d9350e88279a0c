//! Build command

use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use kiln_core::compiler::detect_compilers;
use kiln_core::paths;
use kiln_core::{
    BuildContext, BuildError, BuildSession, Fetcher, Formula, Formulary, LocalFetcher,
    PlatformBottlePolicy, Reporter,
};

use crate::FormulaArgs;
use crate::ui::{self, TerminalReporter};

/// Everything `kiln build` was invoked with.
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub formula: FormulaArgs,
    pub build_from_source: bool,
    pub verbose: bool,
    pub source: Option<PathBuf>,
    pub prefix: Option<PathBuf>,
    pub options: Vec<String>,
}

/// Resolve, check and build one formula.
pub fn build(args: &BuildArgs) -> Result<()> {
    let (def, formulary) = args.formula.load()?;
    let policy = PlatformBottlePolicy::new(args.build_from_source, args.options.is_empty());
    let formula = Formula::new(def, args.formula.mode(), &policy, &args.options)?;
    let reporter = Arc::new(TerminalReporter::new());

    for flag in formula.build_configuration().ignored() {
        reporter.warning(&format!("{}: ignoring unknown option {flag}", formula.name()));
    }

    if formula.pours_bottle() {
        let url = formula.url().unwrap_or_default();
        bail!(
            "{} {} has a bottle for this platform ({url}); pouring bottles is not supported, \
             rerun with --build-from-source",
            formula.name(),
            formula.version()
        );
    }

    check_environment(&formula, &formulary, reporter.as_ref())?;

    let mut session = BuildSession::new(&formula, reporter.clone());
    if args.verbose {
        session = session.verbose(true);
    }
    let compilers = detect_compilers();
    if compilers.is_empty() {
        reporter.warning("no C compiler found on PATH");
    } else {
        let cc = formula.select_compiler(&compilers)?;
        reporter.info(&format!("Using {cc}"));
        session = session.env("CC", &cc.name).env("CXX", cxx_for(&cc.name));
    }

    let source = match &args.source {
        Some(path) => path.clone(),
        None => fetch_source(&formula, reporter.as_ref())?,
    };
    let prefix = args.prefix.clone().unwrap_or_else(|| {
        paths::install_prefix(formula.name(), &formula.version().to_string())
    });
    std::fs::create_dir_all(&prefix)
        .with_context(|| format!("Failed to create {}", prefix.display()))?;

    let build_dir = tempfile::Builder::new()
        .prefix(&format!("kiln-{}-", formula.name()))
        .tempdir()
        .context("Failed to create build directory")?;
    debug!("building in {}", build_dir.path().display());

    ui::header(&format!("Building {} {}", formula.name(), formula.version()));
    let ctx = BuildContext {
        buildpath: session.stage(&source, build_dir.path())?,
        prefix: prefix.clone(),
    };

    match session.build(&ctx, &LocalFetcher) {
        Ok(exec) => {
            println!(
                "{} {} {} built into {} ({} commands, logs in {})",
                "✓".green().bold(),
                formula.name().as_str().bold(),
                formula.version(),
                prefix.display(),
                exec.invocations(),
                exec.log_dir().display()
            );
            Ok(())
        }
        Err(err) => {
            report_failure(&err);
            Err(err.into())
        }
    }
}

/// Requirements, conflicts and the dependency closure, checked before any
/// source is touched.
fn check_environment(
    formula: &Formula,
    formulary: &Formulary,
    reporter: &dyn Reporter,
) -> Result<()> {
    let unsatisfied: Vec<String> = formula
        .expand_requirements(formulary)?
        .iter()
        .filter(|r| !r.is_satisfied())
        .map(ToString::to_string)
        .collect();
    if !unsatisfied.is_empty() {
        bail!(
            "{}: unsatisfied requirements: {}",
            formula.name(),
            unsatisfied.join(", ")
        );
    }

    for conflict in formula.conflicts() {
        if paths::prefix_root().join(conflict.as_str()).exists() {
            reporter.warning(&format!(
                "{} conflicts with installed formula {conflict}",
                formula.name()
            ));
        }
    }

    let deps = formula.expand_dependencies(formulary)?;
    if !deps.is_empty() {
        let names: Vec<String> = deps.iter().map(ToString::to_string).collect();
        reporter.info(&format!("Dependencies: {}", names.join(", ")));
    }
    Ok(())
}

/// Fetch the active source into the download cache and verify it.
fn fetch_source(formula: &Formula, reporter: &dyn Reporter) -> Result<PathBuf> {
    let spec = formula
        .active_source()
        .with_context(|| format!("{} has no source to build", formula.name()))?;
    let url = spec
        .url
        .as_deref()
        .with_context(|| format!("{} has no source URL", formula.name()))?;

    let cache = paths::cache_path();
    std::fs::create_dir_all(&cache)
        .with_context(|| format!("Failed to create {}", cache.display()))?;

    reporter.step(&format!("Fetching {url}"));
    let path = LocalFetcher.fetch(url, &spec.mirrors, &cache)?;
    match &spec.checksum {
        Some(checksum) => {
            if !LocalFetcher.verify(&path, checksum)? {
                return Err(BuildError::ChecksumMismatch {
                    path,
                    expected: checksum.clone(),
                }
                .into());
            }
        }
        None => reporter.warning(&format!("{} has no checksum to verify", display_name(&path))),
    }
    Ok(path)
}

fn report_failure(err: &BuildError) {
    if let Some(log) = err.log_path() {
        eprintln!("{} {}", "Logs:".dark_grey(), log.display());
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// The C++ driver paired with a C compiler.
fn cxx_for(cc: &str) -> &'static str {
    match cc {
        "clang" => "clang++",
        "gcc" => "g++",
        _ => "c++",
    }
}
