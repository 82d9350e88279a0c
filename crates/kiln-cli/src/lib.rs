//! kiln - build formulae from source
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves a formula file, checks its requirements, compiler and
//! dependencies, then fetches, patches and builds it with every command's
//! output captured under the log directory.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.kiln/
//! ├── cache/      # Fetched sources and patches
//! ├── logs/       # <formula>/NN.<command> build logs
//! └── prefix/     # <formula>/<version> install prefixes
//! ```

pub mod cmd;
pub mod ui;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use kiln_core::loader::load_definition;
use kiln_core::{BuildMode, FormulaDefinition, Formulary};

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "kiln - build formulae from source")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by every command that resolves a formula.
#[derive(Debug, Clone, Args)]
pub struct FormulaArgs {
    /// Formula file (TOML)
    pub formula: PathBuf,
    /// Directory holding the formulae of dependencies (defaults to the
    /// formula file's directory)
    #[arg(long, env = "KILN_FORMULA_DIR")]
    pub formula_dir: Option<PathBuf>,
    /// Build the head (development tip) version
    #[arg(long = "HEAD")]
    pub head: bool,
    /// Build the devel version
    #[arg(long)]
    pub devel: bool,
}

impl FormulaArgs {
    pub fn mode(&self) -> BuildMode {
        BuildMode {
            head: self.head,
            devel: self.devel,
        }
    }

    /// Load the formula file and the formulae next to it.
    pub fn load(&self) -> Result<(FormulaDefinition, Formulary)> {
        let def = load_definition(&self.formula)
            .with_context(|| format!("Failed to load {}", self.formula.display()))?;

        let dir = match &self.formula_dir {
            Some(dir) => dir.clone(),
            None => parent_dir(&self.formula),
        };
        let mut formulary = if dir.is_dir() {
            Formulary::load_dir(&dir)
                .with_context(|| format!("Failed to load formulae from {}", dir.display()))?
        } else {
            Formulary::new()
        };
        formulary.insert(def.clone());
        Ok((def, formulary))
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build and install a formula from source
    Build {
        #[command(flatten)]
        formula: FormulaArgs,
        /// Never pour a bottle
        #[arg(short = 's', long)]
        build_from_source: bool,
        /// Echo every line of build output
        #[arg(short, long, env = "KILN_VERBOSE")]
        verbose: bool,
        /// Use this source tree or archive instead of fetching the URL
        #[arg(long)]
        source: Option<PathBuf>,
        /// Install prefix (defaults to ~/.kiln/prefix/<name>/<version>)
        #[arg(long)]
        prefix: Option<PathBuf>,
        /// Build options, e.g. --with-docs --without-ssl
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Show a formula's dependencies in installation order
    Deps {
        #[command(flatten)]
        formula: FormulaArgs,
        /// Leave out build-only dependencies of dependencies
        #[arg(long)]
        runtime: bool,
        /// Build options that decide optional dependencies
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Show formula info
    Info {
        #[command(flatten)]
        formula: FormulaArgs,
    },
}
