//! Terminal output for builds.

use crossterm::style::Stylize;
use std::io::Write;
use std::path::Path;

use kiln_core::Reporter;

/// Prints build progress to stdout and problems to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalReporter;

impl TerminalReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for TerminalReporter {
    fn step(&self, title: &str) {
        println!("{} {}", "==>".blue().bold(), title.bold());
    }

    fn output(&self, line: &str) {
        println!("{line}");
    }

    fn tail(&self, log: &Path, lines: &[String]) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", format!("Last lines of {}:", log.display()).dark_grey());
        for line in lines {
            let _ = writeln!(err, "  {line}");
        }
    }

    fn info(&self, msg: &str) {
        println!("  {msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "Warning:".yellow().bold());
    }
}

/// Print a section header in the style of a build step.
pub fn header(title: &str) {
    TerminalReporter.step(title);
}
