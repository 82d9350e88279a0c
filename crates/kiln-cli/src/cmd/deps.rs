//! Deps command

use anyhow::Result;
use crossterm::style::Stylize;

use kiln_core::deps::{Dependency, Expansion, default_filter, runtime_filter};
use kiln_core::{Formula, PlatformBottlePolicy};
use kiln_schema::PackageName;

use crate::FormulaArgs;

/// Print the dependency closure in installation order, then every
/// requirement with whether it holds on this machine.
pub fn deps(args: &FormulaArgs, runtime: bool, options: &[String]) -> Result<()> {
    let (def, formulary) = args.load()?;
    let policy = PlatformBottlePolicy::new(false, options.is_empty());
    let formula = Formula::new(def, args.mode(), &policy, options)?;

    let deps = if runtime {
        let default = default_filter(formula.name(), formula.build_configuration());
        let runtime = runtime_filter(formula.name());
        let filter = move |dependent: &PackageName, dep: &Dependency| {
            match default(dependent, dep) {
                Expansion::Keep => runtime(dependent, dep),
                other => other,
            }
        };
        formula.expand_dependencies_with(&formulary, Some(&filter))?
    } else {
        formula.expand_dependencies(&formulary)?
    };
    let requirements = formula.expand_requirements(&formulary)?;

    for dep in &deps {
        println!("{}{}", dep.name, format_tags(dep).dark_grey());
    }

    if !requirements.is_empty() {
        if !deps.is_empty() {
            println!();
        }
        for req in &requirements {
            let mark = if req.is_satisfied() {
                "✓".green()
            } else {
                "✗".red()
            };
            println!("{mark} {req}");
        }
    }
    Ok(())
}

fn format_tags(dep: &Dependency) -> String {
    if dep.tags.is_empty() {
        return String::new();
    }
    let tags: Vec<String> = dep
        .tags
        .iter()
        .map(|t| format!("{t:?}").to_lowercase())
        .collect();
    format!(" ({})", tags.join(", "))
}
