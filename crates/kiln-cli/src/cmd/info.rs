//! Info command

use anyhow::Result;
use crossterm::style::Stylize;

use kiln_core::spec::SoftwareSpec;
use kiln_core::{FormulaDefinition, SpecKind};
use kiln_schema::PackageName;

use crate::FormulaArgs;

/// Show what a formula declares, without resolving a build.
pub fn info(args: &FormulaArgs) -> Result<()> {
    let (def, _) = args.load()?;
    let lw = 12;

    let version = def
        .specs
        .upstream_version(SpecKind::Stable)
        .map_or_else(|| "?".to_string(), |v| v.to_string());

    println!();
    println!("  {} {}", def.name.as_str().white().bold(), version.dark_grey());
    println!();

    if !def.homepage.is_empty() {
        println!("  {:<lw$}{}", "homepage", def.homepage);
    }
    for (label, spec) in specs(&def) {
        if let Some(url) = &spec.url {
            println!("  {label:<lw$}{url}");
        }
    }
    if let Some(bottle) = &def.specs.bottle {
        let tags: Vec<&str> = bottle.checksums.keys().map(String::as_str).collect();
        println!("  {:<lw$}{}", "bottles", tags.join(", "));
    }
    if let Some(primary) = def.primary_spec() {
        if !primary.dependencies.is_empty() {
            let names: Vec<String> =
                primary.dependencies.iter().map(ToString::to_string).collect();
            println!("  {:<lw$}{}", "requires", names.join(", "));
        }
    }
    if !def.conflicts.is_empty() {
        let names: Vec<&str> = def.conflicts.iter().map(PackageName::as_str).collect();
        println!("  {:<lw$}{}", "conflicts", names.join(", "));
    }
    if !def.patches.is_empty() {
        println!("  {:<lw$}{}", "patches", def.patches.len());
    }

    if !def.options.is_empty() {
        println!();
        for option in &def.options {
            println!("  {:<lw$}{}", option.flag(), option.description.as_str().dark_grey());
        }
    }

    Ok(())
}

fn specs(def: &FormulaDefinition) -> Vec<(&'static str, &SoftwareSpec)> {
    [
        ("stable", def.specs.stable.as_ref()),
        ("devel", def.specs.devel.as_ref()),
        ("head", def.specs.head.as_ref()),
    ]
    .into_iter()
    .filter_map(|(label, spec)| spec.map(|s| (label, s)))
    .collect()
}
