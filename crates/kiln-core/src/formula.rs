//! A formula resolved for one build session.
//!
//! [`FormulaDefinition`] is what a loader produces: every declared variant,
//! option, conflict, compiler failure and patch, with nothing decided yet.
//! [`Formula::new`] makes the decisions once (active specification,
//! version, build configuration) and the result never changes afterwards.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use kiln_schema::{PackageName, PkgVersion, Version};

use crate::compiler::{Compiler, CompilerFailure, CompilerSelector};
use crate::deps::{
    self, Dependency, DependencyFilter, FormulaLookup, Requirement, default_filter,
};
use crate::error::{BuildError, Result};
use crate::options::{BuildConfiguration, BuildOption, Options, resolve_build_options};
use crate::patch::PatchList;
use crate::selector::{BottleInstallability, BuildMode, select_active};
use crate::session::BuildStep;
use crate::spec::{SoftwareSpec, SpecKind, SpecSet};

/// Everything a formula file declares.
#[derive(Debug, Clone, Default)]
pub struct FormulaDefinition {
    pub name: PackageName,
    /// File the definition was loaded from.
    pub path: PathBuf,
    pub homepage: String,
    pub revision: u32,
    pub specs: SpecSet,
    pub options: Vec<BuildOption>,
    pub conflicts: Vec<PackageName>,
    pub compiler_failures: BTreeSet<CompilerFailure>,
    pub patches: PatchList,
    pub steps: Vec<BuildStep>,
}

impl FormulaDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: PackageName::new(name),
            ..Self::default()
        }
    }

    /// The specification that describes this formula to other formulas:
    /// stable, else devel, else head.
    pub fn primary_spec(&self) -> Option<&SoftwareSpec> {
        [SpecKind::Stable, SpecKind::Devel, SpecKind::Head]
            .into_iter()
            .find_map(|kind| self.specs.source(kind).filter(|s| s.is_usable()))
    }
}

/// A formula with its active specification chosen.
#[derive(Debug, Clone)]
pub struct Formula {
    name: PackageName,
    path: PathBuf,
    homepage: String,
    revision: u32,
    specs: SpecSet,
    active: SpecKind,
    version: PkgVersion,
    config: BuildConfiguration,
    conflicts: Vec<PackageName>,
    compiler_failures: BTreeSet<CompilerFailure>,
    patches: PatchList,
    steps: Vec<BuildStep>,
}

impl Formula {
    /// Resolve `def` for a build in `mode` with the caller's `requested`
    /// option flags.
    ///
    /// # Errors
    ///
    /// - [`BuildError::MissingSourceSpecification`] when no variant applies.
    /// - [`BuildError::BottleVersionUnset`] when a bottle is selected but
    ///   there is no stable version for it.
    /// - [`BuildError::InvalidSpecificationAttribute`] when the url, name or
    ///   version is empty or contains whitespace.
    pub fn new<S: AsRef<str>>(
        def: FormulaDefinition,
        mode: BuildMode,
        installability: &dyn BottleInstallability,
        requested: &[S],
    ) -> Result<Self> {
        let FormulaDefinition {
            name,
            path,
            homepage,
            revision,
            mut specs,
            options,
            conflicts,
            compiler_failures,
            patches,
            steps,
        } = def;

        specs.assign_bottle_version(revision);
        let active = select_active(&name, &specs, mode, installability)?;

        let version = match specs.compute_version(active, revision) {
            Some(version) => version,
            None if active == SpecKind::Bottle => {
                return Err(BuildError::BottleVersionUnset { name });
            }
            None => PkgVersion::new(Version::new(""), revision),
        };

        let url = match active {
            SpecKind::Bottle => specs
                .bottle
                .as_ref()
                .and_then(|b| b.url(&name))
                .unwrap_or_default(),
            _ => specs
                .source(active)
                .and_then(|s| s.url.clone())
                .unwrap_or_default(),
        };
        let url_malformed = url.is_empty() || url.chars().any(char::is_whitespace);
        validate_identity(&name, "url", &url, url_malformed)?;
        validate_identity(&name, "name", name.as_str(), name.is_malformed())?;
        validate_identity(
            &name,
            "version",
            version.version.as_str(),
            version.version.is_malformed(),
        )?;

        let toggles = match specs.source_mut(active) {
            Some(source) => {
                resolve_build_options(&options, &mut source.options);
                source.options.clone()
            }
            None => options.iter().cloned().collect::<Options>(),
        };
        let config = BuildConfiguration::new(toggles, requested);

        info!("{name}: {active} {version} {config}");

        Ok(Self {
            name,
            path,
            homepage,
            revision,
            specs,
            active,
            version,
            config,
            conflicts,
            compiler_failures,
            patches,
            steps,
        })
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn specs(&self) -> &SpecSet {
        &self.specs
    }

    /// The variant this build uses.
    pub fn active_spec(&self) -> SpecKind {
        self.active
    }

    /// The from-source specification behind the active variant. For a
    /// bottle this is stable.
    pub fn active_source(&self) -> Option<&SoftwareSpec> {
        self.specs.source(self.active)
    }

    /// True when the build pours a bottle instead of compiling.
    pub fn pours_bottle(&self) -> bool {
        self.active == SpecKind::Bottle
    }

    /// Where the active variant downloads from.
    pub fn url(&self) -> Option<String> {
        match self.active {
            SpecKind::Bottle => self.specs.bottle.as_ref()?.url(&self.name),
            _ => self.active_source()?.url.clone(),
        }
    }

    pub fn version(&self) -> &PkgVersion {
        &self.version
    }

    pub fn build_configuration(&self) -> &BuildConfiguration {
        &self.config
    }

    /// Direct dependencies of the active variant.
    pub fn dependencies(&self) -> &[Dependency] {
        self.active_source()
            .map(|s| s.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Direct requirements of the active variant.
    pub fn requirements(&self) -> &[Requirement] {
        self.active_source()
            .map(|s| s.requirements.as_slice())
            .unwrap_or_default()
    }

    pub fn patches(&self) -> &PatchList {
        &self.patches
    }

    pub fn compiler_failures(&self) -> &BTreeSet<CompilerFailure> {
        &self.compiler_failures
    }

    pub fn conflicts(&self) -> &[PackageName] {
        &self.conflicts
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    /// All dependencies in installation order, honoring this build's
    /// options.
    ///
    /// # Errors
    ///
    /// See [`deps::expand_dependencies`].
    pub fn expand_dependencies(&self, lookup: &dyn FormulaLookup) -> Result<Vec<Dependency>> {
        let filter = default_filter(&self.name, &self.config);
        self.expand_dependencies_with(lookup, Some(&filter))
    }

    /// Like [`expand_dependencies`](Self::expand_dependencies) with a
    /// caller-supplied edge filter.
    ///
    /// # Errors
    ///
    /// See [`deps::expand_dependencies`].
    pub fn expand_dependencies_with(
        &self,
        lookup: &dyn FormulaLookup,
        filter: Option<&DependencyFilter<'_>>,
    ) -> Result<Vec<Dependency>> {
        deps::expand_dependencies(&self.name, self.dependencies(), lookup, filter)
    }

    /// Requirements of this formula and of every dependency it pulls in.
    ///
    /// # Errors
    ///
    /// See [`deps::expand_requirements`].
    pub fn expand_requirements(&self, lookup: &dyn FormulaLookup) -> Result<Vec<Requirement>> {
        let filter = default_filter(&self.name, &self.config);
        deps::expand_requirements(
            &self.name,
            self.requirements(),
            self.dependencies(),
            lookup,
            Some(&filter),
        )
    }

    /// The first of `candidates` this formula is not known to fail with.
    ///
    /// # Errors
    ///
    /// [`BuildError::NoCompatibleCompiler`] when every candidate is excluded.
    pub fn select_compiler<'c>(&self, candidates: &'c [Compiler]) -> Result<&'c Compiler> {
        CompilerSelector::new(&self.name, &self.compiler_failures).select(candidates)
    }
}

fn validate_identity(
    name: &PackageName,
    field: &'static str,
    value: &str,
    malformed: bool,
) -> Result<()> {
    if malformed {
        return Err(BuildError::InvalidSpecificationAttribute {
            name: name.to_string(),
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Formula definitions keyed by name. Answers dependency lookups from each
/// definition's primary specification.
#[derive(Debug, Default)]
pub struct Formulary {
    definitions: HashMap<PackageName, FormulaDefinition>,
}

impl Formulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, def: FormulaDefinition) {
        debug!("formulary: registered {}", def.name);
        self.definitions.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &PackageName) -> Option<&FormulaDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.definitions.keys()
    }

    fn primary(&self, name: &PackageName) -> Result<Option<&SoftwareSpec>> {
        self.definitions
            .get(name)
            .map(FormulaDefinition::primary_spec)
            .ok_or_else(|| BuildError::UnknownFormula(name.clone()))
    }
}

impl FormulaLookup for Formulary {
    fn dependencies(&self, name: &PackageName) -> Result<Vec<Dependency>> {
        Ok(self
            .primary(name)?
            .map(|s| s.dependencies.clone())
            .unwrap_or_default())
    }

    fn requirements(&self, name: &PackageName) -> Result<Vec<Requirement>> {
        Ok(self
            .primary(name)?
            .map(|s| s.requirements.clone())
            .unwrap_or_default())
    }
}

impl FromIterator<FormulaDefinition> for Formulary {
    fn from_iter<I: IntoIterator<Item = FormulaDefinition>>(iter: I) -> Self {
        let mut formulary = Self::new();
        for def in iter {
            formulary.insert(def);
        }
        formulary
    }
}
