//! Dependency and requirement expansion.
//!
//! [`expand_dependencies`] flattens a formula's dependency declarations into
//! an installation order: a depth-first walk that emits each package after
//! everything it depends on, visits a shared dependency once, and refuses
//! graphs with cycles. A filter decides per edge whether a dependency is
//! kept, skipped (children still walked) or pruned (whole branch dropped).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use kiln_schema::{PackageName, Version};

use crate::error::{BuildError, Result};
use crate::options::{BuildConfiguration, BuildOption};

/// When a dependency is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyTag {
    /// Needed only while building.
    Build,
    /// Off unless requested with `--with-<name>`.
    Optional,
    /// On unless disabled with `--without-<name>`.
    Recommended,
    /// Needed at runtime.
    Run,
}

/// A reference to another formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: PackageName,
    #[serde(default)]
    pub tags: BTreeSet<DependencyTag>,
}

impl Dependency {
    pub fn new(name: &str) -> Self {
        Self {
            name: PackageName::new(name),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags(name: &str, tags: &[DependencyTag]) -> Self {
        Self {
            name: PackageName::new(name),
            tags: tags.iter().copied().collect(),
        }
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(&DependencyTag::Build)
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(&DependencyTag::Optional)
    }

    pub fn is_recommended(&self) -> bool {
        self.tags.contains(&DependencyTag::Recommended)
    }

    /// The build option that controls this dependency, if any.
    pub fn option(&self) -> Option<BuildOption> {
        if self.is_optional() {
            Some(BuildOption::new(
                &format!("with-{}", self.name),
                &format!("Build with {} support", self.name),
            ))
        } else if self.is_recommended() {
            Some(BuildOption::new(
                &format!("without-{}", self.name),
                &format!("Build without {} support", self.name),
            ))
        } else {
            None
        }
    }

    /// Whether a build with `config` needs this dependency.
    pub fn is_required_by(&self, config: &BuildConfiguration) -> bool {
        if self.is_optional() {
            config.with(&self.name)
        } else if self.is_recommended() {
            !config.includes(&format!("without-{}", self.name))
        } else {
            true
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What a requirement checks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// An executable must be on `PATH`.
    Executable(String),
    /// The host OS version must be at least this.
    MinimumOs(Version),
    /// Checked by an external collaborator; always reported as satisfied here.
    Named,
}

/// A non-formula precondition on the build environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub kind: RequirementKind,
    #[serde(default)]
    pub tags: BTreeSet<DependencyTag>,
}

impl Requirement {
    pub fn executable(command: &str) -> Self {
        Self {
            name: command.to_string(),
            kind: RequirementKind::Executable(command.to_string()),
            tags: BTreeSet::new(),
        }
    }

    pub fn minimum_os(version: &str) -> Self {
        Self {
            name: format!("os>={version}"),
            kind: RequirementKind::MinimumOs(Version::new(version)),
            tags: BTreeSet::new(),
        }
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(&DependencyTag::Build)
    }

    pub fn is_satisfied(&self) -> bool {
        match &self.kind {
            RequirementKind::Executable(command) => which::which(command).is_ok(),
            RequirementKind::MinimumOs(minimum) => match host_os_version() {
                Some(current) => current >= *minimum,
                None => {
                    warn!("could not determine OS version for requirement {}", self.name);
                    false
                }
            },
            RequirementKind::Named => true,
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Product version on macOS (`sw_vers`), kernel release elsewhere.
fn host_os_version() -> Option<Version> {
    let mut cmd = if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("sw_vers");
        c.arg("-productVersion");
        c
    } else {
        let mut c = std::process::Command::new("uname");
        c.arg("-r");
        c
    };
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then(|| Version::from(text))
}

/// Decision a filter makes about one dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// Emit the dependency and walk its children.
    Keep,
    /// Walk its children but leave the dependency itself out.
    Skip,
    /// Drop the dependency and everything below it.
    Prune,
}

/// Edge filter: `(dependent, dependency) -> decision`.
pub type DependencyFilter<'a> = dyn Fn(&PackageName, &Dependency) -> Expansion + 'a;

/// Source of dependency and requirement declarations for formulas other
/// than the root.
pub trait FormulaLookup {
    fn dependencies(&self, name: &PackageName) -> Result<Vec<Dependency>>;
    fn requirements(&self, name: &PackageName) -> Result<Vec<Requirement>>;
}

/// The filter used for ordinary builds: the root's optional and recommended
/// dependencies follow its build configuration; further down, optional
/// dependencies are dropped and recommended ones kept.
pub fn default_filter<'a>(
    root: &'a PackageName,
    config: &'a BuildConfiguration,
) -> impl Fn(&PackageName, &Dependency) -> Expansion + 'a {
    move |dependent, dep| {
        let required = if dependent == root {
            dep.is_required_by(config)
        } else {
            !dep.is_optional()
        };
        if required {
            Expansion::Keep
        } else {
            Expansion::Prune
        }
    }
}

/// Drop build-only dependencies below the root, for when only the runtime
/// closure is wanted.
pub fn runtime_filter(root: &PackageName) -> impl Fn(&PackageName, &Dependency) -> Expansion + '_ {
    move |dependent, dep| {
        if dep.is_build() && dependent != root {
            Expansion::Prune
        } else {
            Expansion::Keep
        }
    }
}

struct Expander<'a> {
    lookup: &'a dyn FormulaLookup,
    filter: Option<&'a DependencyFilter<'a>>,
    /// Packages currently being expanded, root first.
    path: Vec<PackageName>,
    /// Fully expanded packages.
    done: HashSet<PackageName>,
    /// Every package walked (kept or skipped), in post-order.
    walked: Vec<PackageName>,
    order: Vec<Dependency>,
    emitted: HashMap<PackageName, usize>,
}

impl<'a> Expander<'a> {
    fn new(
        root: &PackageName,
        lookup: &'a dyn FormulaLookup,
        filter: Option<&'a DependencyFilter<'a>>,
    ) -> Self {
        Self {
            lookup,
            filter,
            path: vec![root.clone()],
            done: HashSet::new(),
            walked: Vec::new(),
            order: Vec::new(),
            emitted: HashMap::new(),
        }
    }

    fn visit_children(&mut self, dependent: &PackageName, deps: &[Dependency]) -> Result<()> {
        for dep in deps {
            let decision = self
                .filter
                .map_or(Expansion::Keep, |filter| filter(dependent, dep));
            match decision {
                Expansion::Prune => debug!("pruned {} -> {}", dependent, dep.name),
                Expansion::Skip => self.descend(dep, false)?,
                Expansion::Keep => self.descend(dep, true)?,
            }
        }
        Ok(())
    }

    fn descend(&mut self, dep: &Dependency, emit: bool) -> Result<()> {
        if let Some(start) = self.path.iter().position(|p| *p == dep.name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(dep.name.clone());
            return Err(BuildError::CyclicDependency { cycle });
        }

        if !self.done.contains(&dep.name) {
            let children = self.lookup.dependencies(&dep.name)?;
            self.path.push(dep.name.clone());
            self.visit_children(&dep.name, &children)?;
            self.path.pop();
            self.done.insert(dep.name.clone());
            self.walked.push(dep.name.clone());
        }

        if emit {
            match self.emitted.get(&dep.name) {
                Some(&i) => self.order[i].tags.extend(dep.tags.iter().copied()),
                None => {
                    self.emitted.insert(dep.name.clone(), self.order.len());
                    self.order.push(dep.clone());
                }
            }
        }
        Ok(())
    }
}

/// Expand `root`'s dependencies into installation order.
///
/// For every edge `a -> b` in the result, `b` comes before `a`; a package
/// reachable along several branches appears once, carrying the union of the
/// tags it was declared with.
///
/// # Errors
///
/// [`BuildError::CyclicDependency`] if a package is reached again while it
/// is still being expanded (no partial result is returned), or whatever the
/// lookup returns for an unknown formula.
pub fn expand_dependencies(
    root: &PackageName,
    deps: &[Dependency],
    lookup: &dyn FormulaLookup,
    filter: Option<&DependencyFilter<'_>>,
) -> Result<Vec<Dependency>> {
    let mut expander = Expander::new(root, lookup, filter);
    expander.visit_children(root, deps)?;
    Ok(expander.order)
}

/// Collect the requirements of `root` and of every dependency the walk
/// reaches (skipped ones included, pruned ones not), de-duplicated by name
/// in first-seen order. Build-only requirements of dependencies are left out.
///
/// # Errors
///
/// Same as [`expand_dependencies`].
pub fn expand_requirements(
    root: &PackageName,
    requirements: &[Requirement],
    deps: &[Dependency],
    lookup: &dyn FormulaLookup,
    filter: Option<&DependencyFilter<'_>>,
) -> Result<Vec<Requirement>> {
    let mut expander = Expander::new(root, lookup, filter);
    expander.visit_children(root, deps)?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for req in requirements {
        if seen.insert(req.name.clone()) {
            out.push(req.clone());
        }
    }
    for name in &expander.walked {
        for req in lookup.requirements(name)? {
            if req.is_build() {
                continue;
            }
            if seen.insert(req.name.clone()) {
                out.push(req);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Graph {
        deps: HashMap<PackageName, Vec<Dependency>>,
        reqs: HashMap<PackageName, Vec<Requirement>>,
    }

    impl Graph {
        fn with(mut self, name: &str, deps: &[Dependency]) -> Self {
            self.deps.insert(PackageName::new(name), deps.to_vec());
            self
        }

        fn requiring(mut self, name: &str, reqs: &[Requirement]) -> Self {
            self.reqs.insert(PackageName::new(name), reqs.to_vec());
            self
        }
    }

    impl FormulaLookup for Graph {
        fn dependencies(&self, name: &PackageName) -> Result<Vec<Dependency>> {
            self.deps
                .get(name)
                .cloned()
                .ok_or_else(|| BuildError::UnknownFormula(name.clone()))
        }

        fn requirements(&self, name: &PackageName) -> Result<Vec<Requirement>> {
            Ok(self.reqs.get(name).cloned().unwrap_or_default())
        }
    }

    fn d(name: &str) -> Dependency {
        Dependency::new(name)
    }

    fn names(deps: &[Dependency]) -> Vec<&str> {
        deps.iter().map(|d| d.name.as_str()).collect()
    }

    fn position(deps: &[Dependency], name: &str) -> usize {
        deps.iter().position(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_simple_chain() {
        let graph = Graph::default().with("b", &[d("c")]).with("c", &[]);
        let out = expand_dependencies(&"a".into(), &[d("b")], &graph, None).unwrap();
        assert_eq!(names(&out), vec!["c", "b"]);
    }

    #[test]
    fn test_diamond_appears_once_and_in_order() {
        let graph = Graph::default()
            .with("b", &[d("d")])
            .with("c", &[d("d")])
            .with("d", &[]);
        let out = expand_dependencies(&"a".into(), &[d("b"), d("c")], &graph, None).unwrap();

        assert_eq!(out.iter().filter(|x| x.name == "d").count(), 1);
        assert!(position(&out, "d") < position(&out, "b"));
        assert!(position(&out, "d") < position(&out, "c"));
    }

    #[test]
    fn test_repeated_dependency_merges_tags() {
        let graph = Graph::default()
            .with("b", &[Dependency::with_tags("z", &[DependencyTag::Run])])
            .with("z", &[]);
        let root_deps = [
            Dependency::with_tags("z", &[DependencyTag::Build]),
            d("b"),
        ];
        let out = expand_dependencies(&"a".into(), &root_deps, &graph, None).unwrap();
        let z = &out[position(&out, "z")];
        assert!(z.tags.contains(&DependencyTag::Build));
        assert!(z.tags.contains(&DependencyTag::Run));
    }

    #[test]
    fn test_cycle_detection() {
        let graph = Graph::default().with("b", &[d("a")]);
        let err = expand_dependencies(&"a".into(), &[d("b")], &graph, None).unwrap_err();
        match err {
            BuildError::CyclicDependency { cycle } => {
                let cycle: Vec<&str> = cycle.iter().map(PackageName::as_str).collect();
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_cycle_below_root() {
        let graph = Graph::default()
            .with("b", &[d("c")])
            .with("c", &[d("d")])
            .with("d", &[d("b")]);
        let err = expand_dependencies(&"a".into(), &[d("b")], &graph, None).unwrap_err();
        assert_eq!(err.to_string(), "circular dependency detected: b -> c -> d -> b");
    }

    #[test]
    fn test_prune_drops_whole_branch() {
        let graph = Graph::default()
            .with("b", &[d("c")])
            .with("c", &[])
            .with("e", &[]);
        let filter = |_: &PackageName, dep: &Dependency| {
            if dep.name == "b" {
                Expansion::Prune
            } else {
                Expansion::Keep
            }
        };
        let out =
            expand_dependencies(&"a".into(), &[d("b"), d("e")], &graph, Some(&filter)).unwrap();
        assert_eq!(names(&out), vec!["e"]);
    }

    #[test]
    fn test_skip_keeps_children() {
        let graph = Graph::default().with("b", &[d("c")]).with("c", &[]);
        let filter = |_: &PackageName, dep: &Dependency| {
            if dep.name == "b" {
                Expansion::Skip
            } else {
                Expansion::Keep
            }
        };
        let out = expand_dependencies(&"a".into(), &[d("b")], &graph, Some(&filter)).unwrap();
        assert_eq!(names(&out), vec!["c"]);
    }

    #[test]
    fn test_unknown_formula_propagates() {
        let graph = Graph::default();
        let err = expand_dependencies(&"a".into(), &[d("ghost")], &graph, None).unwrap_err();
        assert!(matches!(err, BuildError::UnknownFormula(name) if name == "ghost"));
    }

    #[test]
    fn test_default_filter_follows_root_options() {
        use crate::options::{BuildConfiguration, Options};

        let graph = Graph::default()
            .with("docs", &[])
            .with("ssl", &[])
            .with("b", &[Dependency::with_tags("x", &[DependencyTag::Optional])])
            .with("x", &[]);
        let root_deps = [
            Dependency::with_tags("docs", &[DependencyTag::Optional]),
            Dependency::with_tags("ssl", &[DependencyTag::Recommended]),
            d("b"),
        ];
        let declared: Options = root_deps.iter().filter_map(Dependency::option).collect();
        let root = PackageName::new("a");

        let plain = BuildConfiguration::new::<&str>(declared.clone(), &[]);
        let filter = default_filter(&root, &plain);
        let out = expand_dependencies(&root, &root_deps, &graph, Some(&filter)).unwrap();
        assert_eq!(names(&out), vec!["ssl", "b"]);

        let custom = BuildConfiguration::new(declared, &["--with-docs", "--without-ssl"]);
        let filter = default_filter(&root, &custom);
        let out = expand_dependencies(&root, &root_deps, &graph, Some(&filter)).unwrap();
        assert_eq!(names(&out), vec!["docs", "b"]);
    }

    #[test]
    fn test_runtime_filter_prunes_nested_build_deps() {
        let graph = Graph::default()
            .with("cmake", &[])
            .with("b", &[Dependency::with_tags("cmake", &[DependencyTag::Build])]);
        let root = PackageName::new("a");
        let filter = runtime_filter(&root);
        let out = expand_dependencies(&root, &[d("b")], &graph, Some(&filter)).unwrap();
        assert_eq!(names(&out), vec!["b"]);
    }

    #[test]
    fn test_requirements_collected_and_deduplicated() {
        let mut build_req = Requirement::executable("autoconf");
        build_req.tags.insert(DependencyTag::Build);
        let graph = Graph::default()
            .with("b", &[d("c")])
            .with("c", &[])
            .requiring("b", &[Requirement::executable("sh"), build_req])
            .requiring("c", &[Requirement::executable("perl"), Requirement::executable("sh")]);

        let root_reqs = [Requirement::minimum_os("1.0")];
        let out =
            expand_requirements(&"a".into(), &root_reqs, &[d("b")], &graph, None).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["os>=1.0", "perl", "sh"]);
    }

    #[test]
    fn test_requirement_cycle_is_reported() {
        let graph = Graph::default().with("b", &[d("a")]);
        let err = expand_requirements(&"a".into(), &[], &[d("b")], &graph, None).unwrap_err();
        assert!(matches!(err, BuildError::CyclicDependency { .. }));
    }

    #[test]
    fn test_executable_requirement() {
        assert!(Requirement::executable("sh").is_satisfied());
        assert!(!Requirement::executable("kiln-definitely-not-installed").is_satisfied());
    }

    #[test]
    fn test_dependency_options() {
        let optional = Dependency::with_tags("docs", &[DependencyTag::Optional]);
        assert_eq!(optional.option().unwrap().name, "with-docs");
        let recommended = Dependency::with_tags("ssl", &[DependencyTag::Recommended]);
        assert_eq!(recommended.option().unwrap().name, "without-ssl");
        assert!(d("zlib").option().is_none());
    }
}
