//! Build options and the effective build configuration.
//!
//! A formula declares options (`--with-docs`, `--without-ssl`); each
//! specification carries its own toggle collection, which dependency
//! declarations may already have filled in. [`resolve_build_options`]
//! merges the declared options into that collection, and
//! [`BuildConfiguration`] records which of them the caller switched on.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A named build toggle. The flag form is `--<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl BuildOption {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.trim_start_matches('-').to_string(),
            description: description.to_string(),
        }
    }

    pub fn flag(&self) -> String {
        format!("--{}", self.name)
    }
}

impl std::fmt::Display for BuildOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.flag())
    }
}

/// An insertion-ordered set of options keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options(Vec<BuildOption>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `option` unless an option with the same name exists. Returns
    /// whether it was added.
    pub fn insert(&mut self, option: BuildOption) -> bool {
        if self.contains(&option.name) {
            return false;
        }
        self.0.push(option);
        true
    }

    /// Accepts `name` or `--name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&BuildOption> {
        let name = name.trim_start_matches('-');
        self.0.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BuildOption> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Options {
    type Item = &'a BuildOption;
    type IntoIter = std::slice::Iter<'a, BuildOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<BuildOption> for Options {
    fn from_iter<I: IntoIterator<Item = BuildOption>>(iter: I) -> Self {
        let mut options = Self::new();
        for option in iter {
            options.insert(option);
        }
        options
    }
}

/// Merge the formula's declared options into a specification's toggles.
///
/// Existing toggles win and keep their position; declared options are
/// appended in declaration order. Running it twice changes nothing.
pub fn resolve_build_options(declared: &[BuildOption], toggles: &mut Options) {
    for option in declared {
        toggles.insert(option.clone());
    }
}

/// The options in effect for one build: what is available and what the
/// caller asked for.
///
/// Requested flags that are not declared are ignored (and logged), never
/// an error; they are kept in [`ignored`](Self::ignored) for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfiguration {
    declared: Options,
    used: Options,
    ignored: Vec<String>,
}

impl BuildConfiguration {
    /// Pair the resolved option set with the flags the caller passed.
    pub fn new<S: AsRef<str>>(declared: Options, requested: &[S]) -> Self {
        let mut used = Options::new();
        let mut ignored = Vec::new();
        for flag in requested {
            let flag = flag.as_ref();
            match declared.get(flag) {
                Some(option) => {
                    used.insert(option.clone());
                }
                None => {
                    warn!("ignoring undeclared option {flag}");
                    ignored.push(flag.to_string());
                }
            }
        }
        Self {
            declared,
            used,
            ignored,
        }
    }

    pub fn declared(&self) -> &Options {
        &self.declared
    }

    pub fn used(&self) -> &Options {
        &self.used
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Declared options the caller did not switch on.
    pub fn unused_options(&self) -> Options {
        self.declared
            .iter()
            .filter(|o| !self.used.contains(&o.name))
            .cloned()
            .collect()
    }

    /// A default build has no explicitly used options.
    pub fn is_default(&self) -> bool {
        self.used.is_empty()
    }

    pub fn includes(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Whether the feature `name` is enabled.
    ///
    /// With a declared `with-<name>` option the feature is off unless
    /// requested; with a declared `without-<name>` it is on unless that was
    /// requested. Features with neither option are off.
    pub fn with(&self, name: &str) -> bool {
        let with = format!("with-{name}");
        let without = format!("without-{name}");
        if self.declared.contains(&with) {
            self.used.contains(&with)
        } else if self.declared.contains(&without) {
            !self.used.contains(&without)
        } else {
            false
        }
    }

    pub fn without(&self, name: &str) -> bool {
        !self.with(name)
    }
}

impl std::fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used: Vec<String> = self.used.iter().map(BuildOption::flag).collect();
        if used.is_empty() {
            write!(f, "(default)")
        } else {
            write!(f, "{}", used.join(" "))
        }
    }
}
