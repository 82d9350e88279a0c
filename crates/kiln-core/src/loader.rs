//! TOML formula definitions
//!
//! Human-readable formula files, parsed with serde and turned into a
//! [`FormulaDefinition`]:
//!
//! ```toml
//! [formula]
//! name = "libfoo"
//! revision = 1
//!
//! [stable]
//! url = "https://example.com/libfoo-1.2.tar.gz"
//! sha256 = "..."
//! depends_on = ["zlib", { name = "cmake", tags = ["build"] }]
//!
//! [[build.step]]
//! command = "./configure"
//! args = ["--prefix={prefix}"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kiln_schema::PackageName;

use crate::compiler::CompilerFailure;
use crate::deps::{Dependency, DependencyTag, Requirement};
use crate::error::{BuildError, Result};
use crate::formula::{FormulaDefinition, Formulary};
use crate::options::BuildOption;
use crate::patch::{Compression, Patch, PatchList};
use crate::session::BuildStep;
use crate::spec::{BottleSpec, Resource, SoftwareSpec, SpecSet};

/// The `[formula]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaInfo {
    pub name: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// A dependency written either as a bare name or as a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyEntry {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        tags: Vec<DependencyTag>,
    },
}

impl DependencyEntry {
    fn into_dependency(self) -> Dependency {
        match self {
            Self::Name(name) => Dependency::new(&name),
            Self::Full { name, tags } => Dependency::with_tags(&name, &tags),
        }
    }
}

/// A requirement table: exactly one of `executable`, `minimum_os`, `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequirementEntry {
    Executable {
        executable: String,
        #[serde(default)]
        tags: Vec<DependencyTag>,
    },
    MinimumOs {
        minimum_os: String,
        #[serde(default)]
        tags: Vec<DependencyTag>,
    },
    Named {
        name: String,
        #[serde(default)]
        tags: Vec<DependencyTag>,
    },
}

impl RequirementEntry {
    fn into_requirement(self) -> Requirement {
        let (mut req, tags) = match self {
            Self::Executable { executable, tags } => (Requirement::executable(&executable), tags),
            Self::MinimumOs { minimum_os, tags } => (Requirement::minimum_os(&minimum_os), tags),
            Self::Named { name, tags } => (
                Requirement {
                    name,
                    kind: crate::deps::RequirementKind::Named,
                    tags: Default::default(),
                },
                tags,
            ),
        };
        req.tags = tags.into_iter().collect();
        req
    }
}

/// An extra archive (`[[stable.resource]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

/// `[stable]`, `[devel]` or `[head]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecEntry {
    pub url: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub blake3: Option<String>,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<DependencyEntry>,
    #[serde(default)]
    pub requires: Vec<RequirementEntry>,
    #[serde(default)]
    pub resource: Vec<ResourceEntry>,
}

impl SpecEntry {
    fn into_spec(self) -> SoftwareSpec {
        let mut spec = SoftwareSpec::new(&self.url);
        if let Some(version) = &self.version {
            spec.set_version(version);
        }
        if let Some(hex) = &self.sha256 {
            spec.set_sha256(hex);
        }
        if let Some(hex) = &self.blake3 {
            spec.set_blake3(hex);
        }
        for mirror in &self.mirrors {
            spec.add_mirror(mirror);
        }
        for dep in self.depends_on {
            spec.depends_on(dep.into_dependency());
        }
        for req in self.requires {
            spec.requires(req.into_requirement());
        }
        for res in self.resource {
            spec.add_resource(Resource {
                name: res.name,
                url: res.url,
                version: res.version.map(Into::into),
                checksum: res.sha256.as_deref().map(kiln_schema::Checksum::sha256),
                mirrors: res.mirrors,
            });
        }
        spec
    }
}

/// The `[bottle]` table with per-platform digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleEntry {
    pub root_url: String,
    #[serde(default)]
    pub sha256: BTreeMap<String, String>,
    #[serde(default)]
    pub blake3: BTreeMap<String, String>,
}

impl BottleEntry {
    fn into_bottle(self) -> BottleSpec {
        let mut bottle = BottleSpec::new(&self.root_url);
        for (tag, hex) in &self.sha256 {
            bottle.set_sha256(tag, hex);
        }
        for (tag, hex) in &self.blake3 {
            bottle.set_blake3(tag, hex);
        }
        bottle
    }
}

/// A `[[patch]]` entry: `url` or inline `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default = "default_strip")]
    pub strip: u32,
    #[serde(default)]
    pub compression: Option<Compression>,
}

fn default_strip() -> u32 {
    1
}

/// The `[build]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildEntry {
    #[serde(default)]
    pub step: Vec<BuildStep>,
}

/// A whole formula file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaFile {
    pub formula: FormulaInfo,
    #[serde(default)]
    pub stable: Option<SpecEntry>,
    #[serde(default)]
    pub devel: Option<SpecEntry>,
    #[serde(default)]
    pub head: Option<SpecEntry>,
    #[serde(default)]
    pub bottle: Option<BottleEntry>,
    #[serde(default)]
    pub option: Vec<BuildOption>,
    #[serde(default)]
    pub fails_with: Vec<CompilerFailure>,
    #[serde(default)]
    pub patch: Vec<PatchEntry>,
    #[serde(default)]
    pub build: BuildEntry,
}

impl FormulaFile {
    /// Parse a formula file from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the content is invalid or does not match
    /// the expected layout.
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Convert into a definition. `path` is recorded and used in errors.
    ///
    /// # Errors
    ///
    /// [`BuildError::Definition`] for a patch with neither `url` nor `data`
    /// (or both).
    pub fn into_definition(self, path: &Path) -> Result<FormulaDefinition> {
        let mut patches = PatchList::new();
        for (i, entry) in self.patch.into_iter().enumerate() {
            let patch = match (entry.url, entry.data) {
                (Some(url), None) => {
                    let mut patch = Patch::remote(&url);
                    if let Some(hex) = &entry.sha256 {
                        patch = patch.with_checksum(kiln_schema::Checksum::sha256(hex));
                    }
                    patch
                }
                (None, Some(data)) => Patch::inline(&data),
                _ => {
                    return Err(BuildError::Definition {
                        path: path.to_path_buf(),
                        message: format!("patch #{} needs exactly one of `url` or `data`", i + 1),
                    });
                }
            };
            let patch = match entry.compression {
                Some(compression) => patch.with_compression(compression),
                None => patch,
            };
            patches.push(patch.with_strip(entry.strip));
        }

        Ok(FormulaDefinition {
            name: PackageName::new(&self.formula.name),
            path: path.to_path_buf(),
            homepage: self.formula.homepage,
            revision: self.formula.revision,
            specs: SpecSet {
                stable: self.stable.map(SpecEntry::into_spec),
                devel: self.devel.map(SpecEntry::into_spec),
                head: self.head.map(SpecEntry::into_spec),
                bottle: self.bottle.map(BottleEntry::into_bottle),
            },
            options: self.option,
            conflicts: self
                .formula
                .conflicts
                .iter()
                .map(|c| PackageName::new(c))
                .collect(),
            compiler_failures: self.fails_with.into_iter().collect(),
            patches,
            steps: self.build.step,
        })
    }
}

/// Parse `content` as the formula file at `path`.
///
/// # Errors
///
/// [`BuildError::Definition`] when the TOML is invalid.
pub fn parse_definition(content: &str, path: &Path) -> Result<FormulaDefinition> {
    FormulaFile::parse(content)
        .map_err(|e| BuildError::Definition {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
        .into_definition(path)
}

/// Read and parse a formula file.
///
/// # Errors
///
/// [`BuildError::Io`] when the file cannot be read, [`BuildError::Definition`]
/// when it cannot be parsed.
pub fn load_definition(path: &Path) -> Result<FormulaDefinition> {
    let content = fs::read_to_string(path)?;
    parse_definition(&content, path)
}

impl Formulary {
    /// Load every `*.toml` file in `dir`.
    ///
    /// # Errors
    ///
    /// The first file that cannot be read or parsed.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut formulary = Self::new();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        for path in paths {
            formulary.insert(load_definition(&path)?);
        }
        debug!("loaded {} formulae from {}", formulary.len(), dir.display());
        Ok(formulary)
    }
}
