//! Build variants of a formula and the version each one produces.

use std::collections::BTreeMap;

use kiln_schema::{Checksum, PackageName, PkgVersion, Platform, Version};

use crate::deps::{Dependency, Requirement};
use crate::options::Options;
use crate::paths::filename_from_url;

/// Which variant of a formula a build uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    Stable,
    Devel,
    Head,
    Bottle,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Devel => "devel",
            Self::Head => "head",
            Self::Bottle => "bottle",
        }
    }
}

impl std::fmt::Display for SpecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An additional source archive staged next to the main one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub url: String,
    /// Falls back to the owning specification's version.
    pub version: Option<Version>,
    pub checksum: Option<Checksum>,
    pub mirrors: Vec<String>,
}

/// One buildable-from-source variant: stable, devel or head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareSpec {
    pub url: Option<String>,
    pub version: Option<Version>,
    pub mirrors: Vec<String>,
    pub checksum: Option<Checksum>,
    pub resources: Vec<Resource>,
    pub dependencies: Vec<Dependency>,
    pub requirements: Vec<Requirement>,
    pub options: Options,
}

impl SoftwareSpec {
    pub fn new(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    /// A specification is usable once it has a URL.
    pub fn is_usable(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = Some(Version::new(version));
    }

    pub fn set_sha256(&mut self, hex: &str) {
        self.checksum = Some(Checksum::sha256(hex));
    }

    pub fn set_blake3(&mut self, hex: &str) {
        self.checksum = Some(Checksum::blake3(hex));
    }

    pub fn add_mirror(&mut self, url: &str) {
        self.mirrors.push(url.to_string());
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// Declare a dependency. Optional and recommended dependencies also add
    /// the `--with-x` / `--without-x` toggle that controls them.
    pub fn depends_on(&mut self, dep: Dependency) {
        if let Some(option) = dep.option() {
            self.options.insert(option);
        }
        if let Some(existing) = self.dependencies.iter_mut().find(|d| d.name == dep.name) {
            existing.tags.extend(dep.tags);
        } else {
            self.dependencies.push(dep);
        }
    }

    pub fn requires(&mut self, req: Requirement) {
        if !self.requirements.iter().any(|r| r.name == req.name) {
            self.requirements.push(req);
        }
    }

    /// Explicit version, or one detected from the URL's file name.
    pub fn resolved_version(&self) -> Option<Version> {
        self.version
            .clone()
            .or_else(|| self.url.as_deref().and_then(version_from_url))
    }

    /// The version of `resource`, inheriting this specification's.
    pub fn resource_version(&self, resource: &Resource) -> Option<Version> {
        resource.version.clone().or_else(|| self.resolved_version())
    }
}

const ARCHIVE_SUFFIXES: [&str; 9] = [
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tgz", ".tbz", ".txz", ".zip", ".tar",
];

/// True for file names `tar` can unpack (every known archive but `.zip`).
pub fn is_tarball(file_name: &str) -> bool {
    ARCHIVE_SUFFIXES
        .iter()
        .filter(|s| **s != ".zip")
        .any(|s| file_name.ends_with(s))
}

/// Guess an upstream version from an archive URL:
/// `https://x.org/foo-1.2.3.tar.gz` gives `1.2.3`, `.../v2.0.zip` gives `2.0`.
pub fn version_from_url(url: &str) -> Option<Version> {
    let file = filename_from_url(url);
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file.strip_suffix(suffix))
        .unwrap_or(file);

    let candidate = stem
        .rsplit(['-', '_'])
        .next()
        .map(|s| s.trim_start_matches(['v', 'V']))?;
    let looks_like_version = candidate.starts_with(|c: char| c.is_ascii_digit())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.');
    looks_like_version.then(|| Version::new(candidate))
}

/// A precompiled artifact for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleSpec {
    pub root_url: String,
    /// Digest per platform tag.
    pub checksums: BTreeMap<String, Checksum>,
    /// The platform tag this bottle resolves to.
    pub tag: String,
    /// `(stable.version, revision)`, filled in when the formula is built.
    pub version: Option<PkgVersion>,
}

impl BottleSpec {
    /// A bottle resolving to the current platform's tag.
    pub fn new(root_url: &str) -> Self {
        Self::for_platform(root_url, &Platform::current())
    }

    pub fn for_platform(root_url: &str, platform: &Platform) -> Self {
        Self {
            root_url: root_url.trim_end_matches('/').to_string(),
            checksums: BTreeMap::new(),
            tag: platform.tag(),
            version: None,
        }
    }

    pub fn set_sha256(&mut self, tag: &str, hex: &str) {
        self.checksums.insert(tag.to_string(), Checksum::sha256(hex));
    }

    pub fn set_blake3(&mut self, tag: &str, hex: &str) {
        self.checksums.insert(tag.to_string(), Checksum::blake3(hex));
    }

    /// The checksum for this bottle's tag.
    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksums.get(&self.tag)
    }

    /// A bottle is usable only with a non-empty checksum for its tag.
    pub fn is_usable(&self) -> bool {
        self.checksum().is_some_and(|c| !c.is_empty())
    }

    /// `{root_url}/{name}-{version}.{tag}.bottle.tar.gz`
    pub fn url(&self, name: &PackageName) -> Option<String> {
        let version = self.version.as_ref()?;
        Some(format!(
            "{}/{}-{}.{}.bottle.tar.gz",
            self.root_url, name, version, self.tag
        ))
    }
}

/// The variants a formula declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSet {
    pub stable: Option<SoftwareSpec>,
    pub devel: Option<SoftwareSpec>,
    pub head: Option<SoftwareSpec>,
    pub bottle: Option<BottleSpec>,
}

impl SpecSet {
    pub fn has(&self, kind: SpecKind) -> bool {
        match kind {
            SpecKind::Bottle => self.bottle.is_some(),
            _ => self.source(kind).is_some(),
        }
    }

    /// The from-source specification that governs a variant. A bottle is
    /// the stable release prebuilt, so it answers with stable.
    pub fn source(&self, kind: SpecKind) -> Option<&SoftwareSpec> {
        match kind {
            SpecKind::Stable | SpecKind::Bottle => self.stable.as_ref(),
            SpecKind::Devel => self.devel.as_ref(),
            SpecKind::Head => self.head.as_ref(),
        }
    }

    pub fn source_mut(&mut self, kind: SpecKind) -> Option<&mut SoftwareSpec> {
        match kind {
            SpecKind::Stable | SpecKind::Bottle => self.stable.as_mut(),
            SpecKind::Devel => self.devel.as_mut(),
            SpecKind::Head => self.head.as_mut(),
        }
    }

    /// Upstream version of a from-source variant. Head builds without an
    /// explicit version are `HEAD`.
    pub fn upstream_version(&self, kind: SpecKind) -> Option<Version> {
        match kind {
            SpecKind::Bottle => self.bottle.as_ref()?.version.as_ref().map(|v| v.version.clone()),
            SpecKind::Head => {
                let head = self.head.as_ref()?;
                Some(head.version.clone().unwrap_or_else(Version::head))
            }
            SpecKind::Stable | SpecKind::Devel => self.source(kind)?.resolved_version(),
        }
    }

    /// Give the bottle the stable version and `revision`. Leaves the bottle
    /// version unset when there is no stable version to take.
    pub fn assign_bottle_version(&mut self, revision: u32) {
        let stable = self
            .stable
            .as_ref()
            .and_then(SoftwareSpec::resolved_version);
        if let Some(bottle) = self.bottle.as_mut() {
            bottle.version = stable.map(|v| PkgVersion::new(v, revision));
        }
    }

    /// The canonical version a build of `active` produces.
    ///
    /// The bottle reports its precomputed version so bottled and
    /// from-source builds of one release compare equal; other variants pair
    /// their upstream version with `revision`. `None` when the variant is
    /// missing or has no version.
    pub fn compute_version(&self, active: SpecKind, revision: u32) -> Option<PkgVersion> {
        match active {
            SpecKind::Bottle => self.bottle.as_ref()?.version.clone(),
            _ => Some(PkgVersion::new(self.upstream_version(active)?, revision)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencyTag;

    fn stable() -> SoftwareSpec {
        SoftwareSpec::new("https://example.com/foo-1.2.3.tar.gz")
    }

    #[test]
    fn test_usable_requires_url() {
        assert!(stable().is_usable());
        assert!(!SoftwareSpec::default().is_usable());
        assert!(!SoftwareSpec::new("").is_usable());
    }

    #[test]
    fn test_version_from_url() {
        let cases = [
            ("https://example.com/foo-1.2.3.tar.gz", Some("1.2.3")),
            ("https://example.com/archive/v2.0.zip", Some("2.0")),
            ("https://example.com/pkg_0.9b.tar.bz2", Some("0.9b")),
            ("https://example.com/foo-latest.tar.gz", None),
        ];
        for (url, expected) in cases {
            assert_eq!(
                version_from_url(url).map(|v| v.to_string()),
                expected.map(str::to_string),
                "{url}"
            );
        }
    }

    #[test]
    fn test_is_tarball() {
        assert!(is_tarball("vendor-2.3.tar.gz"));
        assert!(is_tarball("data.tar"));
        assert!(!is_tarball("docs.zip"));
        assert!(!is_tarball("README.txt"));
    }

    #[test]
    fn test_explicit_version_wins() {
        let mut spec = stable();
        spec.set_version("1.2.3a");
        assert_eq!(spec.resolved_version().unwrap().as_str(), "1.2.3a");
    }

    #[test]
    fn test_depends_on_adds_toggles_and_merges() {
        let mut spec = stable();
        spec.depends_on(Dependency::with_tags("docs", &[DependencyTag::Optional]));
        spec.depends_on(Dependency::with_tags("ssl", &[DependencyTag::Recommended]));
        spec.depends_on(Dependency::with_tags("ssl", &[DependencyTag::Run]));
        assert!(spec.options.contains("with-docs"));
        assert!(spec.options.contains("without-ssl"));
        assert_eq!(spec.dependencies.len(), 2);
        assert!(spec.dependencies[1].tags.contains(&DependencyTag::Run));
    }

    #[test]
    fn test_bottle_usable_only_with_checksum() {
        let platform: Platform = "arm64_macos".parse().unwrap();
        let mut bottle = BottleSpec::for_platform("https://bottles.example.com/", &platform);
        assert!(!bottle.is_usable());
        bottle.set_sha256("arm64_macos", "");
        assert!(!bottle.is_usable());
        bottle.set_sha256("x86_64_linux", "abcd");
        assert!(!bottle.is_usable());
        bottle.set_sha256("arm64_macos", "abcd");
        assert!(bottle.is_usable());
    }

    #[test]
    fn test_bottle_version_matches_stable() {
        let mut specs = SpecSet {
            stable: Some(stable()),
            bottle: Some(BottleSpec::new("https://bottles.example.com")),
            ..SpecSet::default()
        };
        specs.assign_bottle_version(2);

        let bottle = specs.compute_version(SpecKind::Bottle, 2).unwrap();
        let source = specs.compute_version(SpecKind::Stable, 2).unwrap();
        assert_eq!(bottle, source);
        assert_eq!(bottle.to_string(), "1.2.3_2");
    }

    #[test]
    fn test_bottle_url() {
        let platform: Platform = "x86_64_linux".parse().unwrap();
        let mut specs = SpecSet {
            stable: Some(stable()),
            bottle: Some(BottleSpec::for_platform("https://b.example.com", &platform)),
            ..SpecSet::default()
        };
        specs.assign_bottle_version(0);
        let url = specs.bottle.unwrap().url(&"foo".into()).unwrap();
        assert_eq!(url, "https://b.example.com/foo-1.2.3.x86_64_linux.bottle.tar.gz");
    }

    #[test]
    fn test_bottle_without_stable_has_no_version() {
        let mut specs = SpecSet {
            bottle: Some(BottleSpec::new("https://bottles.example.com")),
            ..SpecSet::default()
        };
        specs.assign_bottle_version(0);
        assert!(specs.compute_version(SpecKind::Bottle, 0).is_none());
    }

    #[test]
    fn test_head_defaults_to_head_version() {
        let specs = SpecSet {
            head: Some(SoftwareSpec::new("https://github.com/foo/foo.git")),
            ..SpecSet::default()
        };
        let version = specs.compute_version(SpecKind::Head, 0).unwrap();
        assert!(version.version.is_head());
    }
}
