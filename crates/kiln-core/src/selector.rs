//! Choosing the one specification a build uses.

use tracing::debug;

use kiln_schema::{PackageName, Platform};

use crate::error::{BuildError, Result};
use crate::spec::{BottleSpec, SpecKind, SpecSet};

/// Build-mode flags from the caller (`--HEAD`, `--devel`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildMode {
    pub head: bool,
    pub devel: bool,
}

impl BuildMode {
    pub fn head() -> Self {
        Self {
            head: true,
            devel: false,
        }
    }

    pub fn devel() -> Self {
        Self {
            head: false,
            devel: true,
        }
    }
}

/// Decides whether a bottle can be poured instead of building.
pub trait BottleInstallability {
    fn bottle_installable(&self, name: &PackageName, bottle: &BottleSpec) -> bool;
}

/// Pour a bottle when it was built for this platform, has a checksum, the
/// build uses default options and building from source was not forced.
#[derive(Debug, Clone)]
pub struct PlatformBottlePolicy {
    pub platform: Platform,
    pub build_from_source: bool,
    pub default_build: bool,
}

impl PlatformBottlePolicy {
    pub fn new(build_from_source: bool, default_build: bool) -> Self {
        Self {
            platform: Platform::current(),
            build_from_source,
            default_build,
        }
    }
}

impl Default for PlatformBottlePolicy {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl BottleInstallability for PlatformBottlePolicy {
    fn bottle_installable(&self, name: &PackageName, bottle: &BottleSpec) -> bool {
        if self.build_from_source || !self.default_build {
            return false;
        }
        let installable = bottle.tag == self.platform.tag() && bottle.is_usable();
        if !installable {
            debug!("{name}: no usable bottle for {}", self.platform);
        }
        installable
    }
}

/// Never pours bottles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBottles;

impl BottleInstallability for NoBottles {
    fn bottle_installable(&self, _: &PackageName, _: &BottleSpec) -> bool {
        false
    }
}

fn usable(specs: &SpecSet, kind: SpecKind) -> bool {
    specs.source(kind).is_some_and(|s| s.is_usable())
}

/// Pick the active specification. First match wins:
///
/// 1. head requested and present
/// 2. devel requested and present
/// 3. a bottle that can be poured here
/// 4. stable
/// 5. devel, when there is no stable
/// 6. head, when there is no stable
///
/// An installable bottle beats building stable from source even though no
/// one asked for it; an explicit `--HEAD` or `--devel` beats both.
///
/// # Errors
///
/// [`BuildError::MissingSourceSpecification`] when nothing matches.
pub fn select_active(
    name: &PackageName,
    specs: &SpecSet,
    mode: BuildMode,
    installability: &dyn BottleInstallability,
) -> Result<SpecKind> {
    let has_stable = usable(specs, SpecKind::Stable);

    let selected = if mode.head && usable(specs, SpecKind::Head) {
        SpecKind::Head
    } else if mode.devel && usable(specs, SpecKind::Devel) {
        SpecKind::Devel
    } else if specs
        .bottle
        .as_ref()
        .is_some_and(|b| installability.bottle_installable(name, b))
    {
        SpecKind::Bottle
    } else if has_stable {
        SpecKind::Stable
    } else if usable(specs, SpecKind::Devel) {
        SpecKind::Devel
    } else if usable(specs, SpecKind::Head) {
        SpecKind::Head
    } else {
        return Err(BuildError::MissingSourceSpecification { name: name.clone() });
    };

    debug!("{name}: selected {selected} specification");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SoftwareSpec;

    struct Always;

    impl BottleInstallability for Always {
        fn bottle_installable(&self, _: &PackageName, _: &BottleSpec) -> bool {
            true
        }
    }

    fn spec(url: &str) -> Option<SoftwareSpec> {
        Some(SoftwareSpec::new(url))
    }

    fn full() -> SpecSet {
        SpecSet {
            stable: spec("https://example.com/foo-1.0.tar.gz"),
            devel: spec("https://example.com/foo-1.1rc1.tar.gz"),
            head: spec("https://example.com/foo.git"),
            bottle: Some(BottleSpec::new("https://bottles.example.com")),
        }
    }

    fn select(
        specs: &SpecSet,
        mode: BuildMode,
        bottles: &dyn BottleInstallability,
    ) -> Result<SpecKind> {
        select_active(&"foo".into(), specs, mode, bottles)
    }

    #[test]
    fn test_head_mode_overrides_bottle() {
        assert_eq!(select(&full(), BuildMode::head(), &Always).unwrap(), SpecKind::Head);
    }

    #[test]
    fn test_devel_mode_overrides_bottle() {
        assert_eq!(select(&full(), BuildMode::devel(), &Always).unwrap(), SpecKind::Devel);
    }

    #[test]
    fn test_bottle_fast_path() {
        assert_eq!(select(&full(), BuildMode::default(), &Always).unwrap(), SpecKind::Bottle);
    }

    #[test]
    fn test_stable_without_installable_bottle() {
        assert_eq!(select(&full(), BuildMode::default(), &NoBottles).unwrap(), SpecKind::Stable);
    }

    #[test]
    fn test_head_mode_without_head_falls_through() {
        let mut specs = full();
        specs.head = None;
        assert_eq!(select(&specs, BuildMode::head(), &NoBottles).unwrap(), SpecKind::Stable);
    }

    #[test]
    fn test_devel_only_and_head_only() {
        let devel_only = SpecSet {
            devel: spec("https://example.com/foo-2.0b.tar.gz"),
            head: spec("https://example.com/foo.git"),
            ..SpecSet::default()
        };
        assert_eq!(select(&devel_only, BuildMode::default(), &NoBottles).unwrap(), SpecKind::Devel);

        let head_only = SpecSet {
            head: spec("https://example.com/foo.git"),
            ..SpecSet::default()
        };
        assert_eq!(select(&head_only, BuildMode::default(), &NoBottles).unwrap(), SpecKind::Head);
    }

    #[test]
    fn test_nothing_usable() {
        let specs = SpecSet {
            stable: Some(SoftwareSpec::default()),
            ..SpecSet::default()
        };
        let err = select(&specs, BuildMode::default(), &NoBottles).unwrap_err();
        assert!(matches!(err, BuildError::MissingSourceSpecification { .. }));
    }

    #[test]
    fn test_every_mode_yields_one_spec_or_error() {
        let modes = [
            BuildMode::default(),
            BuildMode::head(),
            BuildMode::devel(),
            BuildMode { head: true, devel: true },
        ];
        for mask in 0u8..16 {
            let specs = SpecSet {
                stable: (mask & 1 != 0).then(|| SoftwareSpec::new("https://e.com/a-1.tar.gz")),
                devel: (mask & 2 != 0).then(|| SoftwareSpec::new("https://e.com/a-2.tar.gz")),
                head: (mask & 4 != 0).then(|| SoftwareSpec::new("https://e.com/a.git")),
                bottle: (mask & 8 != 0).then(|| BottleSpec::new("https://b.e.com")),
            };
            for mode in modes {
                match select(&specs, mode, &Always) {
                    Ok(kind) => assert!(specs.has(kind)),
                    Err(err) => {
                        assert!(matches!(err, BuildError::MissingSourceSpecification { .. }));
                        assert_eq!(mask & 7, 0, "source spec present but nothing selected");
                        assert_eq!(mask & 8, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_platform_policy() {
        let platform: Platform = "arm64_macos".parse().unwrap();
        let mut bottle = BottleSpec::for_platform("https://b.example.com", &platform);
        bottle.set_sha256("arm64_macos", "abcd");

        let policy = PlatformBottlePolicy {
            platform: platform.clone(),
            build_from_source: false,
            default_build: true,
        };
        assert!(policy.bottle_installable(&"foo".into(), &bottle));

        let forced = PlatformBottlePolicy {
            build_from_source: true,
            ..policy.clone()
        };
        assert!(!forced.bottle_installable(&"foo".into(), &bottle));

        let custom = PlatformBottlePolicy {
            default_build: false,
            ..policy.clone()
        };
        assert!(!custom.bottle_installable(&"foo".into(), &bottle));

        let other = PlatformBottlePolicy {
            platform: "x86_64_linux".parse().unwrap(),
            ..policy
        };
        assert!(!other.bottle_installable(&"foo".into(), &bottle));
    }
}
