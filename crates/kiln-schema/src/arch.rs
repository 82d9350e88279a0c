//! Host and bottle platform identification.

/// CPU architecture of a bottle or of the host.
///
/// The architecture is half of a bottle's platform tag; the other half is
/// the operating system (see [`Platform`]).
///
/// # Example
///
/// ```
/// use kiln_schema::Arch;
///
/// let current = Arch::current();
/// println!("Running on: {}", current);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// ARM64 architecture (Apple Silicon, Graviton, ...)
    #[default]
    Arm64,
    /// `x86_64` architecture
    X86_64,
}

impl Arch {
    /// Get the current architecture
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}

/// A bottle platform: architecture plus operating system.
///
/// Rendered as the tag bottles are keyed by, e.g. `arm64_macos` or
/// `x86_64_linux`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// CPU architecture.
    pub arch: Arch,
    /// Operating system name as reported by `std::env::consts::OS`.
    pub os: String,
}

impl Platform {
    /// The platform this process runs on.
    pub fn current() -> Self {
        Self {
            arch: Arch::current(),
            os: std::env::consts::OS.to_string(),
        }
    }

    /// The bottle tag for this platform.
    pub fn tag(&self) -> String {
        format!("{}_{}", self.arch, self.os)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Arch names may themselves contain '_' (x86_64), so split on the last one.
        let (arch, os) = s
            .rsplit_once('_')
            .ok_or_else(|| format!("Invalid platform tag: {s}"))?;
        Ok(Self {
            arch: arch.parse()?,
            os: os.to_string(),
        })
    }
}
