//! Version ordering for formulas and compilers.
//!
//! Versions are compared token by token. A version string is split on
//! punctuation and at every boundary between digits and letters, so
//! `1.0rc2` becomes `1`, `0`, `rc`, `2`. Numeric tokens compare
//! numerically, alphabetic tokens compare lexically, and a numeric token
//! always sorts above an alphabetic one (`1.0.1 > 1.0.rc1`). A missing
//! token behaves like `0` against a number and sorts above a pre-release
//! tag, so `4.8 == 4.8.0` and `1.0 > 1.0rc1`. The literal `HEAD` sorts
//! above every other version.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Version string used for head builds that do not declare one.
pub const HEAD_VERSION: &str = "HEAD";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Number(u64),
    Alpha(&'a str),
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for part in s.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut start = 0;
        let bytes = part.as_bytes();
        while start < bytes.len() {
            let digit = bytes[start].is_ascii_digit();
            let end = bytes[start..]
                .iter()
                .position(|b| b.is_ascii_digit() != digit)
                .map_or(bytes.len(), |n| start + n);
            let run = &part[start..end];
            tokens.push(if digit {
                // Absurdly long digit runs saturate rather than fail.
                Token::Number(run.parse().unwrap_or(u64::MAX))
            } else {
                Token::Alpha(run)
            });
            start = end;
        }
    }
    tokens
}

fn compare_tokens(a: Option<&Token<'_>>, b: Option<&Token<'_>>) -> Ordering {
    match (a, b) {
        (Some(Token::Number(x)), Some(Token::Number(y))) => x.cmp(y),
        (Some(Token::Alpha(x)), Some(Token::Alpha(y))) => x.cmp(y),
        (Some(Token::Number(_)), Some(Token::Alpha(_))) | (None, Some(Token::Alpha(_))) => {
            Ordering::Greater
        }
        (Some(Token::Alpha(_)), Some(Token::Number(_))) | (Some(Token::Alpha(_)), None) => {
            Ordering::Less
        }
        (Some(Token::Number(x)), None) => x.cmp(&0),
        (None, Some(Token::Number(y))) => 0.cmp(y),
        (None, None) => Ordering::Equal,
    }
}

/// An upstream version string with token-wise ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Create a version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self(v.to_string())
    }

    /// The placeholder version of a head build.
    pub fn head() -> Self {
        Self::new(HEAD_VERSION)
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the `HEAD` placeholder.
    pub fn is_head(&self) -> bool {
        self.0 == HEAD_VERSION
    }

    /// True when the string is empty or contains whitespace, which makes it
    /// unusable as an identity field.
    pub fn is_malformed(&self) -> bool {
        self.0.is_empty() || self.0.chars().any(char::is_whitespace)
    }

    /// The first two numeric components joined with a dot (`4.8.2` -> `4.8`).
    ///
    /// Versions with a single component return it unchanged.
    pub fn major_minor(&self) -> String {
        let numbers: Vec<String> = tokenize(&self.0)
            .into_iter()
            .take_while(|t| matches!(t, Token::Number(_)))
            .take(2)
            .map(|t| match t {
                Token::Number(n) => n.to_string(),
                Token::Alpha(a) => a.to_string(),
            })
            .collect();
        if numbers.is_empty() {
            self.0.clone()
        } else {
            numbers.join(".")
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_head(), other.is_head()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }

        let a = tokenize(&self.0);
        let b = tokenize(&other.0);
        for i in 0..a.len().max(b.len()) {
            let ord = compare_tokens(a.get(i), b.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    // Trailing zero components are dropped so that equal versions hash alike.
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut tokens = tokenize(&self.0);
        while tokens.last() == Some(&Token::Number(0)) {
            tokens.pop();
        }
        for token in tokens {
            match token {
                Token::Number(n) => n.hash(state),
                Token::Alpha(a) => a.hash(state),
            }
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The canonical version of a build: upstream version plus revision.
///
/// Ordered by `(version, revision)`. Displayed as `1.2.3`, or `1.2.3_1` once
/// the revision is bumped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PkgVersion {
    /// Upstream version.
    pub version: Version,
    /// Rebuild counter for the same upstream version.
    pub revision: u32,
}

impl PkgVersion {
    /// Combine an upstream version with a revision.
    pub fn new(version: Version, revision: u32) -> Self {
        Self { version, revision }
    }
}

impl std::fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.revision > 0 {
            write!(f, "{}_{}", self.version, self.revision)
        } else {
            write!(f, "{}", self.version)
        }
    }
}
