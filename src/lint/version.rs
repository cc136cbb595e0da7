//! Version parsing and capability reconciliation for the linter.
//!
//! gaplint's `--version` output is unreliable (older releases lack the flag,
//! and environments sometimes report a different install), so the declared
//! version is cross-checked against a speculative run with the range-output
//! flag. Probe evidence wins over the declared version.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// A `major.minor.patch` version. Ordering is lexicographic on the triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl Version {
    /// Creates a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version assumed for tools that cannot report one.
    pub const BASELINE: Self = Self::new(1, 0, 0);
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

static VERSION_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[vV]?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:[.\-+_]?[0-9A-Za-z][0-9A-Za-z.\-+_]*)?$").ok()
});

/// Error returned when a token is not a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVersion(pub String);

impl fmt::Display for InvalidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version: '{}'", self.0)
    }
}

impl std::error::Error for InvalidVersion {}

impl FromStr for Version {
    type Err = InvalidVersion;

    /// Accepts release versions with one to three numeric components plus an
    /// optional pre/post/dev suffix (`1.6`, `1.6.1`, `v1.6.1rc1`, `1.6.1.post2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = VERSION_TOKEN
            .as_ref()
            .and_then(|token| token.captures(s.trim()))
            .ok_or_else(|| InvalidVersion(s.to_string()))?;
        let component = |idx: usize| -> Result<u64, InvalidVersion> {
            captures
                .get(idx)
                .map_or(Ok(0), |m| m.as_str().parse().map_err(|_| InvalidVersion(s.to_string())))
        };
        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }
}

/// Result of a successful capability probe for one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    /// Reconciled tool version.
    pub version: Version,
    /// Whether the range-output flag may be passed.
    pub supports_range_output: bool,
}

impl VersionRecord {
    /// Derives the record from a reconciled version.
    pub fn new(version: Version, range_output_since: Version) -> Self {
        Self {
            version,
            supports_range_output: (version.major, version.minor)
                >= (range_output_since.major, range_output_since.minor),
        }
    }
}

/// Extracts the version from `--version` output.
///
/// Returns `None` when there is no output at all. The version is the third
/// whitespace-separated token of the first line (`gaplint version 1.6.1`);
/// anything that does not parse yields [`Version::BASELINE`], which is what
/// releases predating `--version` get.
pub fn version_from_output(output: &str) -> Option<Version> {
    let first_line = output.lines().next()?;
    let version = first_line
        .split_whitespace()
        .nth(2)
        .and_then(|token| token.parse().ok())
        .unwrap_or(Version::BASELINE);
    Some(version)
}

/// Whether the tool rejected the speculative flag.
///
/// Unrecognized arguments are echoed back in the usage error, so the flag
/// appearing anywhere in the output means the capability is missing.
pub fn flag_rejected(output: &str, flag: &str) -> bool {
    output.contains(flag)
}

/// Reconciles the declared version with the capability probe.
///
/// If the probe shows range output works but the declared version predates
/// it, the version is bumped to `range_output_since`.
pub fn reconcile(declared: Version, supports_range_output: bool, range_output_since: Version) -> Version {
    if declared < range_output_since && supports_range_output {
        range_output_since
    } else {
        declared
    }
}
