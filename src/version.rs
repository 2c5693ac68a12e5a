//! WDL language versions and version-gated features.
//!
//! The document's version decides which constructs are legal (typed `input`
//! sections, struct definitions, `after` ordering on calls) and how source
//! text is emitted. Versions order chronologically, so gates are plain
//! comparisons.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported WDL specification versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WdlVersion {
    #[serde(rename = "draft-1")]
    Draft1,
    #[serde(rename = "draft-2")]
    Draft2,
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl WdlVersion {
    /// All versions, oldest first.
    pub const ALL: [WdlVersion; 4] = [
        WdlVersion::Draft1,
        WdlVersion::Draft2,
        WdlVersion::V1_0,
        WdlVersion::V1_1,
    ];

    /// The version string as written in a `version` statement.
    pub fn as_str(&self) -> &'static str {
        match self {
            WdlVersion::Draft1 => "draft-1",
            WdlVersion::Draft2 => "draft-2",
            WdlVersion::V1_0 => "1.0",
            WdlVersion::V1_1 => "1.1",
        }
    }

    /// Draft versions predate the `version` header statement.
    pub fn has_version_statement(&self) -> bool {
        *self >= WdlVersion::V1_0
    }

    /// Whether the given feature is legal under this version.
    pub fn supports(&self, feature: Feature) -> bool {
        *self >= feature.minimum_version()
    }
}

impl Default for WdlVersion {
    fn default() -> Self {
        WdlVersion::V1_0
    }
}

impl fmt::Display for WdlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WdlVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "draft-1" => Ok(WdlVersion::Draft1),
            "draft-2" => Ok(WdlVersion::Draft2),
            "draft-3" | "1.0" => Ok(WdlVersion::V1_0),
            "1.1" => Ok(WdlVersion::V1_1),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}

/// Error returned when a version string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown WDL version: {0}")]
pub struct UnknownVersion(pub String);

/// Version-gated language features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Typed `input { ... }` sections on tasks and workflows.
    InputsSection,
    /// `struct` definitions.
    Structs,
    /// `import ... alias A as B` member aliasing.
    ImportAliases,
    /// `call x after y` ordering dependencies.
    CallAfter,
}

impl Feature {
    /// The first version in which the feature is legal.
    pub fn minimum_version(&self) -> WdlVersion {
        match self {
            Feature::InputsSection => WdlVersion::V1_0,
            Feature::Structs => WdlVersion::V1_0,
            Feature::ImportAliases => WdlVersion::V1_0,
            Feature::CallAfter => WdlVersion::V1_1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(WdlVersion::Draft1 < WdlVersion::Draft2);
        assert!(WdlVersion::Draft2 < WdlVersion::V1_0);
        assert!(WdlVersion::V1_0 < WdlVersion::V1_1);
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("1.0".parse::<WdlVersion>().unwrap(), WdlVersion::V1_0);
        assert_eq!("draft-2".parse::<WdlVersion>().unwrap(), WdlVersion::Draft2);
        // draft-3 was renamed to 1.0 on release
        assert_eq!("draft-3".parse::<WdlVersion>().unwrap(), WdlVersion::V1_0);
        assert!("2.0".parse::<WdlVersion>().is_err());
    }

    #[test]
    fn test_feature_gates() {
        assert!(!WdlVersion::Draft2.supports(Feature::InputsSection));
        assert!(WdlVersion::V1_0.supports(Feature::InputsSection));
        assert!(!WdlVersion::V1_0.supports(Feature::CallAfter));
        assert!(WdlVersion::V1_1.supports(Feature::CallAfter));
    }

    #[test]
    fn test_version_statement() {
        assert!(!WdlVersion::Draft2.has_version_statement());
        assert!(WdlVersion::V1_1.has_version_statement());
    }
}
