use serde::Deserialize;
use std::{fmt, str::FromStr};

// -----------------------------------------------------------------------------
// ----- TabletType ------------------------------------------------------------

/// Role of the backend replica a session targets. Fixed for the lifetime of
/// a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletType {
    /// Read/write replica. Accepts the legacy name `master`.
    #[serde(alias = "master")]
    Primary,

    /// Serving read-only replica.
    Replica,

    /// Read-only replica reserved for batch and analytics traffic.
    Rdonly,
}

impl TabletType {
    pub fn as_str(self) -> &'static str {
        match self {
            TabletType::Primary => "primary",
            TabletType::Replica => "replica",
            TabletType::Rdonly => "rdonly",
        }
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "master" => Ok(TabletType::Primary),
            "replica" => Ok(TabletType::Replica),
            "rdonly" => Ok(TabletType::Rdonly),
            other => Err(format!("unknown tablet type '{other}'")),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
