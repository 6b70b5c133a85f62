use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Asset-class domain handled by one sub-orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Bonds,
    Crypto,
    RealEstate,
    Distressed,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Bonds,
        Domain::Crypto,
        Domain::RealEstate,
        Domain::Distressed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Bonds => "bonds",
            Domain::Crypto => "crypto",
            Domain::RealEstate => "real_estate",
            Domain::Distressed => "distressed",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown domain '{}'", s))
    }
}
