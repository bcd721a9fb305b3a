use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse role classification.
///
/// The tier is descriptive only: administrative standing comes from placement
/// in the Admin department, not from `Admin` here.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessTier {
    Admin,
    Manager,
    #[default]
    User,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Admin => "ADMIN",
            AccessTier::Manager => "MANAGER",
            AccessTier::User => "USER",
        }
    }
}

impl core::fmt::Display for AccessTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessTier {
    type Err = onboard_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(AccessTier::Admin),
            "MANAGER" => Ok(AccessTier::Manager),
            "USER" => Ok(AccessTier::User),
            other => Err(onboard_core::DomainError::validation(format!(
                "unknown access tier '{other}'"
            ))),
        }
    }
}
