//! Role levels and the privilege hierarchy.

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Privilege level of a user.
///
/// Levels are ordered: Employee < Supervisor < Admin < SystemAdmin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleLevel {
    /// Default level for every authenticated user.
    Employee,
    /// Supervises one or more departments.
    Supervisor,
    /// Organization-wide administrator.
    Admin,
    /// Operator of the deployment itself.
    SystemAdmin,
}

impl RoleLevel {
    /// Every level, lowest first.
    pub const ALL: [RoleLevel; 4] = [
        RoleLevel::Employee,
        RoleLevel::Supervisor,
        RoleLevel::Admin,
        RoleLevel::SystemAdmin,
    ];

    /// Stored name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLevel::Employee => "employee",
            RoleLevel::Supervisor => "supervisor",
            RoleLevel::Admin => "admin",
            RoleLevel::SystemAdmin => "system_admin",
        }
    }
}

impl FromStr for RoleLevel {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "employee" => Ok(RoleLevel::Employee),
            "supervisor" => Ok(RoleLevel::Supervisor),
            "admin" => Ok(RoleLevel::Admin),
            "system_admin" | "systemadmin" => Ok(RoleLevel::SystemAdmin),
            other => Err(AuthError::InvalidInput(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RoleLevel {
    fn default() -> Self {
        RoleLevel::Employee
    }
}

/// Lookup table of numeric ranks used for `>=` comparisons.
///
/// Ranks must be strictly increasing in [`RoleLevel::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleHierarchy {
    ranks: BTreeMap<RoleLevel, u32>,
}

impl Default for RoleHierarchy {
    fn default() -> Self {
        Self {
            ranks: RoleLevel::ALL.iter().copied().zip(1..).collect(),
        }
    }
}

impl RoleHierarchy {
    /// Build a hierarchy from explicit ranks.
    pub fn from_ranks(ranks: impl IntoIterator<Item = (RoleLevel, u32)>) -> Result<Self> {
        let hierarchy = Self {
            ranks: ranks.into_iter().collect(),
        };
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    /// Rank of a level. Unranked levels rank below everything.
    pub fn rank(&self, role: RoleLevel) -> u32 {
        self.ranks.get(&role).copied().unwrap_or(0)
    }

    /// Whether `role` grants at least `required`.
    pub fn satisfies(&self, role: RoleLevel, required: RoleLevel) -> bool {
        self.rank(role) >= self.rank(required)
    }

    /// Check that every level is ranked and the order is strict.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut previous: Option<(RoleLevel, u32)> = None;
        for role in RoleLevel::ALL {
            let rank = *self.ranks.get(&role).ok_or_else(|| {
                AuthError::InvalidConfig(format!("role hierarchy is missing '{}'", role))
            })?;
            if !seen.insert(rank) {
                return Err(AuthError::InvalidConfig(format!(
                    "role hierarchy rank {} is used twice",
                    rank
                )));
            }
            if let Some((lower, lower_rank)) = previous {
                if rank <= lower_rank {
                    return Err(AuthError::InvalidConfig(format!(
                        "'{}' must rank above '{}'",
                        role, lower
                    )));
                }
            }
            previous = Some((role, rank));
        }
        Ok(())
    }
}
