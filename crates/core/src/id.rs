//! Strongly-typed identifiers used across the domain.
//!
//! Every entity is keyed by a database-assigned 64-bit integer. Wrapping them
//! keeps a `RoleId` from being passed where a `DepartmentId` is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a business (the tenant boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessId(i64);

/// Identifier of a user (actor identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a business-scoped department.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(i64);

/// Identifier of a department-scoped role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(i64);

/// Identifier of the permission row owned by a role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(i64);

/// Identifier of a user-to-role assignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRoleId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_int_newtype!(BusinessId, "BusinessId");
impl_int_newtype!(UserId, "UserId");
impl_int_newtype!(DepartmentId, "DepartmentId");
impl_int_newtype!(RoleId, "RoleId");
impl_int_newtype!(PermissionId, "PermissionId");
impl_int_newtype!(UserRoleId, "UserRoleId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_ids() {
        let id: BusinessId = " 42 ".parse().unwrap();
        assert_eq!(id, BusinessId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let err = "abc".parse::<RoleId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("RoleId")));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
