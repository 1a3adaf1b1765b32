//! UUID-backed identifiers.
//!
//! All identifiers are UUID v7 so that freshly generated ids sort roughly by
//! creation time. Each kind of id is its own newtype; a [`VersionId`] can never
//! be passed where a [`CanonicalId`] is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered id (UUID v7).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns `true` for the all-zero UUID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Short representation (first 8 characters of the UUID).
            pub fn short_id(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidId(format!("{s:?}: {e}")))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of one specific version row. Never reused.
    VersionId
);

uuid_id!(
    /// Stable logical identity shared by every version in a chain.
    CanonicalId
);

uuid_id!(
    /// Identifier of a named branch within a project.
    BranchId
);

uuid_id!(
    /// Tenant organization.
    OrganizationId
);

uuid_id!(
    /// Project within an organization.
    ProjectId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        let a = CanonicalId::new();
        let b = CanonicalId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let first = VersionId::new();
        let second = VersionId::new();
        assert!(first < second);
    }

    #[test]
    fn parse_roundtrip() {
        let id = BranchId::new();
        let parsed: BranchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<ProjectId>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidId(_)));
    }

    #[test]
    fn serde_is_transparent() {
        let id = OrganizationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: OrganizationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn debug_uses_short_id() {
        let id = VersionId::new();
        let debug = format!("{id:?}");
        assert!(debug.starts_with("VersionId("));
        assert_eq!(debug.len(), "VersionId(".len() + 8 + 1);
    }

    #[test]
    fn nil_detection() {
        assert!(ProjectId::from_uuid(Uuid::nil()).is_nil());
        assert!(!ProjectId::new().is_nil());
    }
}
