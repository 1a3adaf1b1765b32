//! Foundation types for the versioned knowledge graph.
//!
//! Every other `kvg` crate depends on `kvg-types`.
//!
//! # Key Types
//!
//! - [`CanonicalId`] / [`VersionId`] -- logical identity vs. one version row
//! - [`TenantContext`] -- explicit organization/project/branch scope
//! - [`GraphObject`] / [`GraphRelationship`] -- immutable version records
//! - [`VersionMeta`] -- header shared by every version row
//! - [`ContentHash`] -- BLAKE3 fingerprint of semantic content
//! - [`MonotonicClock`] -- strictly increasing `created_at` source

pub mod error;
pub mod hash;
pub mod ids;
pub mod record;
pub mod temporal;
pub mod tenant;

pub use error::TypeError;
pub use hash::ContentHash;
pub use ids::{BranchId, CanonicalId, OrganizationId, ProjectId, VersionId};
pub use record::{
    Branch, ChangeKind, ChangeSummary, GraphObject, GraphRelationship, Properties, VersionMeta,
    Versioned,
};
pub use temporal::{truncate_to_micros, MonotonicClock};
pub use tenant::TenantContext;
