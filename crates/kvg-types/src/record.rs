//! Version records for graph objects and relationships.
//!
//! Both record kinds share a [`VersionMeta`] header. A chain is the sequence of
//! records sharing a `canonical_id` within one tenant/branch scope; records are
//! immutable once written and each mutation appends a successor.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::ContentHash;
use crate::ids::{BranchId, CanonicalId, OrganizationId, ProjectId, VersionId};
use crate::tenant::TenantContext;

/// Open key/value property bag stored verbatim per version.
///
/// `BTreeMap` keeps keys sorted, so serialization is independent of the order
/// in which callers supplied the keys.
pub type Properties = BTreeMap<String, Value>;

/// What produced a version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    #[default]
    Created,
    Patched,
    Deleted,
    Restored,
    Redirected,
    Forked,
}

/// Field paths that differ from the preceding version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub kind: ChangeKind,
    /// Normalized JSON-pointer paths (e.g. `/title`, `/address/city`).
    pub paths: BTreeSet<String>,
}

impl ChangeSummary {
    pub fn new(kind: ChangeKind, paths: BTreeSet<String>) -> Self {
        Self { kind, paths }
    }

    /// Summary of a tombstone: no paths, marked as a deletion.
    pub fn deletion() -> Self {
        Self::new(ChangeKind::Deleted, BTreeSet::new())
    }

    /// Summary of a row copied onto a new branch.
    pub fn forked() -> Self {
        Self::new(ChangeKind::Forked, BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Header shared by every version row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub id: VersionId,
    pub canonical_id: CanonicalId,
    pub supersedes_id: Option<VersionId>,
    pub version: u32,
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
    pub branch_id: Option<BranchId>,
    pub content_hash: ContentHash,
    pub change_summary: ChangeSummary,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VersionMeta {
    /// First version of a brand-new chain.
    pub fn genesis(
        ctx: &TenantContext,
        content_hash: ContentHash,
        change_summary: ChangeSummary,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VersionId::new(),
            canonical_id: CanonicalId::new(),
            supersedes_id: None,
            version: 1,
            organization_id: ctx.organization_id,
            project_id: ctx.project_id,
            branch_id: ctx.branch_id,
            content_hash,
            change_summary,
            deleted_at: None,
            created_at: now,
        }
    }

    /// Live version that supersedes `self`.
    pub fn successor(
        &self,
        content_hash: ContentHash,
        change_summary: ChangeSummary,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VersionId::new(),
            canonical_id: self.canonical_id,
            supersedes_id: Some(self.id),
            version: self.version + 1,
            organization_id: self.organization_id,
            project_id: self.project_id,
            branch_id: self.branch_id,
            content_hash,
            change_summary,
            deleted_at: None,
            created_at: now,
        }
    }

    /// Tombstone that supersedes `self`, keeping its content hash.
    pub fn tombstone(&self, now: DateTime<Utc>) -> Self {
        Self {
            deleted_at: Some(now),
            ..self.successor(self.content_hash, ChangeSummary::deletion(), now)
        }
    }

    /// Copy of `self` on another branch of the same project. Canonical id,
    /// version number and hash are preserved; the copy starts its own chain on
    /// the branch with an empty [`ChangeKind::Forked`] summary.
    pub fn forked(&self, branch_id: Option<BranchId>, now: DateTime<Utc>) -> Self {
        Self {
            id: VersionId::new(),
            supersedes_id: None,
            branch_id,
            change_summary: ChangeSummary::forked(),
            created_at: now,
            ..self.clone()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The tenant scope this row lives in.
    pub fn tenant(&self) -> TenantContext {
        TenantContext {
            organization_id: self.organization_id,
            project_id: self.project_id,
            branch_id: self.branch_id,
        }
    }
}

/// Common access to the version header of a record.
pub trait Versioned: Clone {
    fn meta(&self) -> &VersionMeta;

    /// A copy of this record carrying a different header.
    fn with_meta(&self, meta: VersionMeta) -> Self;

    fn id(&self) -> VersionId {
        self.meta().id
    }

    fn canonical_id(&self) -> CanonicalId {
        self.meta().canonical_id
    }

    fn version(&self) -> u32 {
        self.meta().version
    }

    fn is_deleted(&self) -> bool {
        self.meta().is_deleted()
    }

    fn content_hash(&self) -> ContentHash {
        self.meta().content_hash
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }
}

/// An entity version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphObject {
    #[serde(flatten)]
    pub meta: VersionMeta,
    #[serde(rename = "type")]
    pub object_type: String,
    pub key: Option<String>,
    pub status: Option<String>,
    pub properties: Properties,
    pub labels: Vec<String>,
}

impl Versioned for GraphObject {
    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn with_meta(&self, meta: VersionMeta) -> Self {
        Self {
            meta,
            ..self.clone()
        }
    }
}

/// A typed, directed edge version. Endpoints are object canonical ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    #[serde(flatten)]
    pub meta: VersionMeta,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub src_id: CanonicalId,
    pub dst_id: CanonicalId,
    pub properties: Properties,
    pub weight: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl GraphRelationship {
    /// Returns `true` if `object` is either endpoint.
    pub fn touches(&self, object: CanonicalId) -> bool {
        self.src_id == object || self.dst_id == object
    }

    /// The endpoint opposite to `object`, if `object` is an endpoint.
    pub fn other_end(&self, object: CanonicalId) -> Option<CanonicalId> {
        if self.src_id == object {
            Some(self.dst_id)
        } else if self.dst_id == object {
            Some(self.src_id)
        } else {
            None
        }
    }
}

impl Versioned for GraphRelationship {
    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn with_meta(&self, meta: VersionMeta) -> Self {
        Self {
            meta,
            ..self.clone()
        }
    }
}

/// A named partition of a project's version space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
    pub name: String,
    pub parent_branch_id: Option<BranchId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
