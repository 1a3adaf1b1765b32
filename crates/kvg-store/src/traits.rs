use chrono::{DateTime, Utc};
use kvg_types::{
    Branch, BranchId, CanonicalId, GraphObject, GraphRelationship, TenantContext, VersionId,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{HeadPage, ObjectFilter, RelationshipFilter};

/// Read access to version rows within a consistent snapshot.
///
/// Every method except the `locate_*` probes filters on the full tenant scope
/// of `ctx` (organization, project and branch). Rows outside that scope are
/// invisible, never returned.
pub trait GraphReader {
    /// One object version row by id.
    fn object_version(&self, ctx: &TenantContext, id: VersionId)
        -> StoreResult<Option<GraphObject>>;

    /// The highest version of an object chain, tombstone or not.
    fn latest_object(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphObject>>;

    /// An object chain, newest first. `before_version` is an exclusive upper
    /// bound on `version`.
    fn object_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphObject>>;

    /// Latest version per chain that matches `filter`.
    fn object_heads(
        &self,
        ctx: &TenantContext,
        filter: &ObjectFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphObject>>;

    /// Number of chains whose latest version matches `filter`.
    fn count_object_heads(&self, ctx: &TenantContext, filter: &ObjectFilter) -> StoreResult<usize>;

    /// Tenant scope of an object version row, ignoring the caller's scope.
    /// Used only to report cross-tenant access; never returns row content.
    fn locate_object(&self, id: VersionId) -> StoreResult<Option<TenantContext>>;

    /// Tenant scope of any row of an object chain, ignoring the caller's scope.
    fn locate_object_chain(&self, canonical_id: CanonicalId) -> StoreResult<Option<TenantContext>>;

    fn relationship_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphRelationship>>;

    fn latest_relationship(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphRelationship>>;

    fn relationship_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphRelationship>>;

    fn relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphRelationship>>;

    fn count_relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
    ) -> StoreResult<usize>;

    fn locate_relationship(&self, id: VersionId) -> StoreResult<Option<TenantContext>>;

    fn locate_relationship_chain(
        &self,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>>;

    /// A branch of the project in `ctx` (the branch component is ignored).
    fn branch(&self, ctx: &TenantContext, id: BranchId) -> StoreResult<Option<Branch>>;

    fn branch_by_name(&self, ctx: &TenantContext, name: &str) -> StoreResult<Option<Branch>>;

    /// Every branch of the project, oldest first.
    fn branches(&self, ctx: &TenantContext) -> StoreResult<Vec<Branch>>;

    /// Tenant scope owning a branch id, ignoring the caller's scope.
    fn locate_branch(&self, id: BranchId) -> StoreResult<Option<TenantContext>>;
}

/// A write transaction. Reads observe the transaction's own writes.
///
/// Inserts are append-only. `insert_object`/`insert_relationship` enforce the
/// chain compare-and-swap: a row may only start an empty chain or carry
/// exactly the latest version plus one, otherwise
/// [`StoreError::VersionConflict`].
pub trait GraphTx: GraphReader {
    /// Next insert timestamp, strictly greater than every earlier one.
    fn tick(&mut self) -> DateTime<Utc>;

    fn insert_object(&mut self, object: &GraphObject) -> StoreResult<()>;

    fn insert_relationship(&mut self, relationship: &GraphRelationship) -> StoreResult<()>;

    fn insert_branch(&mut self, branch: &Branch) -> StoreResult<()>;

    /// Replace a branch row (name, `updated_at`).
    fn update_branch(&mut self, branch: &Branch) -> StoreResult<()>;

    /// Remove a branch row. Version rows on the branch are kept.
    fn delete_branch(&mut self, ctx: &TenantContext, id: BranchId) -> StoreResult<bool>;
}

/// A transactional graph store.
///
/// `read` runs the closure against a consistent snapshot. `write` runs it in a
/// serialized transaction that commits only when the closure returns `Ok`;
/// any `Err` discards every write made by the closure.
pub trait GraphStore: Send + Sync {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn GraphReader) -> Result<T, E>,
        E: From<StoreError>;

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn GraphTx) -> Result<T, E>,
        E: From<StoreError>;

    /// Short backend name for logs and `/info`.
    fn backend_name(&self) -> &'static str;
}

/// Chain compare-and-swap shared by every backend: `version` must start an
/// empty chain or follow the chain's latest version directly.
pub(crate) fn check_next_version(
    latest: Option<u32>,
    canonical_id: CanonicalId,
    version: u32,
) -> StoreResult<()> {
    match latest {
        Some(latest) if version != latest + 1 => Err(StoreError::VersionConflict {
            canonical_id,
            version,
        }),
        None if version == 0 => Err(StoreError::VersionConflict {
            canonical_id,
            version,
        }),
        _ => Ok(()),
    }
}
