//! The [`KnowledgeGraph`] facade.
//!
//! Each call runs in exactly one store transaction: mutations in a write
//! transaction, reads against one snapshot. Ids taken as raw [`Uuid`]s may
//! name either a version or a chain.

use kvg_graph::{
    branches, chain, objects, relationships, ChainTarget, CreateOutcome, GraphError, GraphResult,
    History, HistoryPage, NewBranch, NewObject, NewRelationship, ObjectEdges, ObjectPatch,
    RelationshipPatch,
};
use kvg_merge::{
    merge_objects, preview_merge, BranchMergeSummary, MergeConfig, MergePreviewRequest,
    MergeResult,
};
use kvg_query::{
    search_objects, search_relationships, traverse, ObjectQuery, RelationshipQuery, SearchPage,
    TraverseRequest, TraverseResult,
};
use kvg_store::{GraphBackend, GraphStore, InMemoryGraphStore};
use kvg_types::{
    Branch, BranchId, GraphObject, GraphRelationship, TenantContext, VersionId,
};
use uuid::Uuid;

use crate::config::{KvgConfig, LimitsConfig};
use crate::error::SdkResult;

/// High-level knowledge-graph API over any [`GraphStore`].
pub struct KnowledgeGraph<S = GraphBackend> {
    store: S,
    limits: LimitsConfig,
}

impl KnowledgeGraph<GraphBackend> {
    /// Open the configured backend.
    pub fn open(config: &KvgConfig) -> SdkResult<Self> {
        Ok(Self::with_store(config.store.open()?, config.limits.clone()))
    }
}

impl KnowledgeGraph<InMemoryGraphStore> {
    /// A fresh in-memory graph with default limits.
    pub fn in_memory() -> Self {
        Self::with_store(InMemoryGraphStore::new(), LimitsConfig::default())
    }
}

/// The version the caller claims to have read: explicit, or implied by
/// addressing a specific version.
fn expected_version(target: &ChainTarget, explicit: Option<u32>) -> GraphResult<u32> {
    explicit
        .or(target.named_version)
        .ok_or_else(|| GraphError::invalid("expected_version is required when addressing a chain"))
}

impl<S: GraphStore> KnowledgeGraph<S> {
    pub fn with_store(store: S, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn history_page(&self, mut page: HistoryPage) -> HistoryPage {
        page.limit = Some(page.limit.unwrap_or(self.limits.history_default_limit).max(1));
        page
    }

    // ---- Objects ----

    pub fn create_object(&self, ctx: &TenantContext, input: NewObject) -> GraphResult<GraphObject> {
        self.store.write(|tx| objects::create_object(tx, ctx, input))
    }

    /// A specific version when `id` is a version id, otherwise the chain's
    /// live head.
    pub fn get_object(&self, ctx: &TenantContext, id: Uuid) -> GraphResult<GraphObject> {
        self.store.read(|r| {
            let target = chain::target::<GraphObject, _>(r, ctx, id)?;
            match target.named_version {
                Some(_) => objects::get_object(r, ctx, VersionId::from_uuid(id)),
                None => objects::object_head(r, ctx, target.canonical_id),
            }
        })
    }

    pub fn patch_object(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        patch: ObjectPatch,
        expected: Option<u32>,
    ) -> GraphResult<GraphObject> {
        self.store.write(|tx| {
            let target = chain::target::<GraphObject, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            objects::patch_object(tx, ctx, target.canonical_id, patch, expected)
        })
    }

    pub fn delete_object(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        expected: Option<u32>,
    ) -> GraphResult<GraphObject> {
        self.store.write(|tx| {
            let target = chain::target::<GraphObject, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            objects::delete_object(tx, ctx, target.canonical_id, expected)
        })
    }

    pub fn restore_object(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        expected: Option<u32>,
    ) -> GraphResult<GraphObject> {
        self.store.write(|tx| {
            let target = chain::target::<GraphObject, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            objects::restore_object(tx, ctx, target.canonical_id, expected)
        })
    }

    pub fn object_history(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        page: HistoryPage,
    ) -> GraphResult<History<GraphObject>> {
        let page = self.history_page(page);
        self.store.read(|r| {
            let target = chain::target::<GraphObject, _>(r, ctx, id)?;
            objects::object_history(r, ctx, target.canonical_id, page)
        })
    }

    pub fn object_edges(&self, ctx: &TenantContext, id: Uuid) -> GraphResult<ObjectEdges> {
        self.store.read(|r| {
            let target = chain::target::<GraphObject, _>(r, ctx, id)?;
            objects::object_edges(r, ctx, target.canonical_id)
        })
    }

    // ---- Relationships ----

    pub fn create_relationship(
        &self,
        ctx: &TenantContext,
        input: NewRelationship,
    ) -> GraphResult<CreateOutcome> {
        self.store.write(|tx| relationships::create_relationship(tx, ctx, input))
    }

    pub fn get_relationship(
        &self,
        ctx: &TenantContext,
        id: Uuid,
    ) -> GraphResult<GraphRelationship> {
        self.store.read(|r| {
            let target = chain::target::<GraphRelationship, _>(r, ctx, id)?;
            match target.named_version {
                Some(_) => relationships::get_relationship(r, ctx, VersionId::from_uuid(id)),
                None => relationships::relationship_head(r, ctx, target.canonical_id),
            }
        })
    }

    pub fn patch_relationship(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        patch: RelationshipPatch,
        expected: Option<u32>,
    ) -> GraphResult<GraphRelationship> {
        self.store.write(|tx| {
            let target = chain::target::<GraphRelationship, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            relationships::patch_relationship(tx, ctx, target.canonical_id, patch, expected)
        })
    }

    pub fn delete_relationship(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        expected: Option<u32>,
    ) -> GraphResult<GraphRelationship> {
        self.store.write(|tx| {
            let target = chain::target::<GraphRelationship, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            relationships::delete_relationship(tx, ctx, target.canonical_id, expected)
        })
    }

    pub fn restore_relationship(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        expected: Option<u32>,
    ) -> GraphResult<GraphRelationship> {
        self.store.write(|tx| {
            let target = chain::target::<GraphRelationship, _>(&*tx, ctx, id)?;
            let expected = expected_version(&target, expected)?;
            relationships::restore_relationship(tx, ctx, target.canonical_id, expected)
        })
    }

    pub fn relationship_history(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        page: HistoryPage,
    ) -> GraphResult<History<GraphRelationship>> {
        let page = self.history_page(page);
        self.store.read(|r| {
            let target = chain::target::<GraphRelationship, _>(r, ctx, id)?;
            relationships::relationship_history(r, ctx, target.canonical_id, page)
        })
    }

    // ---- Queries ----

    pub fn traverse(
        &self,
        ctx: &TenantContext,
        request: &TraverseRequest,
    ) -> GraphResult<TraverseResult> {
        let limits = self.limits.query();
        self.store.read(|r| traverse(r, ctx, request, &limits))
    }

    pub fn search_objects(
        &self,
        ctx: &TenantContext,
        query: &ObjectQuery,
    ) -> GraphResult<SearchPage<GraphObject>> {
        let limits = self.limits.query();
        self.store.read(|r| search_objects(r, ctx, query, &limits))
    }

    pub fn search_relationships(
        &self,
        ctx: &TenantContext,
        query: &RelationshipQuery,
    ) -> GraphResult<SearchPage<GraphRelationship>> {
        let limits = self.limits.query();
        self.store.read(|r| search_relationships(r, ctx, query, &limits))
    }

    // ---- Branches ----

    pub fn create_branch(&self, ctx: &TenantContext, input: NewBranch) -> GraphResult<Branch> {
        self.store.write(|tx| branches::create_branch(tx, ctx, input))
    }

    pub fn get_branch(&self, ctx: &TenantContext, id: BranchId) -> GraphResult<Branch> {
        self.store.read(|r| branches::get_branch(r, ctx, id))
    }

    pub fn list_branches(&self, ctx: &TenantContext) -> GraphResult<Vec<Branch>> {
        self.store.read(|r| branches::list_branches(r, ctx))
    }

    pub fn rename_branch(
        &self,
        ctx: &TenantContext,
        id: BranchId,
        name: &str,
    ) -> GraphResult<Branch> {
        self.store.write(|tx| branches::rename_branch(tx, ctx, id, name))
    }

    pub fn delete_branch(&self, ctx: &TenantContext, id: BranchId) -> GraphResult<Branch> {
        self.store.write(|tx| branches::delete_branch(tx, ctx, id))
    }

    // ---- Merge ----

    /// Dry-run comparison of `request.source_branch_id` against `target`.
    pub fn preview_merge(
        &self,
        ctx: &TenantContext,
        target: BranchId,
        request: &MergePreviewRequest,
    ) -> GraphResult<BranchMergeSummary> {
        let hard_limit = self.limits.merge_hard_limit;
        self.store
            .read(|r| preview_merge(r, ctx, target, request, hard_limit))
    }

    pub fn merge_objects(
        &self,
        ctx: &TenantContext,
        source: Uuid,
        target: Uuid,
        config: &MergeConfig,
    ) -> GraphResult<MergeResult> {
        self.store
            .write(|tx| merge_objects(tx, ctx, source, target, config))
    }
}
