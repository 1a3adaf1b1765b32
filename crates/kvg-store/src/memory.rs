use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use kvg_types::{
    Branch, BranchId, CanonicalId, GraphObject, GraphRelationship, MonotonicClock,
    OrganizationId, ProjectId, TenantContext, VersionId, Versioned,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{order_heads, HeadPage, ObjectFilter, RelationshipFilter};
use crate::traits::{check_next_version, GraphReader, GraphStore, GraphTx};

type Scope = (OrganizationId, ProjectId, Option<BranchId>);

fn scope_of(ctx: &TenantContext) -> Scope {
    (ctx.organization_id, ctx.project_id, ctx.branch_id)
}

fn tenant_of(scope: &Scope) -> TenantContext {
    TenantContext {
        organization_id: scope.0,
        project_id: scope.1,
        branch_id: scope.2,
    }
}

/// Version chains of one tenant scope, each ordered by ascending version.
#[derive(Default)]
struct ScopeState {
    objects: HashMap<CanonicalId, Vec<GraphObject>>,
    relationships: HashMap<CanonicalId, Vec<GraphRelationship>>,
}

#[derive(Default)]
struct GraphState {
    scopes: HashMap<Scope, ScopeState>,
    object_index: HashMap<VersionId, (Scope, CanonicalId)>,
    relationship_index: HashMap<VersionId, (Scope, CanonicalId)>,
    branches: HashMap<BranchId, Branch>,
}

/// One reversible mutation, recorded so a failed transaction can be undone.
enum Undo {
    Object { scope: Scope, canonical_id: CanonicalId, id: VersionId },
    Relationship { scope: Scope, canonical_id: CanonicalId, id: VersionId },
    BranchInserted(BranchId),
    BranchReplaced(Branch),
    BranchDeleted(Branch),
}

/// In-memory graph store.
///
/// Intended for tests and embedding. State sits behind a `RwLock`: readers
/// share it, a writer holds it exclusively for the whole transaction and
/// records an undo log that is replayed if the transaction fails.
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    clock: MonotonicClock,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            clock: MonotonicClock::new(),
        }
    }

    /// Total number of object version rows across all tenants.
    pub fn object_row_count(&self) -> StoreResult<usize> {
        Ok(self.read_state()?.object_index.len())
    }

    /// Total number of relationship version rows across all tenants.
    pub fn relationship_row_count(&self) -> StoreResult<usize> {
        Ok(self.read_state()?.relationship_index.len())
    }

    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, GraphState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, GraphState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn GraphReader) -> Result<T, E>,
        E: From<StoreError>,
    {
        let state = self.read_state()?;
        f(&*state)
    }

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn GraphTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut state = self.write_state()?;
        let mut tx = MemoryTx {
            state: &mut *state,
            clock: &self.clock,
            undo: Vec::new(),
        };
        match f(&mut tx) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::debug!(undone = tx.undo.len(), "rolling back in-memory transaction");
                tx.rollback();
                Err(err)
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn chain_slice<T: Versioned>(
    chain: &[T],
    before_version: Option<u32>,
    limit: Option<usize>,
) -> Vec<T> {
    chain
        .iter()
        .rev()
        .filter(|row| before_version.map_or(true, |b| row.version() < b))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

impl GraphState {
    fn scope(&self, ctx: &TenantContext) -> Option<&ScopeState> {
        self.scopes.get(&scope_of(ctx))
    }

    fn object_heads_unpaged(&self, ctx: &TenantContext, filter: &ObjectFilter) -> Vec<GraphObject> {
        self.scope(ctx)
            .map(|s| {
                s.objects
                    .values()
                    .filter_map(|chain| chain.last())
                    .filter(|head| filter.matches(head))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn relationship_heads_unpaged(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
    ) -> Vec<GraphRelationship> {
        self.scope(ctx)
            .map(|s| {
                s.relationships
                    .values()
                    .filter_map(|chain| chain.last())
                    .filter(|head| filter.matches(head))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl GraphReader for GraphState {
    fn object_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphObject>> {
        let Some((scope, canonical_id)) = self.object_index.get(&id) else {
            return Ok(None);
        };
        if *scope != scope_of(ctx) {
            return Ok(None);
        }
        Ok(self
            .scopes
            .get(scope)
            .and_then(|s| s.objects.get(canonical_id))
            .and_then(|chain| chain.iter().find(|o| o.meta.id == id))
            .cloned())
    }

    fn latest_object(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphObject>> {
        Ok(self
            .scope(ctx)
            .and_then(|s| s.objects.get(&canonical_id))
            .and_then(|chain| chain.last())
            .cloned())
    }

    fn object_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphObject>> {
        Ok(self
            .scope(ctx)
            .and_then(|s| s.objects.get(&canonical_id))
            .map(|chain| chain_slice(chain, before_version, limit))
            .unwrap_or_default())
    }

    fn object_heads(
        &self,
        ctx: &TenantContext,
        filter: &ObjectFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphObject>> {
        Ok(order_heads(self.object_heads_unpaged(ctx, filter), page))
    }

    fn count_object_heads(&self, ctx: &TenantContext, filter: &ObjectFilter) -> StoreResult<usize> {
        Ok(self.object_heads_unpaged(ctx, filter).len())
    }

    fn locate_object(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        Ok(self.object_index.get(&id).map(|(scope, _)| tenant_of(scope)))
    }

    fn locate_object_chain(&self, canonical_id: CanonicalId) -> StoreResult<Option<TenantContext>> {
        Ok(self
            .scopes
            .iter()
            .find(|(_, s)| s.objects.contains_key(&canonical_id))
            .map(|(scope, _)| tenant_of(scope)))
    }

    fn relationship_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphRelationship>> {
        let Some((scope, canonical_id)) = self.relationship_index.get(&id) else {
            return Ok(None);
        };
        if *scope != scope_of(ctx) {
            return Ok(None);
        }
        Ok(self
            .scopes
            .get(scope)
            .and_then(|s| s.relationships.get(canonical_id))
            .and_then(|chain| chain.iter().find(|r| r.meta.id == id))
            .cloned())
    }

    fn latest_relationship(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphRelationship>> {
        Ok(self
            .scope(ctx)
            .and_then(|s| s.relationships.get(&canonical_id))
            .and_then(|chain| chain.last())
            .cloned())
    }

    fn relationship_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphRelationship>> {
        Ok(self
            .scope(ctx)
            .and_then(|s| s.relationships.get(&canonical_id))
            .map(|chain| chain_slice(chain, before_version, limit))
            .unwrap_or_default())
    }

    fn relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphRelationship>> {
        Ok(order_heads(self.relationship_heads_unpaged(ctx, filter), page))
    }

    fn count_relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
    ) -> StoreResult<usize> {
        Ok(self.relationship_heads_unpaged(ctx, filter).len())
    }

    fn locate_relationship(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        Ok(self
            .relationship_index
            .get(&id)
            .map(|(scope, _)| tenant_of(scope)))
    }

    fn locate_relationship_chain(
        &self,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>> {
        Ok(self
            .scopes
            .iter()
            .find(|(_, s)| s.relationships.contains_key(&canonical_id))
            .map(|(scope, _)| tenant_of(scope)))
    }

    fn branch(&self, ctx: &TenantContext, id: BranchId) -> StoreResult<Option<Branch>> {
        Ok(self
            .branches
            .get(&id)
            .filter(|b| b.organization_id == ctx.organization_id && b.project_id == ctx.project_id)
            .cloned())
    }

    fn branch_by_name(&self, ctx: &TenantContext, name: &str) -> StoreResult<Option<Branch>> {
        Ok(self
            .branches
            .values()
            .find(|b| {
                b.organization_id == ctx.organization_id
                    && b.project_id == ctx.project_id
                    && b.name == name
            })
            .cloned())
    }

    fn branches(&self, ctx: &TenantContext) -> StoreResult<Vec<Branch>> {
        let mut out: Vec<Branch> = self
            .branches
            .values()
            .filter(|b| b.organization_id == ctx.organization_id && b.project_id == ctx.project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    fn locate_branch(&self, id: BranchId) -> StoreResult<Option<TenantContext>> {
        Ok(self.branches.get(&id).map(|b| TenantContext {
            organization_id: b.organization_id,
            project_id: b.project_id,
            branch_id: Some(b.id),
        }))
    }
}

/// Exclusive write transaction over the in-memory state.
struct MemoryTx<'a> {
    state: &'a mut GraphState,
    clock: &'a MonotonicClock,
    undo: Vec<Undo>,
}

impl MemoryTx<'_> {
    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Object {
                    scope,
                    canonical_id,
                    id,
                } => {
                    if let Some(s) = self.state.scopes.get_mut(&scope) {
                        if let Some(chain) = s.objects.get_mut(&canonical_id) {
                            chain.retain(|o| o.meta.id != id);
                            if chain.is_empty() {
                                s.objects.remove(&canonical_id);
                            }
                        }
                    }
                    self.state.object_index.remove(&id);
                }
                Undo::Relationship {
                    scope,
                    canonical_id,
                    id,
                } => {
                    if let Some(s) = self.state.scopes.get_mut(&scope) {
                        if let Some(chain) = s.relationships.get_mut(&canonical_id) {
                            chain.retain(|r| r.meta.id != id);
                            if chain.is_empty() {
                                s.relationships.remove(&canonical_id);
                            }
                        }
                    }
                    self.state.relationship_index.remove(&id);
                }
                Undo::BranchInserted(id) => {
                    self.state.branches.remove(&id);
                }
                Undo::BranchReplaced(previous) | Undo::BranchDeleted(previous) => {
                    self.state.branches.insert(previous.id, previous);
                }
            }
        }
    }
}

impl GraphReader for MemoryTx<'_> {
    fn object_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphObject>> {
        self.state.object_version(ctx, id)
    }

    fn latest_object(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphObject>> {
        self.state.latest_object(ctx, canonical_id)
    }

    fn object_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphObject>> {
        self.state
            .object_chain(ctx, canonical_id, before_version, limit)
    }

    fn object_heads(
        &self,
        ctx: &TenantContext,
        filter: &ObjectFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphObject>> {
        self.state.object_heads(ctx, filter, page)
    }

    fn count_object_heads(&self, ctx: &TenantContext, filter: &ObjectFilter) -> StoreResult<usize> {
        self.state.count_object_heads(ctx, filter)
    }

    fn locate_object(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        self.state.locate_object(id)
    }

    fn locate_object_chain(&self, canonical_id: CanonicalId) -> StoreResult<Option<TenantContext>> {
        self.state.locate_object_chain(canonical_id)
    }

    fn relationship_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphRelationship>> {
        self.state.relationship_version(ctx, id)
    }

    fn latest_relationship(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphRelationship>> {
        self.state.latest_relationship(ctx, canonical_id)
    }

    fn relationship_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphRelationship>> {
        self.state
            .relationship_chain(ctx, canonical_id, before_version, limit)
    }

    fn relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphRelationship>> {
        self.state.relationship_heads(ctx, filter, page)
    }

    fn count_relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
    ) -> StoreResult<usize> {
        self.state.count_relationship_heads(ctx, filter)
    }

    fn locate_relationship(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        self.state.locate_relationship(id)
    }

    fn locate_relationship_chain(
        &self,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>> {
        self.state.locate_relationship_chain(canonical_id)
    }

    fn branch(&self, ctx: &TenantContext, id: BranchId) -> StoreResult<Option<Branch>> {
        self.state.branch(ctx, id)
    }

    fn branch_by_name(&self, ctx: &TenantContext, name: &str) -> StoreResult<Option<Branch>> {
        self.state.branch_by_name(ctx, name)
    }

    fn branches(&self, ctx: &TenantContext) -> StoreResult<Vec<Branch>> {
        self.state.branches(ctx)
    }

    fn locate_branch(&self, id: BranchId) -> StoreResult<Option<TenantContext>> {
        self.state.locate_branch(id)
    }
}

impl GraphTx for MemoryTx<'_> {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock.tick()
    }

    fn insert_object(&mut self, object: &GraphObject) -> StoreResult<()> {
        let scope = scope_of(&object.meta.tenant());
        let canonical_id = object.meta.canonical_id;
        if self.state.object_index.contains_key(&object.meta.id) {
            return Err(StoreError::Constraint(format!(
                "object version id {} already exists",
                object.meta.id
            )));
        }
        let latest = self
            .state
            .scopes
            .get(&scope)
            .and_then(|s| s.objects.get(&canonical_id))
            .and_then(|chain| chain.last())
            .map(|o| o.meta.version);
        check_next_version(latest, canonical_id, object.meta.version)?;
        self.state
            .scopes
            .entry(scope)
            .or_default()
            .objects
            .entry(canonical_id)
            .or_default()
            .push(object.clone());
        self.state
            .object_index
            .insert(object.meta.id, (scope, canonical_id));
        self.undo.push(Undo::Object {
            scope,
            canonical_id,
            id: object.meta.id,
        });
        Ok(())
    }

    fn insert_relationship(&mut self, relationship: &GraphRelationship) -> StoreResult<()> {
        let scope = scope_of(&relationship.meta.tenant());
        let canonical_id = relationship.meta.canonical_id;
        if self
            .state
            .relationship_index
            .contains_key(&relationship.meta.id)
        {
            return Err(StoreError::Constraint(format!(
                "relationship version id {} already exists",
                relationship.meta.id
            )));
        }
        let latest = self
            .state
            .scopes
            .get(&scope)
            .and_then(|s| s.relationships.get(&canonical_id))
            .and_then(|chain| chain.last())
            .map(|r| r.meta.version);
        check_next_version(latest, canonical_id, relationship.meta.version)?;
        self.state
            .scopes
            .entry(scope)
            .or_default()
            .relationships
            .entry(canonical_id)
            .or_default()
            .push(relationship.clone());
        self.state
            .relationship_index
            .insert(relationship.meta.id, (scope, canonical_id));
        self.undo.push(Undo::Relationship {
            scope,
            canonical_id,
            id: relationship.meta.id,
        });
        Ok(())
    }

    fn insert_branch(&mut self, branch: &Branch) -> StoreResult<()> {
        let name_taken = self.state.branches.values().any(|b| {
            b.organization_id == branch.organization_id
                && b.project_id == branch.project_id
                && b.name == branch.name
        });
        if name_taken || self.state.branches.contains_key(&branch.id) {
            return Err(StoreError::Constraint(format!(
                "branch '{}' already exists",
                branch.name
            )));
        }
        self.state.branches.insert(branch.id, branch.clone());
        self.undo.push(Undo::BranchInserted(branch.id));
        Ok(())
    }

    fn update_branch(&mut self, branch: &Branch) -> StoreResult<()> {
        let name_taken = self.state.branches.values().any(|b| {
            b.id != branch.id
                && b.organization_id == branch.organization_id
                && b.project_id == branch.project_id
                && b.name == branch.name
        });
        if name_taken {
            return Err(StoreError::Constraint(format!(
                "branch '{}' already exists",
                branch.name
            )));
        }
        match self.state.branches.insert(branch.id, branch.clone()) {
            Some(previous) => {
                self.undo.push(Undo::BranchReplaced(previous));
                Ok(())
            }
            None => {
                self.state.branches.remove(&branch.id);
                Err(StoreError::MissingRow(format!("branch {}", branch.id)))
            }
        }
    }

    fn delete_branch(&mut self, ctx: &TenantContext, id: BranchId) -> StoreResult<bool> {
        if self.state.branch(ctx, id)?.is_none() {
            return Ok(false);
        }
        match self.state.branches.remove(&id) {
            Some(previous) => {
                self.undo.push(Undo::BranchDeleted(previous));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
