//! Branches: named partitions of a project's version space.
//!
//! Creating a branch forks the parent line: every live object and
//! relationship head is copied onto the new branch with its canonical id,
//! version number and content hash intact, under an empty `Forked` change
//! summary. From then on the two lines evolve independently.

use kvg_store::{GraphReader, GraphTx, HeadPage, ObjectFilter, RelationshipFilter};
use kvg_types::{Branch, BranchId, TenantContext, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{self, invisible, ChainRecord};
use crate::error::{GraphError, GraphResult, RecordKind};
use crate::names::validate_branch_name;

/// Input for [`create_branch`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBranch {
    pub name: String,
    /// Line to fork from; `None` forks the main line.
    #[serde(default)]
    pub parent_branch_id: Option<BranchId>,
}

impl NewBranch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_branch_id: None,
        }
    }

    pub fn from_parent(mut self, parent: BranchId) -> Self {
        self.parent_branch_id = Some(parent);
        self
    }
}

/// A branch of the project in `ctx`.
pub fn get_branch<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    id: BranchId,
) -> GraphResult<Branch> {
    match reader.branch(ctx, id)? {
        Some(branch) => Ok(branch),
        None => Err(invisible(
            RecordKind::Branch,
            ctx,
            reader.locate_branch(id)?,
            id,
        )),
    }
}

/// Fail unless the branch addressed by `ctx` exists. The main line always
/// exists.
pub fn ensure_branch<R: GraphReader + ?Sized>(reader: &R, ctx: &TenantContext) -> GraphResult<()> {
    match ctx.branch_id {
        Some(id) => get_branch(reader, ctx, id).map(|_| ()),
        None => Ok(()),
    }
}

/// Every branch of the project, oldest first.
pub fn list_branches<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
) -> GraphResult<Vec<Branch>> {
    Ok(reader.branches(ctx)?)
}

fn ensure_name_free<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    name: &str,
    except: Option<BranchId>,
) -> GraphResult<()> {
    match reader.branch_by_name(ctx, name)? {
        Some(holder) if Some(holder.id) != except => Err(GraphError::DuplicateKey(format!(
            "branch {name:?} already exists"
        ))),
        _ => Ok(()),
    }
}

/// Copy every live head of `C` from `from` onto `to`, one tick per row.
fn fork_heads<C: ChainRecord, T: GraphTx + ?Sized>(
    tx: &mut T,
    from: &TenantContext,
    to: &TenantContext,
    heads: Vec<C>,
) -> GraphResult<usize> {
    let count = heads.len();
    for head in heads {
        let now = tx.tick();
        let copy = head.with_meta(head.meta().forked(to.branch_id, now));
        chain::append(tx, to, &copy)?;
    }
    debug!(from = %from, to = %to, kind = %C::KIND, count, "heads forked");
    Ok(count)
}

/// Create a branch and fork the parent line's live heads onto it.
pub fn create_branch<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    input: NewBranch,
) -> GraphResult<Branch> {
    let name = validate_branch_name(&input.name)?;
    ensure_name_free(&*tx, ctx, &name, None)?;
    if let Some(parent) = input.parent_branch_id {
        get_branch(&*tx, ctx, parent)?;
    }

    let now = tx.tick();
    let branch = Branch {
        id: BranchId::new(),
        organization_id: ctx.organization_id,
        project_id: ctx.project_id,
        name,
        parent_branch_id: input.parent_branch_id,
        created_at: now,
        updated_at: now,
    };
    tx.insert_branch(&branch)?;

    let parent_line = ctx.on_branch(input.parent_branch_id);
    let new_line = ctx.on_branch(Some(branch.id));
    let objects = tx.object_heads(&parent_line, &ObjectFilter::live(), HeadPage::all())?;
    let relationships =
        tx.relationship_heads(&parent_line, &RelationshipFilter::live(), HeadPage::all())?;
    let object_count = fork_heads(tx, &parent_line, &new_line, objects)?;
    let relationship_count = fork_heads(tx, &parent_line, &new_line, relationships)?;

    info!(
        branch_id = %branch.id,
        name = %branch.name,
        objects = object_count,
        relationships = relationship_count,
        "branch created"
    );
    Ok(branch)
}

/// Rename a branch. The new name must be free in the project.
pub fn rename_branch<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    id: BranchId,
    new_name: &str,
) -> GraphResult<Branch> {
    let mut branch = get_branch(&*tx, ctx, id)?;
    let name = validate_branch_name(new_name)?;
    ensure_name_free(&*tx, ctx, &name, Some(id))?;
    branch.name = name;
    branch.updated_at = tx.tick();
    tx.update_branch(&branch)?;
    info!(branch_id = %id, name = %branch.name, "branch renamed");
    Ok(branch)
}

/// Remove a branch. Refused while other branches fork from it; the branch's
/// version rows stay in place for history.
pub fn delete_branch<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    id: BranchId,
) -> GraphResult<Branch> {
    let branch = get_branch(&*tx, ctx, id)?;
    let children = tx
        .branches(ctx)?
        .into_iter()
        .filter(|b| b.parent_branch_id == Some(id))
        .count();
    if children > 0 {
        return Err(GraphError::invalid(format!(
            "branch {:?} has {children} child branch(es)",
            branch.name
        )));
    }
    if !tx.delete_branch(ctx, id)? {
        return Err(GraphError::not_found(RecordKind::Branch, id));
    }
    info!(branch_id = %id, name = %branch.name, "branch deleted");
    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{create_object, object_head, patch_object, NewObject, ObjectPatch};
    use crate::relationships::{create_relationship, NewRelationship};
    use crate::testing::{create, main_line, other_tenant};
    use kvg_store::{GraphStore, InMemoryGraphStore};
    use kvg_types::ChangeKind;
    use serde_json::json;

    fn branch(store: &InMemoryGraphStore, ctx: &TenantContext, input: NewBranch) -> Branch {
        store.write(|tx| create_branch(tx, ctx, input)).unwrap()
    }

    #[test]
    fn fork_copies_live_heads_with_identity() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let a = create(&store, &ctx, NewObject::new("Doc").with_property("t", json!(1)));
        let b = create(&store, &ctx, NewObject::new("Doc"));
        let gone = create(&store, &ctx, NewObject::new("Doc"));
        store
            .write(|tx| crate::objects::delete_object(tx, &ctx, gone.canonical_id(), 1))
            .unwrap();
        store
            .write(|tx| {
                create_relationship(
                    tx,
                    &ctx,
                    NewRelationship::between("R", a.canonical_id(), b.canonical_id()),
                )
            })
            .unwrap();

        let feature = branch(&store, &ctx, NewBranch::new("feature"));
        let on_feature = ctx.on_branch(Some(feature.id));

        let copy = store.read(|r| object_head(r, &on_feature, a.canonical_id())).unwrap();
        assert_eq!(copy.version(), a.version());
        assert_eq!(copy.content_hash(), a.content_hash());
        assert_eq!(copy.meta.change_summary.kind, ChangeKind::Forked);
        assert!(copy.meta.change_summary.is_empty());
        assert_ne!(copy.id(), a.id());
        assert_eq!(copy.meta.branch_id, Some(feature.id));

        let err = store
            .read(|r| object_head(r, &on_feature, gone.canonical_id()))
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));

        let rels = store
            .read(|r| {
                Ok::<_, GraphError>(r.relationship_heads(
                    &on_feature,
                    &RelationshipFilter::live(),
                    HeadPage::all(),
                )?)
            })
            .unwrap();
        assert_eq!(rels.len(), 1);
    }

    #[test]
    fn branches_evolve_independently() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let a = create(&store, &ctx, NewObject::new("Doc").with_property("t", json!(1)));
        let feature = branch(&store, &ctx, NewBranch::new("feature"));
        let on_feature = ctx.on_branch(Some(feature.id));

        store
            .write(|tx| {
                patch_object(
                    tx,
                    &on_feature,
                    a.canonical_id(),
                    ObjectPatch::default().with_property("t", json!(2)),
                    1,
                )
            })
            .unwrap();
        let main_head = store.read(|r| object_head(r, &ctx, a.canonical_id())).unwrap();
        assert_eq!(main_head.properties["t"], json!(1));
        assert_eq!(main_head.version(), 1);
    }

    #[test]
    fn writes_to_unknown_branch_fail() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line().on_branch(Some(BranchId::new()));
        let err = store
            .write(|tx| create_object(tx, &ctx, NewObject::new("Doc")))
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound { kind: RecordKind::Branch, .. }));
    }

    #[test]
    fn names_are_unique_and_validated() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        branch(&store, &ctx, NewBranch::new("feature"));
        let err = store
            .write(|tx| create_branch(tx, &ctx, NewBranch::new(" feature ")))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));
        let err = store
            .write(|tx| create_branch(tx, &ctx, NewBranch::new("bad..name")))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));
    }

    #[test]
    fn parent_must_exist_and_is_forked() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let err = store
            .write(|tx| create_branch(tx, &ctx, NewBranch::new("x").from_parent(BranchId::new())))
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));

        let parent = branch(&store, &ctx, NewBranch::new("parent"));
        let on_parent = ctx.on_branch(Some(parent.id));
        let only_on_parent = create(&store, &on_parent, NewObject::new("Doc"));
        let child = branch(&store, &ctx, NewBranch::new("child").from_parent(parent.id));
        assert_eq!(child.parent_branch_id, Some(parent.id));
        let on_child = ctx.on_branch(Some(child.id));
        store
            .read(|r| object_head(r, &on_child, only_on_parent.canonical_id()))
            .unwrap();
    }

    #[test]
    fn rename_and_list() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let first = branch(&store, &ctx, NewBranch::new("one"));
        branch(&store, &ctx, NewBranch::new("two"));

        let renamed = store
            .write(|tx| rename_branch(tx, &ctx, first.id, "uno"))
            .unwrap();
        assert_eq!(renamed.name, "uno");
        assert!(renamed.updated_at > first.updated_at);

        let err = store
            .write(|tx| rename_branch(tx, &ctx, first.id, "two"))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));

        let names: Vec<_> = store
            .read(|r| list_branches(r, &ctx))
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["uno", "two"]);
    }

    #[test]
    fn delete_refuses_parents_and_keeps_rows() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let parent = branch(&store, &ctx, NewBranch::new("parent"));
        let child = branch(&store, &ctx, NewBranch::new("child").from_parent(parent.id));
        let rows_before = store.object_row_count().unwrap();

        let err = store.write(|tx| delete_branch(tx, &ctx, parent.id)).unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));

        store.write(|tx| delete_branch(tx, &ctx, child.id)).unwrap();
        store.write(|tx| delete_branch(tx, &ctx, parent.id)).unwrap();
        assert!(store.read(|r| list_branches(r, &ctx)).unwrap().is_empty());
        assert_eq!(store.object_row_count().unwrap(), rows_before);
    }

    #[test]
    fn foreign_branch_is_mismatch() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let mine = branch(&store, &ctx, NewBranch::new("mine"));
        let err = store
            .read(|r| get_branch(r, &other_tenant(), mine.id))
            .unwrap_err();
        assert!(matches!(err, GraphError::TenantMismatch { .. }));
    }
}
