//! Tenant-checked access to version chains, shared by objects and
//! relationships.
//!
//! Every lookup runs against the caller's full scope. When a row is not
//! visible, the store is probed once more without scope so that a row owned by
//! another organization or project surfaces as [`GraphError::TenantMismatch`]
//! (and a security event), while a row on another branch of the same project
//! is simply not found.

use std::fmt::Display;

use kvg_store::{GraphReader, GraphTx, StoreError, StoreResult};
use kvg_types::{
    CanonicalId, GraphObject, GraphRelationship, TenantContext, VersionId, Versioned,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{GraphError, GraphResult, RecordKind};

/// A record kind stored as version chains.
pub trait ChainRecord: Versioned {
    const KIND: RecordKind;

    fn load_version<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<Self>>;

    fn load_latest<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<Self>>;

    fn load_chain<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Self>>;

    fn locate_version<R: GraphReader + ?Sized>(
        reader: &R,
        id: VersionId,
    ) -> StoreResult<Option<TenantContext>>;

    fn locate_chain<R: GraphReader + ?Sized>(
        reader: &R,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>>;

    fn append<T: GraphTx + ?Sized>(tx: &mut T, record: &Self) -> StoreResult<()>;
}

impl ChainRecord for GraphObject {
    const KIND: RecordKind = RecordKind::Object;

    fn load_version<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<Self>> {
        reader.object_version(ctx, id)
    }

    fn load_latest<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<Self>> {
        reader.latest_object(ctx, canonical_id)
    }

    fn load_chain<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Self>> {
        reader.object_chain(ctx, canonical_id, before_version, limit)
    }

    fn locate_version<R: GraphReader + ?Sized>(
        reader: &R,
        id: VersionId,
    ) -> StoreResult<Option<TenantContext>> {
        reader.locate_object(id)
    }

    fn locate_chain<R: GraphReader + ?Sized>(
        reader: &R,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>> {
        reader.locate_object_chain(canonical_id)
    }

    fn append<T: GraphTx + ?Sized>(tx: &mut T, record: &Self) -> StoreResult<()> {
        tx.insert_object(record)
    }
}

impl ChainRecord for GraphRelationship {
    const KIND: RecordKind = RecordKind::Relationship;

    fn load_version<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<Self>> {
        reader.relationship_version(ctx, id)
    }

    fn load_latest<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<Self>> {
        reader.latest_relationship(ctx, canonical_id)
    }

    fn load_chain<R: GraphReader + ?Sized>(
        reader: &R,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Self>> {
        reader.relationship_chain(ctx, canonical_id, before_version, limit)
    }

    fn locate_version<R: GraphReader + ?Sized>(
        reader: &R,
        id: VersionId,
    ) -> StoreResult<Option<TenantContext>> {
        reader.locate_relationship(id)
    }

    fn locate_chain<R: GraphReader + ?Sized>(
        reader: &R,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>> {
        reader.locate_relationship_chain(canonical_id)
    }

    fn append<T: GraphTx + ?Sized>(tx: &mut T, record: &Self) -> StoreResult<()> {
        tx.insert_relationship(record)
    }
}

/// The error for a row that is not visible in `ctx`, given where (if
/// anywhere) the row actually lives.
pub(crate) fn invisible(
    kind: RecordKind,
    ctx: &TenantContext,
    located: Option<TenantContext>,
    id: impl Display,
) -> GraphError {
    match located {
        Some(owner) if !owner.same_project(ctx) => {
            warn!(
                target: "kvg::security",
                kind = %kind,
                id = %id,
                caller = %ctx,
                "cross-tenant access rejected"
            );
            GraphError::TenantMismatch {
                kind,
                id: id.to_string(),
            }
        }
        _ => GraphError::not_found(kind, id),
    }
}

/// One version row by id.
pub fn version<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    id: VersionId,
) -> GraphResult<C> {
    match C::load_version(reader, ctx, id)? {
        Some(row) => Ok(row),
        None => Err(invisible(C::KIND, ctx, C::locate_version(reader, id)?, id)),
    }
}

/// The latest row of a chain, tombstone or not.
pub fn latest<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
) -> GraphResult<C> {
    match C::load_latest(reader, ctx, canonical_id)? {
        Some(row) => Ok(row),
        None => Err(invisible(
            C::KIND,
            ctx,
            C::locate_chain(reader, canonical_id)?,
            canonical_id,
        )),
    }
}

/// The live head of a chain. A tombstoned chain has no head.
pub fn head<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
) -> GraphResult<C> {
    let row: C = latest(reader, ctx, canonical_id)?;
    if row.is_deleted() {
        return Err(GraphError::not_found(C::KIND, canonical_id));
    }
    Ok(row)
}

/// A chain named by a raw id, which may be either a version id or a canonical
/// id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTarget {
    pub canonical_id: CanonicalId,
    /// Version number of the row, when the id named a specific version.
    pub named_version: Option<u32>,
}

/// Resolve a raw id to the chain it names.
pub fn target<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    raw: Uuid,
) -> GraphResult<ChainTarget> {
    if let Some(row) = C::load_version(reader, ctx, VersionId::from_uuid(raw))? {
        return Ok(ChainTarget {
            canonical_id: row.canonical_id(),
            named_version: Some(row.version()),
        });
    }
    let canonical_id = CanonicalId::from_uuid(raw);
    if C::load_latest(reader, ctx, canonical_id)?.is_some() {
        return Ok(ChainTarget {
            canonical_id,
            named_version: None,
        });
    }
    let located = match C::locate_version(reader, VersionId::from_uuid(raw))? {
        Some(owner) => Some(owner),
        None => C::locate_chain(reader, canonical_id)?,
    };
    Err(invisible(C::KIND, ctx, located, raw))
}

/// The latest row of the chain named by a raw id.
pub fn resolve<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    raw: Uuid,
) -> GraphResult<C> {
    let target = target::<C, R>(reader, ctx, raw)?;
    latest(reader, ctx, target.canonical_id)
}

/// Load the latest row and check the caller's expected version against it.
pub(crate) fn expect_latest<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<C> {
    let row: C = latest(reader, ctx, canonical_id)?;
    if row.version() != expected_version {
        return Err(GraphError::StaleVersion {
            canonical_id,
            expected: expected_version,
            current: Some(row.version()),
        });
    }
    Ok(row)
}

/// Append a successor row, reporting a lost compare-and-swap as
/// [`GraphError::StaleVersion`] with the version that won.
pub(crate) fn append<C: ChainRecord, T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    record: &C,
) -> GraphResult<()> {
    match C::append(tx, record) {
        Ok(()) => Ok(()),
        Err(StoreError::VersionConflict {
            canonical_id,
            version,
        }) => {
            let current = C::load_latest(&*tx, ctx, canonical_id)?.map(|r| r.version());
            Err(GraphError::StaleVersion {
                canonical_id,
                expected: version.saturating_sub(1),
                current,
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Tombstone the live head of a chain.
pub fn delete<C: ChainRecord, T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<C> {
    let row: C = expect_latest(&*tx, ctx, canonical_id, expected_version)?;
    if row.is_deleted() {
        return Err(GraphError::not_found(C::KIND, canonical_id));
    }
    let now = tx.tick();
    let tombstone = row.with_meta(row.meta().tombstone(now));
    append(tx, ctx, &tombstone)?;
    Ok(tombstone)
}

/// Paging of a chain's history, newest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Exclusive upper bound on `version`.
    #[serde(default)]
    pub before_version: Option<u32>,
    /// `None` returns the rest of the chain.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One page of a chain's history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct History<T> {
    pub canonical_id: CanonicalId,
    pub items: Vec<T>,
    pub has_more: bool,
    /// Cursor for the next (older) page.
    pub next_before_version: Option<u32>,
}

/// Versions of a chain, newest first.
pub fn history<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    page: HistoryPage,
) -> GraphResult<History<C>> {
    // Existence and tenant check first, so an empty page is never mistaken for
    // a missing chain.
    latest::<C, R>(reader, ctx, canonical_id)?;
    let mut items = C::load_chain(
        reader,
        ctx,
        canonical_id,
        page.before_version,
        page.limit.map(|l| l + 1),
    )?;
    let has_more = page.limit.is_some_and(|l| items.len() > l);
    if let Some(limit) = page.limit {
        items.truncate(limit);
    }
    let next_before_version = if has_more {
        items.last().map(|r| r.version())
    } else {
        None
    };
    Ok(History {
        canonical_id,
        items,
        has_more,
        next_before_version,
    })
}
