//! Relationship chains.
//!
//! A relationship's identity is `(type, src, dst)` over object canonical ids.
//! At most one live head may hold an identity in a scope; creating an identity
//! that already has an identical live head returns that head unchanged.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kvg_diff::{diff_properties, merge_patch, normalize_properties};
use kvg_store::{GraphReader, GraphTx, HeadPage, RelationshipFilter};
use kvg_types::{
    CanonicalId, ChangeKind, ChangeSummary, GraphObject, GraphRelationship, Properties,
    TenantContext, VersionId, VersionMeta, Versioned,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::branches::ensure_branch;
use crate::chain::{self, History, HistoryPage};
use crate::content::relationship_hash;
use crate::error::{GraphError, GraphResult, RecordKind};
use crate::objects::required;

/// Input for [`create_relationship`]. Endpoints may be any version id or the
/// canonical id of a live object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub src_id: Uuid,
    pub dst_id: Uuid,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl NewRelationship {
    pub fn new(relationship_type: impl Into<String>, src_id: Uuid, dst_id: Uuid) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            src_id,
            dst_id,
            properties: Properties::new(),
            weight: None,
            valid_from: None,
            valid_to: None,
        }
    }

    /// Endpoints named by canonical id.
    pub fn between(
        relationship_type: impl Into<String>,
        src: CanonicalId,
        dst: CanonicalId,
    ) -> Self {
        Self::new(relationship_type, *src.as_uuid(), *dst.as_uuid())
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Input for [`patch_relationship`]. Endpoints and type are fixed for the
/// life of a chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPatch {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub weight: Option<f64>,
    /// `None` keeps the bound, `Some(None)` clears it. In JSON an absent
    /// field keeps and `null` clears.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_from: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_to: Option<Option<DateTime<Utc>>>,
}

impl RelationshipPatch {
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Replace both validity bounds; `None` clears a bound.
    pub fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = Some(valid_from);
        self.valid_to = Some(valid_to);
        self
    }
}

/// A present field, `null` included, deserializes to `Some`.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Result of [`create_relationship`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreateOutcome {
    pub relationship: GraphRelationship,
    /// `false` when an identical live head already existed.
    pub created: bool,
}

/// Result of re-pointing a relationship from one object to another.
#[derive(Clone, Debug, PartialEq)]
pub enum Redirect {
    /// A new version with the endpoint replaced.
    Moved(GraphRelationship),
    /// The redirect would have produced a self-loop or a duplicate identity,
    /// so the relationship was tombstoned instead.
    Dropped(GraphRelationship),
}

fn check_weight(weight: f64) -> GraphResult<f64> {
    if !weight.is_finite() {
        return Err(GraphError::invalid("weight must be a finite number"));
    }
    Ok(weight)
}

fn check_validity(
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
) -> GraphResult<()> {
    if let (Some(from), Some(to)) = (valid_from, valid_to) {
        if from > to {
            return Err(GraphError::invalid("valid_from must not be after valid_to"));
        }
    }
    Ok(())
}

/// Resolve an endpoint reference to the canonical id of a live object.
fn resolve_endpoint<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    role: &str,
    raw: Uuid,
) -> GraphResult<CanonicalId> {
    match chain::resolve::<GraphObject, R>(reader, ctx, raw) {
        Ok(object) if !object.is_deleted() => Ok(object.canonical_id()),
        Ok(_) | Err(GraphError::NotFound { .. }) => Err(GraphError::DanglingEndpoint(format!(
            "{role} {raw} is not a live object"
        ))),
        Err(err) => Err(err),
    }
}

/// Fail with [`GraphError::DanglingEndpoint`] unless `id` is a live object head.
fn ensure_live_endpoint<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    role: &str,
    id: CanonicalId,
) -> GraphResult<()> {
    match reader.latest_object(ctx, id)? {
        Some(object) if !object.is_deleted() => Ok(()),
        _ => Err(GraphError::DanglingEndpoint(format!(
            "{role} {id} is not a live object"
        ))),
    }
}

/// The live head holding `(type, src, dst)`, if any.
fn identity_holder<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    relationship_type: &str,
    src_id: CanonicalId,
    dst_id: CanonicalId,
) -> GraphResult<Option<GraphRelationship>> {
    let filter = RelationshipFilter::by_identity(relationship_type, src_id, dst_id);
    Ok(reader
        .relationship_heads(ctx, &filter, HeadPage::first(1))?
        .into_iter()
        .next())
}

fn hash_of(rel: &GraphRelationship) -> GraphResult<kvg_types::ContentHash> {
    relationship_hash(
        &rel.relationship_type,
        rel.src_id,
        rel.dst_id,
        &rel.properties,
        rel.weight,
        rel.valid_from,
        rel.valid_to,
    )
}

/// Create a relationship, or return the identical live head if one exists.
pub fn create_relationship<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    input: NewRelationship,
) -> GraphResult<CreateOutcome> {
    ensure_branch(&*tx, ctx)?;
    let relationship_type = required("relationship type", &input.relationship_type)?;
    let src_id = resolve_endpoint(&*tx, ctx, "source", input.src_id)?;
    let dst_id = resolve_endpoint(&*tx, ctx, "target", input.dst_id)?;
    if src_id == dst_id {
        return Err(GraphError::invalid(
            "a relationship must not connect an object to itself",
        ));
    }
    let weight = check_weight(input.weight.unwrap_or(0.0))?;
    check_validity(input.valid_from, input.valid_to)?;
    let properties = normalize_properties(&input.properties);
    let content_hash = relationship_hash(
        &relationship_type,
        src_id,
        dst_id,
        &properties,
        weight,
        input.valid_from,
        input.valid_to,
    )?;

    if let Some(existing) = identity_holder(&*tx, ctx, &relationship_type, src_id, dst_id)? {
        if existing.content_hash() == content_hash {
            return Ok(CreateOutcome {
                relationship: existing,
                created: false,
            });
        }
        return Err(GraphError::DuplicateKey(format!(
            "relationship {relationship_type} {src_id} -> {dst_id} already exists \
             with different content"
        )));
    }

    let paths = diff_properties(&Properties::new(), &properties).paths();
    let now = tx.tick();
    let relationship = GraphRelationship {
        meta: VersionMeta::genesis(
            ctx,
            content_hash,
            ChangeSummary::new(ChangeKind::Created, paths),
            now,
        ),
        relationship_type,
        src_id,
        dst_id,
        properties,
        weight,
        valid_from: input.valid_from,
        valid_to: input.valid_to,
    };
    chain::append(tx, ctx, &relationship)?;
    debug!(
        canonical_id = %relationship.canonical_id(),
        relationship_type = %relationship.relationship_type,
        "relationship created"
    );
    Ok(CreateOutcome {
        relationship,
        created: true,
    })
}

/// One relationship version by version id.
pub fn get_relationship<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    id: VersionId,
) -> GraphResult<GraphRelationship> {
    chain::version(reader, ctx, id)
}

/// The live head of a relationship chain.
pub fn relationship_head<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
) -> GraphResult<GraphRelationship> {
    chain::head(reader, ctx, canonical_id)
}

/// Append a patched version. Both endpoints must still be live.
pub fn patch_relationship<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    patch: RelationshipPatch,
    expected_version: u32,
) -> GraphResult<GraphRelationship> {
    let head: GraphRelationship = chain::expect_latest(&*tx, ctx, canonical_id, expected_version)?;
    if head.is_deleted() {
        return Err(GraphError::not_found(RecordKind::Relationship, canonical_id));
    }
    ensure_live_endpoint(&*tx, ctx, "source", head.src_id)?;
    ensure_live_endpoint(&*tx, ctx, "target", head.dst_id)?;

    let valid_from = patch.valid_from.unwrap_or(head.valid_from);
    let valid_to = patch.valid_to.unwrap_or(head.valid_to);
    check_validity(valid_from, valid_to)?;
    let weight = check_weight(patch.weight.unwrap_or(head.weight))?;
    let properties = merge_patch(&head.properties, &patch.properties);
    let paths = diff_properties(&head.properties, &properties).paths();

    let mut next = GraphRelationship {
        properties,
        weight,
        valid_from,
        valid_to,
        ..head.clone()
    };
    let content_hash = hash_of(&next)?;
    let now = tx.tick();
    next.meta = head
        .meta
        .successor(content_hash, ChangeSummary::new(ChangeKind::Patched, paths), now);
    chain::append(tx, ctx, &next)?;
    debug!(canonical_id = %canonical_id, version = next.version(), "relationship patched");
    Ok(next)
}

/// Append a tombstone to a live relationship chain.
pub fn delete_relationship<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<GraphRelationship> {
    let tombstone: GraphRelationship = chain::delete(tx, ctx, canonical_id, expected_version)?;
    debug!(canonical_id = %canonical_id, version = tombstone.version(), "relationship deleted");
    Ok(tombstone)
}

/// Revive a tombstoned relationship. Both endpoints must be live and no other
/// live head may hold the identity.
pub fn restore_relationship<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<GraphRelationship> {
    let tombstone: GraphRelationship =
        chain::expect_latest(&*tx, ctx, canonical_id, expected_version)?;
    if !tombstone.is_deleted() {
        return Err(GraphError::not_found(RecordKind::Relationship, canonical_id));
    }
    ensure_live_endpoint(&*tx, ctx, "source", tombstone.src_id)?;
    ensure_live_endpoint(&*tx, ctx, "target", tombstone.dst_id)?;
    if identity_holder(
        &*tx,
        ctx,
        &tombstone.relationship_type,
        tombstone.src_id,
        tombstone.dst_id,
    )?
    .is_some()
    {
        return Err(GraphError::DuplicateKey(format!(
            "relationship {} {} -> {} already exists",
            tombstone.relationship_type, tombstone.src_id, tombstone.dst_id
        )));
    }

    let paths = diff_properties(&Properties::new(), &tombstone.properties).paths();
    let now = tx.tick();
    let restored = tombstone.with_meta(tombstone.meta.successor(
        tombstone.content_hash(),
        ChangeSummary::new(ChangeKind::Restored, paths),
        now,
    ));
    chain::append(tx, ctx, &restored)?;
    debug!(canonical_id = %canonical_id, version = restored.version(), "relationship restored");
    Ok(restored)
}

/// Versions of a relationship chain, newest first.
pub fn relationship_history<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    page: HistoryPage,
) -> GraphResult<History<GraphRelationship>> {
    chain::history(reader, ctx, canonical_id, page)
}

/// Re-point every end of a live relationship that sits on `from` to `to`.
///
/// The caller guarantees `to` is a live object. If the moved relationship
/// would loop or collide with another live head of the same identity, it is
/// tombstoned instead.
pub fn redirect_relationship<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    head: &GraphRelationship,
    from: CanonicalId,
    to: CanonicalId,
) -> GraphResult<Redirect> {
    let mut paths = BTreeSet::new();
    let mut moved = head.clone();
    if moved.src_id == from {
        moved.src_id = to;
        paths.insert("/src_id".to_string());
    }
    if moved.dst_id == from {
        moved.dst_id = to;
        paths.insert("/dst_id".to_string());
    }

    let collides = moved.src_id == moved.dst_id
        || identity_holder(&*tx, ctx, &moved.relationship_type, moved.src_id, moved.dst_id)?
            .is_some_and(|holder| holder.canonical_id() != head.canonical_id());
    if collides {
        let tombstone: GraphRelationship =
            chain::delete(tx, ctx, head.canonical_id(), head.version())?;
        debug!(canonical_id = %head.canonical_id(), "relationship dropped during redirect");
        return Ok(Redirect::Dropped(tombstone));
    }

    let content_hash = hash_of(&moved)?;
    let now = tx.tick();
    moved.meta = head
        .meta
        .successor(content_hash, ChangeSummary::new(ChangeKind::Redirected, paths), now);
    chain::append(tx, ctx, &moved)?;
    debug!(
        canonical_id = %head.canonical_id(),
        version = moved.version(),
        "relationship redirected"
    );
    Ok(Redirect::Moved(moved))
}
