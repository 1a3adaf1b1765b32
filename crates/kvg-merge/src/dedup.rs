//! Object merge: fold a duplicate object into another.
//!
//! Runs inside one write transaction supplied by the caller. Any error leaves
//! the store exactly as it was before the merge began.

use std::collections::BTreeMap;

use kvg_diff::{normalize_labels, normalize_properties};
use kvg_graph::{
    chain, delete_object, patch_object, redirect_relationship, GraphError, GraphResult,
    ObjectPatch, Redirect, RecordKind,
};
use kvg_store::{GraphTx, HeadPage, RelationshipFilter};
use kvg_types::{GraphObject, Properties, TenantContext, VersionId, Versioned};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Property key under which merge provenance is recorded.
pub const PROVENANCE_KEY: &str = "_merge_provenance";

/// Which side's value survives when both sides hold a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStrategy {
    #[default]
    SourceWins,
    TargetWins,
}

impl PropertyStrategy {
    fn as_str(self) -> &'static str {
        match self {
            Self::SourceWins => "source_wins",
            Self::TargetWins => "target_wins",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub property_strategy: PropertyStrategy,
    pub track_provenance: bool,
    /// Acting user, recorded in provenance.
    pub user_id: Option<String>,
}

/// Outcome of [`merge_objects`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergeResult {
    pub success: bool,
    /// The target's new head version.
    pub target_object_id: VersionId,
    /// The source head that was merged away.
    pub source_object_id: VersionId,
    /// The source's tombstone version.
    pub deleted_source_id: Option<VersionId>,
    pub merged_properties: Properties,
    pub redirected_relationships: usize,
    pub dropped_relationships: usize,
    pub error: Option<String>,
}

/// Where a merged value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Source,
    Target,
    Both,
}

impl Origin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
            Self::Both => "both",
        }
    }
}

/// Union of both property maps; conflicting keys go to the winning side.
fn merge_properties(
    source: &Properties,
    target: &Properties,
    strategy: PropertyStrategy,
) -> (Properties, BTreeMap<String, Origin>) {
    let source = normalize_properties(source);
    let target = normalize_properties(target);
    let mut merged = Properties::new();
    let mut origins = BTreeMap::new();

    for (key, value) in &target {
        if key == PROVENANCE_KEY {
            continue;
        }
        let (value, origin) = match source.get(key) {
            None => (value.clone(), Origin::Target),
            Some(other) if other == value => (value.clone(), Origin::Both),
            Some(other) => match strategy {
                PropertyStrategy::SourceWins => (other.clone(), Origin::Source),
                PropertyStrategy::TargetWins => (value.clone(), Origin::Target),
            },
        };
        merged.insert(key.clone(), value);
        origins.insert(key.clone(), origin);
    }
    for (key, value) in &source {
        if key == PROVENANCE_KEY || merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
        origins.insert(key.clone(), Origin::Source);
    }
    (merged, origins)
}

fn live_object<T: GraphTx + ?Sized>(
    tx: &T,
    ctx: &TenantContext,
    raw: Uuid,
) -> GraphResult<GraphObject> {
    let object: GraphObject = chain::resolve(tx, ctx, raw)?;
    if object.is_deleted() {
        return Err(GraphError::not_found(RecordKind::Object, raw));
    }
    Ok(object)
}

/// Merge `source` into `target`: patch the target with the merged properties,
/// re-point the source's live relationships at the target and tombstone the
/// source.
pub fn merge_objects<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    source: Uuid,
    target: Uuid,
    config: &MergeConfig,
) -> GraphResult<MergeResult> {
    let source = live_object(&*tx, ctx, source)?;
    let target = live_object(&*tx, ctx, target)?;
    if source.canonical_id() == target.canonical_id() {
        return Err(GraphError::invalid("cannot merge an object into itself"));
    }

    let (mut merged, origins) =
        merge_properties(&source.properties, &target.properties, config.property_strategy);
    if config.track_provenance {
        let fields: serde_json::Map<String, Value> = origins
            .iter()
            .map(|(k, o)| (k.clone(), Value::from(o.as_str())))
            .collect();
        merged.insert(
            PROVENANCE_KEY.to_string(),
            json!({
                "fields": fields,
                "source_canonical_id": source.canonical_id(),
                "strategy": config.property_strategy.as_str(),
                "merged_by": config.user_id,
                "merged_at": tx.tick(),
            }),
        );
    }

    // Keys dropped from the target's map (only the provenance key can be) are
    // removed explicitly; everything else is a superset of the target.
    let mut properties = merged.clone();
    if !merged.contains_key(PROVENANCE_KEY) && target.properties.contains_key(PROVENANCE_KEY) {
        properties.insert(PROVENANCE_KEY.to_string(), Value::Null);
    }
    let labels = normalize_labels(target.labels.iter().chain(source.labels.iter()));
    let patched = patch_object(
        tx,
        ctx,
        target.canonical_id(),
        ObjectPatch {
            properties,
            labels: Some(labels),
            status: None,
        },
        target.version(),
    )?;

    let touching = tx.relationship_heads(
        ctx,
        &RelationshipFilter::touching(source.canonical_id()),
        HeadPage::all(),
    )?;
    let mut redirected = 0;
    let mut dropped = 0;
    for rel in &touching {
        match redirect_relationship(tx, ctx, rel, source.canonical_id(), target.canonical_id())? {
            Redirect::Moved(_) => redirected += 1,
            Redirect::Dropped(_) => dropped += 1,
        }
    }

    let tombstone = delete_object(tx, ctx, source.canonical_id(), source.version())?;
    info!(
        source = %source.canonical_id(),
        target = %target.canonical_id(),
        redirected,
        dropped,
        strategy = config.property_strategy.as_str(),
        "objects merged"
    );
    Ok(MergeResult {
        success: true,
        target_object_id: patched.id(),
        source_object_id: source.id(),
        deleted_source_id: Some(tombstone.id()),
        merged_properties: patched.properties,
        redirected_relationships: redirected,
        dropped_relationships: dropped,
        error: None,
    })
}
