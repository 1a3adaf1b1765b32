//! Object chains: create, patch, delete, restore and edge listing.

use kvg_diff::{diff_properties, merge_patch, normalize_labels, normalize_properties};
use kvg_store::{GraphReader, GraphTx, HeadPage, ObjectFilter, RelationshipFilter};
use kvg_types::{
    CanonicalId, ChangeKind, ChangeSummary, GraphObject, GraphRelationship, Properties,
    TenantContext, VersionId, VersionMeta, Versioned,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::branches::ensure_branch;
use crate::chain::{self, History, HistoryPage};
use crate::content::object_hash;
use crate::error::{GraphError, GraphResult, RecordKind};

/// Input for [`create_object`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl NewObject {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Input for [`patch_object`].
///
/// `properties` is merged over the head's properties; a `null` value removes
/// the key. `labels` replaces the label set when present. `status` replaces
/// the status when present; an empty string clears it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ObjectPatch {
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Live relationships at either end of an object.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ObjectEdges {
    pub canonical_id: CanonicalId,
    pub incoming: Vec<GraphRelationship>,
    pub outgoing: Vec<GraphRelationship>,
}

pub(crate) fn required(field: &str, value: &str) -> GraphResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GraphError::invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fail with [`GraphError::DuplicateKey`] if a live head other than `except`
/// holds `(object_type, key)` in scope.
fn ensure_key_free<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    object_type: &str,
    key: &str,
    except: Option<CanonicalId>,
) -> GraphResult<()> {
    let filter = ObjectFilter::by_key(object_type, key);
    let holders = reader.object_heads(ctx, &filter, HeadPage::first(2))?;
    if holders.iter().any(|h| Some(h.canonical_id()) != except) {
        return Err(GraphError::DuplicateKey(format!(
            "object {object_type}/{key} already exists"
        )));
    }
    Ok(())
}

/// Create version 1 of a new object chain.
pub fn create_object<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    input: NewObject,
) -> GraphResult<GraphObject> {
    ensure_branch(&*tx, ctx)?;
    let object_type = required("object type", &input.object_type)?;
    let key = optional(input.key);
    let status = optional(input.status);
    let properties = normalize_properties(&input.properties);
    let labels = normalize_labels(&input.labels);

    if let Some(key) = &key {
        ensure_key_free(&*tx, ctx, &object_type, key, None)?;
    }

    let content_hash = object_hash(
        &object_type,
        key.as_deref(),
        status.as_deref(),
        &properties,
        &labels,
    )?;
    let paths = diff_properties(&Properties::new(), &properties).paths();
    let now = tx.tick();
    let object = GraphObject {
        meta: VersionMeta::genesis(
            ctx,
            content_hash,
            ChangeSummary::new(ChangeKind::Created, paths),
            now,
        ),
        object_type,
        key,
        status,
        properties,
        labels,
    };
    chain::append(tx, ctx, &object)?;
    debug!(
        canonical_id = %object.canonical_id(),
        object_type = %object.object_type,
        "object created"
    );
    Ok(object)
}

/// One object version by version id.
pub fn get_object<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    id: VersionId,
) -> GraphResult<GraphObject> {
    chain::version(reader, ctx, id)
}

/// The live head of an object chain.
pub fn object_head<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
) -> GraphResult<GraphObject> {
    chain::head(reader, ctx, canonical_id)
}

/// Append a patched version. Fails with [`GraphError::StaleVersion`] unless
/// `expected_version` is the chain's latest version.
pub fn patch_object<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    patch: ObjectPatch,
    expected_version: u32,
) -> GraphResult<GraphObject> {
    let head: GraphObject = chain::expect_latest(&*tx, ctx, canonical_id, expected_version)?;
    if head.is_deleted() {
        return Err(GraphError::not_found(RecordKind::Object, canonical_id));
    }

    let properties = merge_patch(&head.properties, &patch.properties);
    let labels = match patch.labels {
        Some(labels) => normalize_labels(&labels),
        None => head.labels.clone(),
    };
    let status = match patch.status {
        Some(status) => optional(Some(status)),
        None => head.status.clone(),
    };
    let paths = diff_properties(&head.properties, &properties).paths();
    let content_hash = object_hash(
        &head.object_type,
        head.key.as_deref(),
        status.as_deref(),
        &properties,
        &labels,
    )?;

    let now = tx.tick();
    let next = GraphObject {
        meta: head
            .meta
            .successor(content_hash, ChangeSummary::new(ChangeKind::Patched, paths), now),
        properties,
        labels,
        status,
        ..head
    };
    chain::append(tx, ctx, &next)?;
    debug!(
        canonical_id = %canonical_id,
        version = next.version(),
        changed = next.meta.change_summary.paths.len(),
        "object patched"
    );
    Ok(next)
}

/// Append a tombstone to a live object chain.
pub fn delete_object<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<GraphObject> {
    let tombstone: GraphObject = chain::delete(tx, ctx, canonical_id, expected_version)?;
    debug!(canonical_id = %canonical_id, version = tombstone.version(), "object deleted");
    Ok(tombstone)
}

/// Revive a tombstoned object chain with a live version carrying the last live
/// content. The natural key must still be free.
pub fn restore_object<T: GraphTx + ?Sized>(
    tx: &mut T,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    expected_version: u32,
) -> GraphResult<GraphObject> {
    let tombstone: GraphObject = chain::expect_latest(&*tx, ctx, canonical_id, expected_version)?;
    if !tombstone.is_deleted() {
        return Err(GraphError::not_found(RecordKind::Object, canonical_id));
    }
    if let Some(key) = &tombstone.key {
        ensure_key_free(&*tx, ctx, &tombstone.object_type, key, Some(canonical_id))?;
    }

    let paths = diff_properties(&Properties::new(), &tombstone.properties).paths();
    let now = tx.tick();
    let restored = tombstone.with_meta(tombstone.meta.successor(
        tombstone.content_hash(),
        ChangeSummary::new(ChangeKind::Restored, paths),
        now,
    ));
    chain::append(tx, ctx, &restored)?;
    debug!(canonical_id = %canonical_id, version = restored.version(), "object restored");
    Ok(restored)
}

/// Versions of an object chain, newest first.
pub fn object_history<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
    page: HistoryPage,
) -> GraphResult<History<GraphObject>> {
    chain::history(reader, ctx, canonical_id, page)
}

/// Live incoming and outgoing relationship heads of an object.
pub fn object_edges<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    canonical_id: CanonicalId,
) -> GraphResult<ObjectEdges> {
    chain::latest::<GraphObject, R>(reader, ctx, canonical_id)?;
    let outgoing = reader.relationship_heads(
        ctx,
        &RelationshipFilter {
            src_id: Some(canonical_id),
            ..RelationshipFilter::live()
        },
        HeadPage::all(),
    )?;
    let incoming = reader.relationship_heads(
        ctx,
        &RelationshipFilter {
            dst_id: Some(canonical_id),
            ..RelationshipFilter::live()
        },
        HeadPage::all(),
    )?;
    Ok(ObjectEdges {
        canonical_id,
        incoming,
        outgoing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create, main_line, other_tenant};
    use kvg_store::{GraphStore, InMemoryGraphStore};
    use serde_json::json;

    // ---- create ----

    #[test]
    fn create_starts_chain_at_version_one() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let obj = create(
            &store,
            &ctx,
            NewObject::new("Requirement")
                .with_key("REQ-1")
                .with_property("title", json!("Login"))
                .with_property("meta", json!({"owner": "ops", "gone": null})),
        );
        assert_eq!(obj.version(), 1);
        assert!(obj.meta.supersedes_id.is_none());
        assert_eq!(obj.meta.change_summary.kind, ChangeKind::Created);
        assert_eq!(
            obj.meta.change_summary.paths.iter().cloned().collect::<Vec<_>>(),
            vec!["/meta/owner", "/title"]
        );
        assert_eq!(obj.properties["meta"], json!({"owner": "ops"}));
    }

    #[test]
    fn create_rejects_blank_type() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let err = store
            .write(|tx| create_object(tx, &ctx, NewObject::new("  ")))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));
    }

    #[test]
    fn live_key_must_be_unique() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        create(&store, &ctx, NewObject::new("Requirement").with_key("REQ-1"));
        let err = store
            .write(|tx| create_object(tx, &ctx, NewObject::new("Requirement").with_key("REQ-1")))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));

        // Same key under another type is fine.
        create(&store, &ctx, NewObject::new("Decision").with_key("REQ-1"));
    }

    #[test]
    fn labels_are_normalized() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let obj = create(
            &store,
            &ctx,
            NewObject::new("Doc").with_labels([" a", "b", "a", ""]),
        );
        assert_eq!(obj.labels, vec!["a", "b"]);
    }

    // ---- patch ----

    #[test]
    fn patch_merges_properties_and_tracks_paths() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(
            &store,
            &ctx,
            NewObject::new("Requirement")
                .with_status("draft")
                .with_property("title", json!("Original"))
                .with_property("priority", json!("high")),
        );
        let v2 = store
            .write(|tx| {
                patch_object(
                    tx,
                    &ctx,
                    v1.canonical_id(),
                    ObjectPatch::default()
                        .with_property("title", json!("Updated"))
                        .with_status("approved"),
                    1,
                )
            })
            .unwrap();
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.canonical_id(), v1.canonical_id());
        assert_eq!(v2.meta.supersedes_id, Some(v1.id()));
        assert_eq!(v2.properties["title"], json!("Updated"));
        assert_eq!(v2.properties["priority"], json!("high"));
        assert_eq!(v2.status.as_deref(), Some("approved"));
        assert_eq!(
            v2.meta.change_summary.paths.iter().cloned().collect::<Vec<_>>(),
            vec!["/title"]
        );
        assert_ne!(v2.content_hash(), v1.content_hash());
    }

    #[test]
    fn patch_null_removes_key() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(
            &store,
            &ctx,
            NewObject::new("Doc").with_property("a", json!(1)).with_property("b", json!(2)),
        );
        let v2 = store
            .write(|tx| {
                patch_object(
                    tx,
                    &ctx,
                    v1.canonical_id(),
                    ObjectPatch::default().with_property("b", Value::Null),
                    1,
                )
            })
            .unwrap();
        assert!(!v2.properties.contains_key("b"));
        assert!(v2.meta.change_summary.paths.contains("/b"));
    }

    #[test]
    fn stale_patch_fails_without_writing() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(&store, &ctx, NewObject::new("Doc").with_property("a", json!(1)));
        let id = v1.canonical_id();
        store
            .write(|tx| {
                patch_object(tx, &ctx, id, ObjectPatch::default().with_property("a", json!(2)), 1)
            })
            .unwrap();

        let rows_before = store.object_row_count().unwrap();
        let err = store
            .write(|tx| {
                patch_object(tx, &ctx, id, ObjectPatch::default().with_property("a", json!(3)), 1)
            })
            .unwrap_err();
        match err {
            GraphError::StaleVersion {
                expected, current, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(current, Some(2));
            }
            other => panic!("expected StaleVersion, got {other:?}"),
        }
        assert_eq!(store.object_row_count().unwrap(), rows_before);
    }

    // ---- delete / restore ----

    #[test]
    fn delete_appends_tombstone_and_hides_head() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(&store, &ctx, NewObject::new("Doc").with_key("D-1"));
        let id = v1.canonical_id();
        let dead = store.write(|tx| delete_object(tx, &ctx, id, 1)).unwrap();
        assert!(dead.is_deleted());
        assert_eq!(dead.version(), 2);
        assert!(dead.meta.change_summary.is_empty());
        assert_eq!(dead.content_hash(), v1.content_hash());

        let err = store.read(|r| object_head(r, &ctx, id)).unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));

        // The key is free again once the holder is tombstoned.
        create(&store, &ctx, NewObject::new("Doc").with_key("D-1"));
    }

    #[test]
    fn deleting_twice_is_not_found() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let id = create(&store, &ctx, NewObject::new("Doc")).canonical_id();
        store.write(|tx| delete_object(tx, &ctx, id, 1)).unwrap();
        let err = store.write(|tx| delete_object(tx, &ctx, id, 2)).unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));
    }

    #[test]
    fn restore_revives_last_live_content() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(&store, &ctx, NewObject::new("Doc").with_property("a", json!(1)));
        let id = v1.canonical_id();
        store.write(|tx| delete_object(tx, &ctx, id, 1)).unwrap();
        let v3 = store.write(|tx| restore_object(tx, &ctx, id, 2)).unwrap();
        assert_eq!(v3.version(), 3);
        assert!(!v3.is_deleted());
        assert_eq!(v3.properties, v1.properties);
        assert_eq!(v3.content_hash(), v1.content_hash());
        assert_eq!(v3.meta.change_summary.kind, ChangeKind::Restored);
        assert_eq!(store.read(|r| object_head(r, &ctx, id)).unwrap().id(), v3.id());
    }

    #[test]
    fn restore_requires_tombstone() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let id = create(&store, &ctx, NewObject::new("Doc")).canonical_id();
        let err = store.write(|tx| restore_object(tx, &ctx, id, 1)).unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));
    }

    #[test]
    fn restore_rechecks_key() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let id = create(&store, &ctx, NewObject::new("Doc").with_key("K")).canonical_id();
        store.write(|tx| delete_object(tx, &ctx, id, 1)).unwrap();
        create(&store, &ctx, NewObject::new("Doc").with_key("K"));
        let err = store.write(|tx| restore_object(tx, &ctx, id, 2)).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));
    }

    // ---- history ----

    #[test]
    fn history_is_newest_first_and_paged() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(&store, &ctx, NewObject::new("Doc").with_property("n", json!(0)));
        let id = v1.canonical_id();
        for n in 1..4u32 {
            store
                .write(|tx| {
                    let patch = ObjectPatch::default().with_property("n", json!(n));
                    patch_object(tx, &ctx, id, patch, n)
                })
                .unwrap();
        }

        let page = store
            .read(|r| {
                object_history(
                    r,
                    &ctx,
                    id,
                    HistoryPage {
                        before_version: None,
                        limit: Some(3),
                    },
                )
            })
            .unwrap();
        assert_eq!(page.items.iter().map(|o| o.version()).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert!(page.has_more);
        assert_eq!(page.next_before_version, Some(2));

        let rest = store
            .read(|r| {
                object_history(
                    r,
                    &ctx,
                    id,
                    HistoryPage {
                        before_version: page.next_before_version,
                        limit: Some(3),
                    },
                )
            })
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].id(), v1.id());
        assert!(!rest.has_more);
        assert!(rest.next_before_version.is_none());
    }

    #[test]
    fn create_patch_history_links_chain() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let v1 = create(&store, &ctx, NewObject::new("Doc"));
        let v2 = store
            .write(|tx| {
                let patch = ObjectPatch::default().with_property("x", json!(1));
                patch_object(tx, &ctx, v1.canonical_id(), patch, 1)
            })
            .unwrap();
        let history = store
            .read(|r| object_history(r, &ctx, v1.canonical_id(), HistoryPage::default()))
            .unwrap();
        let versions: Vec<_> = history.items.iter().map(|o| o.version()).collect();
        assert_eq!(versions, vec![2, 1]);
        assert_eq!(history.items[0].meta.supersedes_id, Some(v1.id()));
        assert_eq!(history.items[0].id(), v2.id());
        assert!(history.items[1].meta.supersedes_id.is_none());
    }

    // ---- tenancy ----

    #[test]
    fn other_tenant_sees_mismatch() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let obj = create(&store, &ctx, NewObject::new("Doc"));
        let intruder = other_tenant();

        let err = store.read(|r| get_object(r, &intruder, obj.id())).unwrap_err();
        assert!(matches!(err, GraphError::TenantMismatch { .. }));
        let err = store
            .write(|tx| delete_object(tx, &intruder, obj.canonical_id(), 1))
            .unwrap_err();
        assert!(matches!(err, GraphError::TenantMismatch { .. }));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = InMemoryGraphStore::new();
        let ctx = main_line();
        let err = store.read(|r| get_object(r, &ctx, VersionId::new())).unwrap_err();
        assert!(matches!(err, GraphError::NotFound { kind: RecordKind::Object, .. }));
    }
}
