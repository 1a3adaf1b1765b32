//! Filtered, paginated listing of object and relationship heads.
//!
//! Results are ordered by `created_at` of the head. A forward page lists heads
//! created after the cursor, oldest first; a backward page lists heads created
//! before the cursor, newest first. `total` counts every match of the filter,
//! regardless of the cursor.

use chrono::{DateTime, Utc};
use kvg_graph::{chain, GraphError, GraphResult};
use kvg_store::{GraphReader, HeadOrder, HeadPage, ObjectFilter, RelationshipFilter};
use kvg_types::{CanonicalId, GraphObject, GraphRelationship, TenantContext, Versioned};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cursor::{Cursor, PageDirection};
use crate::limits::QueryLimits;

/// Object head search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectQuery {
    pub types: Vec<String>,
    pub key: Option<String>,
    /// Heads must carry every one of these labels.
    pub labels: Vec<String>,
    pub include_deleted: bool,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub direction: PageDirection,
}

/// Relationship head search. Endpoints may be named by any version id or
/// canonical id of the object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipQuery {
    pub types: Vec<String>,
    pub src_id: Option<Uuid>,
    pub dst_id: Option<Uuid>,
    pub include_deleted: bool,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub direction: PageDirection,
}

/// One page of search results.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

struct Window {
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    page: HeadPage,
}

fn window(
    cursor: Option<&str>,
    direction: PageDirection,
    limit: usize,
) -> GraphResult<Window> {
    let at = cursor.map(Cursor::created_at).transpose()?;
    // One extra row tells whether another page follows.
    let probe = Some(limit + 1);
    Ok(match direction {
        PageDirection::Forward => Window {
            after: at,
            before: None,
            page: HeadPage {
                order: HeadOrder::Ascending,
                limit: probe,
            },
        },
        PageDirection::Backward => Window {
            after: None,
            before: at,
            page: HeadPage {
                order: HeadOrder::Descending,
                limit: probe,
            },
        },
    })
}

fn finish<T: Versioned>(mut items: Vec<T>, limit: usize, total: usize) -> SearchPage<T> {
    let has_more = items.len() > limit;
    items.truncate(limit);
    let next_cursor = if has_more {
        items.last().map(|t| Cursor::CreatedAt(t.created_at()).encode())
    } else {
        None
    };
    SearchPage {
        items,
        total,
        has_more,
        next_cursor,
    }
}

/// Resolve an endpoint reference for filtering. Unknown ids filter to
/// nothing rather than failing; ids of another tenant still fail.
fn endpoint<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    raw: Uuid,
) -> GraphResult<CanonicalId> {
    match chain::target::<GraphObject, R>(reader, ctx, raw) {
        Ok(target) => Ok(target.canonical_id),
        Err(GraphError::NotFound { .. }) => Ok(CanonicalId::from_uuid(raw)),
        Err(err) => Err(err),
    }
}

/// Search object heads.
pub fn search_objects<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    query: &ObjectQuery,
    limits: &QueryLimits,
) -> GraphResult<SearchPage<GraphObject>> {
    let limit = limits.search_limit(query.limit);
    let window = window(query.cursor.as_deref(), query.direction, limit)?;
    let filter = ObjectFilter {
        types: query.types.clone(),
        key: query.key.clone(),
        labels: query.labels.clone(),
        include_deleted: query.include_deleted,
        created_after: None,
        created_before: None,
    };
    let total = reader.count_object_heads(ctx, &filter)?;
    let items = reader.object_heads(
        ctx,
        &ObjectFilter {
            created_after: window.after,
            created_before: window.before,
            ..filter
        },
        window.page,
    )?;
    Ok(finish(items, limit, total))
}

/// Search relationship heads.
pub fn search_relationships<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    query: &RelationshipQuery,
    limits: &QueryLimits,
) -> GraphResult<SearchPage<GraphRelationship>> {
    let limit = limits.search_limit(query.limit);
    let window = window(query.cursor.as_deref(), query.direction, limit)?;
    let filter = RelationshipFilter {
        types: query.types.clone(),
        src_id: query.src_id.map(|id| endpoint(reader, ctx, id)).transpose()?,
        dst_id: query.dst_id.map(|id| endpoint(reader, ctx, id)).transpose()?,
        endpoints: None,
        include_deleted: query.include_deleted,
        created_after: None,
        created_before: None,
    };
    let total = reader.count_relationship_heads(ctx, &filter)?;
    let items = reader.relationship_heads(
        ctx,
        &RelationshipFilter {
            created_after: window.after,
            created_before: window.before,
            ..filter
        },
        window.page,
    )?;
    Ok(finish(items, limit, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_graph::{
        create_object, create_relationship, delete_object, patch_object, NewObject,
        NewRelationship, ObjectPatch,
    };
    use kvg_store::{GraphStore, InMemoryGraphStore};
    use kvg_types::{OrganizationId, ProjectId};
    use serde_json::json;

    fn setup() -> (InMemoryGraphStore, TenantContext) {
        let ctx = TenantContext::new(OrganizationId::new(), ProjectId::new()).unwrap();
        (InMemoryGraphStore::new(), ctx)
    }

    fn make(store: &InMemoryGraphStore, ctx: &TenantContext, input: NewObject) -> GraphObject {
        store.write(|tx| create_object(tx, ctx, input)).unwrap()
    }

    fn objects(
        store: &InMemoryGraphStore,
        ctx: &TenantContext,
        query: &ObjectQuery,
    ) -> GraphResult<SearchPage<GraphObject>> {
        store.read(|r| search_objects(r, ctx, query, &QueryLimits::default()))
    }

    #[test]
    fn empty_project_has_no_results() {
        let (store, ctx) = setup();
        let page = objects(&store, &ctx, &ObjectQuery::default()).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn filters_by_type_key_and_labels() {
        let (store, ctx) = setup();
        make(
            &store,
            &ctx,
            NewObject::new("Requirement").with_key("R-1").with_labels(["core", "v1"]),
        );
        make(&store, &ctx, NewObject::new("Requirement").with_key("R-2").with_labels(["core"]));
        make(&store, &ctx, NewObject::new("Decision"));

        let by_type = objects(
            &store,
            &ctx,
            &ObjectQuery {
                types: vec!["Requirement".into()],
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(by_type.total, 2);

        let by_key = objects(
            &store,
            &ctx,
            &ObjectQuery {
                key: Some("R-2".into()),
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(by_key.items.len(), 1);
        assert_eq!(by_key.items[0].key.as_deref(), Some("R-2"));

        let by_labels = objects(
            &store,
            &ctx,
            &ObjectQuery {
                labels: vec!["core".into(), "v1".into()],
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(by_labels.items.len(), 1);
        assert_eq!(by_labels.items[0].key.as_deref(), Some("R-1"));
    }

    #[test]
    fn only_heads_are_listed() {
        let (store, ctx) = setup();
        let obj = make(&store, &ctx, NewObject::new("Doc"));
        store
            .write(|tx| {
                patch_object(
                    tx,
                    &ctx,
                    obj.canonical_id(),
                    ObjectPatch::default().with_property("x", json!(1)),
                    1,
                )
            })
            .unwrap();
        let page = objects(&store, &ctx, &ObjectQuery::default()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].version(), 2);
    }

    #[test]
    fn deleted_heads_need_include_deleted() {
        let (store, ctx) = setup();
        let obj = make(&store, &ctx, NewObject::new("Doc"));
        store
            .write(|tx| delete_object(tx, &ctx, obj.canonical_id(), 1))
            .unwrap();
        assert!(objects(&store, &ctx, &ObjectQuery::default())
            .unwrap()
            .items
            .is_empty());
        let page = objects(
            &store,
            &ctx,
            &ObjectQuery {
                include_deleted: true,
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].is_deleted());
    }

    #[test]
    fn forward_and_backward_paging() {
        let (store, ctx) = setup();
        let made: Vec<_> = (0..5)
            .map(|i| make(&store, &ctx, NewObject::new("Doc").with_key(format!("D-{i}"))))
            .collect();

        let first = objects(
            &store,
            &ctx,
            &ObjectQuery {
                limit: Some(2),
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(first.total, 5);
        assert!(first.has_more);
        assert_eq!(first.items[0].id(), made[0].id());

        let second = objects(
            &store,
            &ctx,
            &ObjectQuery {
                limit: Some(2),
                cursor: first.next_cursor.clone(),
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(
            second.items.iter().map(|o| o.id()).collect::<Vec<_>>(),
            vec![made[2].id(), made[3].id()]
        );

        let back = objects(
            &store,
            &ctx,
            &ObjectQuery {
                limit: Some(10),
                cursor: second.next_cursor.clone(),
                direction: PageDirection::Backward,
                ..ObjectQuery::default()
            },
        )
        .unwrap();
        assert_eq!(
            back.items.iter().map(|o| o.id()).collect::<Vec<_>>(),
            vec![made[2].id(), made[1].id(), made[0].id()]
        );
        assert!(!back.has_more);
    }

    #[test]
    fn invalid_cursor_is_rejected() {
        let (store, ctx) = setup();
        let err = objects(
            &store,
            &ctx,
            &ObjectQuery {
                cursor: Some("definitely not hex".into()),
                ..ObjectQuery::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));
    }

    #[test]
    fn relationships_filter_by_endpoint_version_id() {
        let (store, ctx) = setup();
        let a = make(&store, &ctx, NewObject::new("A"));
        let b = make(&store, &ctx, NewObject::new("B"));
        let c = make(&store, &ctx, NewObject::new("C"));
        for (src, dst, ty) in [(&a, &b, "X"), (&a, &c, "Y"), (&b, &c, "X")] {
            store
                .write(|tx| {
                    create_relationship(
                        tx,
                        &ctx,
                        NewRelationship::between(ty, src.canonical_id(), dst.canonical_id()),
                    )
                })
                .unwrap();
        }

        let page = store
            .read(|r| {
                search_relationships(
                    r,
                    &ctx,
                    &RelationshipQuery {
                        src_id: Some(*a.id().as_uuid()),
                        ..RelationshipQuery::default()
                    },
                    &QueryLimits::default(),
                )
            })
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .read(|r| {
                search_relationships(
                    r,
                    &ctx,
                    &RelationshipQuery {
                        types: vec!["X".into()],
                        dst_id: Some(*c.canonical_id().as_uuid()),
                        ..RelationshipQuery::default()
                    },
                    &QueryLimits::default(),
                )
            })
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].src_id, b.canonical_id());

        let page = store
            .read(|r| {
                search_relationships(
                    r,
                    &ctx,
                    &RelationshipQuery {
                        src_id: Some(Uuid::now_v7()),
                        ..RelationshipQuery::default()
                    },
                    &QueryLimits::default(),
                )
            })
            .unwrap();
        assert!(page.items.is_empty());
    }
}
