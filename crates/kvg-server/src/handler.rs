//! Request handlers. Graph calls are synchronous store transactions and run
//! on the blocking pool.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use kvg_sdk::{
    Branch, BranchId, BranchMergeSummary, GraphObject, GraphRelationship, GraphResult, History,
    HistoryPage, KnowledgeGraph, MergeConfig, MergePreviewRequest, MergeResult, NewBranch,
    NewObject, NewRelationship, ObjectEdges, ObjectPatch, ObjectQuery, RelationshipPatch,
    RelationshipQuery, SearchPage, TraverseRequest, TraverseResult,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::tenant::Tenant;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<KnowledgeGraph>,
}

impl AppState {
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    async fn run<T, F>(&self, f: F) -> ServerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&KnowledgeGraph) -> GraphResult<T> + Send + 'static,
    {
        let graph = Arc::clone(&self.graph);
        tokio::task::spawn_blocking(move || f(&graph))
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?
            .map_err(ServerError::from)
    }
}

/// Version the caller last read, for patch/delete/restore. Optional when the
/// path names a specific version.
#[derive(Debug, Default, Deserialize)]
pub struct Expected {
    pub expected_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PatchObjectBody {
    #[serde(flatten)]
    pub patch: ObjectPatch,
    #[serde(default)]
    pub expected_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PatchRelationshipBody {
    #[serde(flatten)]
    pub patch: RelationshipPatch,
    #[serde(default)]
    pub expected_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RenameBranchBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeObjectsBody {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(default)]
    pub config: MergeConfig,
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "kvg-server",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.graph.backend_name(),
        "limits": state.graph.limits(),
    }))
}

// ---- Objects ----

pub async fn create_object(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(input): Json<NewObject>,
) -> ServerResult<(StatusCode, Json<GraphObject>)> {
    let object = state.run(move |g| g.create_object(&ctx, input)).await?;
    Ok((StatusCode::CREATED, Json(object)))
}

pub async fn get_object(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<GraphObject>> {
    Ok(Json(state.run(move |g| g.get_object(&ctx, id)).await?))
}

pub async fn patch_object(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchObjectBody>,
) -> ServerResult<Json<GraphObject>> {
    let object = state
        .run(move |g| g.patch_object(&ctx, id, body.patch, body.expected_version))
        .await?;
    Ok(Json(object))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(expected): Query<Expected>,
) -> ServerResult<Json<GraphObject>> {
    let object = state
        .run(move |g| g.delete_object(&ctx, id, expected.expected_version))
        .await?;
    Ok(Json(object))
}

pub async fn restore_object(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(expected): Query<Expected>,
) -> ServerResult<Json<GraphObject>> {
    let object = state
        .run(move |g| g.restore_object(&ctx, id, expected.expected_version))
        .await?;
    Ok(Json(object))
}

pub async fn object_history(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(page): Query<HistoryPage>,
) -> ServerResult<Json<History<GraphObject>>> {
    Ok(Json(state.run(move |g| g.object_history(&ctx, id, page)).await?))
}

pub async fn object_edges(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<ObjectEdges>> {
    Ok(Json(state.run(move |g| g.object_edges(&ctx, id)).await?))
}

pub async fn merge_objects(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(body): Json<MergeObjectsBody>,
) -> ServerResult<Json<MergeResult>> {
    let result = state
        .run(move |g| g.merge_objects(&ctx, body.source_id, body.target_id, &body.config))
        .await?;
    Ok(Json(result))
}

// ---- Relationships ----

/// `201` for a new chain, `200` when an identical relationship already existed.
pub async fn create_relationship(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(input): Json<NewRelationship>,
) -> ServerResult<(StatusCode, Json<GraphRelationship>)> {
    let outcome = state.run(move |g| g.create_relationship(&ctx, input)).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.relationship)))
}

pub async fn get_relationship(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<GraphRelationship>> {
    Ok(Json(state.run(move |g| g.get_relationship(&ctx, id)).await?))
}

pub async fn patch_relationship(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchRelationshipBody>,
) -> ServerResult<Json<GraphRelationship>> {
    let rel = state
        .run(move |g| g.patch_relationship(&ctx, id, body.patch, body.expected_version))
        .await?;
    Ok(Json(rel))
}

pub async fn delete_relationship(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(expected): Query<Expected>,
) -> ServerResult<Json<GraphRelationship>> {
    let rel = state
        .run(move |g| g.delete_relationship(&ctx, id, expected.expected_version))
        .await?;
    Ok(Json(rel))
}

pub async fn restore_relationship(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(expected): Query<Expected>,
) -> ServerResult<Json<GraphRelationship>> {
    let rel = state
        .run(move |g| g.restore_relationship(&ctx, id, expected.expected_version))
        .await?;
    Ok(Json(rel))
}

pub async fn relationship_history(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Query(page): Query<HistoryPage>,
) -> ServerResult<Json<History<GraphRelationship>>> {
    Ok(Json(
        state.run(move |g| g.relationship_history(&ctx, id, page)).await?,
    ))
}

// ---- Queries ----

pub async fn traverse(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<TraverseRequest>,
) -> ServerResult<Json<TraverseResult>> {
    Ok(Json(state.run(move |g| g.traverse(&ctx, &request)).await?))
}

pub async fn search_objects(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(query): Json<ObjectQuery>,
) -> ServerResult<Json<SearchPage<GraphObject>>> {
    Ok(Json(state.run(move |g| g.search_objects(&ctx, &query)).await?))
}

pub async fn search_relationships(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(query): Json<RelationshipQuery>,
) -> ServerResult<Json<SearchPage<GraphRelationship>>> {
    Ok(Json(
        state.run(move |g| g.search_relationships(&ctx, &query)).await?,
    ))
}

// ---- Branches ----

pub async fn create_branch(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(input): Json<NewBranch>,
) -> ServerResult<(StatusCode, Json<Branch>)> {
    let branch = state.run(move |g| g.create_branch(&ctx, input)).await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

pub async fn list_branches(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> ServerResult<Json<Vec<Branch>>> {
    Ok(Json(state.run(move |g| g.list_branches(&ctx)).await?))
}

pub async fn get_branch(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<Branch>> {
    let id = BranchId::from_uuid(id);
    Ok(Json(state.run(move |g| g.get_branch(&ctx, id)).await?))
}

pub async fn rename_branch(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
    Json(body): Json<RenameBranchBody>,
) -> ServerResult<Json<Branch>> {
    let id = BranchId::from_uuid(id);
    Ok(Json(
        state.run(move |g| g.rename_branch(&ctx, id, &body.name)).await?,
    ))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<Branch>> {
    let id = BranchId::from_uuid(id);
    Ok(Json(state.run(move |g| g.delete_branch(&ctx, id)).await?))
}

pub async fn merge_preview(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(target): Path<Uuid>,
    Json(request): Json<MergePreviewRequest>,
) -> ServerResult<Json<BranchMergeSummary>> {
    let target = BranchId::from_uuid(target);
    Ok(Json(
        state.run(move |g| g.preview_merge(&ctx, target, &request)).await?,
    ))
}
