use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the `/api/v1` router over `state`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handler::health_handler))
        .route("/info", get(handler::info_handler))
        .route("/objects", post(handler::create_object))
        .route(
            "/objects/:id",
            get(handler::get_object)
                .patch(handler::patch_object)
                .delete(handler::delete_object),
        )
        .route("/objects/:id/restore", post(handler::restore_object))
        .route("/objects/:id/history", get(handler::object_history))
        .route("/objects/:id/edges", get(handler::object_edges))
        .route("/relationships", post(handler::create_relationship))
        .route(
            "/relationships/:id",
            get(handler::get_relationship)
                .patch(handler::patch_relationship)
                .delete(handler::delete_relationship),
        )
        .route("/relationships/:id/restore", post(handler::restore_relationship))
        .route("/relationships/:id/history", get(handler::relationship_history))
        .route("/traverse", post(handler::traverse))
        .route("/search/objects", post(handler::search_objects))
        .route("/search/relationships", post(handler::search_relationships))
        .route("/merge/objects", post(handler::merge_objects))
        .route(
            "/branches",
            get(handler::list_branches).post(handler::create_branch),
        )
        .route(
            "/branches/:id",
            get(handler::get_branch)
                .patch(handler::rename_branch)
                .delete(handler::delete_branch),
        )
        .route("/branches/:id/merge-preview", post(handler::merge_preview));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`build_router`] that also answers CORS requests from any origin.
pub fn build_router_with_cors(state: AppState) -> Router {
    build_router(state).layer(CorsLayer::permissive())
}
