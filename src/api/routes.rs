use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Wardrobe
        .route("/wardrobe/items", get(handlers::list_items).post(handlers::create_item))
        .route("/wardrobe/items/:id", delete(handlers::delete_item))
        .route("/palettes", post(handlers::create_palette))
        // Recommendations
        .route("/outfits/random", get(handlers::random_outfit))
        .route("/outfits/complete", post(handlers::complete_outfit))
        .route("/outfits/score", post(handlers::score_outfit))
        .route("/outfits/partial", post(handlers::partial_outfit))
        .route("/outfits/rate", post(handlers::rate_outfit))
        .route("/ratings", get(handlers::list_ratings))
        // Model and caches
        .route("/model/retrain", post(handlers::retrain))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/precompute", post(handlers::precompute_features))
        .route("/cache", delete(handlers::clear_caches))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
