use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{
        Category, ColorPalette, OutfitIdentity, PartialOutfit, Rating, ScoredOutfit, SemanticAttributes,
        TrainingOutcome, VisualAttributes, WardrobeItem,
    },
    services::CacheStats,
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct ItemFilter {
    pub category: Option<Category>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub category: Category,
    #[serde(default)]
    pub visual: VisualAttributes,
    pub semantic: Option<SemanticAttributes>,
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteOutfitRequest {
    pub item_type: Category,
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RateOutfitRequest {
    #[serde(flatten)]
    pub outfit: OutfitIdentity,
    pub rating: u8,
    pub source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RateOutfitResponse {
    pub rating: Rating,
    pub rating_count: usize,
    pub should_retrain: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrainRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaletteRequest {
    pub name: String,
    pub colors: Vec<String>,
    pub source: Option<String>,
}

fn found(outfit: Option<ScoredOutfit>) -> AppResult<Json<ScoredOutfit>> {
    outfit
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no outfit matches; the wardrobe needs a shirt, pants and shoes".to_string()))
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Active wardrobe items, optionally filtered by `?category=`
pub async fn list_items(
    State(state): State<AppState>,
    Query(filter): Query<ItemFilter>,
) -> AppResult<Json<Vec<WardrobeItem>>> {
    let items = state.wardrobe.list_items(state.user_id, filter.category).await?;
    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    Json(request): Json<CreateItemRequest>,
) -> AppResult<(StatusCode, Json<WardrobeItem>)> {
    let item = state
        .wardrobe
        .add_item(
            state.user_id,
            request.category,
            request.visual,
            request.semantic,
            request.file_path,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn delete_item(State(state): State<AppState>, Path(clothing_id): Path<String>) -> AppResult<StatusCode> {
    state.wardrobe.delete_item(state.user_id, &clothing_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_palette(
    State(state): State<AppState>,
    Json(request): Json<CreatePaletteRequest>,
) -> AppResult<(StatusCode, Json<ColorPalette>)> {
    let palette = state
        .wardrobe
        .add_palette(state.user_id, &request.name, request.colors, request.source)
        .await?;
    Ok((StatusCode::CREATED, Json(palette)))
}

pub async fn random_outfit(State(state): State<AppState>) -> AppResult<Json<ScoredOutfit>> {
    found(state.scoring.random_outfit(state.user_id).await?)
}

pub async fn complete_outfit(
    State(state): State<AppState>,
    Json(request): Json<CompleteOutfitRequest>,
) -> AppResult<Json<ScoredOutfit>> {
    found(
        state
            .scoring
            .complete_outfit(state.user_id, request.item_type, &request.item_id)
            .await?,
    )
}

pub async fn score_outfit(
    State(state): State<AppState>,
    Json(outfit): Json<OutfitIdentity>,
) -> AppResult<Json<ScoredOutfit>> {
    let scored = state.scoring.score_specific_outfit(state.user_id, &outfit).await?;
    Ok(Json(scored))
}

pub async fn partial_outfit(
    State(state): State<AppState>,
    Json(partial): Json<PartialOutfit>,
) -> AppResult<Json<ScoredOutfit>> {
    found(state.scoring.build_partial_outfit(state.user_id, &partial).await?)
}

/// Saves a rating and reports whether the retrain trigger now fires
pub async fn rate_outfit(
    State(state): State<AppState>,
    Json(request): Json<RateOutfitRequest>,
) -> AppResult<Json<RateOutfitResponse>> {
    let rating = state
        .scoring
        .save_rating(
            state.user_id,
            request.outfit,
            request.rating,
            request.source,
            request.notes,
        )
        .await?;

    Ok(Json(RateOutfitResponse {
        rating,
        rating_count: state.store.count_ratings(state.user_id).await?,
        should_retrain: state.trainer.should_retrain(state.user_id).await?,
    }))
}

pub async fn retrain(
    State(state): State<AppState>,
    request: Option<Json<RetrainRequest>>,
) -> AppResult<Json<TrainingOutcome>> {
    let Json(request) = request.unwrap_or_default();
    let outcome = state.trainer.train_or_retrain(state.user_id, request.force).await?;
    Ok(Json(outcome))
}

pub async fn list_ratings(State(state): State<AppState>) -> AppResult<Json<Vec<Rating>>> {
    Ok(Json(state.store.list_ratings(state.user_id).await?))
}

pub async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<CacheStats>> {
    Ok(Json(state.scoring.cache_stats(state.user_id).await?))
}

pub async fn precompute_features(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let computed = state.scoring.precompute_features(state.user_id).await?;
    Ok(Json(json!({ "computed": computed })))
}

pub async fn clear_caches(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.scoring.clear_all_caches(state.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
