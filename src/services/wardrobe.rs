use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::ScoreTableCache;
use crate::{
    db::{FeatureStore, PredictionStore, WardrobeStore},
    error::{AppError, AppResult},
    features::color::parse_hex,
    models::{Category, ColorPalette, SemanticAttributes, VisualAttributes, WardrobeItem},
};

const PALETTE_SIZE: usize = 5;

/// Extracts pixel-level attributes from a processed item image
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VisualFeatureProvider: Send + Sync {
    async fn extract(&self, image: &Path) -> AppResult<VisualAttributes>;
}

/// Tags an item image with style attributes
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SemanticTagger: Send + Sync {
    async fn tag(&self, image: &Path, category: Category) -> AppResult<SemanticAttributes>;
}

/// Smallest `n >= 1` such that `{category}_{n}` is not taken
fn next_item_id<'a>(category: Category, taken: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<&str> = taken.into_iter().collect();
    (1..)
        .map(|n| format!("{}_{}", category, n))
        .find(|id| !taken.contains(id.as_str()))
        .unwrap_or_else(|| format!("{}_{}", category, taken.len() + 1))
}

/// Wardrobe mutations, each followed by the cache invalidation they require
pub struct WardrobeService {
    wardrobe: Arc<dyn WardrobeStore>,
    features: Arc<FeatureStore>,
    predictions: Arc<PredictionStore>,
    tables: Arc<dyn ScoreTableCache>,
    visual: Option<Arc<dyn VisualFeatureProvider>>,
    tagger: Option<Arc<dyn SemanticTagger>>,
}

impl WardrobeService {
    pub fn new(
        wardrobe: Arc<dyn WardrobeStore>,
        features: Arc<FeatureStore>,
        predictions: Arc<PredictionStore>,
        tables: Arc<dyn ScoreTableCache>,
    ) -> Self {
        Self {
            wardrobe,
            features,
            predictions,
            tables,
            visual: None,
            tagger: None,
        }
    }

    /// Attaches the image analysis collaborators used by [`Self::ingest_item`]
    pub fn with_providers(
        mut self,
        visual: Arc<dyn VisualFeatureProvider>,
        tagger: Option<Arc<dyn SemanticTagger>>,
    ) -> Self {
        self.visual = Some(visual);
        self.tagger = tagger;
        self
    }

    pub async fn list_items(&self, user_id: i64, category: Option<Category>) -> AppResult<Vec<WardrobeItem>> {
        self.wardrobe.list_items(user_id, category).await
    }

    /// Adds an item under the next free identifier of its category
    pub async fn add_item(
        &self,
        user_id: i64,
        category: Category,
        visual: VisualAttributes,
        semantic: Option<SemanticAttributes>,
        file_path: Option<String>,
    ) -> AppResult<WardrobeItem> {
        let existing = self.wardrobe.list_items(user_id, Some(category)).await?;
        let clothing_id = next_item_id(category, existing.iter().map(|item| item.clothing_id.as_str()));

        let mut item = WardrobeItem::new(clothing_id, category, visual);
        item.semantic = semantic;
        item.file_path = file_path;
        self.wardrobe.upsert_item(user_id, &item).await?;

        tracing::info!(user_id, clothing_id = %item.clothing_id, "Added wardrobe item");
        self.invalidate(user_id).await?;
        Ok(item)
    }

    /// Analyzes an item image and adds the item.
    ///
    /// Either analysis may fail; the item is still added with empty attributes.
    pub async fn ingest_item(&self, user_id: i64, category: Category, image: &Path) -> AppResult<WardrobeItem> {
        let provider = self
            .visual
            .as_ref()
            .ok_or_else(|| AppError::Configuration("no visual feature provider configured".to_string()))?;

        let visual = match provider.extract(image).await {
            Ok(visual) => visual,
            Err(e) => {
                tracing::warn!(image = %image.display(), error = %e, "Visual feature extraction failed");
                VisualAttributes::default()
            }
        };

        let semantic = match &self.tagger {
            Some(tagger) => match tagger.tag(image, category).await {
                Ok(semantic) => Some(semantic),
                Err(e) => {
                    tracing::warn!(image = %image.display(), error = %e, "Semantic tagging failed");
                    None
                }
            },
            None => None,
        };

        let file_path = Some(image.to_string_lossy().to_string());
        self.add_item(user_id, category, visual, semantic, file_path).await
    }

    /// Soft-deletes an item
    pub async fn delete_item(&self, user_id: i64, clothing_id: &str) -> AppResult<()> {
        if !self.wardrobe.deactivate_item(user_id, clothing_id).await? {
            return Err(AppError::NotFound(format!("no active item with id {}", clothing_id)));
        }

        tracing::info!(user_id, clothing_id, "Deleted wardrobe item");
        self.invalidate(user_id).await
    }

    /// Registers a reference palette of exactly five colors, cycling short
    /// lists and truncating long ones.
    ///
    /// Palette proximity is an outfit feature, so the user's cached vectors
    /// and predictions are dropped.
    pub async fn add_palette(
        &self,
        user_id: i64,
        name: &str,
        colors: Vec<String>,
        source: Option<String>,
    ) -> AppResult<ColorPalette> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("palette name must not be empty".to_string()));
        }
        if colors.is_empty() {
            return Err(AppError::InvalidInput("a palette needs at least one color".to_string()));
        }
        if let Some(bad) = colors.iter().find(|color| parse_hex(color).is_none()) {
            return Err(AppError::InvalidInput(format!("invalid hex color: {}", bad)));
        }

        let palette = ColorPalette {
            name: name.to_string(),
            colors: colors.iter().cycle().take(PALETTE_SIZE).cloned().collect(),
            source,
        };
        self.wardrobe.add_palette(&palette).await?;

        tracing::info!(name, colors = palette.colors.len(), "Added color palette");
        self.invalidate(user_id).await?;
        Ok(palette)
    }

    /// Feature inputs may have changed, so every cached vector and
    /// prediction of the user is dropped along with the scored table
    async fn invalidate(&self, user_id: i64) -> AppResult<()> {
        let features = self.features.clear(user_id, None).await?;
        let predictions = self.predictions.clear(user_id, None).await?;
        self.tables.invalidate(user_id).await?;

        tracing::info!(user_id, features, predictions, "Invalidated caches after wardrobe change");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, FeatureRecord, InMemoryStore, SqliteWardrobeStore, VersionedStore};
    use crate::models::{HashScheme, OutfitIdentity, ScoreSource, ScoredOutfit};
    use crate::services::InMemoryScoreCache;

    struct Fixture {
        wardrobe: Arc<SqliteWardrobeStore>,
        features: Arc<InMemoryStore<FeatureRecord>>,
        predictions: Arc<InMemoryStore<f64>>,
        tables: Arc<InMemoryScoreCache>,
        service: WardrobeService,
    }

    async fn fixture() -> Fixture {
        let wardrobe = Arc::new(SqliteWardrobeStore::new(create_memory_pool().await.unwrap()));
        let features = Arc::new(InMemoryStore::new());
        let predictions = Arc::new(InMemoryStore::new());
        let tables = Arc::new(InMemoryScoreCache::new());
        let service = WardrobeService::new(wardrobe.clone(), features.clone(), predictions.clone(), tables.clone());
        Fixture {
            wardrobe,
            features,
            predictions,
            tables,
            service,
        }
    }

    #[test]
    fn test_next_item_id_fills_gaps() {
        assert_eq!(next_item_id(Category::Shirt, []), "shirt_1");
        assert_eq!(next_item_id(Category::Shirt, ["shirt_1", "shirt_3"]), "shirt_2");
        assert_eq!(next_item_id(Category::Pants, ["pants_1", "pants_2"]), "pants_3");
    }

    #[tokio::test]
    async fn test_add_item_allocates_ids_and_reuses_deleted_ones() {
        let f = fixture().await;
        let first = f
            .service
            .add_item(1, Category::Shirt, VisualAttributes::default(), None, None)
            .await
            .unwrap();
        let second = f
            .service
            .add_item(1, Category::Shirt, VisualAttributes::default(), None, None)
            .await
            .unwrap();
        assert_eq!(first.clothing_id, "shirt_1");
        assert_eq!(second.clothing_id, "shirt_2");

        f.service.delete_item(1, "shirt_1").await.unwrap();
        let third = f
            .service
            .add_item(1, Category::Shirt, VisualAttributes::default(), None, None)
            .await
            .unwrap();
        assert_eq!(third.clothing_id, "shirt_1");
        assert_eq!(f.service.list_items(1, Some(Category::Shirt)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mutation_clears_features_predictions_and_table() {
        let f = fixture().await;
        let identity = OutfitIdentity::new("shirt_1", "pants_1", "shoes_1");
        let hash = identity.hash(HashScheme::Joined);
        f.features
            .put(1, &hash, &FeatureRecord::new("fs1", "digest", vec![0.5]), "fs1")
            .await
            .unwrap();
        f.predictions.put(1, &hash, &0.7, "v5").await.unwrap();
        f.tables
            .store(
                1,
                Arc::new(vec![ScoredOutfit {
                    identity,
                    outfit_hash: hash.clone(),
                    score: 0.7,
                    source: ScoreSource::CachedPrediction { probability: 0.7 },
                }]),
            )
            .await
            .unwrap();

        f.service
            .add_item(1, Category::Pants, VisualAttributes::default(), None, None)
            .await
            .unwrap();

        assert!(f.features.get(1, &[hash.clone()], "fs1").await.unwrap().is_empty());
        assert!(f.predictions.get(1, &[hash], "v5").await.unwrap().is_empty());
        assert!(f.tables.load(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_item_is_not_found() {
        let f = fixture().await;
        let err = f.service.delete_item(1, "shoes_9").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ingest_survives_tagger_failure() {
        let f = fixture().await;
        let mut visual = MockVisualFeatureProvider::new();
        visual.expect_extract().times(1).returning(|_| {
            Ok(VisualAttributes {
                dominant_color: Some("#112233".to_string()),
                ..Default::default()
            })
        });
        let mut tagger = MockSemanticTagger::new();
        tagger
            .expect_tag()
            .times(1)
            .returning(|_, _| Err(AppError::Internal("tagging service unavailable".to_string())));

        let service = WardrobeService {
            visual: Some(Arc::new(visual)),
            tagger: Some(Arc::new(tagger)),
            ..f.service
        };
        let item = service
            .ingest_item(1, Category::Shoes, Path::new("uploads/shoes.png"))
            .await
            .unwrap();

        assert_eq!(item.clothing_id, "shoes_1");
        assert_eq!(item.visual.dominant_color.as_deref(), Some("#112233"));
        assert!(item.semantic.is_none());

        let stored = f.wardrobe.get_item(1, "shoes_1").await.unwrap().unwrap();
        assert_eq!(stored.file_path.as_deref(), Some("uploads/shoes.png"));
    }

    #[tokio::test]
    async fn test_ingest_without_provider_is_configuration_error() {
        let f = fixture().await;
        let err = f
            .service
            .ingest_item(1, Category::Shirt, Path::new("shirt.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_add_palette_validates_colors() {
        let f = fixture().await;
        let err = f
            .service
            .add_palette(1, "bad", vec!["#12".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let colors = ["#000000", "#111111", "#222222", "#333333", "#444444", "#555555"]
            .map(String::from)
            .to_vec();
        let palette = f.service.add_palette(1, "greys", colors, None).await.unwrap();
        assert_eq!(palette.colors.len(), 5);
        assert_eq!(palette.colors[4], "#444444");

        let duo = vec!["#ff0000".to_string(), "#00ff00".to_string()];
        let palette = f.service.add_palette(1, "duo", duo, None).await.unwrap();
        assert_eq!(palette.colors, ["#ff0000", "#00ff00", "#ff0000", "#00ff00", "#ff0000"]);
        assert_eq!(f.wardrobe.list_palettes().await.unwrap().len(), 2);
    }
}
