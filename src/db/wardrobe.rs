use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{AppError, AppResult},
    models::{
        Category, ColorPalette, OutfitHash, OutfitIdentity, Rating, SemanticAttributes,
        VisualAttributes, WardrobeItem,
    },
};

/// Wardrobe, rating, and palette persistence
///
/// Items are never hard-deleted: ratings and caches may still reference them.
#[async_trait::async_trait]
pub trait WardrobeStore: Send + Sync {
    /// Active items, optionally restricted to one category, ordered by identifier
    async fn list_items(&self, user_id: i64, category: Option<Category>) -> AppResult<Vec<WardrobeItem>>;

    /// Looks up an item whether or not it is active
    async fn get_item(&self, user_id: i64, clothing_id: &str) -> AppResult<Option<WardrobeItem>>;

    /// Inserts an item or replaces (and reactivates) the item with the same identifier
    async fn upsert_item(&self, user_id: i64, item: &WardrobeItem) -> AppResult<()>;

    /// Soft-deletes an item; returns `false` when no active item matched
    async fn deactivate_item(&self, user_id: i64, clothing_id: &str) -> AppResult<bool>;

    async fn get_rating(&self, user_id: i64, outfit_hash: &OutfitHash) -> AppResult<Option<Rating>>;

    async fn list_ratings(&self, user_id: i64) -> AppResult<Vec<Rating>>;

    /// Saves a rating, replacing any earlier rating for the same outfit
    async fn save_rating(&self, user_id: i64, rating: &Rating) -> AppResult<()>;

    async fn count_ratings(&self, user_id: i64) -> AppResult<usize>;

    async fn list_palettes(&self) -> AppResult<Vec<ColorPalette>>;

    async fn add_palette(&self, palette: &ColorPalette) -> AppResult<()>;

    /// User-preference acceptance threshold, if the user has set one
    async fn user_threshold(&self, user_id: i64) -> AppResult<Option<f64>>;

    async fn set_user_threshold(&self, user_id: i64, threshold: f64) -> AppResult<()>;

    /// Cartesian product of the user's active shirts, pants, and shoes
    async fn combinations(&self, user_id: i64) -> AppResult<Vec<OutfitIdentity>> {
        let shirts = self.list_items(user_id, Some(Category::Shirt)).await?;
        let pants = self.list_items(user_id, Some(Category::Pants)).await?;
        let shoes = self.list_items(user_id, Some(Category::Shoes)).await?;

        let mut outfits = Vec::with_capacity(shirts.len() * pants.len() * shoes.len());
        for shirt in &shirts {
            for pant in &pants {
                for shoe in &shoes {
                    outfits.push(OutfitIdentity::new(
                        shirt.clothing_id.as_str(),
                        pant.clothing_id.as_str(),
                        shoe.clothing_id.as_str(),
                    ));
                }
            }
        }

        Ok(outfits)
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    clothing_id: String,
    item_type: String,
    file_path: Option<String>,
    dominant_color: Option<String>,
    secondary_color: Option<String>,
    avg_brightness: Option<f64>,
    avg_saturation: Option<f64>,
    avg_hue: Option<f64>,
    color_variance: Option<f64>,
    edge_density: Option<f64>,
    texture_contrast: Option<f64>,
    has_semantic: bool,
    pattern_type: Option<String>,
    has_graphic: bool,
    style: Option<String>,
    fit_type: Option<String>,
    formality_score: Option<f64>,
    versatility_score: Option<f64>,
    season_suitability: Option<String>,
    color_description: Option<String>,
    uploaded_at: DateTime<Utc>,
    is_active: bool,
}

impl TryFrom<ItemRow> for WardrobeItem {
    type Error = AppError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let category = row
            .item_type
            .parse::<Category>()
            .map_err(AppError::Internal)?;

        let semantic = row.has_semantic.then(|| SemanticAttributes {
            pattern_type: row.pattern_type,
            has_graphic: row.has_graphic,
            style: row.style,
            fit_type: row.fit_type,
            formality_score: row.formality_score,
            versatility_score: row.versatility_score,
            season_suitability: row.season_suitability,
            color_description: row.color_description,
        });

        Ok(WardrobeItem {
            clothing_id: row.clothing_id,
            category,
            visual: VisualAttributes {
                dominant_color: row.dominant_color,
                secondary_color: row.secondary_color,
                avg_brightness: row.avg_brightness,
                avg_saturation: row.avg_saturation,
                avg_hue: row.avg_hue,
                color_variance: row.color_variance,
                edge_density: row.edge_density,
                texture_contrast: row.texture_contrast,
            },
            semantic,
            file_path: row.file_path,
            is_active: row.is_active,
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RatingRow {
    shirt_id: String,
    pants_id: String,
    shoes_id: String,
    outfit_hash: String,
    rating: i64,
    rating_source: String,
    rated_at: DateTime<Utc>,
    notes: Option<String>,
}

impl From<RatingRow> for Rating {
    fn from(row: RatingRow) -> Self {
        Rating {
            identity: OutfitIdentity::new(row.shirt_id, row.pants_id, row.shoes_id),
            outfit_hash: OutfitHash::from_stored(row.outfit_hash),
            rating: row.rating.clamp(1, 5) as u8,
            source: row.rating_source,
            rated_at: row.rated_at,
            notes: row.notes,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaletteRow {
    name: String,
    color_1: String,
    color_2: Option<String>,
    color_3: Option<String>,
    color_4: Option<String>,
    color_5: Option<String>,
    source: Option<String>,
}

impl From<PaletteRow> for ColorPalette {
    fn from(row: PaletteRow) -> Self {
        let colors = std::iter::once(Some(row.color_1))
            .chain([row.color_2, row.color_3, row.color_4, row.color_5])
            .flatten()
            .filter(|c| !c.is_empty())
            .collect();

        ColorPalette {
            name: row.name,
            colors,
            source: row.source,
        }
    }
}

const ITEM_COLUMNS: &str = r#"
    clothing_id, item_type, file_path,
    dominant_color, secondary_color, avg_brightness, avg_saturation, avg_hue,
    color_variance, edge_density, texture_contrast,
    has_semantic, pattern_type, has_graphic, style, fit_type,
    formality_score, versatility_score, season_suitability, color_description,
    uploaded_at, is_active
"#;

/// SQLite-backed [`WardrobeStore`]
#[derive(Clone)]
pub struct SqliteWardrobeStore {
    pool: SqlitePool,
}

impl SqliteWardrobeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WardrobeStore for SqliteWardrobeStore {
    async fn list_items(&self, user_id: i64, category: Option<Category>) -> AppResult<Vec<WardrobeItem>> {
        let rows: Vec<ItemRow> = match category {
            Some(category) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM wardrobe_items
                     WHERE user_id = ? AND item_type = ? AND is_active = 1
                     ORDER BY clothing_id",
                    ITEM_COLUMNS
                ))
                .bind(user_id)
                .bind(category.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM wardrobe_items
                     WHERE user_id = ? AND is_active = 1
                     ORDER BY item_type, clothing_id",
                    ITEM_COLUMNS
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(WardrobeItem::try_from).collect()
    }

    async fn get_item(&self, user_id: i64, clothing_id: &str) -> AppResult<Option<WardrobeItem>> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM wardrobe_items WHERE user_id = ? AND clothing_id = ?",
            ITEM_COLUMNS
        ))
        .bind(user_id)
        .bind(clothing_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WardrobeItem::try_from).transpose()
    }

    async fn upsert_item(&self, user_id: i64, item: &WardrobeItem) -> AppResult<()> {
        let semantic = item.semantic.clone().unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO wardrobe_items (
                user_id, clothing_id, item_type, file_path,
                dominant_color, secondary_color, avg_brightness, avg_saturation, avg_hue,
                color_variance, edge_density, texture_contrast,
                has_semantic, pattern_type, has_graphic, style, fit_type,
                formality_score, versatility_score, season_suitability, color_description,
                uploaded_at, is_active
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(user_id, clothing_id) DO UPDATE SET
                item_type = excluded.item_type,
                file_path = excluded.file_path,
                dominant_color = excluded.dominant_color,
                secondary_color = excluded.secondary_color,
                avg_brightness = excluded.avg_brightness,
                avg_saturation = excluded.avg_saturation,
                avg_hue = excluded.avg_hue,
                color_variance = excluded.color_variance,
                edge_density = excluded.edge_density,
                texture_contrast = excluded.texture_contrast,
                has_semantic = excluded.has_semantic,
                pattern_type = excluded.pattern_type,
                has_graphic = excluded.has_graphic,
                style = excluded.style,
                fit_type = excluded.fit_type,
                formality_score = excluded.formality_score,
                versatility_score = excluded.versatility_score,
                season_suitability = excluded.season_suitability,
                color_description = excluded.color_description,
                uploaded_at = excluded.uploaded_at,
                is_active = 1
            "#,
        )
        .bind(user_id)
        .bind(&item.clothing_id)
        .bind(item.category.as_str())
        .bind(&item.file_path)
        .bind(&item.visual.dominant_color)
        .bind(&item.visual.secondary_color)
        .bind(item.visual.avg_brightness)
        .bind(item.visual.avg_saturation)
        .bind(item.visual.avg_hue)
        .bind(item.visual.color_variance)
        .bind(item.visual.edge_density)
        .bind(item.visual.texture_contrast)
        .bind(item.semantic.is_some())
        .bind(&semantic.pattern_type)
        .bind(semantic.has_graphic)
        .bind(&semantic.style)
        .bind(&semantic.fit_type)
        .bind(semantic.formality_score)
        .bind(semantic.versatility_score)
        .bind(&semantic.season_suitability)
        .bind(&semantic.color_description)
        .bind(item.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate_item(&self, user_id: i64, clothing_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE wardrobe_items SET is_active = 0
             WHERE user_id = ? AND clothing_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .bind(clothing_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_rating(&self, user_id: i64, outfit_hash: &OutfitHash) -> AppResult<Option<Rating>> {
        let row: Option<RatingRow> = sqlx::query_as(
            r#"
            SELECT shirt_id, pants_id, shoes_id, outfit_hash, rating, rating_source, rated_at, notes
            FROM outfit_ratings
            WHERE user_id = ? AND outfit_hash = ?
            "#,
        )
        .bind(user_id)
        .bind(outfit_hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Rating::from))
    }

    async fn list_ratings(&self, user_id: i64) -> AppResult<Vec<Rating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            r#"
            SELECT shirt_id, pants_id, shoes_id, outfit_hash, rating, rating_source, rated_at, notes
            FROM outfit_ratings
            WHERE user_id = ?
            ORDER BY rated_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn save_rating(&self, user_id: i64, rating: &Rating) -> AppResult<()> {
        if !(1..=5).contains(&rating.rating) {
            return Err(AppError::InvalidInput(format!(
                "rating must be between 1 and 5, got {}",
                rating.rating
            )));
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO outfit_ratings
            (user_id, shirt_id, pants_id, shoes_id, outfit_hash, rating, rating_source, rated_at, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&rating.identity.shirt_id)
        .bind(&rating.identity.pants_id)
        .bind(&rating.identity.shoes_id)
        .bind(rating.outfit_hash.as_str())
        .bind(rating.rating as i64)
        .bind(&rating.source)
        .bind(rating.rated_at)
        .bind(&rating.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_ratings(&self, user_id: i64) -> AppResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outfit_ratings WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }

    async fn list_palettes(&self) -> AppResult<Vec<ColorPalette>> {
        let rows: Vec<PaletteRow> = sqlx::query_as(
            r#"
            SELECT name, color_1, color_2, color_3, color_4, color_5, source
            FROM color_palettes
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ColorPalette::from).collect())
    }

    async fn add_palette(&self, palette: &ColorPalette) -> AppResult<()> {
        let mut colors: Vec<Option<&str>> = palette.colors.iter().take(5).map(|c| Some(c.as_str())).collect();
        colors.resize(5, None);

        let first = colors[0].ok_or_else(|| {
            AppError::InvalidInput(format!("palette {} has no colors", palette.name))
        })?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO color_palettes
            (name, color_1, color_2, color_3, color_4, color_5, source)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&palette.name)
        .bind(first)
        .bind(colors[1])
        .bind(colors[2])
        .bind(colors[3])
        .bind(colors[4])
        .bind(&palette.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn user_threshold(&self, user_id: i64) -> AppResult<Option<f64>> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT score_threshold FROM user_preferences WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(threshold,)| threshold))
    }

    async fn set_user_threshold(&self, user_id: i64, threshold: f64) -> AppResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_preferences (user_id, score_threshold) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
