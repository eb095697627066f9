use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::color::{mean_pairwise_distance, Lab};
use super::frame::{FeatureCell, FeatureFrame};
use super::transformer::{Transformer, TransformerRegistry};
use super::PipelineSettings;
use crate::{
    db::{fields_digest, FeatureRecord, FeatureStore, WardrobeStore},
    error::{AppError, AppResult},
    models::{Category, ColorPalette, OutfitHash, OutfitIdentity, SemanticAttributes, WardrobeItem},
};

/// Whether [`FeaturePipeline::prepare`] defines the schema or reuses it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Fit a new transformer on the batch; nothing is cached or aligned
    Training,
    /// Reuse the persisted transformer, align, and cache computed vectors
    Inference,
}

/// Feature matrix for a batch, rows in the order the identities were given
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub schema_version: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Rows computed in this call rather than read from the feature store
    pub computed: usize,
    /// Transformer fitted in training mode. Not yet persisted.
    pub fitted: Option<Transformer>,
}

const VISUAL_COLUMNS: [&str; 6] = [
    "avg_brightness",
    "avg_saturation",
    "avg_hue",
    "color_variance",
    "edge_density",
    "texture_contrast",
];

const CATEGORICAL_COLUMNS: [&str; 4] = ["pattern_type", "style", "fit_type", "season_suitability"];

struct PaletteLab {
    name: String,
    colors: Vec<Lab>,
}

impl PaletteLab {
    /// Drops palettes with no readable color
    fn prepare(palettes: &[ColorPalette]) -> Vec<PaletteLab> {
        palettes
            .iter()
            .filter_map(|palette| {
                let colors: Vec<Lab> = palette.colors.iter().filter_map(|c| Lab::from_hex(c)).collect();
                (!colors.is_empty()).then(|| PaletteLab {
                    name: palette.name.clone(),
                    colors,
                })
            })
            .collect()
    }

    /// Mean over outfit colors of the distance to this palette's nearest color
    fn proximity(&self, outfit_colors: &[Lab]) -> f64 {
        let total: f64 = outfit_colors
            .iter()
            .map(|color| {
                self.colors
                    .iter()
                    .map(|p| color.distance(p))
                    .fold(f64::INFINITY, f64::min)
            })
            .sum();
        total / outfit_colors.len() as f64
    }
}

/// Best-matching palette and its proximity; `None` without readable outfit colors or palettes
fn closest_palette<'a>(outfit_colors: &[Lab], palettes: &'a [PaletteLab]) -> Option<(&'a str, f64)> {
    if outfit_colors.is_empty() {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for palette in palettes {
        let distance = palette.proximity(outfit_colors);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((palette.name.as_str(), distance));
        }
    }
    best
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance; NaN below two values
fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn categorical_value<'a>(semantic: Option<&'a SemanticAttributes>, column: &str) -> Option<&'a str> {
    let semantic = semantic?;
    let value = match column {
        "pattern_type" => semantic.pattern_type.as_deref(),
        "style" => semantic.style.as_deref(),
        "fit_type" => semantic.fit_type.as_deref(),
        "season_suitability" => semantic.season_suitability.as_deref(),
        _ => None,
    };
    value.filter(|v| !v.is_empty())
}

fn visual_value(item: Option<&WardrobeItem>, column: &str) -> f64 {
    let Some(item) = item else {
        return f64::NAN;
    };
    let visual = &item.visual;
    let value = match column {
        "avg_brightness" => visual.avg_brightness,
        "avg_saturation" => visual.avg_saturation,
        "avg_hue" => visual.avg_hue,
        "color_variance" => visual.color_variance,
        "edge_density" => visual.edge_density,
        "texture_contrast" => visual.texture_contrast,
        _ => None,
    };
    value.unwrap_or(f64::NAN)
}

/// Engineers the raw (pre-expansion) cells for one outfit. Missing values are NaN.
fn outfit_cells(
    identity: &OutfitIdentity,
    items: &HashMap<&str, &WardrobeItem>,
    palettes: &[PaletteLab],
) -> Vec<FeatureCell> {
    let mut cells = Vec::new();
    let mut colors = Vec::new();
    let mut formality = Vec::new();
    let mut versatility = Vec::new();
    let mut lab_cells = Vec::new();

    for category in Category::ALL {
        let prefix = category.as_str();
        let item = items.get(identity.item(category)).copied();
        let semantic = item.and_then(|i| i.semantic.as_ref());

        for column in VISUAL_COLUMNS {
            cells.push(FeatureCell::numeric(
                format!("{}_{}", prefix, column),
                visual_value(item, column),
            ));
        }

        let formality_score = semantic.and_then(|s| s.formality_score);
        let versatility_score = semantic.and_then(|s| s.versatility_score);
        cells.push(FeatureCell::numeric(
            format!("{}_formality_score", prefix),
            formality_score.unwrap_or(f64::NAN),
        ));
        cells.push(FeatureCell::numeric(
            format!("{}_versatility_score", prefix),
            versatility_score.unwrap_or(f64::NAN),
        ));
        formality.extend(formality_score);
        versatility.extend(versatility_score);

        cells.push(FeatureCell::indicator(
            format!("{}_has_graphic", prefix),
            semantic.is_some_and(|s| s.has_graphic),
        ));

        for column in CATEGORICAL_COLUMNS {
            let value = categorical_value(semantic, column);
            if let Some(value) = value {
                cells.push(FeatureCell::indicator(format!("{}_{}_{}", prefix, column, value), true));
            }
            cells.push(FeatureCell::indicator(
                format!("{}_{}_nan", prefix, column),
                value.is_none(),
            ));
        }

        let lab = item
            .and_then(|i| i.visual.dominant_color.as_deref())
            .and_then(Lab::from_hex);
        if let Some(lab) = lab {
            colors.push(lab);
        }
        let lab = lab.unwrap_or(Lab::NEUTRAL);
        lab_cells.push(FeatureCell::numeric(format!("{}_L", prefix), lab.l));
        lab_cells.push(FeatureCell::numeric(format!("{}_a", prefix), lab.a));
        lab_cells.push(FeatureCell::numeric(format!("{}_b", prefix), lab.b));
    }

    cells.push(FeatureCell::numeric(
        "overall_color_harmony",
        mean_pairwise_distance(&colors),
    ));
    cells.extend(lab_cells);

    cells.push(FeatureCell::numeric("avg_formality", mean(&formality)));
    cells.push(FeatureCell::numeric("formality_variance", sample_variance(&formality)));
    cells.push(FeatureCell::numeric("avg_versatility", mean(&versatility)));

    match closest_palette(&colors, palettes) {
        Some((name, distance)) => {
            cells.push(FeatureCell::numeric("palette_distance", distance));
            cells.push(FeatureCell::indicator(format!("palette_{}", name), true));
        }
        None => cells.push(FeatureCell::numeric("palette_distance", 0.0)),
    }

    cells
}

/// Turns outfit identities into classifier-ready feature vectors.
///
/// Inference reuses the user's persisted [`Transformer`] and caches every
/// computed vector in the feature store under the transformer's version.
pub struct FeaturePipeline {
    wardrobe: Arc<dyn WardrobeStore>,
    store: Arc<FeatureStore>,
    transformers: Arc<dyn TransformerRegistry>,
    settings: PipelineSettings,
}

impl FeaturePipeline {
    pub fn new(
        wardrobe: Arc<dyn WardrobeStore>,
        store: Arc<FeatureStore>,
        transformers: Arc<dyn TransformerRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            wardrobe,
            store,
            transformers,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn transformers(&self) -> &Arc<dyn TransformerRegistry> {
        &self.transformers
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    /// Attribute join through palette proximity, before numeric expansion
    pub async fn engineer(&self, user_id: i64, identities: &[OutfitIdentity]) -> AppResult<FeatureFrame> {
        let wardrobe = self.wardrobe.list_items(user_id, None).await?;
        let items: HashMap<&str, &WardrobeItem> = wardrobe
            .iter()
            .map(|item| (item.clothing_id.as_str(), item))
            .collect();
        let palettes = PaletteLab::prepare(&self.wardrobe.list_palettes().await?);

        let records = identities
            .iter()
            .map(|identity| outfit_cells(identity, &items, &palettes))
            .collect();

        Ok(FeatureFrame::from_records(records))
    }

    pub async fn prepare(
        &self,
        user_id: i64,
        identities: &[OutfitIdentity],
        mode: PipelineMode,
    ) -> AppResult<PreparedFeatures> {
        match mode {
            PipelineMode::Training => self.fit(user_id, identities).await,
            PipelineMode::Inference => self.infer(user_id, identities).await,
        }
    }

    async fn fit(&self, user_id: i64, identities: &[OutfitIdentity]) -> AppResult<PreparedFeatures> {
        if identities.is_empty() {
            return Err(AppError::InsufficientData(
                "no outfits to fit a feature schema on".to_string(),
            ));
        }

        let frame = self.engineer(user_id, identities).await?;
        let (transformer, transformed) = Transformer::fit(&frame, self.settings.poly_degree);

        tracing::info!(
            user_id,
            outfits = identities.len(),
            raw_columns = frame.width(),
            features = transformer.feature_count(),
            "Fitted feature transformer"
        );

        Ok(PreparedFeatures {
            schema_version: transformer.version.clone(),
            columns: transformer.output_columns.clone(),
            rows: transformed.into_rows(),
            computed: identities.len(),
            fitted: Some(transformer),
        })
    }

    async fn infer(&self, user_id: i64, identities: &[OutfitIdentity]) -> AppResult<PreparedFeatures> {
        let transformer = self.transformers.load(user_id).await?.ok_or_else(|| {
            AppError::Configuration(format!("no fitted feature transformer for user {}", user_id))
        })?;
        let version = transformer.version.as_str();
        let digest = fields_digest(&transformer.output_columns);

        let hashes: Vec<OutfitHash> = identities
            .iter()
            .map(|identity| identity.hash(self.settings.hash_scheme))
            .collect();

        let mut vectors: HashMap<OutfitHash, Vec<f64>> = HashMap::new();
        for (hash, record) in self.store.get(user_id, &hashes, version).await? {
            if record.matches_fields(&transformer.output_columns, &digest) {
                vectors.insert(hash, record.values);
            } else {
                tracing::warn!(
                    user_id,
                    hash = %hash,
                    stored = record.values.len(),
                    expected = transformer.feature_count(),
                    "Ignoring cached feature vector with a different column layout"
                );
            }
        }
        let hits = vectors.len();

        let mut seen = HashSet::new();
        let missing: Vec<(OutfitHash, OutfitIdentity)> = hashes
            .iter()
            .zip(identities)
            .filter(|(hash, _)| !vectors.contains_key(*hash) && seen.insert((*hash).clone()))
            .map(|(hash, identity)| (hash.clone(), identity.clone()))
            .collect();

        if !missing.is_empty() {
            let missing_identities: Vec<OutfitIdentity> =
                missing.iter().map(|(_, identity)| identity.clone()).collect();
            let frame = self.engineer(user_id, &missing_identities).await?;
            let mut transformed = transformer.transform(&frame);
            let report = transformed.align(&transformer.output_columns);

            tracing::debug!(
                user_id,
                columns = transformed.width(),
                added = report.added,
                removed = report.removed,
                "Aligned features to recorded schema"
            );

            let entries: Vec<(OutfitHash, FeatureRecord)> = missing
                .iter()
                .map(|(hash, _)| hash.clone())
                .zip(transformed.into_rows())
                .map(|(hash, values)| (hash, FeatureRecord::new(version, digest.as_str(), values)))
                .collect();
            self.store.put_batch(user_id, &entries, version).await?;

            for (hash, record) in entries {
                vectors.insert(hash, record.values);
            }
        }

        tracing::debug!(
            user_id,
            requested = identities.len(),
            hits,
            computed = missing.len(),
            "Prepared inference features"
        );

        let rows = hashes
            .iter()
            .map(|hash| {
                vectors.get(hash).cloned().ok_or_else(|| {
                    AppError::Internal(format!("feature vector for {} was not produced", hash))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PreparedFeatures {
            schema_version: transformer.version.clone(),
            columns: transformer.output_columns.clone(),
            rows,
            computed: missing.len(),
            fitted: None,
        })
    }

    /// Computes and caches features for every active combination not yet cached.
    ///
    /// Fits and persists a transformer over the full outfit space first when
    /// the user has none. Returns the number of newly computed vectors.
    pub async fn precompute_all(&self, user_id: i64) -> AppResult<usize> {
        let identities = self.wardrobe.combinations(user_id).await?;
        if identities.is_empty() {
            return Ok(0);
        }

        if self.transformers.load(user_id).await?.is_none() {
            let prepared = self.fit(user_id, &identities).await?;
            if let Some(transformer) = prepared.fitted {
                self.store.clear(user_id, None).await?;
                self.transformers.save(user_id, &transformer).await?;
            }
        }

        let prepared = self.infer(user_id, &identities).await?;
        tracing::info!(
            user_id,
            outfits = identities.len(),
            computed = prepared.computed,
            "Precomputed outfit features"
        );
        Ok(prepared.computed)
    }
}
