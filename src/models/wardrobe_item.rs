use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, OutfitHash, OutfitIdentity};

/// Pixel-level attributes produced by the visual feature provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualAttributes {
    /// Hex color such as `#1a2b3c`
    pub dominant_color: Option<String>,
    pub secondary_color: Option<String>,
    pub avg_brightness: Option<f64>,
    pub avg_saturation: Option<f64>,
    pub avg_hue: Option<f64>,
    pub color_variance: Option<f64>,
    pub edge_density: Option<f64>,
    pub texture_contrast: Option<f64>,
}

/// Tags produced by the semantic tagging service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticAttributes {
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub has_graphic: bool,
    pub style: Option<String>,
    pub fit_type: Option<String>,
    /// 0 = very casual, 1 = very formal
    pub formality_score: Option<f64>,
    /// 0 = single occasion, 1 = works anywhere
    pub versatility_score: Option<f64>,
    pub season_suitability: Option<String>,
    pub color_description: Option<String>,
}

/// A clothing item in a user's wardrobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardrobeItem {
    /// Category-prefixed identifier, e.g. `shirt_3`
    pub clothing_id: String,
    pub category: Category,
    pub visual: VisualAttributes,
    pub semantic: Option<SemanticAttributes>,
    pub file_path: Option<String>,
    pub is_active: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl WardrobeItem {
    pub fn new(clothing_id: impl Into<String>, category: Category, visual: VisualAttributes) -> Self {
        Self {
            clothing_id: clothing_id.into(),
            category,
            visual,
            semantic: None,
            file_path: None,
            is_active: true,
            uploaded_at: Utc::now(),
        }
    }

    pub fn with_semantic(mut self, semantic: SemanticAttributes) -> Self {
        self.semantic = Some(semantic);
        self
    }
}

/// A user's 1-5 star rating for an outfit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub identity: OutfitIdentity,
    pub outfit_hash: OutfitHash,
    pub rating: u8,
    /// Where the rating came from, e.g. `manual` or `mobile`
    pub source: String,
    pub rated_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Rating {
    /// Binary training label: 4 and 5 stars are positive
    pub fn is_positive(&self) -> bool {
        self.rating >= 4
    }
}

/// Reference palette of up to five hex colors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub name: String,
    pub colors: Vec<String>,
    pub source: Option<String>,
}
