use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

pub mod model_version;
pub mod outfit;
pub mod score;
pub mod wardrobe_item;

pub use model_version::{ModelVersion, TrainingOutcome};
pub use outfit::{outfit_hash, HashScheme, OutfitHash, OutfitIdentity, PartialOutfit};
pub use score::{ScoreSource, ScoredOutfit};
pub use wardrobe_item::{ColorPalette, Rating, SemanticAttributes, VisualAttributes, WardrobeItem};

/// Clothing category; each outfit has exactly one item per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Shirt,
    Pants,
    Shoes,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Shirt, Category::Pants, Category::Shoes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Shirt => "shirt",
            Category::Pants => "pants",
            Category::Shoes => "shoes",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shirt" => Ok(Category::Shirt),
            "pants" => Ok(Category::Pants),
            "shoes" => Ok(Category::Shoes),
            other => Err(format!(
                "invalid item type: {}. must be 'shirt', 'pants', or 'shoes'",
                other
            )),
        }
    }
}
