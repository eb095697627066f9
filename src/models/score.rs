use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::{OutfitHash, OutfitIdentity};

/// Provenance of an outfit score, carrying its payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum ScoreSource {
    /// Ground truth from the user; overrides everything else
    #[serde(rename = "user_rating")]
    UserRating { rating: u8 },
    /// Prediction read from the prediction store for the active model
    #[serde(rename = "cached_ml")]
    CachedPrediction { probability: f64 },
    /// Prediction computed during this request and written back
    #[serde(rename = "new_ml")]
    FreshPrediction { probability: f64 },
    /// Uniformly random pick made to escape the recommendation bubble
    #[serde(rename = "exploration_random")]
    Exploration,
    /// Random placeholder used while no model is trained; never cached
    #[serde(rename = "random")]
    Fallback { value: f64 },
}

impl ScoreSource {
    /// Short tag used in logs and responses
    pub fn tag(&self) -> &'static str {
        match self {
            ScoreSource::UserRating { .. } => "user_rating",
            ScoreSource::CachedPrediction { .. } => "cached_ml",
            ScoreSource::FreshPrediction { .. } => "new_ml",
            ScoreSource::Exploration => "exploration_random",
            ScoreSource::Fallback { .. } => "random",
        }
    }

    pub fn is_user_rating(&self) -> bool {
        matches!(self, ScoreSource::UserRating { .. })
    }
}

impl Display for ScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreSource::UserRating { rating } => write!(f, "user_rating({})", rating),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// An outfit together with its resolved score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOutfit {
    #[serde(flatten)]
    pub identity: OutfitIdentity,
    pub outfit_hash: OutfitHash,
    /// Score in `[0, 1]`
    pub score: f64,
    #[serde(flatten)]
    pub source: ScoreSource,
}
