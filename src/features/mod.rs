pub mod color;
pub mod frame;
pub mod pipeline;
pub mod transformer;

pub use frame::{AlignmentReport, ColumnKind, FeatureCell, FeatureFrame};
pub use pipeline::{FeaturePipeline, PipelineMode, PreparedFeatures};
pub use transformer::{PolynomialExpansion, SqliteTransformerRegistry, Transformer, TransformerRegistry};

use crate::models::HashScheme;

/// Knobs of the feature engineering pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Total degree of the polynomial expansion over numeric columns
    pub poly_degree: usize,
    pub hash_scheme: HashScheme,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poly_degree: 3,
            hash_scheme: HashScheme::Joined,
        }
    }
}
