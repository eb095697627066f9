use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::Category;

/// Encoding used to derive an [`OutfitHash`] from a triple.
///
/// `Joined` is the historical `shirt_pants_shoes` concatenation. Because `_`
/// is also legal inside identifiers it is not injective in general
/// (`"a_b" + "c"` vs `"a" + "b_c"`). `LengthPrefixed` is injective for any
/// identifiers but produces keys that do not match data cached under `Joined`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScheme {
    #[default]
    Joined,
    LengthPrefixed,
}

/// Deterministic cache key for a (shirt, pants, shoes) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutfitHash(String);

impl OutfitHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a hash previously read back from a store
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }
}

impl Display for OutfitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pure hash of an outfit triple; identifiers are treated as opaque strings.
pub fn outfit_hash(scheme: HashScheme, shirt_id: &str, pants_id: &str, shoes_id: &str) -> OutfitHash {
    match scheme {
        HashScheme::Joined => OutfitHash(format!("{}_{}_{}", shirt_id, pants_id, shoes_id)),
        HashScheme::LengthPrefixed => OutfitHash(format!(
            "{}:{}{}:{}{}:{}",
            shirt_id.len(),
            shirt_id,
            pants_id.len(),
            pants_id,
            shoes_id.len(),
            shoes_id
        )),
    }
}

/// A fully specified outfit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutfitIdentity {
    pub shirt_id: String,
    pub pants_id: String,
    pub shoes_id: String,
}

impl OutfitIdentity {
    pub fn new(
        shirt_id: impl Into<String>,
        pants_id: impl Into<String>,
        shoes_id: impl Into<String>,
    ) -> Self {
        Self {
            shirt_id: shirt_id.into(),
            pants_id: pants_id.into(),
            shoes_id: shoes_id.into(),
        }
    }

    pub fn hash(&self, scheme: HashScheme) -> OutfitHash {
        outfit_hash(scheme, &self.shirt_id, &self.pants_id, &self.shoes_id)
    }

    /// Identifier occupying the given category slot
    pub fn item(&self, category: Category) -> &str {
        match category {
            Category::Shirt => &self.shirt_id,
            Category::Pants => &self.pants_id,
            Category::Shoes => &self.shoes_id,
        }
    }

    pub fn contains(&self, category: Category, item_id: &str) -> bool {
        self.item(category) == item_id
    }
}

impl Display for OutfitIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.shirt_id, self.pants_id, self.shoes_id)
    }
}

/// An outfit with zero or more slots pinned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialOutfit {
    #[serde(default)]
    pub shirt_id: Option<String>,
    #[serde(default)]
    pub pants_id: Option<String>,
    #[serde(default)]
    pub shoes_id: Option<String>,
}

impl PartialOutfit {
    pub fn fixed(&self, category: Category) -> Option<&str> {
        match category {
            Category::Shirt => self.shirt_id.as_deref(),
            Category::Pants => self.pants_id.as_deref(),
            Category::Shoes => self.shoes_id.as_deref(),
        }
    }

    pub fn matches(&self, identity: &OutfitIdentity) -> bool {
        Category::ALL.iter().all(|category| match self.fixed(*category) {
            Some(item_id) => identity.contains(*category, item_id),
            None => true,
        })
    }
}
