//! Core domain model and request/view types for the pantry catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pantry-core";

/// A catalog recipe. Owns its ingredient and tag links; does not own the
/// items or tags they point at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub time: Option<i64>,
    pub cook_time: Option<i64>,
    pub prep_time: Option<i64>,
    pub yields: Option<i64>,
    pub source: Option<String>,
    pub photo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            time: None,
            cook_time: None,
            prep_time: None,
            yields: None,
            source: None,
            photo: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A pantry item, shared across recipes. Names are unique, exact-match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A recipe tag, shared across recipes. Names are unique, exact-match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Recipe-to-item link. Keyed by `(recipe_id, item_id)`; a recipe references
/// a given item at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientLink {
    pub recipe_id: Uuid,
    pub item_id: Uuid,
    pub description: String,
    pub optional: bool,
}

/// Recipe-to-tag link. Keyed by `(recipe_id, tag_id)`; no extra attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLink {
    pub recipe_id: Uuid,
    pub tag_id: Uuid,
}

/// Partial create/update payload. `None` means "absent, leave unchanged";
/// sentinel values are never used to signal absence. Create additionally
/// requires `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub time: Option<i64>,
    pub cook_time: Option<i64>,
    pub prep_time: Option<i64>,
    pub yields: Option<i64>,
    pub source: Option<String>,
    pub photo: Option<String>,
    pub items: Option<Vec<IngredientSpec>>,
    pub tags: Option<Vec<String>>,
}

/// Desired ingredient-association descriptor. Absent `description`/`optional`
/// leave an existing link's fields untouched; on first creation they default
/// to `""`/`false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientSpec {
    pub name: String,
    pub description: Option<String>,
    pub optional: Option<bool>,
}

impl IngredientSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            optional: None,
        }
    }
}

/// Import output: a well-typed draft plus no associations. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDraft {
    pub name: String,
    pub description: String,
    pub time: Option<i64>,
    pub cook_time: Option<i64>,
    pub prep_time: Option<i64>,
    pub yields: Option<i64>,
    pub source: String,
    pub photo: Option<String>,
}

/// One resolved ingredient row of a full recipe view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRow {
    pub name: String,
    pub description: String,
    pub optional: bool,
}

/// Outbound full view: recipe scalars plus resolved ingredient rows and tag
/// names, both sorted by name for a stable wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeFull {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub items: Vec<IngredientRow>,
    pub tags: Vec<String>,
}
