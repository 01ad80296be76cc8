//! Recipe service core: entity resolution, association reconciliation and
//! import normalization.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pantry_core::{
    IngredientLink, IngredientSpec, Item, Recipe, RecipeDraft, RecipeFull, RecipePatch, Tag,
};
use pantry_scrape::{fetch_and_scrape, PageScraper, ScrapeError};
use pantry_store::{
    Catalog, CatalogTx, FetchConfig, MediaError, MediaStore, PageFetcher, StoreError,
};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "pantry-service";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub media_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PANTRY_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            media_dir: std::env::var("PANTRY_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            user_agent: std::env::var("PANTRY_USER_AGENT")
                .unwrap_or_else(|_| "pantry-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("PANTRY_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("recipe {0} not found")]
    NotFound(Uuid),
    /// Retryable: someone else changed the same entities concurrently.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("recipe name is required")]
    MissingName,
    #[error("upstream source failed: {0}")]
    Upstream(#[from] ScrapeError),
    #[error("media storage failed: {0}")]
    Media(#[from] MediaError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ServiceError::Conflict(err.to_string()),
            StoreError::RecipeNotFound(id) => ServiceError::NotFound(id),
        }
    }
}

/// Find-or-create an item by name. Create-first: a uniqueness conflict means
/// someone else just created it, so re-read once.
pub fn resolve_item(tx: &mut CatalogTx<'_>, name: &str) -> Result<Item, ServiceError> {
    match tx.insert_item(name) {
        Ok(item) => Ok(item),
        Err(StoreError::Conflict { .. }) => tx.item_by_name(name).ok_or_else(|| {
            ServiceError::Conflict(format!("item {name:?} disappeared during resolution"))
        }),
        Err(err) => Err(err.into()),
    }
}

pub fn resolve_tag(tx: &mut CatalogTx<'_>, name: &str) -> Result<Tag, ServiceError> {
    match tx.insert_tag(name) {
        Ok(tag) => Ok(tag),
        Err(StoreError::Conflict { .. }) => tx.tag_by_name(name).ok_or_else(|| {
            ServiceError::Conflict(format!("tag {name:?} disappeared during resolution"))
        }),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngredientOp {
    Delete {
        name: String,
    },
    Create {
        name: String,
        description: String,
        optional: bool,
    },
    Update {
        name: String,
        description: Option<String>,
        optional: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    Delete { name: String },
    Create { name: String },
}

/// Diff the current ingredient links against the desired descriptors.
/// Pure: deletions for stale links first, then one op per desired entry in
/// order, computed against a simulated link set so a name repeated within
/// one call becomes create-then-update (last write wins).
pub fn plan_ingredients(
    current: &[(String, IngredientLink)],
    desired: &[IngredientSpec],
) -> Vec<IngredientOp> {
    let desired_names: HashSet<&str> = desired.iter().map(|d| d.name.as_str()).collect();

    let mut ops = Vec::new();
    for (name, _) in current {
        if !desired_names.contains(name.as_str()) {
            ops.push(IngredientOp::Delete { name: name.clone() });
        }
    }

    let mut linked: HashSet<&str> = current
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| desired_names.contains(name))
        .collect();
    for spec in desired {
        if linked.contains(spec.name.as_str()) {
            ops.push(IngredientOp::Update {
                name: spec.name.clone(),
                description: spec.description.clone(),
                optional: spec.optional,
            });
        } else {
            ops.push(IngredientOp::Create {
                name: spec.name.clone(),
                description: spec.description.clone().unwrap_or_default(),
                optional: spec.optional.unwrap_or(false),
            });
            linked.insert(spec.name.as_str());
        }
    }
    ops
}

/// Tag links carry no mutable attributes, so matches are left untouched:
/// deletions for stale names, creates for missing ones, duplicates collapse.
pub fn plan_tags(current: &[String], desired: &[String]) -> Vec<TagOp> {
    let desired_names: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut ops = Vec::new();
    for name in current {
        if !desired_names.contains(name.as_str()) {
            ops.push(TagOp::Delete { name: name.clone() });
        }
    }

    let mut linked: HashSet<&str> = current
        .iter()
        .map(String::as_str)
        .filter(|name| desired_names.contains(name))
        .collect();
    for name in desired {
        if linked.insert(name.as_str()) {
            ops.push(TagOp::Create { name: name.clone() });
        }
    }
    ops
}

pub fn apply_ingredient_ops(
    tx: &mut CatalogTx<'_>,
    recipe_id: Uuid,
    ops: &[IngredientOp],
) -> Result<(), ServiceError> {
    for op in ops {
        match op {
            IngredientOp::Delete { name } => {
                if let Some(item) = tx.item_by_name(name) {
                    tx.delete_ingredient_link(recipe_id, item.id);
                }
            }
            IngredientOp::Create {
                name,
                description,
                optional,
            } => {
                let item = resolve_item(tx, name)?;
                tx.upsert_ingredient_link(IngredientLink {
                    recipe_id,
                    item_id: item.id,
                    description: description.clone(),
                    optional: *optional,
                });
            }
            IngredientOp::Update {
                name,
                description,
                optional,
            } => {
                let item = resolve_item(tx, name)?;
                let mut link =
                    tx.ingredient_link(recipe_id, item.id)
                        .unwrap_or(IngredientLink {
                            recipe_id,
                            item_id: item.id,
                            description: String::new(),
                            optional: false,
                        });
                if let Some(description) = description {
                    link.description = description.clone();
                }
                if let Some(optional) = optional {
                    link.optional = *optional;
                }
                tx.upsert_ingredient_link(link);
            }
        }
    }
    Ok(())
}

pub fn apply_tag_ops(
    tx: &mut CatalogTx<'_>,
    recipe_id: Uuid,
    ops: &[TagOp],
) -> Result<(), ServiceError> {
    for op in ops {
        match op {
            TagOp::Delete { name } => {
                if let Some(tag) = tx.tag_by_name(name) {
                    tx.delete_tag_link(recipe_id, tag.id);
                }
            }
            TagOp::Create { name } => {
                let tag = resolve_tag(tx, name)?;
                tx.insert_tag_link(recipe_id, tag.id);
            }
        }
    }
    Ok(())
}

/// Make the recipe's ingredient links match `desired` exactly. Idempotent;
/// callers always pass the full target set, there is no separate add mode.
pub fn reconcile_ingredients(
    tx: &mut CatalogTx<'_>,
    recipe_id: Uuid,
    desired: &[IngredientSpec],
) -> Result<(), ServiceError> {
    let current = tx.ingredient_links_named(recipe_id);
    let ops = plan_ingredients(&current, desired);
    apply_ingredient_ops(tx, recipe_id, &ops)
}

pub fn reconcile_tags(
    tx: &mut CatalogTx<'_>,
    recipe_id: Uuid,
    desired: &[String],
) -> Result<(), ServiceError> {
    let current = tx.tag_names(recipe_id);
    let ops = plan_tags(&current, desired);
    apply_tag_ops(tx, recipe_id, &ops)
}

/// Map scraped fields into a draft plus the raw ingredient names. Each field
/// is extracted on its own; a missing title is the only fatal case.
pub fn normalize(
    scraper: &dyn PageScraper,
    url: &str,
) -> Result<(RecipeDraft, Vec<String>), ServiceError> {
    let name = scraper.title().map_err(|_| ServiceError::MissingName)?;

    let mut description = String::new();
    if let Ok(synopsis) = scraper.description() {
        description.push_str(&synopsis);
        description.push_str("\n\n");
    }
    if let Ok(instructions) = scraper.instructions() {
        description.push_str(&instructions);
    }

    let draft = RecipeDraft {
        name,
        description,
        time: scraper.total_time().ok(),
        cook_time: scraper.cook_time().ok(),
        prep_time: scraper.prep_time().ok(),
        yields: scraper.yields().ok().and_then(|text| leading_integer(&text)),
        source: url.to_string(),
        photo: scraper.image().ok(),
    };
    let ingredients = scraper.ingredients().unwrap_or_default();
    Ok((draft, ingredients))
}

fn leading_integer(text: &str) -> Option<i64> {
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn assign_scalars(recipe: &mut Recipe, patch: &RecipePatch) {
    if let Some(name) = &patch.name {
        recipe.name = name.clone();
    }
    if let Some(description) = &patch.description {
        recipe.description = description.clone();
    }
    if let Some(time) = patch.time {
        recipe.time = Some(time);
    }
    if let Some(cook_time) = patch.cook_time {
        recipe.cook_time = Some(cook_time);
    }
    if let Some(prep_time) = patch.prep_time {
        recipe.prep_time = Some(prep_time);
    }
    if let Some(yields) = patch.yields {
        recipe.yields = Some(yields);
    }
    if let Some(source) = &patch.source {
        recipe.source = Some(source.clone());
    }
}

/// Orchestrates recipe create/update/delete/import. Scalar assignment stays
/// here; association work is delegated to the reconciliation functions, all
/// inside one transaction per request.
pub struct RecipeService {
    catalog: Arc<Catalog>,
    media: MediaStore,
    fetcher: PageFetcher,
}

impl RecipeService {
    pub fn new(catalog: Arc<Catalog>, media: MediaStore, fetcher: PageFetcher) -> Self {
        Self {
            catalog,
            media,
            fetcher,
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let fetcher = PageFetcher::new(FetchConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        Ok(Self::new(
            Arc::new(Catalog::new()),
            MediaStore::new(config.media_dir.clone()),
            fetcher,
        ))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub async fn create(&self, patch: RecipePatch) -> Result<RecipeFull, ServiceError> {
        let Some(name) = patch.name.clone().filter(|n| !n.trim().is_empty()) else {
            return Err(ServiceError::MissingName);
        };
        let photo = match &patch.photo {
            Some(value) => self.store_photo(value).await?,
            None => None,
        };

        let mut recipe = Recipe::new(name);
        assign_scalars(&mut recipe, &patch);
        recipe.photo = photo;
        let id = recipe.id;

        let mut tx = self.catalog.begin().await;
        tx.save_recipe(recipe);
        if let Some(items) = &patch.items {
            reconcile_ingredients(&mut tx, id, items)?;
        }
        if let Some(tags) = &patch.tags {
            reconcile_tags(&mut tx, id, tags)?;
        }
        tx.commit();

        tracing::info!(recipe_id = %id, "created recipe");
        self.catalog
            .full_view(id)
            .await
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn update(&self, id: Uuid, patch: RecipePatch) -> Result<RecipeFull, ServiceError> {
        // fail fast before any photo download
        if self.catalog.recipe(id).await.is_none() {
            return Err(ServiceError::NotFound(id));
        }
        let photo = match &patch.photo {
            Some(value) => self.store_photo(value).await?,
            None => None,
        };

        let mut tx = self.catalog.begin().await;
        let mut recipe = tx.recipe(id).ok_or(ServiceError::NotFound(id))?;
        assign_scalars(&mut recipe, &patch);
        if patch.photo.is_some() {
            recipe.photo = photo;
        }
        recipe.updated_at = Utc::now();
        tx.save_recipe(recipe);
        if let Some(items) = &patch.items {
            reconcile_ingredients(&mut tx, id, items)?;
        }
        if let Some(tags) = &patch.tags {
            reconcile_tags(&mut tx, id, tags)?;
        }
        tx.commit();

        tracing::info!(recipe_id = %id, "updated recipe");
        self.catalog
            .full_view(id)
            .await
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let mut tx = self.catalog.begin().await;
        tx.delete_recipe(id)?;
        tx.commit();
        tracing::info!(recipe_id = %id, "deleted recipe");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<RecipeFull, ServiceError> {
        self.catalog
            .full_view(id)
            .await
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn list(&self) -> Vec<RecipeFull> {
        self.catalog.full_views().await
    }

    pub async fn search(&self, query: &str) -> Vec<Recipe> {
        self.catalog.search_recipes(query).await
    }

    pub async fn filter(&self, tags: &[String]) -> Vec<RecipeFull> {
        self.catalog.full_views_with_tags(tags).await
    }

    /// Fetch and normalize an external page. Nothing is persisted; the
    /// ingredient names come back raw for the caller to confirm.
    pub async fn import(&self, url: &str) -> Result<(RecipeDraft, Vec<String>), ServiceError> {
        let scraper = fetch_and_scrape(&self.fetcher, url).await?;
        normalize(&scraper, url)
    }

    /// Remote URLs are downloaded and stored under a fresh name; anything
    /// else is an already-stored reference and passes through.
    async fn store_photo(&self, value: &str) -> Result<Option<String>, ServiceError> {
        if !value.contains('/') {
            return Ok(Some(value.to_string()));
        }
        let page = self.fetcher.fetch(value).await.map_err(ScrapeError::Fetch)?;
        let content_type = page.content_type.clone().unwrap_or_default();
        match self.media.store_bytes(&content_type, &page.body).await {
            Ok(name) => Ok(Some(name)),
            Err(MediaError::UnsupportedType(ty)) => {
                tracing::warn!(url = value, content_type = %ty, "dropping photo with unsupported content type");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
