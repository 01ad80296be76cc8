//! Catalog repository, photo media store and HTTP fetch utilities.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use pantry_core::{IngredientLink, IngredientRow, Item, Recipe, RecipeFull, Tag, TagLink};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pantry-store";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation. Callers treat this as "someone else just
    /// created it" and re-read once.
    #[error("{kind} {name:?} already exists")]
    Conflict { kind: &'static str, name: String },
    #[error("recipe {0} not found")]
    RecipeNotFound(Uuid),
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    recipes: BTreeMap<Uuid, Recipe>,
    items: BTreeMap<Uuid, Item>,
    tags: BTreeMap<Uuid, Tag>,
    ingredient_links: BTreeMap<(Uuid, Uuid), IngredientLink>,
    tag_links: BTreeMap<(Uuid, Uuid), TagLink>,
}

impl CatalogState {
    fn full_view(&self, recipe: &Recipe) -> RecipeFull {
        let mut items: Vec<IngredientRow> = self
            .ingredient_links
            .values()
            .filter(|link| link.recipe_id == recipe.id)
            .filter_map(|link| {
                self.items.get(&link.item_id).map(|item| IngredientRow {
                    name: item.name.clone(),
                    description: link.description.clone(),
                    optional: link.optional,
                })
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));

        let mut tags: Vec<String> = self
            .tag_links
            .values()
            .filter(|link| link.recipe_id == recipe.id)
            .filter_map(|link| self.tags.get(&link.tag_id).map(|t| t.name.clone()))
            .collect();
        tags.sort();

        RecipeFull {
            recipe: recipe.clone(),
            items,
            tags,
        }
    }

    fn recipes_by_name(&self) -> Vec<Recipe> {
        let mut recipes: Vec<Recipe> = self.recipes.values().cloned().collect();
        recipes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        recipes
    }
}

/// In-memory keyed repository for the recipe aggregate. All mutation goes
/// through a [`CatalogTx`] so a failed sequence rolls back as one unit.
#[derive(Debug, Default)]
pub struct Catalog {
    state: Mutex<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction scope. The returned guard holds the catalog lock;
    /// dropping it without [`CatalogTx::commit`] restores the state captured
    /// at `begin`, on every exit path.
    pub async fn begin(&self) -> CatalogTx<'_> {
        let guard = self.state.lock().await;
        let snapshot = guard.clone();
        CatalogTx {
            guard,
            snapshot: Some(snapshot),
        }
    }

    pub async fn recipe(&self, id: Uuid) -> Option<Recipe> {
        self.state.lock().await.recipes.get(&id).cloned()
    }

    pub async fn list_recipes(&self) -> Vec<Recipe> {
        self.state.lock().await.recipes_by_name()
    }

    /// Case-insensitive substring search on recipe name, sorted by name.
    pub async fn search_recipes(&self, query: &str) -> Vec<Recipe> {
        let needle = query.to_lowercase();
        self.state
            .lock()
            .await
            .recipes_by_name()
            .into_iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub async fn list_items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.state.lock().await.items.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub async fn list_tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.state.lock().await.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub async fn full_view(&self, id: Uuid) -> Option<RecipeFull> {
        let state = self.state.lock().await;
        state.recipes.get(&id).map(|r| state.full_view(r))
    }

    pub async fn full_views(&self) -> Vec<RecipeFull> {
        let state = self.state.lock().await;
        state
            .recipes_by_name()
            .iter()
            .map(|r| state.full_view(r))
            .collect()
    }

    /// Full views of recipes carrying at least one of the given tag names.
    pub async fn full_views_with_tags(&self, filter: &[String]) -> Vec<RecipeFull> {
        let state = self.state.lock().await;
        state
            .recipes_by_name()
            .iter()
            .map(|r| state.full_view(r))
            .filter(|view| view.tags.iter().any(|t| filter.contains(t)))
            .collect()
    }
}

/// A scoped unit of catalog work. Holds the lock for its lifetime; commit
/// publishes, drop without commit rolls back to the `begin` snapshot.
pub struct CatalogTx<'a> {
    guard: MutexGuard<'a, CatalogState>,
    snapshot: Option<CatalogState>,
}

impl CatalogTx<'_> {
    pub fn commit(mut self) {
        self.snapshot = None;
    }

    pub fn save_recipe(&mut self, recipe: Recipe) {
        self.guard.recipes.insert(recipe.id, recipe);
    }

    pub fn recipe(&self, id: Uuid) -> Option<Recipe> {
        self.guard.recipes.get(&id).cloned()
    }

    /// Delete a recipe and cascade to its links. Items and tags survive.
    pub fn delete_recipe(&mut self, id: Uuid) -> Result<(), StoreError> {
        if self.guard.recipes.remove(&id).is_none() {
            return Err(StoreError::RecipeNotFound(id));
        }
        self.guard.ingredient_links.retain(|(r, _), _| *r != id);
        self.guard.tag_links.retain(|(r, _), _| *r != id);
        Ok(())
    }

    /// Insert a new item; the (kind, name) uniqueness constraint makes a
    /// duplicate name a [`StoreError::Conflict`].
    pub fn insert_item(&mut self, name: &str) -> Result<Item, StoreError> {
        if self.guard.items.values().any(|i| i.name == name) {
            return Err(StoreError::Conflict {
                kind: "item",
                name: name.to_string(),
            });
        }
        let item = Item::new(name);
        self.guard.items.insert(item.id, item.clone());
        Ok(item)
    }

    pub fn item(&self, id: Uuid) -> Option<Item> {
        self.guard.items.get(&id).cloned()
    }

    pub fn item_by_name(&self, name: &str) -> Option<Item> {
        self.guard.items.values().find(|i| i.name == name).cloned()
    }

    pub fn insert_tag(&mut self, name: &str) -> Result<Tag, StoreError> {
        if self.guard.tags.values().any(|t| t.name == name) {
            return Err(StoreError::Conflict {
                kind: "tag",
                name: name.to_string(),
            });
        }
        let tag = Tag::new(name);
        self.guard.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<Tag> {
        self.guard.tags.values().find(|t| t.name == name).cloned()
    }

    /// Ingredient links of a recipe, each paired with its item's name.
    pub fn ingredient_links_named(&self, recipe_id: Uuid) -> Vec<(String, IngredientLink)> {
        self.guard
            .ingredient_links
            .values()
            .filter(|link| link.recipe_id == recipe_id)
            .filter_map(|link| {
                self.guard
                    .items
                    .get(&link.item_id)
                    .map(|item| (item.name.clone(), link.clone()))
            })
            .collect()
    }

    pub fn ingredient_link(&self, recipe_id: Uuid, item_id: Uuid) -> Option<IngredientLink> {
        self.guard
            .ingredient_links
            .get(&(recipe_id, item_id))
            .cloned()
    }

    pub fn upsert_ingredient_link(&mut self, link: IngredientLink) {
        self.guard
            .ingredient_links
            .insert((link.recipe_id, link.item_id), link);
    }

    pub fn delete_ingredient_link(&mut self, recipe_id: Uuid, item_id: Uuid) {
        self.guard.ingredient_links.remove(&(recipe_id, item_id));
    }

    /// Tag names currently linked to a recipe.
    pub fn tag_names(&self, recipe_id: Uuid) -> Vec<String> {
        self.guard
            .tag_links
            .values()
            .filter(|link| link.recipe_id == recipe_id)
            .filter_map(|link| self.guard.tags.get(&link.tag_id).map(|t| t.name.clone()))
            .collect()
    }

    pub fn insert_tag_link(&mut self, recipe_id: Uuid, tag_id: Uuid) {
        self.guard
            .tag_links
            .insert((recipe_id, tag_id), TagLink { recipe_id, tag_id });
    }

    pub fn delete_tag_link(&mut self, recipe_id: Uuid, tag_id: Uuid) {
        self.guard.tag_links.remove(&(recipe_id, tag_id));
    }
}

impl Drop for CatalogTx<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unsupported media content type {0:?}")]
    UnsupportedType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stored-photo blob store. Files are keyed by a fresh uuid plus an
/// extension derived from the content type; writes are atomic via a
/// temp-file rename.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension_for(content_type: &str) -> Option<&'static str> {
        match content_type.split(';').next().unwrap_or("").trim() {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/gif" => Some("gif"),
            "image/webp" => Some("webp"),
            _ => None,
        }
    }

    /// Store bytes and return the stored file name.
    pub async fn store_bytes(
        &self,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, MediaError> {
        let ext = Self::extension_for(content_type)
            .ok_or_else(|| MediaError::UnsupportedType(content_type.to_string()))?;
        let file_name = format!("{}.{ext}", Uuid::new_v4());
        let final_path = self.root.join(&file_name);

        fs::create_dir_all(&self.root).await?;

        let temp_path = self.root.join(format!(".{file_name}.tmp"));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &final_path).await {
            Ok(()) => Ok(file_name),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err.into())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// One-shot page fetcher. A single attempt per call; retries, if desired,
/// belong to the caller.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        tracing::debug!(url, "fetching page");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedPage {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn committed_tx_publishes_and_dropped_tx_rolls_back() {
        let catalog = Catalog::new();

        let kept = Recipe::new("Soup");
        let mut tx = catalog.begin().await;
        tx.save_recipe(kept.clone());
        tx.commit();

        let discarded = Recipe::new("Stew");
        {
            let mut tx = catalog.begin().await;
            tx.save_recipe(discarded.clone());
            tx.delete_recipe(kept.id).unwrap();
            // dropped without commit
        }

        assert!(catalog.recipe(kept.id).await.is_some());
        assert!(catalog.recipe(discarded.id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_item_name_is_a_conflict() {
        let catalog = Catalog::new();
        let mut tx = catalog.begin().await;
        tx.insert_item("kale").unwrap();
        let err = tx.insert_item("kale").unwrap_err();
        assert!(matches!(err, StoreError::Conflict { kind: "item", .. }));
        // exact match is case-sensitive
        tx.insert_item("Kale").unwrap();
        tx.commit();
        assert_eq!(catalog.list_items().await.len(), 2);
    }

    #[tokio::test]
    async fn deleting_a_recipe_cascades_links_but_keeps_entities() {
        let catalog = Catalog::new();
        let recipe = Recipe::new("Omelette");
        let mut tx = catalog.begin().await;
        tx.save_recipe(recipe.clone());
        let egg = tx.insert_item("egg").unwrap();
        let tag = tx.insert_tag("breakfast").unwrap();
        tx.upsert_ingredient_link(IngredientLink {
            recipe_id: recipe.id,
            item_id: egg.id,
            description: "2 large".into(),
            optional: false,
        });
        tx.insert_tag_link(recipe.id, tag.id);
        tx.commit();

        let mut tx = catalog.begin().await;
        tx.delete_recipe(recipe.id).unwrap();
        assert!(tx.ingredient_links_named(recipe.id).is_empty());
        assert!(tx.tag_names(recipe.id).is_empty());
        tx.commit();

        assert_eq!(catalog.list_items().await.len(), 1);
        assert_eq!(catalog.list_tags().await.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_missing_recipe_is_not_found() {
        let catalog = Catalog::new();
        let mut tx = catalog.begin().await;
        let err = tx.delete_recipe(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::RecipeNotFound(_)));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_sorted() {
        let catalog = Catalog::new();
        let mut tx = catalog.begin().await;
        tx.save_recipe(Recipe::new("Tomato Soup"));
        tx.save_recipe(Recipe::new("Green Soup"));
        tx.save_recipe(Recipe::new("Salad"));
        tx.commit();

        let hits = catalog.search_recipes("soup").await;
        let names: Vec<&str> = hits.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Green Soup", "Tomato Soup"]);
    }

    #[tokio::test]
    async fn tag_filter_matches_any_listed_tag() {
        let catalog = Catalog::new();
        let breakfast = Recipe::new("Omelette");
        let dinner = Recipe::new("Stew");
        let mut tx = catalog.begin().await;
        tx.save_recipe(breakfast.clone());
        tx.save_recipe(dinner.clone());
        let tag = tx.insert_tag("breakfast").unwrap();
        tx.insert_tag_link(breakfast.id, tag.id);
        tx.commit();

        let views = catalog
            .full_views_with_tags(&["breakfast".to_string(), "vegan".to_string()])
            .await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].recipe.id, breakfast.id);
    }

    #[tokio::test]
    async fn media_store_writes_by_content_type() {
        let dir = tempdir().expect("tempdir");
        let store = MediaStore::new(dir.path());

        let name = store
            .store_bytes("image/png", b"not-really-a-png")
            .await
            .expect("store");
        assert!(name.ends_with(".png"));
        assert!(dir.path().join(&name).exists());

        let err = store
            .store_bytes("text/html; charset=utf-8", b"<html>")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedType(_)));
    }

    #[test]
    fn extension_mapping_ignores_charset_suffix() {
        assert_eq!(MediaStore::extension_for("image/jpeg; q=1"), Some("jpg"));
        assert_eq!(MediaStore::extension_for("application/json"), None);
    }
}
