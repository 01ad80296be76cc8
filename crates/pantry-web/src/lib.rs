//! Axum JSON API over the recipe service.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pantry_core::{Item, RecipeDraft, RecipeFull, RecipePatch, Tag};
use pantry_service::{RecipeService, ServiceError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CRATE_NAME: &str = "pantry-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecipeService>,
}

impl AppState {
    pub fn new(service: Arc<RecipeService>) -> Self {
        Self { service }
    }
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::MissingName => StatusCode::BAD_REQUEST,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Media(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: String,
    #[serde(default)]
    only_ids: bool,
}

#[derive(Debug, Deserialize)]
struct FilterRequest {
    filter: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    recipe: RecipeDraft,
    items: Vec<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/recipes", get(list_recipes).post(create_recipe))
        .route("/recipes/search", get(search_recipes))
        .route("/recipes/filter", post(filter_recipes))
        .route("/recipes/scrape", post(scrape_recipe))
        .route(
            "/recipes/{id}",
            get(get_recipe).post(update_recipe).delete(delete_recipe),
        )
        .route("/items", get(list_items))
        .route("/tags", get(list_tags))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "pantry web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn list_recipes(State(state): State<AppState>) -> Json<Vec<RecipeFull>> {
    Json(state.service.list().await)
}

async fn get_recipe(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<RecipeFull>, ApiError> {
    Ok(Json(state.service.get(id).await?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(patch): Json<RecipePatch>,
) -> Result<(StatusCode, Json<RecipeFull>), ApiError> {
    let view = state.service.create(patch).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_recipe(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(patch): Json<RecipePatch>,
) -> Result<Json<RecipeFull>, ApiError> {
    Ok(Json(state.service.update(id, patch).await?))
}

async fn delete_recipe(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.delete(id).await?;
    Ok(Json(serde_json::json!({ "msg": "DONE" })))
}

async fn search_recipes(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<serde_json::Value> {
    let hits = state.service.search(&query.query).await;
    if query.only_ids {
        let ids: Vec<Uuid> = hits.iter().map(|r| r.id).collect();
        Json(serde_json::json!(ids))
    } else {
        Json(serde_json::json!(hits))
    }
}

async fn filter_recipes(
    State(state): State<AppState>,
    Json(req): Json<FilterRequest>,
) -> Json<Vec<RecipeFull>> {
    Json(state.service.filter(&req.filter).await)
}

async fn scrape_recipe(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    let (recipe, items) = state.service.import(&req.url).await?;
    Ok(Json(ScrapeResponse { recipe, items }))
}

async fn list_items(State(state): State<AppState>) -> Json<Vec<Item>> {
    Json(state.service.catalog().list_items().await)
}

async fn list_tags(State(state): State<AppState>) -> Json<Vec<Tag>> {
    Json(state.service.catalog().list_tags().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pantry_store::{Catalog, FetchConfig, MediaStore, PageFetcher};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let service = RecipeService::new(
            Arc::new(Catalog::new()),
            MediaStore::new(std::env::temp_dir().join("pantry-web-tests")),
            PageFetcher::new(FetchConfig::default()).expect("fetcher"),
        );
        app(AppState::new(Arc::new(service)))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(value) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .expect("request"),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        };
        let resp = app.clone().oneshot(request).await.expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    #[tokio::test]
    async fn create_then_get_round_trips_the_full_view() {
        let app = test_app();
        let (status, created) = send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({
                "name": "Omelette",
                "description": "whisk and fry",
                "items": [{"name": "egg", "description": "2 large", "optional": false}],
                "tags": ["breakfast"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "Omelette");
        assert_eq!(created["items"][0]["name"], "egg");
        assert_eq!(created["tags"][0], "breakfast");

        let id = created["id"].as_str().expect("id").to_string();
        let (status, fetched) = send(&app, "GET", &format!("/recipes/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn unknown_recipe_is_404_and_bad_create_is_400() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "GET",
            &format!("/recipes/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"description": "nameless"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_reconciles_the_ingredient_list() {
        let app = test_app();
        let (_, created) = send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({
                "name": "Omelette",
                "items": [
                    {"name": "egg", "description": "2 large", "optional": false},
                    {"name": "milk", "description": "1 cup", "optional": false},
                ],
            })),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, updated) = send(
            &app,
            "POST",
            &format!("/recipes/{id}"),
            Some(serde_json::json!({
                "items": [{"name": "egg", "description": "3 large", "optional": false}],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = updated["items"].as_array().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["description"], "3 large");

        // the milk item is still in the shared catalog
        let (_, items) = send(&app, "GET", "/items", None).await;
        let names: Vec<&str> = items
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|i| i["name"].as_str())
            .collect();
        assert_eq!(names, vec!["egg", "milk"]);
    }

    #[tokio::test]
    async fn delete_reports_done_then_404s() {
        let app = test_app();
        let (_, created) = send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"name": "Toast"})),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, body) = send(&app, "DELETE", &format!("/recipes/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg"], "DONE");

        let (status, _) = send(&app, "GET", &format!("/recipes/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_supports_the_only_ids_variant() {
        let app = test_app();
        let (_, created) = send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"name": "Tomato Soup"})),
        )
        .await;
        send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"name": "Salad"})),
        )
        .await;

        let (status, hits) = send(&app, "GET", "/recipes/search?query=soup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits.as_array().expect("array").len(), 1);
        assert_eq!(hits[0]["name"], "Tomato Soup");

        let (_, ids) = send(
            &app,
            "GET",
            "/recipes/search?query=soup&only_ids=true",
            None,
        )
        .await;
        assert_eq!(ids, serde_json::json!([created["id"]]));
    }

    #[tokio::test]
    async fn filter_returns_recipes_with_any_listed_tag() {
        let app = test_app();
        send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"name": "Omelette", "tags": ["breakfast"]})),
        )
        .await;
        send(
            &app,
            "POST",
            "/recipes",
            Some(serde_json::json!({"name": "Stew", "tags": ["dinner"]})),
        )
        .await;

        let (status, views) = send(
            &app,
            "POST",
            "/recipes/filter",
            Some(serde_json::json!({"filter": ["breakfast"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let views = views.as_array().expect("array");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0]["name"], "Omelette");
    }
}
