//! Scraping capability boundary: per-field accessors over noisy recipe pages.

use pantry_store::{FetchError, PageFetcher};
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "pantry-scrape";

/// Per-field extraction failure. Both variants mean "this field is absent
/// for this source"; neither is a request failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field not supported by this source")]
    Unsupported,
    #[error("field value unreadable: {0}")]
    Malformed(String),
}

pub type FieldResult<T> = Result<T, FieldError>;

/// Whole-scrape failure: the page could not be retrieved or carries no
/// recipe data at all.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no recipe data found at {0}")]
    Unparseable(String),
}

/// Optional accessors over a scraped page. Every accessor may signal
/// [`FieldError::Unsupported`] independently of the others; durations are
/// integer minutes as provided by the source.
pub trait PageScraper {
    fn title(&self) -> FieldResult<String>;
    fn total_time(&self) -> FieldResult<i64>;
    fn cook_time(&self) -> FieldResult<i64>;
    fn prep_time(&self) -> FieldResult<i64>;
    fn yields(&self) -> FieldResult<String>;
    fn description(&self) -> FieldResult<String>;
    fn instructions(&self) -> FieldResult<String>;
    fn image(&self) -> FieldResult<String>;
    fn ingredients(&self) -> FieldResult<Vec<String>>;
}

/// Scraper backed by the page's schema.org data: the first `Recipe` node in
/// any `application/ld+json` block (including `@graph` wrappers), with DOM
/// microdata and `<title>`/`og:image` fallbacks for pages without one.
#[derive(Debug, Clone)]
pub struct SchemaOrgScraper {
    recipe: Option<JsonValue>,
    page_title: Option<String>,
    og_image: Option<String>,
    dom_ingredients: Vec<String>,
    dom_instructions: Option<String>,
}

impl SchemaOrgScraper {
    /// Returns `None` only for pages with neither recipe data nor a title —
    /// the "completely unparseable" case.
    pub fn from_html(html: &str) -> Option<Self> {
        let document = Html::parse_document(html);

        let mut recipe = None;
        if let Ok(sel) = Selector::parse(r#"script[type="application/ld+json"]"#) {
            for script in document.select(&sel) {
                let raw = script.text().collect::<String>();
                let Ok(value) = serde_json::from_str::<JsonValue>(&raw) else {
                    continue;
                };
                if let Some(node) = find_recipe_node(&value) {
                    recipe = Some(node.clone());
                    break;
                }
            }
        }

        let page_title = select_first_text(&document, "title");
        let og_image = select_first_attr(&document, r#"meta[property="og:image"]"#, "content");
        let dom_ingredients = select_all_texts(&document, r#"[itemprop="recipeIngredient"]"#);
        let dom_instructions = {
            let steps = select_all_texts(&document, r#"[itemprop="recipeInstructions"]"#);
            if steps.is_empty() {
                None
            } else {
                Some(steps.join("\n"))
            }
        };

        if recipe.is_none() && page_title.is_none() {
            tracing::debug!("page carries no recipe data and no title");
            return None;
        }

        Some(Self {
            recipe,
            page_title,
            og_image,
            dom_ingredients,
            dom_instructions,
        })
    }

    fn recipe_field(&self, key: &str) -> Option<&JsonValue> {
        self.recipe.as_ref()?.get(key).filter(|v| !v.is_null())
    }

    fn recipe_str(&self, key: &str) -> Option<String> {
        self.recipe_field(key)
            .and_then(|v| v.as_str())
            .and_then(|s| text_or_none(s.to_string()))
    }

    fn duration_field(&self, key: &str) -> FieldResult<i64> {
        let value = self.recipe_field(key).ok_or(FieldError::Unsupported)?;
        duration_minutes(value)
            .ok_or_else(|| FieldError::Malformed(format!("unreadable duration in {key}")))
    }
}

impl PageScraper for SchemaOrgScraper {
    fn title(&self) -> FieldResult<String> {
        if let Some(name) = self.recipe_str("name") {
            return Ok(name);
        }
        self.page_title.clone().ok_or(FieldError::Unsupported)
    }

    fn total_time(&self) -> FieldResult<i64> {
        self.duration_field("totalTime")
    }

    fn cook_time(&self) -> FieldResult<i64> {
        self.duration_field("cookTime")
    }

    fn prep_time(&self) -> FieldResult<i64> {
        self.duration_field("prepTime")
    }

    fn yields(&self) -> FieldResult<String> {
        let value = self
            .recipe_field("recipeYield")
            .ok_or(FieldError::Unsupported)?;
        yield_text(value).ok_or_else(|| FieldError::Malformed("unreadable recipeYield".into()))
    }

    fn description(&self) -> FieldResult<String> {
        self.recipe_str("description").ok_or(FieldError::Unsupported)
    }

    fn instructions(&self) -> FieldResult<String> {
        if let Some(value) = self.recipe_field("recipeInstructions") {
            return instructions_text(value)
                .ok_or_else(|| FieldError::Malformed("unreadable recipeInstructions".into()));
        }
        self.dom_instructions.clone().ok_or(FieldError::Unsupported)
    }

    fn image(&self) -> FieldResult<String> {
        if let Some(value) = self.recipe_field("image") {
            if let Some(url) = image_ref(value) {
                return Ok(url);
            }
        }
        self.og_image.clone().ok_or(FieldError::Unsupported)
    }

    fn ingredients(&self) -> FieldResult<Vec<String>> {
        let node = self
            .recipe_field("recipeIngredient")
            .or_else(|| self.recipe_field("ingredients"));
        if let Some(value) = node {
            let list = string_list(value);
            if list.is_empty() {
                return Err(FieldError::Malformed("unreadable recipeIngredient".into()));
            }
            return Ok(list);
        }
        if !self.dom_ingredients.is_empty() {
            return Ok(self.dom_ingredients.clone());
        }
        Err(FieldError::Unsupported)
    }
}

/// Table-driven scraper for tests: each field is independently present or
/// unsupported.
#[derive(Debug, Clone, Default)]
pub struct FixtureScraper {
    pub title: Option<String>,
    pub total_time: Option<i64>,
    pub cook_time: Option<i64>,
    pub prep_time: Option<i64>,
    pub yields: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub image: Option<String>,
    pub ingredients: Option<Vec<String>>,
}

impl PageScraper for FixtureScraper {
    fn title(&self) -> FieldResult<String> {
        self.title.clone().ok_or(FieldError::Unsupported)
    }

    fn total_time(&self) -> FieldResult<i64> {
        self.total_time.ok_or(FieldError::Unsupported)
    }

    fn cook_time(&self) -> FieldResult<i64> {
        self.cook_time.ok_or(FieldError::Unsupported)
    }

    fn prep_time(&self) -> FieldResult<i64> {
        self.prep_time.ok_or(FieldError::Unsupported)
    }

    fn yields(&self) -> FieldResult<String> {
        self.yields.clone().ok_or(FieldError::Unsupported)
    }

    fn description(&self) -> FieldResult<String> {
        self.description.clone().ok_or(FieldError::Unsupported)
    }

    fn instructions(&self) -> FieldResult<String> {
        self.instructions.clone().ok_or(FieldError::Unsupported)
    }

    fn image(&self) -> FieldResult<String> {
        self.image.clone().ok_or(FieldError::Unsupported)
    }

    fn ingredients(&self) -> FieldResult<Vec<String>> {
        self.ingredients.clone().ok_or(FieldError::Unsupported)
    }
}

/// Fetch a page once and build a scraper over it. No retry loop here;
/// retries belong to the caller.
pub async fn fetch_and_scrape(
    fetcher: &PageFetcher,
    url: &str,
) -> Result<SchemaOrgScraper, ScrapeError> {
    let page = fetcher.fetch(url).await?;
    let html = String::from_utf8_lossy(&page.body);
    SchemaOrgScraper::from_html(&html).ok_or(ScrapeError::Unparseable(page.final_url))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn select_all_texts(document: &Html, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect()
}

fn find_recipe_node(value: &JsonValue) -> Option<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().find_map(find_recipe_node),
        JsonValue::Object(map) => {
            if type_is_recipe(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_recipe_node)
        }
        _ => None,
    }
}

fn type_is_recipe(ty: Option<&JsonValue>) -> bool {
    match ty {
        Some(JsonValue::String(s)) => s == "Recipe",
        Some(JsonValue::Array(items)) => items.iter().any(|v| v.as_str() == Some("Recipe")),
        _ => false,
    }
}

/// Duration value as integer minutes: a bare number, a numeric string, or
/// an ISO-8601 duration.
fn duration_minutes(value: &JsonValue) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let text = value.as_str()?.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(n);
    }
    parse_iso8601_minutes(text)
}

/// `PnDTnHnMnS` subset; year/month designators are rejected since they do
/// not occur in recipe durations. Sub-minute precision is dropped.
pub fn parse_iso8601_minutes(text: &str) -> Option<i64> {
    let rest = text.strip_prefix(['P', 'p'])?;
    let (date_part, time_part) = match rest.split_once(['T', 't']) {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut minutes = 0i64;
    let mut seen_designator = false;
    let mut num = String::new();

    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
            continue;
        }
        let value: i64 = num.parse().ok()?;
        num.clear();
        match ch.to_ascii_uppercase() {
            'D' => minutes += value * 24 * 60,
            'W' => minutes += value * 7 * 24 * 60,
            _ => return None,
        }
        seen_designator = true;
    }
    if !num.is_empty() {
        return None;
    }

    for ch in time_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            num.push(ch);
            continue;
        }
        let value: f64 = num.parse().ok()?;
        num.clear();
        match ch.to_ascii_uppercase() {
            'H' => minutes += (value * 60.0) as i64,
            'M' => minutes += value as i64,
            'S' => {}
            _ => return None,
        }
        seen_designator = true;
    }
    if !num.is_empty() {
        return None;
    }

    seen_designator.then_some(minutes)
}

fn yield_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => items.iter().find_map(yield_text),
        _ => None,
    }
}

fn instructions_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(instruction_part).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        JsonValue::Object(_) => instruction_part(value),
        _ => None,
    }
}

fn instruction_part(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                return text_or_none(text.to_string());
            }
            // HowToSection nests its steps one level down
            if let Some(items) = map.get("itemListElement") {
                return instructions_text(items);
            }
            map.get("name")
                .and_then(|v| v.as_str())
                .and_then(|s| text_or_none(s.to_string()))
        }
        _ => None,
    }
}

fn image_ref(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Array(items) => items.iter().find_map(image_ref),
        JsonValue::Object(map) => map
            .get("url")
            .and_then(|v| v.as_str())
            .and_then(|s| text_or_none(s.to_string())),
        _ => None,
    }
}

fn string_list(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()).into_iter().collect(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| text_or_none(s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}
