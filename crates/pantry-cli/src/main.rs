use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pantry_core::{IngredientSpec, RecipePatch};
use pantry_service::{AppConfig, RecipeService};
use pantry_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "pantry-cli")]
#[command(about = "Pantry recipe catalog command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API server.
    Serve,
    /// Fetch a recipe page and print the normalized draft.
    Import {
        #[arg(long)]
        url: String,
    },
    /// Load a couple of demo recipes and print their ids.
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let service =
        Arc::new(RecipeService::from_config(&config).context("building recipe service")?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            pantry_web::serve(AppState::new(service), config.port).await?;
        }
        Commands::Import { url } => {
            let (draft, items) = service.import(&url).await?;
            let out = serde_json::json!({ "recipe": draft, "items": items });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Seed => {
            let omelette = service
                .create(RecipePatch {
                    name: Some("Omelette".into()),
                    description: Some("Whisk, season, fry gently in butter.".into()),
                    time: Some(10),
                    items: Some(vec![
                        IngredientSpec {
                            name: "egg".into(),
                            description: Some("3 large".into()),
                            optional: Some(false),
                        },
                        IngredientSpec {
                            name: "butter".into(),
                            description: Some("a knob".into()),
                            optional: Some(true),
                        },
                    ]),
                    tags: Some(vec!["breakfast".into()]),
                    ..Default::default()
                })
                .await?;
            let stew = service
                .create(RecipePatch {
                    name: Some("Winter Stew".into()),
                    description: Some("Brown the meat, then simmer everything.".into()),
                    time: Some(150),
                    yields: Some(4),
                    items: Some(vec![
                        IngredientSpec {
                            name: "beef".into(),
                            description: Some("500g, cubed".into()),
                            optional: Some(false),
                        },
                        IngredientSpec {
                            name: "carrot".into(),
                            description: Some("3, chopped".into()),
                            optional: Some(false),
                        },
                    ]),
                    tags: Some(vec!["dinner".into()]),
                    ..Default::default()
                })
                .await?;
            println!(
                "seeded recipes: {} ({}), {} ({})",
                omelette.recipe.name, omelette.recipe.id, stew.recipe.name, stew.recipe.id
            );
        }
    }

    Ok(())
}
