mod config;
mod distributor;
mod entity;
mod error;
mod geo_utils;
mod io;
mod map_matcher;
mod navigation;
mod overpass;
mod pipeline;
mod road_network;
mod store;
mod survey;
mod valhalla;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use futures::stream;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;

use config::PavemapConfig;
use error::SurveyError;
use map_matcher::MapMatcher;
use overpass::OverpassClient;
use pipeline::{ImportSummary, SurveyPipeline};
use road_network::RoadNetworkBuilder;
use store::DatabaseStore;
use valhalla::ValhallaClient;

#[derive(Parser, Debug)]
#[command(name = "pavemap", about = "Map-match road surveys and rebuild the road network")]
struct Cli {
    /// Overrides PAVEMAP_DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run pending database migrations
    Migrate,
    /// Import survey files, matching each onto the road network
    Import {
        files: Vec<PathBuf>,

        /// Surveys processed at the same time
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    /// Resolve ways by external id, fetching missing roads
    Ways { external_ids: Vec<i64> },
    /// Print stored roads grouped by name as JSON
    Roads,
    /// Print the longest branch starting at a stored way
    Branch { way_id: i32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let mut config = PavemapConfig::from_env()?;
    let cli = Cli::parse();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    info!("Starting pavemap");
    let db = Database::connect(&config.database_url)
        .await
        .context("connecting to the database")?;

    if let Commands::Migrate = cli.command {
        Migrator::up(&db, None).await?;
        info!("Migrations applied");
        return Ok(());
    }

    let store = Arc::new(DatabaseStore::new(db));
    let geometry = Arc::new(OverpassClient::new(&config.geometry)?);
    let network = Arc::new(RoadNetworkBuilder::new(
        store.clone(),
        geometry,
        config.geometry.request_timeout(),
    ));

    match cli.command {
        Commands::Migrate => {}
        Commands::Import { files, jobs } => {
            let matcher = MapMatcher::new(
                Arc::new(ValhallaClient::new(&config.matching)?),
                config.matching.request_timeout,
            );
            let pipeline = Arc::new(SurveyPipeline::new(matcher, network, store));
            import_files(pipeline, files, jobs).await?;
        }
        Commands::Ways { external_ids } => {
            let ways = network.get_or_create_ways(&external_ids).await?;
            println!("{}", serde_json::to_string_pretty(&ways)?);
        }
        Commands::Roads => {
            let roads = network.roads_grouped_by_name().await?;
            println!("{}", serde_json::to_string_pretty(&roads)?);
        }
        Commands::Branch { way_id } => {
            let branch = network.longest_branch(way_id).await?;
            println!("{}", serde_json::to_string_pretty(&branch)?);
        }
    }

    Ok(())
}

async fn import_files(pipeline: Arc<SurveyPipeline>, files: Vec<PathBuf>, jobs: usize) -> Result<()> {
    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?,
    );

    // One task per survey
    let results: Vec<(PathBuf, Result<ImportSummary>)> = stream::iter(files)
        .map(|path| {
            let pipeline = pipeline.clone();
            async move {
                let task_path = path.clone();
                let handle = tokio::spawn(async move {
                    let (survey, batch) = io::load_survey(&task_path).await?;
                    Ok::<_, anyhow::Error>(pipeline.import_survey(survey, batch).await?)
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(e.into()),
                };
                (path, result)
            }
        })
        .buffer_unordered(jobs.max(1))
        .inspect(|(path, _)| {
            progress.set_message(path.display().to_string());
            progress.inc(1);
        })
        .collect()
        .await;
    progress.finish_with_message("done");

    let mut total = ImportSummary::default();
    let mut failed = 0;
    let mut unmatched = 0;
    let mut retry = Vec::new();
    for (path, result) in results {
        match result {
            Ok(summary) => {
                if !summary.matched {
                    unmatched += 1;
                }
                total.measurements += summary.measurements;
                total.measurements_tagged += summary.measurements_tagged;
                total.images += summary.images;
                total.images_tagged += summary.images_tagged;
            }
            Err(e) => {
                let retryable = e
                    .downcast_ref::<SurveyError>()
                    .is_some_and(SurveyError::is_retryable);
                if retryable {
                    error!("Importing {} failed, retry later: {:#}", path.display(), e);
                    retry.push(path);
                } else {
                    error!("Importing {} failed: {:#}", path.display(), e);
                }
                failed += 1;
            }
        }
    }

    info!(
        "Imported surveys: {} failed, {} unmatched; measurements tagged {}/{}, images tagged {}/{}",
        failed,
        unmatched,
        total.measurements_tagged,
        total.measurements,
        total.images_tagged,
        total.images
    );
    if !retry.is_empty() {
        warn!(
            "{} surveys failed on a transient error and can be imported again: {}",
            retry.len(),
            retry
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
    Ok(())
}
