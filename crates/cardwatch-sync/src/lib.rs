//! Ingestion, merge and result-window scheduling for fight cards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cardwatch_adapters::{CommandExtractor, ExtractScope, Extractor, JsonlFileExtractor};
use cardwatch_storage::{HttpClientConfig, HttpImageFetcher, LocalAssetStore, PgStore};
use chrono::Utc;

pub mod assets;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod enrich;
pub mod merge;
pub mod normalize;
pub mod resolve;
pub mod run;
pub mod scheduler;
pub mod window;

pub use assets::{absolutize_image_url, AssetPipeline};
pub use classify::{Classification, Classifier};
pub use config::{IngestRules, SyncConfig, WindowTable};
pub use dedup::SeenIds;
pub use enrich::{join_known_images, Applied, Enricher};
pub use merge::Merger;
pub use resolve::{BackreferenceResolver, Resolution};
pub use run::{ingest, IngestContext, IngestionRun, RunReport, RunStats};
pub use scheduler::{maybe_build_scheduler, TickSummary, WindowScheduler};
pub use window::{
    due_window, event_start_instant, resolve_start_instant, window_state, windows_for, Window,
    WindowError, WindowState,
};

pub const CRATE_NAME: &str = "cardwatch-sync";

pub async fn connect_store(config: &SyncConfig) -> Result<PgStore> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL is not set");
    };
    PgStore::connect(url).await
}

/// A JSONL file when given, otherwise the configured scraper command.
pub fn build_extractor(config: &SyncConfig, file: Option<&Path>) -> Result<Arc<dyn Extractor>> {
    if let Some(path) = file {
        return Ok(Arc::new(JsonlFileExtractor::new(path)));
    }
    let Some(program) = config.extract_program.as_deref() else {
        bail!("no input file given and CARDWATCH_EXTRACT_PROGRAM is not set");
    };
    Ok(Arc::new(CommandExtractor::new(
        program,
        config.extract_discovery_args.clone(),
        config.extract_event_args.clone(),
        config.workspace_root.join("scratch"),
    )))
}

pub fn build_asset_pipeline(config: &SyncConfig, rules: &IngestRules) -> Result<AssetPipeline> {
    let fetcher = HttpImageFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        referer: config.image_referer.clone(),
        ..Default::default()
    })?;
    Ok(AssetPipeline::new(
        Arc::new(fetcher),
        Arc::new(LocalAssetStore::new(config.assets_dir.clone())),
        rules.image_base_url.clone(),
    ))
}

/// Store, rules and asset pipeline for the configured workspace.
pub async fn context_from_config(config: &SyncConfig) -> Result<IngestContext> {
    let rules = IngestRules::from_workspace_root(&config.workspace_root)?;
    let assets = build_asset_pipeline(config, &rules)?;
    let store = connect_store(config).await?;
    Ok(IngestContext::new(Arc::new(store), rules).with_assets(assets))
}

/// Discovery ingest; the report is written under `reports/<run_id>/`.
pub async fn run_ingest_from_env(file: Option<PathBuf>) -> Result<(RunReport, PathBuf)> {
    let config = SyncConfig::from_env();
    let ctx = context_from_config(&config).await?;
    let extractor = build_extractor(&config, file.as_deref())?;

    let extraction = extractor
        .extract(ExtractScope::Discovery)
        .await
        .with_context(|| format!("running extractor {}", extractor.name()))?;
    let report = ingest(&ctx, ExtractScope::Discovery, extraction).await;
    let dir = report.write_to(&config.reports_root()).await?;
    Ok((report, dir))
}

pub async fn scheduler_from_env(file: Option<PathBuf>) -> Result<(SyncConfig, Arc<WindowScheduler>)> {
    let config = SyncConfig::from_env();
    let ctx = context_from_config(&config).await?;
    let extractor = build_extractor(&config, file.as_deref())?;
    Ok((config, Arc::new(WindowScheduler::new(ctx, extractor))))
}

pub async fn tick_once_from_env(file: Option<PathBuf>) -> Result<TickSummary> {
    let (_, scheduler) = scheduler_from_env(file).await?;
    scheduler.tick(Utc::now()).await
}
