use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use fb_adsync::classify::Classifier;
use fb_adsync::config;
use fb_adsync::db::repo;
use fb_adsync::graph::GraphClient;
use fb_adsync::media::{MediaQueue, MediaStore};
use fb_adsync::sync::{self, SyncContext, SyncOptions};
use fb_adsync::watermark::WatermarkOptions;

/// The deliberate wide-window path. Incremental runs keep their first-sync
/// window small to bound API cost; this binary is the explicit opt-in to a
/// deep fetch.
#[derive(Debug, Parser)]
#[command(author, version, about = "Full backfill over a wide time window")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// How far back to fetch
    #[arg(long, default_value = "365")]
    days_back: i64,

    /// Skip per-post insight fetches
    #[arg(long)]
    skip_insights: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/adsync.db", cfg.app.data_dir));

    let pool = repo::init_pool(&database_url).await?;
    repo::run_migrations(&pool).await?;

    let opts = SyncOptions {
        explicit_since: Some(Utc::now() - Duration::days(args.days_back)),
        fetch_all: false,
        watermark: WatermarkOptions::default(),
        skip_insights: args.skip_insights,
        promoted_post_limit: cfg.sync.promoted_post_limit,
    };

    let media_store = MediaStore::new(&cfg.app.data_dir);
    let media = MediaQueue::spawn(media_store, pool.clone(), cfg.app.media_queue_capacity);

    info!(days_back = args.days_back, "starting backfill");

    for (idx, token) in cfg.facebook.access_tokens.iter().enumerate() {
        info!(token = idx + 1, total = cfg.facebook.access_tokens.len(), "running with access token");
        let graph = GraphClient::from_config(&cfg.facebook, token)?;
        let ctx = SyncContext {
            pool: pool.clone(),
            graph: Arc::new(graph),
            classifier: Classifier::new(&cfg.classifier)?,
            media: Some(media.clone()),
            opts: opts.clone(),
        };
        let summary =
            sync::run_incremental(&ctx, &cfg.facebook.page_ids, &cfg.facebook.ad_account_ids)
                .await?;
        println!("{}", summary);
    }

    info!("backfill finished");
    Ok(())
}
