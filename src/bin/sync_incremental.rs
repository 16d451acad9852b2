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

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync new/updated Facebook posts, videos and ads since the last run"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Sync records from the last N days (overrides the auto-detected watermark)
    #[arg(long, conflicts_with = "hours_back")]
    days_back: Option<i64>,

    /// Sync records from the last N hours (overrides the auto-detected watermark)
    #[arg(long, conflicts_with = "days_back")]
    hours_back: Option<i64>,

    /// Disable the time filter and fetch everything
    #[arg(long)]
    all: bool,

    /// Safety buffer subtracted from the auto-detected watermark
    #[arg(long)]
    buffer_hours: Option<i64>,

    /// Skip per-post insight fetches (faster, no metrics)
    #[arg(long)]
    skip_insights: bool,

    /// Max promoted posts to resolve per run
    #[arg(long, default_value = "100")]
    promoted_limit: i64,

    /// Print detailed database statistics after the run
    #[arg(long)]
    show_stats: bool,
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

    let explicit_since = if let Some(days) = args.days_back {
        Some(Utc::now() - Duration::days(days))
    } else {
        args.hours_back.map(|hours| Utc::now() - Duration::hours(hours))
    };

    let mut watermark = WatermarkOptions {
        backfill: Duration::days(cfg.sync.backfill_days),
        buffer: Duration::hours(cfg.sync.buffer_hours),
    };
    if let Some(hours) = args.buffer_hours {
        watermark.buffer = Duration::hours(hours);
    }

    let opts = SyncOptions {
        explicit_since,
        fetch_all: args.all,
        watermark,
        skip_insights: args.skip_insights,
        promoted_post_limit: args.promoted_limit,
    };

    let media_store = MediaStore::new(&cfg.app.data_dir);
    let media = MediaQueue::spawn(media_store, pool.clone(), cfg.app.media_queue_capacity);

    let started = Utc::now();
    info!(since = ?opts.explicit_since, all = args.all, "starting incremental sync");

    // Accounts may be split across access tokens; each token gets its own
    // pass over the configured targets, as the platform scopes visibility
    // per token.
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

    info!(duration_secs = (Utc::now() - started).num_seconds(), "sync finished");

    if args.show_stats {
        print_detailed_stats(&pool).await?;
    }

    Ok(())
}

async fn print_detailed_stats(pool: &repo::Pool) -> Result<()> {
    let (total, with_promoted, recent) = repo::ad_overview(pool, Utc::now()).await?;
    println!("ads in database:        {}", total);
    println!("ads with promoted post: {}", with_promoted);
    println!("updated in last 24h:    {}", recent);
    println!("ads by status:");
    for (status, count) in repo::ads_by_status(pool).await? {
        println!("  {:<12} {}", status, count);
    }
    Ok(())
}
