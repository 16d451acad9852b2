//! The incremental sync engine.
//!
//! One `SyncContext` is built per run and passed explicitly to every pass —
//! storage handle, remote client, classifier and the optional media queue
//! all live here, never in globals. Passes run sequentially: page content,
//! the paid tree, lazily-resolved promoted posts, then the cross-reference
//! batch pass. Every record is its own atomic unit; a bad record is counted
//! and skipped, and the run always ends with a summary.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::classify::{kind_for_post, AttachmentSource, Classification, Classifier};
use crate::db::model::{NewAd, NewAdSet, NewCampaign, NewContent};
use crate::db::repo::{self, Pool};
use crate::graph::model::{
    parse_graph_time_opt, AdRecord, AdSetRecord, CampaignRecord, PostRecord, VideoRecord,
};
use crate::graph::GraphService;
use crate::media::{MediaJob, MediaQueue};
use crate::model::{ContentKind, InsightRecord, SyncOwner};
use crate::stats::{EntityKind, RunSummary, SyncStats};
use crate::watermark::{resolve_watermark, WatermarkOptions};
use crate::xref;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Explicit fetch-from boundary (`--days-back`/`--hours-back`).
    pub explicit_since: Option<DateTime<Utc>>,
    /// Disable the time filter entirely (`--all`).
    pub fetch_all: bool,
    pub watermark: WatermarkOptions,
    pub skip_insights: bool,
    pub promoted_post_limit: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            explicit_since: None,
            fetch_all: false,
            watermark: WatermarkOptions::default(),
            skip_insights: false,
            promoted_post_limit: 100,
        }
    }
}

/// Everything one sync run needs, constructed once and passed by reference.
pub struct SyncContext {
    pub pool: Pool,
    pub graph: Arc<dyn GraphService>,
    pub classifier: Classifier,
    pub media: Option<MediaQueue>,
    pub opts: SyncOptions,
}

/// Adapter exposing the Graph client's attachment listing to the classifier.
struct GraphAttachments<'a>(&'a dyn GraphService);

#[async_trait]
impl AttachmentSource for GraphAttachments<'_> {
    async fn attachment_types(&self, post_id: &str) -> Result<Vec<String>> {
        let attachments = self.0.fetch_post_attachments(post_id).await?;
        Ok(attachments.into_iter().filter_map(|a| a.kind).collect())
    }
}

/// One retry for transient storage failures; the second error is final for
/// that record.
async fn retry_once<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(err) => {
            warn!(?err, "storage write failed; retrying once");
            op().await
        }
    }
}

fn require_id(id: Option<&str>, what: &str) -> Result<String> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
        _ => Err(anyhow!("{} record missing id", what)),
    }
}

/// Fetch boundary for one owner: `--all` disables the filter, an explicit
/// `--days-back`/`--hours-back` boundary wins, otherwise the watermark.
async fn boundary_for(ctx: &SyncContext, owner: &SyncOwner) -> Result<Option<DateTime<Utc>>> {
    if ctx.opts.fetch_all {
        return Ok(None);
    }
    let since =
        resolve_watermark(&ctx.pool, owner, ctx.opts.explicit_since, &ctx.opts.watermark).await?;
    Ok(Some(since))
}

/// Sync feed posts for one page.
#[instrument(skip_all, fields(page_id))]
pub async fn sync_posts(ctx: &SyncContext, stats: &mut SyncStats, page_id: &str) -> Result<()> {
    let owner = SyncOwner::Page(page_id.to_string());
    let since = boundary_for(ctx, &owner).await?;
    let posts = ctx.graph.fetch_posts(page_id, since).await?;
    stats.fetched(EntityKind::Post, posts.len() as u64);
    info!(page_id, count = posts.len(), "fetched feed posts");

    for post in &posts {
        if let Err(err) = process_post(ctx, stats, page_id, post, EntityKind::Post).await {
            warn!(?err, post_id = ?post.id, "failed to sync post");
            stats.error(EntityKind::Post);
        }
    }
    Ok(())
}

async fn process_post(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    page_id: &str,
    post: &PostRecord,
    kind_counter: EntityKind,
) -> Result<()> {
    let content_id = require_id(post.id.as_deref(), "post")?;
    let texts = [post.message.as_deref(), post.story.as_deref()];

    let attachments = GraphAttachments(ctx.graph.as_ref());
    let classification = match ctx
        .classifier
        .classify(&content_id, post.permalink_url.as_deref(), &texts, &attachments)
        .await
    {
        Ok(c) => c,
        Err(err) => {
            // The static layers already missed; an unreachable attachment
            // list downgrades to not-video rather than losing the record.
            warn!(?err, content_id, "attachment inspection failed");
            Classification {
                is_video: false,
                reason: "attachment inspection unavailable".into(),
            }
        }
    };
    if classification.is_video {
        info!(content_id, reason = %classification.reason, "classified as video");
    }

    let kind = kind_for_post(
        classification.is_video,
        post.permalink_url.as_deref(),
        post.full_picture.as_deref(),
        &texts,
    );

    let row = NewContent {
        content_id: content_id.clone(),
        page_id: Some(page_id.to_string()),
        message: post.message.clone(),
        story: post.story.clone(),
        permalink_url: post.permalink_url.clone(),
        kind,
        thumbnail_url: post.full_picture.clone(),
        local_thumbnail_id: None,
        video_length: None,
        platform_created_at: parse_graph_time_opt(post.created_time.as_deref()),
    };
    let outcome = retry_once(|| repo::upsert_content(&ctx.pool, &row, Utc::now())).await?;
    stats.record(kind_counter, outcome);

    enqueue_thumbnail(ctx, &content_id, post.full_picture.as_deref());

    if !ctx.opts.skip_insights {
        sync_post_insights(ctx, stats, &content_id).await;
    }
    Ok(())
}

/// Sync the video catalog for one page. Catalog entries are videos by
/// definition; the permalink only decides video vs reel.
#[instrument(skip_all, fields(page_id))]
pub async fn sync_videos(ctx: &SyncContext, stats: &mut SyncStats, page_id: &str) -> Result<()> {
    let owner = SyncOwner::Page(page_id.to_string());
    let since = boundary_for(ctx, &owner).await?;
    let videos = ctx.graph.fetch_videos(page_id, since).await?;
    stats.fetched(EntityKind::Video, videos.len() as u64);
    info!(page_id, count = videos.len(), "fetched videos");

    for video in &videos {
        if let Err(err) = process_video(ctx, stats, page_id, video).await {
            warn!(?err, video_id = ?video.id, "failed to sync video");
            stats.error(EntityKind::Video);
        }
    }
    Ok(())
}

async fn process_video(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    page_id: &str,
    video: &VideoRecord,
) -> Result<()> {
    let content_id = require_id(video.id.as_deref(), "video")?;
    let is_reel = video
        .permalink_url
        .as_deref()
        .map(|p| p.to_lowercase().contains("/reel"))
        .unwrap_or(false);

    let row = NewContent {
        content_id: content_id.clone(),
        page_id: Some(page_id.to_string()),
        message: video.title.clone(),
        story: video.description.clone(),
        permalink_url: video.permalink_url.clone(),
        kind: if is_reel {
            ContentKind::Reel
        } else {
            ContentKind::Video
        },
        thumbnail_url: video.picture.clone(),
        local_thumbnail_id: None,
        video_length: video.length,
        platform_created_at: parse_graph_time_opt(video.created_time.as_deref()),
    };
    let outcome = retry_once(|| repo::upsert_content(&ctx.pool, &row, Utc::now())).await?;
    stats.record(EntityKind::Video, outcome);

    enqueue_thumbnail(ctx, &content_id, video.picture.as_deref());
    Ok(())
}

#[instrument(skip_all, fields(account_id))]
pub async fn sync_campaigns(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    account_id: &str,
) -> Result<()> {
    let campaigns = ctx.graph.fetch_campaigns(account_id).await?;
    stats.fetched(EntityKind::Campaign, campaigns.len() as u64);

    for campaign in &campaigns {
        if let Err(err) = process_campaign(ctx, stats, account_id, campaign).await {
            warn!(?err, campaign_id = ?campaign.id, "failed to sync campaign");
            stats.error(EntityKind::Campaign);
        }
    }
    Ok(())
}

async fn process_campaign(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    account_id: &str,
    campaign: &CampaignRecord,
) -> Result<()> {
    let campaign_id = require_id(campaign.id.as_deref(), "campaign")?;
    let row = NewCampaign {
        campaign_id,
        account_id: account_id.to_string(),
        name: campaign.name.clone(),
        status: campaign.status.clone(),
        objective: campaign.objective.clone(),
        daily_budget: campaign.daily_budget.clone(),
        lifetime_budget: campaign.lifetime_budget.clone(),
        created_time: parse_graph_time_opt(campaign.created_time.as_deref()),
        updated_time: parse_graph_time_opt(campaign.updated_time.as_deref()),
    };
    let outcome = retry_once(|| repo::upsert_campaign(&ctx.pool, &row, Utc::now())).await?;
    stats.record(EntityKind::Campaign, outcome);
    Ok(())
}

#[instrument(skip_all, fields(account_id))]
pub async fn sync_adsets(ctx: &SyncContext, stats: &mut SyncStats, account_id: &str) -> Result<()> {
    let adsets = ctx.graph.fetch_adsets(account_id).await?;
    stats.fetched(EntityKind::AdSet, adsets.len() as u64);

    for adset in &adsets {
        if let Err(err) = process_adset(ctx, stats, account_id, adset).await {
            warn!(?err, adset_id = ?adset.id, "failed to sync adset");
            stats.error(EntityKind::AdSet);
        }
    }
    Ok(())
}

async fn process_adset(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    account_id: &str,
    adset: &AdSetRecord,
) -> Result<()> {
    let adset_id = require_id(adset.id.as_deref(), "adset")?;
    let row = NewAdSet {
        adset_id,
        campaign_id: adset.campaign_id.clone(),
        account_id: account_id.to_string(),
        name: adset.name.clone(),
        status: adset.status.clone(),
        daily_budget: adset.daily_budget.clone(),
        lifetime_budget: adset.lifetime_budget.clone(),
        created_time: parse_graph_time_opt(adset.created_time.as_deref()),
        updated_time: parse_graph_time_opt(adset.updated_time.as_deref()),
    };
    let outcome = retry_once(|| repo::upsert_adset(&ctx.pool, &row, Utc::now())).await?;
    stats.record(EntityKind::AdSet, outcome);
    Ok(())
}

/// Sync the ads of one account, incrementally via the `updated_time` filter.
#[instrument(skip_all, fields(account_id))]
pub async fn sync_ads(ctx: &SyncContext, stats: &mut SyncStats, account_id: &str) -> Result<()> {
    let owner = SyncOwner::Account(account_id.to_string());
    let since = boundary_for(ctx, &owner).await?;
    let ads = ctx.graph.fetch_ads(account_id, since).await?;
    stats.fetched(EntityKind::Ad, ads.len() as u64);
    info!(account_id, count = ads.len(), "fetched ads");

    for ad in &ads {
        if let Err(err) = process_ad(ctx, stats, account_id, ad).await {
            warn!(?err, ad_id = ?ad.id, "failed to sync ad");
            stats.error(EntityKind::Ad);
        }
    }
    Ok(())
}

async fn process_ad(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    account_id: &str,
    ad: &AdRecord,
) -> Result<()> {
    let ad_id = require_id(ad.id.as_deref(), "ad")?;
    let creative = match &ad.creative {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    let row = NewAd {
        ad_id,
        adset_id: ad.adset_id.clone(),
        account_id: account_id.to_string(),
        name: ad.name.clone(),
        status: ad.status.clone(),
        creative,
        preview_url: ad.preview_shareable_link.clone(),
        promoted_post_id: ad.promoted_post_id(),
        created_time: parse_graph_time_opt(ad.created_time.as_deref()),
        updated_time: parse_graph_time_opt(ad.updated_time.as_deref()),
    };
    let outcome = retry_once(|| repo::upsert_ad(&ctx.pool, &row, Utc::now())).await?;
    stats.record(EntityKind::Ad, outcome);
    Ok(())
}

/// Sync per-ad performance rows for one account. Each metric lands as an
/// insight keyed on (ad id, metric, period); a later snapshot for the same
/// period replaces the value.
#[instrument(skip_all, fields(account_id))]
pub async fn sync_ad_insights(
    ctx: &SyncContext,
    stats: &mut SyncStats,
    account_id: &str,
) -> Result<()> {
    let owner = SyncOwner::Account(account_id.to_string());
    let today = Utc::now().date_naive();
    let since = match boundary_for(ctx, &owner).await? {
        Some(boundary) => boundary.date_naive(),
        None => today - chrono::Duration::days(ctx.opts.watermark.backfill.num_days().max(1)),
    };

    let rows = ctx.graph.fetch_ad_insights(account_id, since, today).await?;
    stats.fetched(EntityKind::Insight, rows.len() as u64);
    info!(account_id, count = rows.len(), "fetched ad insights");

    for row in &rows {
        let Ok(ad_id) = require_id(row.ad_id.as_deref(), "ad insight") else {
            warn!("ad insight row missing ad id");
            stats.error(EntityKind::Insight);
            continue;
        };
        let period_start = row
            .date_start
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(today);
        let period_end = row
            .date_stop
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(period_start);

        for (metric_name, value) in row.metrics() {
            let record = InsightRecord {
                owner_ref: ad_id.clone(),
                metric_name,
                value,
                period_start,
                period_end,
            };
            match retry_once(|| repo::upsert_insight(&ctx.pool, &record, Utc::now())).await {
                Ok(outcome) => stats.record(EntityKind::Insight, outcome),
                Err(err) => {
                    warn!(?err, ad_id, metric = %record.metric_name, "failed to store ad insight");
                    stats.error(EntityKind::Insight);
                }
            }
        }
    }
    Ok(())
}

/// Resolve promoted posts referenced by ads but absent from local content.
/// Promoting a video mints a fresh post id that never shows up in the feed;
/// without these rows ad performance cannot be tied to anything visible.
#[instrument(skip_all)]
pub async fn sync_promoted_posts(ctx: &SyncContext, stats: &mut SyncStats) -> Result<()> {
    let ids = xref::missing_promoted_post_ids(&ctx.pool, ctx.opts.promoted_post_limit).await?;
    if ids.is_empty() {
        info!("no promoted posts need resolving");
        return Ok(());
    }
    stats.fetched(EntityKind::PromotedPost, ids.len() as u64);
    info!(count = ids.len(), "resolving promoted posts");

    for post_id in &ids {
        match ctx.graph.fetch_post(post_id).await {
            Ok(Some(post)) => {
                // Promoted ids are `{page_id}_{post_id}`.
                let page_id = post_id
                    .split_once('_')
                    .map(|(page, _)| page.to_string())
                    .unwrap_or_default();
                if let Err(err) =
                    process_post(ctx, stats, &page_id, &post, EntityKind::PromotedPost).await
                {
                    warn!(?err, post_id, "failed to store promoted post");
                    stats.error(EntityKind::PromotedPost);
                }
            }
            Ok(None) => {
                info!(post_id, "promoted post not retrievable; skipping");
                stats.skipped(EntityKind::PromotedPost);
            }
            Err(err) => {
                warn!(?err, post_id, "failed to fetch promoted post");
                stats.error(EntityKind::PromotedPost);
            }
        }
    }
    Ok(())
}

async fn sync_post_insights(ctx: &SyncContext, stats: &mut SyncStats, content_id: &str) {
    let metrics = match ctx.graph.fetch_post_insights(content_id).await {
        Ok(metrics) => metrics,
        Err(err) => {
            warn!(?err, content_id, "failed to fetch insights");
            stats.error(EntityKind::Insight);
            return;
        }
    };
    stats.fetched(EntityKind::Insight, metrics.len() as u64);

    let today = Utc::now().date_naive();
    for (metric_name, value) in metrics {
        let record = InsightRecord {
            owner_ref: content_id.to_string(),
            metric_name,
            value,
            period_start: today,
            period_end: today,
        };
        match retry_once(|| repo::upsert_insight(&ctx.pool, &record, Utc::now())).await {
            Ok(outcome) => stats.record(EntityKind::Insight, outcome),
            Err(err) => {
                warn!(?err, content_id, metric = %record.metric_name, "failed to store insight");
                stats.error(EntityKind::Insight);
            }
        }
    }
}

fn enqueue_thumbnail(ctx: &SyncContext, content_id: &str, url: Option<&str>) {
    if let (Some(queue), Some(url)) = (&ctx.media, url) {
        queue.enqueue(MediaJob {
            url: url.to_string(),
            category: "thumbnail".into(),
            source_id: content_id.to_string(),
            source_kind: "content".into(),
        });
    }
}

/// Run a full incremental pass over the given pages and ad accounts.
/// Per-target failures are logged and counted; the run always reaches the
/// cross-reference pass and returns a summary.
pub async fn run_incremental(
    ctx: &SyncContext,
    pages: &[String],
    accounts: &[String],
) -> Result<RunSummary> {
    let mut stats = SyncStats::new();

    for page_id in pages {
        if let Err(err) = sync_posts(ctx, &mut stats, page_id).await {
            warn!(?err, page_id, "post sync failed for page");
            stats.error(EntityKind::Post);
        }
        if let Err(err) = sync_videos(ctx, &mut stats, page_id).await {
            warn!(?err, page_id, "video sync failed for page");
            stats.error(EntityKind::Video);
        }
    }

    for account_id in accounts {
        if let Err(err) = sync_campaigns(ctx, &mut stats, account_id).await {
            warn!(?err, account_id, "campaign sync failed for account");
            stats.error(EntityKind::Campaign);
        }
        if let Err(err) = sync_adsets(ctx, &mut stats, account_id).await {
            warn!(?err, account_id, "adset sync failed for account");
            stats.error(EntityKind::AdSet);
        }
        if let Err(err) = sync_ads(ctx, &mut stats, account_id).await {
            warn!(?err, account_id, "ad sync failed for account");
            stats.error(EntityKind::Ad);
        }
        if !ctx.opts.skip_insights {
            if let Err(err) = sync_ad_insights(ctx, &mut stats, account_id).await {
                warn!(?err, account_id, "ad insight sync failed for account");
                stats.error(EntityKind::Insight);
            }
        }
    }

    if let Err(err) = sync_promoted_posts(ctx, &mut stats).await {
        warn!(?err, "promoted post resolution failed");
        stats.error(EntityKind::PromotedPost);
    }

    // Strictly after the upsert passes: the resolver needs the full ad set.
    match xref::populate_mappings(&ctx.pool, Utc::now()).await {
        Ok(count) => stats.bulk_merged(EntityKind::Mapping, count),
        Err(err) => {
            warn!(?err, "cross-reference pass failed");
            stats.error(EntityKind::Mapping);
        }
    }

    let summary = stats.summary();
    info!(errors = summary.total_errors(), "sync run complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_once_recovers_from_single_failure() {
        let mut attempts = 0u32;
        let result: Result<u32> = retry_once(|| {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt == 1 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn retry_once_gives_up_after_second_failure() {
        let result: Result<u32> = retry_once(|| async { Err(anyhow!("persistent")) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn missing_ids_are_rejected() {
        assert!(require_id(None, "ad").is_err());
        assert!(require_id(Some("  "), "ad").is_err());
        assert_eq!(require_id(Some("A1"), "ad").unwrap(), "A1");
    }
}
