use super::model::{NewAd, NewAdSet, NewCampaign, NewContent};
use crate::model::{Ad, ContentItem, ContentKind, InsightRecord, InsightValue, MergeOutcome, SyncOwner};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert or update a content item. The merge keeps remote fields
/// authoritative, except `local_thumbnail_id` which coalesces so a locally
/// cached media id is never clobbered by an absent incoming value.
/// `created_at` is written once; `updated_at` is bumped on every merge.
#[instrument(skip_all, fields(content_id = %incoming.content_id))]
pub async fn upsert_content(
    pool: &Pool,
    incoming: &NewContent,
    now: DateTime<Utc>,
) -> Result<MergeOutcome> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT page_id, message, story, permalink_url, kind, thumbnail_url, \
                local_thumbnail_id, video_length, platform_created_at \
         FROM contents WHERE content_id = ?",
    )
    .bind(&incoming.content_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match &existing {
        None => MergeOutcome::Created,
        Some(row) => {
            let same = row.try_get::<Option<String>, _>("page_id")? == incoming.page_id
                && row.try_get::<Option<String>, _>("message")? == incoming.message
                && row.try_get::<Option<String>, _>("story")? == incoming.story
                && row.try_get::<Option<String>, _>("permalink_url")? == incoming.permalink_url
                && row.try_get::<String, _>("kind")? == incoming.kind.as_str()
                && row.try_get::<Option<String>, _>("thumbnail_url")? == incoming.thumbnail_url
                && row.try_get::<Option<f64>, _>("video_length")? == incoming.video_length
                && row.try_get::<Option<DateTime<Utc>>, _>("platform_created_at")?
                    == incoming.platform_created_at
                && coalesce_unchanged(
                    row.try_get::<Option<String>, _>("local_thumbnail_id")?,
                    incoming.local_thumbnail_id.as_deref(),
                );
            if same {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Updated
            }
        }
    };

    sqlx::query(
        "INSERT INTO contents (content_id, page_id, message, story, permalink_url, kind, \
                               thumbnail_url, local_thumbnail_id, video_length, \
                               platform_created_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(content_id) DO UPDATE SET \
            page_id = excluded.page_id, \
            message = excluded.message, \
            story = excluded.story, \
            permalink_url = excluded.permalink_url, \
            kind = excluded.kind, \
            thumbnail_url = excluded.thumbnail_url, \
            local_thumbnail_id = COALESCE(excluded.local_thumbnail_id, contents.local_thumbnail_id), \
            video_length = excluded.video_length, \
            platform_created_at = excluded.platform_created_at, \
            updated_at = excluded.updated_at",
    )
    .bind(&incoming.content_id)
    .bind(&incoming.page_id)
    .bind(&incoming.message)
    .bind(&incoming.story)
    .bind(&incoming.permalink_url)
    .bind(incoming.kind.as_str())
    .bind(&incoming.thumbnail_url)
    .bind(&incoming.local_thumbnail_id)
    .bind(incoming.video_length)
    .bind(incoming.platform_created_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

#[instrument(skip_all, fields(campaign_id = %incoming.campaign_id))]
pub async fn upsert_campaign(
    pool: &Pool,
    incoming: &NewCampaign,
    now: DateTime<Utc>,
) -> Result<MergeOutcome> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT account_id, name, status, objective, daily_budget, lifetime_budget, \
                created_time, updated_time \
         FROM campaigns WHERE campaign_id = ?",
    )
    .bind(&incoming.campaign_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match &existing {
        None => MergeOutcome::Created,
        Some(row) => {
            let same = row.try_get::<String, _>("account_id")? == incoming.account_id
                && row.try_get::<Option<String>, _>("name")? == incoming.name
                && row.try_get::<Option<String>, _>("status")? == incoming.status
                && row.try_get::<Option<String>, _>("objective")? == incoming.objective
                && row.try_get::<Option<String>, _>("daily_budget")? == incoming.daily_budget
                && row.try_get::<Option<String>, _>("lifetime_budget")? == incoming.lifetime_budget
                && row.try_get::<Option<DateTime<Utc>>, _>("created_time")? == incoming.created_time
                && row.try_get::<Option<DateTime<Utc>>, _>("updated_time")? == incoming.updated_time;
            if same {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Updated
            }
        }
    };

    sqlx::query(
        "INSERT INTO campaigns (campaign_id, account_id, name, status, objective, daily_budget, \
                                lifetime_budget, created_time, updated_time, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(campaign_id) DO UPDATE SET \
            account_id = excluded.account_id, \
            name = excluded.name, \
            status = excluded.status, \
            objective = excluded.objective, \
            daily_budget = excluded.daily_budget, \
            lifetime_budget = excluded.lifetime_budget, \
            created_time = excluded.created_time, \
            updated_time = excluded.updated_time, \
            updated_at = excluded.updated_at",
    )
    .bind(&incoming.campaign_id)
    .bind(&incoming.account_id)
    .bind(&incoming.name)
    .bind(&incoming.status)
    .bind(&incoming.objective)
    .bind(&incoming.daily_budget)
    .bind(&incoming.lifetime_budget)
    .bind(incoming.created_time)
    .bind(incoming.updated_time)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

#[instrument(skip_all, fields(adset_id = %incoming.adset_id))]
pub async fn upsert_adset(
    pool: &Pool,
    incoming: &NewAdSet,
    now: DateTime<Utc>,
) -> Result<MergeOutcome> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT campaign_id, account_id, name, status, daily_budget, lifetime_budget, \
                created_time, updated_time \
         FROM adsets WHERE adset_id = ?",
    )
    .bind(&incoming.adset_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match &existing {
        None => MergeOutcome::Created,
        Some(row) => {
            let same = row.try_get::<Option<String>, _>("campaign_id")? == incoming.campaign_id
                && row.try_get::<String, _>("account_id")? == incoming.account_id
                && row.try_get::<Option<String>, _>("name")? == incoming.name
                && row.try_get::<Option<String>, _>("status")? == incoming.status
                && row.try_get::<Option<String>, _>("daily_budget")? == incoming.daily_budget
                && row.try_get::<Option<String>, _>("lifetime_budget")? == incoming.lifetime_budget
                && row.try_get::<Option<DateTime<Utc>>, _>("created_time")? == incoming.created_time
                && row.try_get::<Option<DateTime<Utc>>, _>("updated_time")? == incoming.updated_time;
            if same {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Updated
            }
        }
    };

    sqlx::query(
        "INSERT INTO adsets (adset_id, campaign_id, account_id, name, status, daily_budget, \
                             lifetime_budget, created_time, updated_time, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(adset_id) DO UPDATE SET \
            campaign_id = excluded.campaign_id, \
            account_id = excluded.account_id, \
            name = excluded.name, \
            status = excluded.status, \
            daily_budget = excluded.daily_budget, \
            lifetime_budget = excluded.lifetime_budget, \
            created_time = excluded.created_time, \
            updated_time = excluded.updated_time, \
            updated_at = excluded.updated_at",
    )
    .bind(&incoming.adset_id)
    .bind(&incoming.campaign_id)
    .bind(&incoming.account_id)
    .bind(&incoming.name)
    .bind(&incoming.status)
    .bind(&incoming.daily_budget)
    .bind(&incoming.lifetime_budget)
    .bind(incoming.created_time)
    .bind(incoming.updated_time)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// Insert or update an ad. `promoted_post_id` coalesces: an incoming NULL
/// never erases a previously resolved promoted id.
#[instrument(skip_all, fields(ad_id = %incoming.ad_id))]
pub async fn upsert_ad(pool: &Pool, incoming: &NewAd, now: DateTime<Utc>) -> Result<MergeOutcome> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT adset_id, account_id, name, status, creative, preview_url, promoted_post_id, \
                created_time, updated_time \
         FROM ads WHERE ad_id = ?",
    )
    .bind(&incoming.ad_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match &existing {
        None => MergeOutcome::Created,
        Some(row) => {
            let same = row.try_get::<Option<String>, _>("adset_id")? == incoming.adset_id
                && row.try_get::<String, _>("account_id")? == incoming.account_id
                && row.try_get::<Option<String>, _>("name")? == incoming.name
                && row.try_get::<Option<String>, _>("status")? == incoming.status
                && row.try_get::<Option<String>, _>("creative")? == incoming.creative
                && row.try_get::<Option<String>, _>("preview_url")? == incoming.preview_url
                && row.try_get::<Option<DateTime<Utc>>, _>("created_time")? == incoming.created_time
                && row.try_get::<Option<DateTime<Utc>>, _>("updated_time")? == incoming.updated_time
                && coalesce_unchanged(
                    row.try_get::<Option<String>, _>("promoted_post_id")?,
                    incoming.promoted_post_id.as_deref(),
                );
            if same {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Updated
            }
        }
    };

    sqlx::query(
        "INSERT INTO ads (ad_id, adset_id, account_id, name, status, creative, preview_url, \
                          promoted_post_id, created_time, updated_time, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(ad_id) DO UPDATE SET \
            adset_id = excluded.adset_id, \
            account_id = excluded.account_id, \
            name = excluded.name, \
            status = excluded.status, \
            creative = excluded.creative, \
            preview_url = excluded.preview_url, \
            promoted_post_id = COALESCE(excluded.promoted_post_id, ads.promoted_post_id), \
            created_time = excluded.created_time, \
            updated_time = excluded.updated_time, \
            updated_at = excluded.updated_at",
    )
    .bind(&incoming.ad_id)
    .bind(&incoming.adset_id)
    .bind(&incoming.account_id)
    .bind(&incoming.name)
    .bind(&incoming.status)
    .bind(&incoming.creative)
    .bind(&incoming.preview_url)
    .bind(&incoming.promoted_post_id)
    .bind(incoming.created_time)
    .bind(incoming.updated_time)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// A later snapshot replaces the value at the (owner, metric, period) key;
/// values never accumulate.
#[instrument(skip_all, fields(owner = %incoming.owner_ref, metric = %incoming.metric_name))]
pub async fn upsert_insight(
    pool: &Pool,
    incoming: &InsightRecord,
    now: DateTime<Utc>,
) -> Result<MergeOutcome> {
    let (value_numeric, value_json) = match &incoming.value {
        InsightValue::Numeric(v) => (Some(*v), None),
        InsightValue::Structured(v) => (None, Some(serde_json::to_string(v)?)),
    };

    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT value_numeric, value_json FROM insights \
         WHERE owner_ref = ? AND metric_name = ? AND period_start = ? AND period_end = ?",
    )
    .bind(&incoming.owner_ref)
    .bind(&incoming.metric_name)
    .bind(incoming.period_start)
    .bind(incoming.period_end)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match &existing {
        None => MergeOutcome::Created,
        Some(row) => {
            let same = row.try_get::<Option<f64>, _>("value_numeric")? == value_numeric
                && row.try_get::<Option<String>, _>("value_json")? == value_json;
            if same {
                MergeOutcome::Unchanged
            } else {
                MergeOutcome::Updated
            }
        }
    };

    sqlx::query(
        "INSERT INTO insights (owner_ref, metric_name, value_numeric, value_json, \
                               period_start, period_end, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(owner_ref, metric_name, period_start, period_end) DO UPDATE SET \
            value_numeric = excluded.value_numeric, \
            value_json = excluded.value_json, \
            updated_at = excluded.updated_at",
    )
    .bind(&incoming.owner_ref)
    .bind(&incoming.metric_name)
    .bind(value_numeric)
    .bind(&value_json)
    .bind(incoming.period_start)
    .bind(incoming.period_end)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// Coalesce-field comparison: the effective post-merge value is the incoming
/// one unless absent, so the row is unchanged when that effective value
/// equals what is stored.
fn coalesce_unchanged(existing: Option<String>, incoming: Option<&str>) -> bool {
    match incoming {
        None => true,
        Some(v) => existing.as_deref() == Some(v),
    }
}

/// Latest local merge time for an owner, the watermark source.
#[instrument(skip_all)]
pub async fn max_updated_at(pool: &Pool, owner: &SyncOwner) -> Result<Option<DateTime<Utc>>> {
    let value: Option<DateTime<Utc>> = match owner {
        SyncOwner::Page(page_id) => {
            sqlx::query_scalar("SELECT MAX(updated_at) FROM contents WHERE page_id = ?")
                .bind(page_id)
                .fetch_one(pool)
                .await
                .context("failed to read content watermark")?
        }
        SyncOwner::Account(account_id) => {
            sqlx::query_scalar("SELECT MAX(updated_at) FROM ads WHERE account_id = ?")
                .bind(account_id)
                .fetch_one(pool)
                .await
                .context("failed to read ad watermark")?
        }
    };
    Ok(value)
}

pub async fn get_content(pool: &Pool, content_id: &str) -> Result<Option<ContentItem>> {
    let row = sqlx::query(
        "SELECT content_id, page_id, message, story, permalink_url, kind, thumbnail_url, \
                local_thumbnail_id, video_length, platform_created_at, created_at, updated_at \
         FROM contents WHERE content_id = ?",
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let kind_str: String = row.get("kind");
    Ok(Some(ContentItem {
        content_id: row.get("content_id"),
        page_id: row.try_get("page_id").ok(),
        message: row.try_get("message").ok(),
        story: row.try_get("story").ok(),
        permalink_url: row.try_get("permalink_url").ok(),
        kind: ContentKind::parse_kind(&kind_str).unwrap_or(ContentKind::Text),
        thumbnail_url: row.try_get("thumbnail_url").ok(),
        local_thumbnail_id: row.try_get("local_thumbnail_id").ok(),
        video_length: row.try_get("video_length").ok(),
        platform_created_at: row.try_get("platform_created_at").ok(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

pub async fn get_ad(pool: &Pool, ad_id: &str) -> Result<Option<Ad>> {
    let row = sqlx::query(
        "SELECT ad_id, adset_id, account_id, name, status, creative, preview_url, \
                promoted_post_id, created_time, updated_time, created_at, updated_at \
         FROM ads WHERE ad_id = ?",
    )
    .bind(ad_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let creative: Option<String> = row.try_get("creative").ok().flatten();
    Ok(Some(Ad {
        ad_id: row.get("ad_id"),
        adset_id: row.try_get("adset_id").ok().flatten(),
        account_id: row.get("account_id"),
        name: row.try_get("name").ok().flatten(),
        status: row.try_get("status").ok().flatten(),
        creative: creative.and_then(|s| serde_json::from_str(&s).ok()),
        preview_url: row.try_get("preview_url").ok().flatten(),
        promoted_post_id: row.try_get("promoted_post_id").ok().flatten(),
        created_time: row.try_get("created_time").ok().flatten(),
        updated_time: row.try_get("updated_time").ok().flatten(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// Attach a locally cached media id to a content item.
#[instrument(skip_all)]
pub async fn mark_content_local_thumbnail(
    pool: &Pool,
    content_id: &str,
    media_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE contents SET local_thumbnail_id = ?, updated_at = ? WHERE content_id = ?")
        .bind(media_id)
        .bind(now)
        .bind(content_id)
        .execute(pool)
        .await
        .context("failed to persist local thumbnail id")?;
    Ok(())
}

pub async fn find_media_by_url(pool: &Pool, url: &str) -> Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar("SELECT media_id FROM media_assets WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

#[allow(clippy::too_many_arguments)]
pub async fn record_media_asset(
    pool: &Pool,
    media_id: &str,
    url: &str,
    path: &str,
    category: &str,
    source_id: &str,
    source_kind: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO media_assets (media_id, url, path, category, source_id, source_kind, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(url) DO NOTHING",
    )
    .bind(media_id)
    .bind(url)
    .bind(path)
    .bind(category)
    .bind(source_id)
    .bind(source_kind)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Status breakdown for the stats report.
pub async fn ads_by_status(pool: &Pool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT COALESCE(status, 'NULL') AS status, COUNT(*) AS count \
         FROM ads GROUP BY status ORDER BY count DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("status"), row.get("count")))
        .collect())
}

/// Headline numbers for the stats report: total ads, ads with a promoted
/// post id, and ads touched in the last 24 hours.
pub async fn ad_overview(pool: &Pool, now: DateTime<Utc>) -> Result<(i64, i64, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ads")
        .fetch_one(pool)
        .await?;
    let with_promoted: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ads WHERE promoted_post_id IS NOT NULL")
            .fetch_one(pool)
            .await?;
    let recent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ads WHERE updated_at >= ?")
        .bind(now - chrono::Duration::hours(24))
        .fetch_one(pool)
        .await?;
    Ok((total, with_promoted, recent))
}
