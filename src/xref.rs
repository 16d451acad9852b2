//! Cross-reference resolver: organic video id → promoted post id.
//!
//! When video content is turned into an ad, the platform mints a new post id
//! for delivery. Ad performance is keyed by that promoted id, so without this
//! mapping it cannot be joined back to the organic video. Matching is by the
//! `video_id` embedded in the creative payload and nothing else; matching by
//! creation-time proximity produced combinatorial false positives and stays
//! out.
//!
//! Runs as a batch pass after the ad and content passes of the same run,
//! since it needs the full current ad set to resolve reliably.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{info, instrument};

use crate::db::repo::Pool;

/// Upsert every (organic_id, promoted_id) pair currently derivable from the
/// ad set. A pair is recorded once; rediscovery only refreshes which ad
/// established it. Returns the number of pairs written this pass.
#[instrument(skip_all)]
pub async fn populate_mappings(pool: &Pool, now: DateTime<Utc>) -> Result<u64> {
    let rows = sqlx::query(
        "INSERT INTO video_promoted_map (organic_id, promoted_id, page_id, ad_id, created_at, updated_at) \
         SELECT c.content_id, a.promoted_post_id, c.page_id, a.ad_id, ?, ? \
         FROM ads a \
         JOIN contents c ON json_extract(a.creative, '$.video_id') = c.content_id \
         WHERE a.promoted_post_id IS NOT NULL \
           AND a.promoted_post_id LIKE '%\\_%' ESCAPE '\\' \
           AND c.kind IN ('video', 'reel') \
         ON CONFLICT(organic_id, promoted_id) DO UPDATE SET \
            ad_id = excluded.ad_id, \
            updated_at = excluded.updated_at \
         RETURNING organic_id, promoted_id",
    )
    .bind(now)
    .bind(now)
    .fetch_all(pool)
    .await?;

    let count = rows.len() as u64;
    if count > 0 {
        info!(count, "populated video → promoted post mappings");
    } else {
        info!("no new video mappings (all up to date)");
    }
    Ok(count)
}

/// Promoted post ids referenced by ads but missing from local content.
/// These never appear in the page feed, so the engine resolves them with
/// per-id fetches, most recently updated ads first, capped per run.
pub async fn missing_promoted_post_ids(pool: &Pool, limit: i64) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT a.promoted_post_id AS post_id, MAX(a.updated_time) AS last_seen \
         FROM ads a \
         WHERE a.promoted_post_id IS NOT NULL \
           AND a.promoted_post_id != '' \
           AND NOT EXISTS (SELECT 1 FROM contents c WHERE c.content_id = a.promoted_post_id) \
         GROUP BY a.promoted_post_id \
         ORDER BY last_seen DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| row.get("post_id")).collect())
}
