//! Per-owner sync watermark resolution.
//!
//! The watermark is the timestamp boundary an incremental fetch starts from.
//! It is derived, never persisted: `max(updated_at)` over what the owner
//! already has locally, minus a safety buffer that tolerates clock skew
//! between this process and the platform, and entities whose remote
//! `updated_time` lands slightly before they become query-able.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::db::repo::{self, Pool};
use crate::model::SyncOwner;

#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    /// Subtracted from the stored maximum on incremental runs.
    pub buffer: Duration,
    /// Window for the first-ever sync of an owner. Deliberately small; a
    /// full backfill is the explicit wide-window path, not this one.
    pub backfill: Duration,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            buffer: Duration::hours(1),
            backfill: Duration::days(7),
        }
    }
}

/// Resolve the fetch-from timestamp for one owner.
///
/// An explicit override always wins. Otherwise the stored maximum minus the
/// buffer, or `now - backfill` when the owner has never been synced. A
/// storage read error propagates — it must not silently widen into a
/// fetch-everything run.
pub async fn resolve_watermark(
    pool: &Pool,
    owner: &SyncOwner,
    explicit_since: Option<DateTime<Utc>>,
    opts: &WatermarkOptions,
) -> Result<DateTime<Utc>> {
    if let Some(since) = explicit_since {
        info!(%owner, %since, "using explicit sync boundary");
        return Ok(since);
    }

    let last = repo::max_updated_at(pool, owner)
        .await
        .with_context(|| format!("failed to resolve watermark for {}", owner))?;

    match last {
        Some(last) => {
            let since = last - opts.buffer;
            info!(%owner, %last, %since, "incremental sync boundary");
            Ok(since)
        }
        None => {
            let since = Utc::now() - opts.backfill;
            info!(%owner, %since, "first sync for owner; using backfill window");
            Ok(since)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::model::NewAd;
    use sqlx::SqlitePool;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn ad(ad_id: &str, account_id: &str) -> NewAd {
        NewAd {
            ad_id: ad_id.into(),
            adset_id: None,
            account_id: account_id.into(),
            name: None,
            status: None,
            creative: None,
            preview_url: None,
            promoted_post_id: None,
            created_time: None,
            updated_time: None,
        }
    }

    #[tokio::test]
    async fn explicit_override_wins() {
        let pool = setup_pool().await;
        let since = Utc::now() - Duration::days(90);
        let got = resolve_watermark(
            &pool,
            &SyncOwner::Account("act_1".into()),
            Some(since),
            &WatermarkOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(got, since);
    }

    #[tokio::test]
    async fn first_sync_uses_backfill_window() {
        let pool = setup_pool().await;
        let opts = WatermarkOptions::default();
        let before = Utc::now();
        let got = resolve_watermark(&pool, &SyncOwner::Account("act_1".into()), None, &opts)
            .await
            .unwrap();
        let after = Utc::now();

        assert!(got >= before - opts.backfill);
        assert!(got <= after - opts.backfill);
    }

    #[tokio::test]
    async fn incremental_subtracts_buffer() {
        let pool = setup_pool().await;
        let merged_at = Utc::now();
        crate::db::repo::upsert_ad(&pool, &ad("A1", "act_1"), merged_at)
            .await
            .unwrap();

        let opts = WatermarkOptions::default();
        let got = resolve_watermark(&pool, &SyncOwner::Account("act_1".into()), None, &opts)
            .await
            .unwrap();

        // Sub-second precision is lost in storage; compare at second level.
        let expected = merged_at - opts.buffer;
        assert!((got - expected).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn owners_do_not_share_watermarks() {
        let pool = setup_pool().await;
        let merged_at = Utc::now();
        crate::db::repo::upsert_ad(&pool, &ad("A1", "act_1"), merged_at)
            .await
            .unwrap();

        let opts = WatermarkOptions::default();
        let other = resolve_watermark(&pool, &SyncOwner::Account("act_2".into()), None, &opts)
            .await
            .unwrap();
        // act_2 has no history, so it must fall back to the backfill window.
        assert!(other < merged_at - opts.buffer);
    }

    #[tokio::test]
    async fn watermark_never_regresses_across_runs() {
        let pool = setup_pool().await;
        let owner = SyncOwner::Account("act_1".into());
        let opts = WatermarkOptions::default();

        let run1_started = resolve_watermark(&pool, &owner, None, &opts).await.unwrap();
        crate::db::repo::upsert_ad(&pool, &ad("A1", "act_1"), Utc::now())
            .await
            .unwrap();

        let run2 = resolve_watermark(&pool, &owner, None, &opts).await.unwrap();
        assert!(run2 >= run1_started - opts.buffer);
    }
}
