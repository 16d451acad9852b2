use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fb_adsync::classify::Classifier;
use fb_adsync::config;
use fb_adsync::db::repo;
use fb_adsync::graph::model::{
    AdInsightRecord, AdRecord, AdSetRecord, AttachmentRecord, CampaignRecord, PostRecord,
    VideoRecord,
};
use fb_adsync::graph::{GraphError, GraphService};
use fb_adsync::model::{InsightValue, SyncOwner};
use fb_adsync::stats::EntityKind;
use fb_adsync::sync::{self, SyncContext, SyncOptions};
use fb_adsync::watermark::{resolve_watermark, WatermarkOptions};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn classifier() -> Classifier {
    let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    Classifier::new(&cfg.classifier).unwrap()
}

/// Remote double: returns canned records regardless of the since filter and
/// counts attachment fetches so classifier short-circuiting is observable.
#[derive(Clone, Default)]
struct RecordingGraph {
    posts: Arc<Mutex<Vec<PostRecord>>>,
    videos: Arc<Mutex<Vec<VideoRecord>>>,
    campaigns: Arc<Mutex<Vec<CampaignRecord>>>,
    adsets: Arc<Mutex<Vec<AdSetRecord>>>,
    ads: Arc<Mutex<Vec<AdRecord>>>,
    promoted: Arc<Mutex<HashMap<String, PostRecord>>>,
    insights: Arc<Mutex<HashMap<String, Vec<(String, InsightValue)>>>>,
    ad_insights: Arc<Mutex<Vec<AdInsightRecord>>>,
    attachment_calls: Arc<Mutex<u64>>,
}

impl RecordingGraph {
    fn attachment_call_count(&self) -> u64 {
        *self.attachment_calls.lock().unwrap()
    }

    fn set_ads(&self, ads: Vec<AdRecord>) {
        *self.ads.lock().unwrap() = ads;
    }

    fn set_insights(&self, owner: &str, metrics: Vec<(String, InsightValue)>) {
        self.insights.lock().unwrap().insert(owner.into(), metrics);
    }
}

#[async_trait]
impl GraphService for RecordingGraph {
    async fn fetch_posts(
        &self,
        _page_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostRecord>, GraphError> {
        Ok(self.posts.lock().unwrap().clone())
    }

    async fn fetch_videos(
        &self,
        _page_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoRecord>, GraphError> {
        Ok(self.videos.lock().unwrap().clone())
    }

    async fn fetch_campaigns(&self, _account_id: &str) -> Result<Vec<CampaignRecord>, GraphError> {
        Ok(self.campaigns.lock().unwrap().clone())
    }

    async fn fetch_adsets(&self, _account_id: &str) -> Result<Vec<AdSetRecord>, GraphError> {
        Ok(self.adsets.lock().unwrap().clone())
    }

    async fn fetch_ads(
        &self,
        _account_id: &str,
        _updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdRecord>, GraphError> {
        Ok(self.ads.lock().unwrap().clone())
    }

    async fn fetch_post(&self, post_id: &str) -> Result<Option<PostRecord>, GraphError> {
        Ok(self.promoted.lock().unwrap().get(post_id).cloned())
    }

    async fn fetch_post_attachments(
        &self,
        _post_id: &str,
    ) -> Result<Vec<AttachmentRecord>, GraphError> {
        *self.attachment_calls.lock().unwrap() += 1;
        Ok(vec![])
    }

    async fn fetch_post_insights(
        &self,
        post_id: &str,
    ) -> Result<Vec<(String, InsightValue)>, GraphError> {
        Ok(self
            .insights
            .lock()
            .unwrap()
            .get(post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_ad_insights(
        &self,
        _account_id: &str,
        _since: NaiveDate,
        _until: NaiveDate,
    ) -> Result<Vec<AdInsightRecord>, GraphError> {
        Ok(self.ad_insights.lock().unwrap().clone())
    }
}

fn context(pool: sqlx::SqlitePool, graph: RecordingGraph, skip_insights: bool) -> SyncContext {
    SyncContext {
        pool,
        graph: Arc::new(graph),
        classifier: classifier(),
        media: None,
        opts: SyncOptions {
            skip_insights,
            ..SyncOptions::default()
        },
    }
}

fn reel_post(id: &str) -> PostRecord {
    PostRecord {
        id: Some(id.into()),
        permalink_url: Some(format!("https://www.facebook.com/reel/{}", id)),
        message: Some("ดูคลิปนี้เลย".into()),
        created_time: Some("2026-08-01T10:00:00+0000".into()),
        ..Default::default()
    }
}

fn photo_post(id: &str) -> PostRecord {
    PostRecord {
        id: Some(id.into()),
        permalink_url: Some(format!("https://www.facebook.com/107/posts/{}", id)),
        message: Some("โปรโมชั่นเดือนนี้".into()),
        full_picture: Some("https://cdn.example/pic.jpg".into()),
        created_time: Some("2026-08-02T10:00:00+0000".into()),
        ..Default::default()
    }
}

fn catalog_video(id: &str) -> VideoRecord {
    VideoRecord {
        id: Some(id.into()),
        title: Some("สอนทำอาหาร".into()),
        permalink_url: Some(format!("https://www.facebook.com/107/videos/{}", id)),
        length: Some(42.0),
        created_time: Some("2026-08-01T09:00:00+0000".into()),
        ..Default::default()
    }
}

fn promoting_ad(ad_id: &str, video_id: &str, promoted: &str) -> AdRecord {
    AdRecord {
        id: Some(ad_id.into()),
        adset_id: Some("as1".into()),
        name: Some(format!("Ad {}", ad_id)),
        status: Some("ACTIVE".into()),
        creative: Some(json!({
            "video_id": video_id,
            "effective_object_story_id": promoted,
        })),
        updated_time: Some("2026-08-03T08:00:00+0000".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn second_run_with_same_data_updates_nothing() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    *graph.posts.lock().unwrap() = vec![reel_post("107_1"), photo_post("107_2")];
    *graph.videos.lock().unwrap() = vec![catalog_video("V9")];
    graph.set_ads(vec![promoting_ad("A1", "V9", "107_943")]);
    graph
        .promoted
        .lock()
        .unwrap()
        .insert("107_943".into(), reel_post("107_943"));

    let ctx = context(pool.clone(), graph.clone(), true);
    let pages = vec!["107".to_string()];
    let accounts = vec!["act_1".to_string()];

    let first = sync::run_incremental(&ctx, &pages, &accounts).await.unwrap();
    assert_eq!(first.counters(EntityKind::Post).new, 2);
    assert_eq!(first.counters(EntityKind::Video).new, 1);
    assert_eq!(first.counters(EntityKind::Ad).new, 1);
    assert_eq!(first.counters(EntityKind::PromotedPost).new, 1);

    let second = sync::run_incremental(&ctx, &pages, &accounts).await.unwrap();
    for kind in [
        EntityKind::Post,
        EntityKind::Video,
        EntityKind::Ad,
        EntityKind::PromotedPost,
    ] {
        assert_eq!(second.counters(kind).new, 0, "{:?} new", kind);
        assert_eq!(second.counters(kind).updated, 0, "{:?} updated", kind);
    }
    assert_eq!(second.counters(EntityKind::Post).unchanged, 2);
    assert_eq!(second.counters(EntityKind::Ad).unchanged, 1);
}

#[tokio::test]
async fn promoted_post_id_survives_refetch_without_story_id() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    graph.set_ads(vec![promoting_ad("A1", "V9", "P100")]);

    let ctx = context(pool.clone(), graph.clone(), true);
    let accounts = vec!["act_1".to_string()];
    sync::run_incremental(&ctx, &[], &accounts).await.unwrap();

    let stored = repo::get_ad(&pool, "A1").await.unwrap().unwrap();
    assert_eq!(stored.promoted_post_id.as_deref(), Some("P100"));

    // The next fetch returns the same ad with the story id fields absent
    // from the creative payload.
    let mut stripped = promoting_ad("A1", "V9", "P100");
    stripped.creative = Some(json!({ "video_id": "V9" }));
    graph.set_ads(vec![stripped]);

    sync::run_incremental(&ctx, &[], &accounts).await.unwrap();
    let stored = repo::get_ad(&pool, "A1").await.unwrap().unwrap();
    assert_eq!(stored.promoted_post_id.as_deref(), Some("P100"));
}

#[tokio::test]
async fn watermark_does_not_regress_after_a_run() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    graph.set_ads(vec![promoting_ad("A1", "V9", "107_943")]);

    let ctx = context(pool.clone(), graph.clone(), true);
    let owner = SyncOwner::Account("act_1".into());
    let opts = WatermarkOptions::default();

    let before = resolve_watermark(&pool, &owner, None, &opts).await.unwrap();
    sync::run_incremental(&ctx, &[], &["act_1".to_string()])
        .await
        .unwrap();
    let after = resolve_watermark(&pool, &owner, None, &opts).await.unwrap();

    assert!(after >= before);
}

#[tokio::test]
async fn video_permalink_skips_attachment_fetch() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    *graph.posts.lock().unwrap() = vec![reel_post("107_1")];

    let ctx = context(pool.clone(), graph.clone(), true);
    sync::run_incremental(&ctx, &["107".to_string()], &[])
        .await
        .unwrap();

    assert_eq!(graph.attachment_call_count(), 0);
    let stored = repo::get_content(&pool, "107_1").await.unwrap().unwrap();
    assert!(stored.kind.is_video());
}

#[tokio::test]
async fn one_malformed_ad_does_not_abort_the_batch() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();

    let mut ads = Vec::new();
    for i in 1..=10 {
        let mut ad = promoting_ad(&format!("A{}", i), "V9", "107_943");
        if i == 5 {
            ad.id = None;
        }
        ads.push(ad);
    }
    graph.set_ads(ads);

    let ctx = context(pool.clone(), graph.clone(), true);
    let summary = sync::run_incremental(&ctx, &[], &["act_1".to_string()])
        .await
        .unwrap();

    let counters = summary.counters(EntityKind::Ad);
    assert_eq!(counters.new, 9);
    assert_eq!(counters.errors, 1);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ads")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 9);
}

#[tokio::test]
async fn mapping_created_exactly_once_across_runs() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    *graph.videos.lock().unwrap() = vec![catalog_video("V9")];
    graph.set_ads(vec![promoting_ad("A2", "V9", "107_943")]);
    graph
        .promoted
        .lock()
        .unwrap()
        .insert("107_943".into(), reel_post("107_943"));

    let ctx = context(pool.clone(), graph.clone(), true);
    let pages = vec!["107".to_string()];
    let accounts = vec!["act_1".to_string()];

    sync::run_incremental(&ctx, &pages, &accounts).await.unwrap();
    sync::run_incremental(&ctx, &pages, &accounts).await.unwrap();

    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT organic_id, promoted_id, ad_id FROM video_promoted_map",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], ("V9".into(), "107_943".into(), "A2".into()));
}

#[tokio::test]
async fn unresolvable_promoted_post_is_skipped_not_fatal() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    // Ad references a promoted post the remote no longer serves.
    graph.set_ads(vec![promoting_ad("A1", "V9", "107_404")]);

    let ctx = context(pool.clone(), graph.clone(), true);
    let summary = sync::run_incremental(&ctx, &[], &["act_1".to_string()])
        .await
        .unwrap();

    assert_eq!(summary.counters(EntityKind::PromotedPost).skipped, 1);
    assert_eq!(summary.counters(EntityKind::PromotedPost).errors, 0);
}

#[tokio::test]
async fn later_insight_snapshot_replaces_value() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    *graph.posts.lock().unwrap() = vec![reel_post("107_1")];
    graph.set_insights(
        "107_1",
        vec![("post_impressions_unique".into(), InsightValue::Numeric(100.0))],
    );

    let ctx = context(pool.clone(), graph.clone(), false);
    let pages = vec!["107".to_string()];
    sync::run_incremental(&ctx, &pages, &[]).await.unwrap();

    graph.set_insights(
        "107_1",
        vec![("post_impressions_unique".into(), InsightValue::Numeric(150.0))],
    );
    sync::run_incremental(&ctx, &pages, &[]).await.unwrap();

    let rows: Vec<(f64,)> = sqlx::query_as(
        "SELECT value_numeric FROM insights \
         WHERE owner_ref = '107_1' AND metric_name = 'post_impressions_unique'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 150.0);
}

#[tokio::test]
async fn ad_level_insights_replace_per_period() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    graph.set_ads(vec![promoting_ad("A1", "V9", "107_943")]);

    let row = |spend: &str| AdInsightRecord {
        ad_id: Some("A1".into()),
        date_start: Some("2026-08-01".into()),
        date_stop: Some("2026-08-01".into()),
        impressions: Some("100".into()),
        spend: Some(spend.into()),
        ..Default::default()
    };
    *graph.ad_insights.lock().unwrap() = vec![row("12.5")];

    let ctx = context(pool.clone(), graph.clone(), false);
    let accounts = vec!["act_1".to_string()];
    sync::run_incremental(&ctx, &[], &accounts).await.unwrap();

    *graph.ad_insights.lock().unwrap() = vec![row("20.0")];
    sync::run_incremental(&ctx, &[], &accounts).await.unwrap();

    let rows: Vec<(f64,)> = sqlx::query_as(
        "SELECT value_numeric FROM insights WHERE owner_ref = 'A1' AND metric_name = 'spend'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 20.0);
}

#[tokio::test]
async fn structured_insight_values_stored_verbatim() {
    let pool = setup_pool().await;
    let graph = RecordingGraph::default();
    *graph.posts.lock().unwrap() = vec![reel_post("107_1")];
    graph.set_insights(
        "107_1",
        vec![(
            "post_reactions_by_type_total".into(),
            InsightValue::Structured(json!({"like": 12, "love": 3})),
        )],
    );

    let ctx = context(pool.clone(), graph.clone(), false);
    sync::run_incremental(&ctx, &["107".to_string()], &[])
        .await
        .unwrap();

    let (numeric, raw): (Option<f64>, Option<String>) = sqlx::query_as(
        "SELECT value_numeric, value_json FROM insights \
         WHERE metric_name = 'post_reactions_by_type_total'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(numeric.is_none());
    let parsed: serde_json::Value = serde_json::from_str(&raw.unwrap()).unwrap();
    assert_eq!(parsed["like"], 12);
}
