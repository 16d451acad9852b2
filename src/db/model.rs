//! Incoming partial entities handed to the upsert repository.
//!
//! These mirror what one sync pass knows about a record. `Option` fields
//! marked as coalesce fields never erase a previously stored value; the
//! repository applies that rule, not the callers.

use chrono::{DateTime, Utc};

use crate::model::ContentKind;

/// Partial content item from a feed, video-catalog or promoted-post fetch.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub content_id: String,
    pub page_id: Option<String>,
    pub message: Option<String>,
    pub story: Option<String>,
    pub permalink_url: Option<String>,
    pub kind: ContentKind,
    pub thumbnail_url: Option<String>,
    /// Coalesce field: locally cached media id, populated by the media
    /// worker in a later pass.
    pub local_thumbnail_id: Option<String>,
    pub video_length: Option<f64>,
    pub platform_created_at: Option<DateTime<Utc>>,
}

/// Partial ad from an incremental account fetch.
#[derive(Debug, Clone)]
pub struct NewAd {
    pub ad_id: String,
    pub adset_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    /// Creative payload serialized verbatim; the engine only reads the
    /// embedded story/video identifiers out of it.
    pub creative: Option<String>,
    pub preview_url: Option<String>,
    /// Coalesce field: once a promoted post id is known it survives later
    /// fetches where the creative omits it.
    pub promoted_post_id: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub campaign_id: String,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub objective: Option<String>,
    pub daily_budget: Option<String>,
    pub lifetime_budget: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAdSet {
    pub adset_id: String,
    pub campaign_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub daily_budget: Option<String>,
    pub lifetime_budget: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
}
