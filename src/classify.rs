//! Layered video/reel detection for content items.
//!
//! The chain is ordered by cost and precision: permalink markers, URL
//! markers pasted into the text, whole-word keyword match, and only then a
//! remote attachment lookup. The first matching layer wins and the returned
//! reason names it, so a surprising classification can be traced back.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::config::ClassifierTables;
use crate::model::ContentKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_video: bool,
    pub reason: String,
}

impl Classification {
    fn video(reason: String) -> Self {
        Self {
            is_video: true,
            reason,
        }
    }

    fn not_video() -> Self {
        Self {
            is_video: false,
            reason: "not detected as video".into(),
        }
    }
}

/// Lazy collaborator for the attachment layer. Production wires this to the
/// Graph client; tests count invocations to prove the chain short-circuits.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn attachment_types(&self, post_id: &str) -> Result<Vec<String>>;
}

struct KeywordRule {
    keyword: String,
    // ASCII keywords get \b anchors. Thai script carries no word-boundary
    // codepoints, so those keywords match by containment instead.
    pattern: Option<Regex>,
}

pub struct Classifier {
    url_markers: Vec<String>,
    keywords: Vec<KeywordRule>,
    attachment_types: Vec<String>,
}

impl Classifier {
    pub fn new(tables: &ClassifierTables) -> Result<Self> {
        let mut keywords = Vec::new();
        for kw in tables
            .video_keywords_th
            .iter()
            .chain(tables.video_keywords_en.iter())
        {
            let pattern = if kw.is_ascii() {
                Some(Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw)))?)
            } else {
                None
            };
            keywords.push(KeywordRule {
                keyword: kw.clone(),
                pattern,
            });
        }
        Ok(Self {
            url_markers: tables
                .video_url_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            keywords,
            attachment_types: tables.video_attachment_types.clone(),
        })
    }

    /// Layers 1-3: everything decidable without another remote call.
    pub fn classify_static(
        &self,
        permalink: Option<&str>,
        texts: &[Option<&str>],
    ) -> Option<Classification> {
        if let Some(permalink) = permalink {
            let permalink = permalink.to_lowercase();
            for marker in &self.url_markers {
                if permalink.contains(marker) {
                    return Some(Classification::video(format!(
                        "permalink marker: {}",
                        marker
                    )));
                }
            }
        }

        let full_text = texts
            .iter()
            .filter_map(|t| *t)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        for marker in &self.url_markers {
            if full_text.contains(marker) {
                return Some(Classification::video(format!(
                    "embedded url marker: {}",
                    marker
                )));
            }
        }

        for rule in &self.keywords {
            let hit = match &rule.pattern {
                Some(re) => re.is_match(&full_text),
                None => full_text.contains(&rule.keyword),
            };
            if hit {
                return Some(Classification::video(format!("keyword: {}", rule.keyword)));
            }
        }

        None
    }

    /// Full chain including the attachment layer. The attachment source is
    /// only consulted when layers 1-3 found nothing.
    pub async fn classify(
        &self,
        post_id: &str,
        permalink: Option<&str>,
        texts: &[Option<&str>],
        attachments: &dyn AttachmentSource,
    ) -> Result<Classification> {
        if let Some(hit) = self.classify_static(permalink, texts) {
            return Ok(hit);
        }

        let types = attachments.attachment_types(post_id).await?;
        for t in &types {
            if self.attachment_types.iter().any(|v| v == t) {
                return Ok(Classification::video(format!("attachment type: {}", t)));
            }
        }

        Ok(Classification::not_video())
    }
}

/// Content kind for a feed post once the video question is settled.
pub fn kind_for_post(
    is_video: bool,
    permalink: Option<&str>,
    full_picture: Option<&str>,
    texts: &[Option<&str>],
) -> ContentKind {
    if is_video {
        let is_reel = permalink
            .map(|p| p.to_lowercase().contains("/reel"))
            .unwrap_or(false);
        return if is_reel {
            ContentKind::Reel
        } else {
            ContentKind::Video
        };
    }
    if full_picture.is_some() {
        return ContentKind::Photo;
    }
    let has_link = texts
        .iter()
        .filter_map(|t| *t)
        .any(|t| t.contains("http://") || t.contains("https://"));
    if has_link {
        ContentKind::Link
    } else {
        ContentKind::Text
    }
}
