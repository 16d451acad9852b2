//! Database module: entity models and SQL repositories.
//!
//! - `model`: incoming partial entities and row slices used by the engine.
//! - `repo`: SQL-only functions implementing the conflict-safe upsert merge.
//!
//! External modules should import from `fb_adsync::db` — the repository API
//! and commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use model::{NewAd, NewAdSet, NewCampaign, NewContent};
pub use repo::*;
