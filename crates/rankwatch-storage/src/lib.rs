//! Durable keyword registry + append-only ranking history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rankwatch_core::{Keyword, KeywordCategory, NewObservation, RankingObservation, Tracker};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "rankwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("keyword already tracked for this tracker")]
    DuplicateKeyword,
    #[error("tracker not found: {0}")]
    TrackerNotFound(Uuid),
    #[error("keyword not found: {0}")]
    KeywordNotFound(Uuid),
    #[error("invalid keyword: {0}")]
    InvalidKeyword(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Partial-update payload for a keyword. The outer `Option` distinguishes
/// "leave unchanged" (`None`) from "set or clear" (`Some(..)`).
#[derive(Debug, Clone, Default)]
pub struct KeywordUpdate {
    pub category: Option<Option<KeywordCategory>>,
    pub target_url: Option<Option<String>>,
}

/// Registry + history operations shared by the in-memory and Postgres
/// backends.
///
/// `append_observations` is atomic per call; the ingestion job issues one
/// call per tracker, which makes each tracker its own transaction boundary.
#[async_trait]
pub trait RankStore: Send + Sync {
    async fn create_tracker(&self, name: &str, location: &str, language: &str) -> Result<Tracker>;

    async fn get_tracker(&self, id: Uuid) -> Result<Option<Tracker>>;

    async fn list_trackers(&self) -> Result<Vec<Tracker>>;

    async fn add_keyword(
        &self,
        tracker_id: Uuid,
        text: &str,
        category: Option<KeywordCategory>,
        target_url: Option<String>,
    ) -> Result<Keyword>;

    async fn update_keyword(&self, id: Uuid, update: KeywordUpdate) -> Result<Keyword>;

    /// Cascades to all of the keyword's observations.
    async fn delete_keyword(&self, id: Uuid) -> Result<()>;

    async fn get_keyword(&self, id: Uuid) -> Result<Option<Keyword>>;

    async fn list_keywords(&self, tracker_id: Uuid) -> Result<Vec<Keyword>>;

    /// Most recent first.
    async fn keyword_history(&self, keyword_id: Uuid, limit: usize)
        -> Result<Vec<RankingObservation>>;

    async fn latest_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>>;

    /// Earliest observation — the baseline for movement-since-start.
    async fn first_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>>;

    /// Append a batch of observations atomically. Returns the number written.
    async fn append_observations(&self, observations: Vec<NewObservation>) -> Result<usize>;

    async fn set_search_volume(
        &self,
        keyword_id: Uuid,
        volume: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Shared input validation: trims whitespace, rejects empty text.
pub(crate) fn normalize_keyword_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidKeyword("keyword text is empty".into()));
    }
    Ok(trimmed.to_string())
}

/// Empty/whitespace target URLs collapse to `None` (default-domain fallback).
pub(crate) fn normalize_target_url(target_url: Option<String>) -> Option<String> {
    target_url
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
