//! In-memory [`RankStore`] used by tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rankwatch_core::{Keyword, KeywordCategory, NewObservation, RankingObservation, Tracker};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    normalize_keyword_text, normalize_target_url, KeywordUpdate, RankStore, Result, StoreError,
};

#[derive(Default)]
struct Tables {
    trackers: HashMap<Uuid, Tracker>,
    keywords: HashMap<Uuid, Keyword>,
    observations: Vec<RankingObservation>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RankStore for MemoryStore {
    async fn create_tracker(&self, name: &str, location: &str, language: &str) -> Result<Tracker> {
        let tracker = Tracker {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location: location.to_string(),
            language: language.to_string(),
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .trackers
            .insert(tracker.id, tracker.clone());
        Ok(tracker)
    }

    async fn get_tracker(&self, id: Uuid) -> Result<Option<Tracker>> {
        Ok(self.tables.read().await.trackers.get(&id).cloned())
    }

    async fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let tables = self.tables.read().await;
        let mut trackers: Vec<_> = tables.trackers.values().cloned().collect();
        trackers.sort_by_key(|t| t.created_at);
        Ok(trackers)
    }

    async fn add_keyword(
        &self,
        tracker_id: Uuid,
        text: &str,
        category: Option<KeywordCategory>,
        target_url: Option<String>,
    ) -> Result<Keyword> {
        let text = normalize_keyword_text(text)?;
        let mut tables = self.tables.write().await;

        if !tables.trackers.contains_key(&tracker_id) {
            return Err(StoreError::TrackerNotFound(tracker_id));
        }
        if tables
            .keywords
            .values()
            .any(|k| k.tracker_id == tracker_id && k.text == text)
        {
            return Err(StoreError::DuplicateKeyword);
        }

        let keyword = Keyword {
            id: Uuid::new_v4(),
            tracker_id,
            text,
            target_url: normalize_target_url(target_url),
            category,
            search_volume: None,
            volume_checked_at: None,
            created_at: Utc::now(),
        };
        tables.keywords.insert(keyword.id, keyword.clone());
        Ok(keyword)
    }

    async fn update_keyword(&self, id: Uuid, update: KeywordUpdate) -> Result<Keyword> {
        let mut tables = self.tables.write().await;
        let keyword = tables
            .keywords
            .get_mut(&id)
            .ok_or(StoreError::KeywordNotFound(id))?;

        if let Some(category) = update.category {
            keyword.category = category;
        }
        if let Some(target_url) = update.target_url {
            keyword.target_url = normalize_target_url(target_url);
        }
        Ok(keyword.clone())
    }

    async fn delete_keyword(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.keywords.remove(&id).is_none() {
            return Err(StoreError::KeywordNotFound(id));
        }
        tables.observations.retain(|o| o.keyword_id != id);
        Ok(())
    }

    async fn get_keyword(&self, id: Uuid) -> Result<Option<Keyword>> {
        Ok(self.tables.read().await.keywords.get(&id).cloned())
    }

    async fn list_keywords(&self, tracker_id: Uuid) -> Result<Vec<Keyword>> {
        let tables = self.tables.read().await;
        let mut keywords: Vec<_> = tables
            .keywords
            .values()
            .filter(|k| k.tracker_id == tracker_id)
            .cloned()
            .collect();
        keywords.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.text.cmp(&b.text)));
        Ok(keywords)
    }

    async fn keyword_history(
        &self,
        keyword_id: Uuid,
        limit: usize,
    ) -> Result<Vec<RankingObservation>> {
        let tables = self.tables.read().await;
        let mut history: Vec<_> = tables
            .observations
            .iter()
            .filter(|o| o.keyword_id == keyword_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        history.truncate(limit);
        Ok(history)
    }

    async fn latest_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>> {
        Ok(self
            .keyword_history(keyword_id, 1)
            .await?
            .into_iter()
            .next())
    }

    async fn first_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .observations
            .iter()
            .filter(|o| o.keyword_id == keyword_id)
            .min_by_key(|o| o.observed_at)
            .cloned())
    }

    async fn append_observations(&self, observations: Vec<NewObservation>) -> Result<usize> {
        let mut tables = self.tables.write().await;

        // All-or-nothing: validate every keyword before writing anything.
        for obs in &observations {
            if !tables.keywords.contains_key(&obs.keyword_id) {
                return Err(StoreError::KeywordNotFound(obs.keyword_id));
            }
        }

        let written = observations.len();
        for obs in observations {
            tables.observations.push(RankingObservation {
                id: Uuid::new_v4(),
                keyword_id: obs.keyword_id,
                run_id: obs.run_id,
                observed_at: obs.observed_at,
                position: Some(obs.position),
                matched_url: Some(obs.matched_url),
            });
        }
        Ok(written)
    }

    async fn set_search_volume(
        &self,
        keyword_id: Uuid,
        volume: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let keyword = tables
            .keywords
            .get_mut(&keyword_id)
            .ok_or(StoreError::KeywordNotFound(keyword_id))?;
        keyword.search_volume = volume;
        keyword.volume_checked_at = Some(checked_at);
        Ok(())
    }
}
