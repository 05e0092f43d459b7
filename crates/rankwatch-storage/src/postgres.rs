//! Postgres [`RankStore`] backed by a `sqlx` pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rankwatch_core::{Keyword, KeywordCategory, NewObservation, RankingObservation, Tracker};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::{
    normalize_keyword_text, normalize_target_url, schema::SCHEMA, KeywordUpdate, RankStore,
    Result, StoreError,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn tracker_from_row(row: &PgRow) -> Result<Tracker> {
    Ok(Tracker {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        language: row.try_get("language")?,
        created_at: row.try_get("created_at")?,
    })
}

fn keyword_from_row(row: &PgRow) -> Result<Keyword> {
    let category: Option<String> = row.try_get("category")?;
    let category = category
        .map(|c| {
            c.parse::<KeywordCategory>()
                .map_err(|e| StoreError::Backend(Box::new(e)))
        })
        .transpose()?;

    Ok(Keyword {
        id: row.try_get("id")?,
        tracker_id: row.try_get("tracker_id")?,
        text: row.try_get("keyword_text")?,
        target_url: row.try_get("target_url")?,
        category,
        search_volume: row.try_get("search_volume")?,
        volume_checked_at: row.try_get("volume_checked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn observation_from_row(row: &PgRow) -> Result<RankingObservation> {
    let position: Option<i32> = row.try_get("position")?;
    Ok(RankingObservation {
        id: row.try_get("id")?,
        keyword_id: row.try_get("keyword_id")?,
        run_id: row.try_get("run_id")?,
        observed_at: row.try_get("observed_at")?,
        position: position.map(|p| p as u32),
        matched_url: row.try_get("matched_url")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RankStore for PgStore {
    async fn create_tracker(&self, name: &str, location: &str, language: &str) -> Result<Tracker> {
        let tracker = Tracker {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location: location.to_string(),
            language: language.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO trackers (id, name, location, language, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tracker.id)
        .bind(&tracker.name)
        .bind(&tracker.location)
        .bind(&tracker.language)
        .bind(tracker.created_at)
        .execute(&self.pool)
        .await?;
        Ok(tracker)
    }

    async fn get_tracker(&self, id: Uuid) -> Result<Option<Tracker>> {
        let row = sqlx::query(
            "SELECT id, name, location, language, created_at FROM trackers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tracker_from_row).transpose()
    }

    async fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let rows = sqlx::query(
            "SELECT id, name, location, language, created_at FROM trackers ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tracker_from_row).collect()
    }

    async fn add_keyword(
        &self,
        tracker_id: Uuid,
        text: &str,
        category: Option<KeywordCategory>,
        target_url: Option<String>,
    ) -> Result<Keyword> {
        let text = normalize_keyword_text(text)?;

        if self.get_tracker(tracker_id).await?.is_none() {
            return Err(StoreError::TrackerNotFound(tracker_id));
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

        let insert = sqlx::query(
            "INSERT INTO keywords (id, tracker_id, keyword_text, target_url, category, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(keyword.id)
        .bind(keyword.tracker_id)
        .bind(&keyword.text)
        .bind(&keyword.target_url)
        .bind(keyword.category.map(|c| c.as_str()))
        .bind(keyword.created_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(keyword),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateKeyword),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_keyword(&self, id: Uuid, update: KeywordUpdate) -> Result<Keyword> {
        let current = self
            .get_keyword(id)
            .await?
            .ok_or(StoreError::KeywordNotFound(id))?;

        let category = match update.category {
            Some(category) => category,
            None => current.category,
        };
        let target_url = match update.target_url {
            Some(target_url) => normalize_target_url(target_url),
            None => current.target_url,
        };

        sqlx::query("UPDATE keywords SET category = $2, target_url = $3 WHERE id = $1")
            .bind(id)
            .bind(category.map(|c| c.as_str()))
            .bind(&target_url)
            .execute(&self.pool)
            .await?;

        Ok(Keyword {
            category,
            target_url,
            ..current
        })
    }

    async fn delete_keyword(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM keywords WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::KeywordNotFound(id));
        }
        Ok(())
    }

    async fn get_keyword(&self, id: Uuid) -> Result<Option<Keyword>> {
        let row = sqlx::query(
            "SELECT id, tracker_id, keyword_text, target_url, category,
                    search_volume, volume_checked_at, created_at
               FROM keywords WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(keyword_from_row).transpose()
    }

    async fn list_keywords(&self, tracker_id: Uuid) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            "SELECT id, tracker_id, keyword_text, target_url, category,
                    search_volume, volume_checked_at, created_at
               FROM keywords
              WHERE tracker_id = $1
              ORDER BY created_at, keyword_text",
        )
        .bind(tracker_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn keyword_history(
        &self,
        keyword_id: Uuid,
        limit: usize,
    ) -> Result<Vec<RankingObservation>> {
        let rows = sqlx::query(
            "SELECT id, keyword_id, run_id, observed_at, position, matched_url
               FROM ranking_observations
              WHERE keyword_id = $1
              ORDER BY observed_at DESC
              LIMIT $2",
        )
        .bind(keyword_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(observation_from_row).collect()
    }

    async fn latest_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>> {
        Ok(self
            .keyword_history(keyword_id, 1)
            .await?
            .into_iter()
            .next())
    }

    async fn first_observation(&self, keyword_id: Uuid) -> Result<Option<RankingObservation>> {
        let row = sqlx::query(
            "SELECT id, keyword_id, run_id, observed_at, position, matched_url
               FROM ranking_observations
              WHERE keyword_id = $1
              ORDER BY observed_at ASC
              LIMIT 1",
        )
        .bind(keyword_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(observation_from_row).transpose()
    }

    async fn append_observations(&self, observations: Vec<NewObservation>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let written = observations.len();
        for obs in observations {
            sqlx::query(
                "INSERT INTO ranking_observations
                     (id, keyword_id, run_id, observed_at, position, matched_url)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(obs.keyword_id)
            .bind(obs.run_id)
            .bind(obs.observed_at)
            .bind(obs.position as i32)
            .bind(&obs.matched_url)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn set_search_volume(
        &self,
        keyword_id: Uuid,
        volume: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE keywords SET search_volume = $2, volume_checked_at = $3 WHERE id = $1",
        )
        .bind(keyword_id)
        .bind(volume)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::KeywordNotFound(keyword_id));
        }
        Ok(())
    }
}
