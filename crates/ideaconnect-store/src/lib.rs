//! Persistence seam for the IdeaConnect sync pipeline.
//!
//! The relational store itself is an external collaborator; the pipeline only
//! talks to it through [`IdeaStore`]. Two implementations live here: a
//! Postgres-backed one used in deployment and an in-memory one for tests and
//! local demos.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ideaconnect_core::{IdeaEngagement, MarketSize, PersistedIdea};
use sqlx::{postgres::PgRow, PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ideaconnect-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("idea with source identifier {0} already exists")]
    DuplicateSourceIdentifier(String),
    #[error("no idea with id {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

/// Insert payload for a newly reconciled idea. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdea {
    pub source_identifier: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub skills: Vec<String>,
    pub difficulty_level: Option<u8>,
    pub market_size: Option<MarketSize>,
    pub source_url: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Every read and write the sync pipeline performs against the idea store.
#[async_trait]
pub trait IdeaStore: Send + Sync {
    /// Exact lookup by the external source identifier.
    async fn find_by_source_identifier(
        &self,
        source_identifier: &str,
    ) -> Result<Option<PersistedIdea>, StoreError>;

    /// Case-insensitive substring lookup on title. Returns the first match;
    /// the reconciler confirms it with a description-prefix check.
    async fn find_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<PersistedIdea>, StoreError>;

    async fn insert(&self, idea: NewIdea) -> Result<PersistedIdea, StoreError>;

    /// Clears `is_featured` on every currently-featured record and returns
    /// how many were cleared.
    async fn clear_featured(&self) -> Result<u64, StoreError>;

    async fn mark_featured(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn featured(&self) -> Result<Option<PersistedIdea>, StoreError>;

    /// Most recently synced record whose source identifier starts with
    /// `prefix` and that was synced at or after `since`.
    async fn latest_with_identifier_prefix_since(
        &self,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError>;

    /// Records synced at or after `since`, joined with engagement counters.
    async fn engagement_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IdeaEngagement>, StoreError>;

    /// Most recently synced record at or after `since`.
    async fn most_recent_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError>;

    /// Maintenance operation: collapse records sharing a lowercased title,
    /// keeping the earliest-synced one. Returns the number deleted.
    async fn delete_duplicate_titles(&self) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Engagement {
    interests: i64,
    discussions: i64,
}

/// In-memory [`IdeaStore`] for tests and local demos. Insertion order is
/// preserved so duplicate cleanup keeps the earliest record, mirroring the
/// Postgres implementation.
#[derive(Default)]
pub struct MemoryIdeaStore {
    ideas: Mutex<Vec<PersistedIdea>>,
    engagement: Mutex<HashMap<Uuid, Engagement>>,
}

impl MemoryIdeaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Test helper: set the engagement counters for a persisted idea.
    pub async fn set_engagement(&self, id: Uuid, interests: i64, discussions: i64) {
        self.engagement.lock().await.insert(
            id,
            Engagement {
                interests,
                discussions,
            },
        );
    }

    pub async fn all(&self) -> Vec<PersistedIdea> {
        self.ideas.lock().await.clone()
    }
}

#[async_trait]
impl IdeaStore for MemoryIdeaStore {
    async fn find_by_source_identifier(
        &self,
        source_identifier: &str,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let ideas = self.ideas.lock().await;
        Ok(ideas
            .iter()
            .find(|i| i.source_identifier.as_deref() == Some(source_identifier))
            .cloned())
    }

    async fn find_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let needle = fragment.to_lowercase();
        let ideas = self.ideas.lock().await;
        Ok(ideas
            .iter()
            .find(|i| i.title.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn insert(&self, idea: NewIdea) -> Result<PersistedIdea, StoreError> {
        let mut ideas = self.ideas.lock().await;
        if let Some(source_identifier) = &idea.source_identifier {
            if ideas
                .iter()
                .any(|i| i.source_identifier.as_deref() == Some(source_identifier))
            {
                return Err(StoreError::DuplicateSourceIdentifier(
                    source_identifier.clone(),
                ));
            }
        }
        let persisted = PersistedIdea {
            id: Uuid::new_v4(),
            source_identifier: idea.source_identifier,
            title: idea.title,
            description: idea.description,
            category: idea.category,
            skills: idea.skills,
            difficulty_level: idea.difficulty_level,
            market_size: idea.market_size,
            source_url: idea.source_url,
            is_featured: false,
            featured_date: None,
            synced_at: idea.synced_at,
        };
        ideas.push(persisted.clone());
        Ok(persisted)
    }

    async fn clear_featured(&self) -> Result<u64, StoreError> {
        let mut ideas = self.ideas.lock().await;
        let mut cleared = 0;
        for idea in ideas.iter_mut().filter(|i| i.is_featured) {
            idea.is_featured = false;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn mark_featured(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut ideas = self.ideas.lock().await;
        let idea = ideas
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::NotFound(id))?;
        idea.is_featured = true;
        idea.featured_date = Some(at);
        Ok(())
    }

    async fn featured(&self) -> Result<Option<PersistedIdea>, StoreError> {
        let ideas = self.ideas.lock().await;
        Ok(ideas.iter().find(|i| i.is_featured).cloned())
    }

    async fn latest_with_identifier_prefix_since(
        &self,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let ideas = self.ideas.lock().await;
        Ok(ideas
            .iter()
            .filter(|i| {
                i.synced_at >= since
                    && i.source_identifier
                        .as_deref()
                        .is_some_and(|s| s.starts_with(prefix))
            })
            .max_by_key(|i| i.synced_at)
            .cloned())
    }

    async fn engagement_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IdeaEngagement>, StoreError> {
        let ideas = self.ideas.lock().await;
        let engagement = self.engagement.lock().await;
        Ok(ideas
            .iter()
            .filter(|i| i.synced_at >= since)
            .map(|i| {
                let counts = engagement.get(&i.id).copied().unwrap_or_default();
                IdeaEngagement {
                    idea: i.clone(),
                    interest_count: counts.interests,
                    discussion_count: counts.discussions,
                }
            })
            .collect())
    }

    async fn most_recent_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let ideas = self.ideas.lock().await;
        Ok(ideas
            .iter()
            .filter(|i| i.synced_at >= since)
            .max_by_key(|i| i.synced_at)
            .cloned())
    }

    async fn delete_duplicate_titles(&self) -> Result<u64, StoreError> {
        let mut ideas = self.ideas.lock().await;
        let mut keep_by_title: HashMap<String, Uuid> = HashMap::new();
        let mut ordered = ideas.clone();
        ordered.sort_by_key(|i| i.synced_at);
        for idea in &ordered {
            keep_by_title
                .entry(idea.title.to_lowercase())
                .or_insert(idea.id);
        }
        let before = ideas.len();
        ideas.retain(|i| keep_by_title.get(&i.title.to_lowercase()) == Some(&i.id));
        Ok((before - ideas.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

/// Postgres-backed [`IdeaStore`]. Skills are stored as a JSON array and the
/// market size as its text name; engagement counts come from the `interests`
/// and `discussions` tables owned by the web application.
#[derive(Clone)]
pub struct PgIdeaStore {
    pool: PgPool,
}

impl PgIdeaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        info!("connected to idea store");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_idea(row: &PgRow) -> Result<PersistedIdea, StoreError> {
    let skills_json: serde_json::Value = row.try_get("skills")?;
    let skills = skills_json
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default();
    let market_size: Option<String> = row.try_get("market_size")?;
    let difficulty_level: Option<i32> = row.try_get("difficulty_level")?;
    Ok(PersistedIdea {
        id: row.try_get("id")?,
        source_identifier: row.try_get("source_identifier")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        skills,
        difficulty_level: difficulty_level.map(|d| d.clamp(0, u8::MAX as i32) as u8),
        market_size: market_size.as_deref().and_then(MarketSize::from_str_opt),
        source_url: row.try_get("source_url")?,
        is_featured: row.try_get("is_featured")?,
        featured_date: row.try_get("featured_date")?,
        synced_at: row.try_get("synced_at")?,
    })
}

const IDEA_COLUMNS: &str = "id, source_identifier, title, description, category, skills, \
     difficulty_level, market_size, source_url, is_featured, featured_date, synced_at";

#[async_trait]
impl IdeaStore for PgIdeaStore {
    async fn find_by_source_identifier(
        &self,
        source_identifier: &str,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {IDEA_COLUMNS} FROM ideas WHERE source_identifier = $1"
        ))
        .bind(source_identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_idea).transpose()
    }

    async fn find_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let pattern = format!(
            "%{}%",
            fragment.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let row = sqlx::query(&format!(
            "SELECT {IDEA_COLUMNS} FROM ideas WHERE title ILIKE $1 LIMIT 1"
        ))
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_idea).transpose()
    }

    async fn insert(&self, idea: NewIdea) -> Result<PersistedIdea, StoreError> {
        let skills = serde_json::Value::from(idea.skills.clone());
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ideas
                (id, source_identifier, title, description, category, skills,
                 difficulty_level, market_size, source_url, is_featured, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10)
            RETURNING {IDEA_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&idea.source_identifier)
        .bind(&idea.title)
        .bind(&idea.description)
        .bind(&idea.category)
        .bind(skills)
        .bind(idea.difficulty_level.map(i32::from))
        .bind(idea.market_size.map(|m| m.as_str()))
        .bind(&idea.source_url)
        .bind(idea.synced_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match (&err, &idea.source_identifier) {
            (sqlx::Error::Database(db), Some(source_identifier))
                if db.is_unique_violation() =>
            {
                StoreError::DuplicateSourceIdentifier(source_identifier.clone())
            }
            _ => StoreError::Database(err),
        })?;
        row_to_idea(&row)
    }

    async fn clear_featured(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE ideas SET is_featured = FALSE WHERE is_featured = TRUE",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_featured(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE ideas SET is_featured = TRUE, featured_date = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn featured(&self) -> Result<Option<PersistedIdea>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {IDEA_COLUMNS} FROM ideas WHERE is_featured = TRUE LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_idea).transpose()
    }

    async fn latest_with_identifier_prefix_since(
        &self,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let row = sqlx::query(&format!(
            r#"
            SELECT {IDEA_COLUMNS} FROM ideas
             WHERE source_identifier LIKE $1
               AND synced_at >= $2
             ORDER BY synced_at DESC
             LIMIT 1
            "#
        ))
        .bind(pattern)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_idea).transpose()
    }

    async fn engagement_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IdeaEngagement>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {IDEA_COLUMNS},
                   (SELECT COUNT(*) FROM interests t WHERE t.idea_id = ideas.id) AS interest_count,
                   (SELECT COUNT(*) FROM discussions d WHERE d.idea_id = ideas.id) AS discussion_count
              FROM ideas
             WHERE synced_at >= $1
            "#
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(IdeaEngagement {
                idea: row_to_idea(&row)?,
                interest_count: row.try_get("interest_count")?,
                discussion_count: row.try_get("discussion_count")?,
            });
        }
        Ok(out)
    }

    async fn most_recent_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<PersistedIdea>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {IDEA_COLUMNS} FROM ideas
             WHERE synced_at >= $1
             ORDER BY synced_at DESC
             LIMIT 1
            "#
        ))
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_idea).transpose()
    }

    async fn delete_duplicate_titles(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM ideas
             WHERE id IN (
                SELECT id FROM (
                    SELECT id,
                           ROW_NUMBER() OVER (
                               PARTITION BY LOWER(title)
                               ORDER BY synced_at ASC
                           ) AS rn
                      FROM ideas
                ) ranked
                WHERE ranked.rn > 1
             )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ideaconnect_core::DEFAULT_CATEGORY;

    fn new_idea(source_identifier: Option<&str>, title: &str, synced_at: DateTime<Utc>) -> NewIdea {
        NewIdea {
            source_identifier: source_identifier.map(ToString::to_string),
            title: title.to_string(),
            description: format!("{title} description padded out well past fifty characters."),
            category: DEFAULT_CATEGORY.to_string(),
            skills: vec![],
            difficulty_level: None,
            market_size: None,
            source_url: None,
            synced_at,
        }
    }

    #[tokio::test]
    async fn source_identifier_is_unique() {
        let store = MemoryIdeaStore::new();
        let now = Utc::now();
        store
            .insert(new_idea(Some("idea-of-the-day-2026-08-29"), "First Idea Title", now))
            .await
            .unwrap();
        let err = store
            .insert(new_idea(Some("idea-of-the-day-2026-08-29"), "Second Idea Title", now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSourceIdentifier(_)));
    }

    #[tokio::test]
    async fn title_fragment_lookup_is_case_insensitive() {
        let store = MemoryIdeaStore::new();
        store
            .insert(new_idea(Some("slug-a"), "Smart Home Energy Optimizer", Utc::now()))
            .await
            .unwrap();
        let found = store
            .find_by_title_fragment("smart home energy")
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(store.find_by_title_fragment("vertical farming").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_then_mark_keeps_single_featured_record() {
        let store = MemoryIdeaStore::new();
        let now = Utc::now();
        let a = store.insert(new_idea(Some("a"), "Idea Alpha Title", now)).await.unwrap();
        let b = store.insert(new_idea(Some("b"), "Idea Beta Title", now)).await.unwrap();
        store.mark_featured(a.id, now).await.unwrap();
        assert_eq!(store.clear_featured().await.unwrap(), 1);
        store.mark_featured(b.id, now).await.unwrap();
        let featured = store.featured().await.unwrap().unwrap();
        assert_eq!(featured.id, b.id);
        let flagged = store
            .all()
            .await
            .into_iter()
            .filter(|i| i.is_featured)
            .count();
        assert_eq!(flagged, 1);
    }

    #[tokio::test]
    async fn duplicate_cleanup_keeps_earliest_record() {
        let store = MemoryIdeaStore::new();
        let base = Utc::now();
        let first = store
            .insert(new_idea(Some("a"), "Meal Planning Service", base - Duration::days(2)))
            .await
            .unwrap();
        store
            .insert(new_idea(Some("b"), "meal planning service", base))
            .await
            .unwrap();
        store
            .insert(new_idea(Some("c"), "Fitness Tracking App", base))
            .await
            .unwrap();
        let deleted = store.delete_duplicate_titles().await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.all().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|i| i.id == first.id));
    }

    #[tokio::test]
    async fn prefix_lookup_honors_window_and_recency() {
        let store = MemoryIdeaStore::new();
        let now = Utc::now();
        store
            .insert(new_idea(
                Some("idea-of-the-day-2026-08-20"),
                "Older Daily Feature Idea",
                now - Duration::days(9),
            ))
            .await
            .unwrap();
        let recent = store
            .insert(new_idea(
                Some("idea-of-the-day-2026-08-28"),
                "Recent Daily Feature Idea",
                now - Duration::days(1),
            ))
            .await
            .unwrap();
        let found = store
            .latest_with_identifier_prefix_since("idea-of-the-day-", now - Duration::days(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, recent.id);
    }
}
