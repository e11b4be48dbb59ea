use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigforge_core::Posting;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::{PostingFilter, PostingStore, StoreError, StoreStats, StoredPosting, UpsertResult};

const POSTING_COLUMNS: &str = "id, source, title, company, location, description, stack, url, \
     posted_at, score, alerted, first_seen_at, last_seen_at";

/// Postgres-backed store. Same-id upserts are serialized with a transaction-scoped
/// advisory lock on the id hash.
#[derive(Debug, Clone)]
pub struct PgPostingStore {
    pool: PgPool,
}

impl PgPostingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_stored(row: &PgRow) -> Result<StoredPosting, StoreError> {
    let id: String = row.try_get("id")?;
    let score: i16 = row.try_get("score")?;
    let score = u8::try_from(score).map_err(|_| StoreError::Corrupt {
        id: id.clone(),
        message: format!("score {score} out of range"),
    })?;
    let stack: Vec<String> = row.try_get("stack")?;
    Ok(StoredPosting {
        posting: Posting {
            id,
            source: row.try_get("source")?,
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            stack: stack.into_iter().collect(),
            url: row.try_get("url")?,
            posted_at: row.try_get::<DateTime<Utc>, _>("posted_at")?,
            score,
            alerted: row.try_get("alerted")?,
        },
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

#[async_trait]
impl PostingStore for PgPostingStore {
    async fn upsert(&self, posting: &Posting) -> Result<UpsertResult, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&posting.id)
            .execute(&mut *tx)
            .await?;

        let previous: Option<bool> =
            sqlx::query_scalar("SELECT alerted FROM postings WHERE id = $1")
                .bind(&posting.id)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            "INSERT INTO postings (id, source, title, company, location, description, stack, url, \
                 posted_at, score, alerted, first_seen_at, last_seen_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) \
             ON CONFLICT (id) DO UPDATE SET \
                 source = EXCLUDED.source, \
                 title = EXCLUDED.title, \
                 company = EXCLUDED.company, \
                 location = EXCLUDED.location, \
                 description = EXCLUDED.description, \
                 stack = EXCLUDED.stack, \
                 url = EXCLUDED.url, \
                 posted_at = EXCLUDED.posted_at, \
                 score = EXCLUDED.score, \
                 alerted = postings.alerted OR EXCLUDED.alerted, \
                 last_seen_at = EXCLUDED.last_seen_at",
        )
        .bind(&posting.id)
        .bind(&posting.source)
        .bind(&posting.title)
        .bind(&posting.company)
        .bind(&posting.location)
        .bind(&posting.description)
        .bind(posting.stack.iter().cloned().collect::<Vec<String>>())
        .bind(&posting.url)
        .bind(posting.posted_at)
        .bind(i16::from(posting.score))
        .bind(posting.alerted)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(UpsertResult {
            is_new: previous.is_none(),
            previously_alerted: previous.unwrap_or(false),
        })
    }

    async fn mark_alerted(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE postings SET alerted = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, StoreError> {
        let sql = format!("SELECT {POSTING_COLUMNS} FROM postings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_stored).transpose()
    }

    async fn list(&self, filter: &PostingFilter) -> Result<Vec<StoredPosting>, StoreError> {
        let sql = format!(
            "SELECT {POSTING_COLUMNS} FROM postings \
             WHERE ($1::smallint IS NULL OR score >= $1) \
               AND ($2::text IS NULL OR location ILIKE $2 ESCAPE '\\') \
               AND ($3::text IS NULL OR company ILIKE $3 ESCAPE '\\') \
               AND ($4::text IS NULL OR source = $4) \
             ORDER BY score DESC, posted_at DESC, id ASC \
             LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.min_score.map(i16::from))
            .bind(filter.location.as_deref().map(contains_pattern))
            .bind(filter.company.as_deref().map(contains_pattern))
            .bind(&filter.source)
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_stored).collect()
    }

    async fn stats(&self, alert_threshold: u8) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE score >= $1) AS high_score, \
                    COUNT(*) FILTER (WHERE alerted) AS alerted \
             FROM postings",
        )
        .bind(i16::from(alert_threshold))
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let high_score: i64 = row.try_get("high_score")?;
        let alerted: i64 = row.try_get("alerted")?;
        Ok(StoreStats {
            total: total as usize,
            high_score: high_score as usize,
            alerted: alerted as usize,
        })
    }
}

/// `%needle%` with LIKE metacharacters escaped, so filters match literally like
/// [`PostingFilter::matches`].
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    // Runs only when a scratch database is provided.
    async fn scratch_store() -> Option<PgPostingStore> {
        let url = std::env::var("SIGFORGE_TEST_DATABASE_URL").ok()?;
        let store = PgPostingStore::connect(&url).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(contains_pattern("remote"), "%remote%");
        assert_eq!(contains_pattern("100%_off"), "%100\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[tokio::test]
    async fn upsert_round_trip_against_scratch_database() {
        let Some(store) = scratch_store().await else {
            return;
        };
        let id = format!("pg-test:{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let posting = Posting {
            id: id.clone(),
            source: "fixture".into(),
            title: "Rust Engineer".into(),
            company: "Acme".into(),
            location: "Remote".into(),
            description: String::new(),
            stack: ["rust".to_string()].into_iter().collect(),
            url: "https://acme.test/rust".into(),
            posted_at: Utc::now(),
            score: 88,
            alerted: false,
        };
        assert!(store.upsert(&posting).await.unwrap().is_new);
        store.mark_alerted(&id).await.unwrap();
        let again = store.upsert(&posting).await.unwrap();
        assert!(!again.is_new);
        assert!(again.previously_alerted);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.posting.alerted);
        assert_eq!(stored.posting.stack.len(), 1);
    }
}
