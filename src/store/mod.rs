//! # Ingest gateway
//! SQLite persistence boundary shared by the collector and the analysis engine.
//!
//! Write contract:
//! - `save` inserts keyed on `(source, source_id)`; a repeat is silently dropped.
//! - `fetch_unprocessed` is a snapshot read, not a lease.
//! - `mark_processed` is a single idempotent `UPDATE`.
//! - `record_failure` spends one unit of the per-item retry budget.
//!
//! No retries happen here; callers decide.

mod query;

pub use query::{AlertFilter, AnalysisFilter, NewsFilter, Page};

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{
    Alert, AnalysisResult, Impact, RawItem, Sentiment, Severity, StockImpact, StoredItem,
    UnprocessedStats,
};

/// Default number of failed analyses after which an item is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const SCHEMA: &str = include_str!("schema.sql");
const LAST_ERROR_MAX_CHARS: usize = 500;

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
    max_attempts: u32,
}

impl Store {
    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database; handy for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    /// Items that failed this many times are no longer returned for processing.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        // sqlx runs one statement per query
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ------------------------------------------------------------
    // Gateway operations
    // ------------------------------------------------------------

    /// Insert `item` unless `(source, identity)` already exists.
    /// Returns `Ok(false)` for a duplicate; errors only on storage failure.
    pub async fn save(&self, item: &RawItem) -> Result<bool, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO news_items
                (id, source, source_id, author, title, content, url, published_at, collected_at, processed, attempts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)
            ON CONFLICT (source, source_id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&item.source)
        .bind(item.identity())
        .bind(&item.author)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.url)
        .bind(item.published_at)
        .bind(item.collected_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(source = %item.source, source_id = %item.source_id, "duplicate item dropped");
        }
        Ok(inserted)
    }

    /// Up to `limit` unprocessed items within the retry budget, newest published first.
    pub async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        let rows = sqlx::query_as::<_, NewsRow>(
            r#"
            SELECT * FROM news_items
            WHERE processed = 0 AND attempts < ?
            ORDER BY published_at DESC
            LIMIT ?
            "#,
        )
        .bind(self.max_attempts as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredItem::from).collect())
    }

    /// Flip the processed flag. Repeating it is a no-op; an unknown id is `NotFound`.
    pub async fn mark_processed(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE news_items SET processed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "news item",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Spend one attempt of the item's retry budget. Returns the new attempt count.
    pub async fn record_failure(&self, id: &str, error: &str) -> Result<u32, StoreError> {
        let truncated: String = error.chars().take(LAST_ERROR_MAX_CHARS).collect();
        let attempts: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE news_items
            SET attempts = attempts + 1, last_error = ?
            WHERE id = ? AND processed = 0
            RETURNING attempts
            "#,
        )
        .bind(truncated)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some((n,)) => Ok(n.max(0) as u32),
            None => Err(StoreError::NotFound {
                entity: "unprocessed news item",
                id: id.to_string(),
            }),
        }
    }

    pub async fn save_analysis(&self, analysis: &AnalysisResult) -> Result<(), StoreError> {
        let stocks = serde_json::to_string(&analysis.stocks)?;
        let related = serde_json::to_string(&analysis.related_stocks)?;

        sqlx::query(
            r#"
            INSERT INTO analyses
                (id, news_id, sentiment, sentiment_score, impact_level, summary, confidence,
                 stocks, related_stocks, raw_response, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.news_id)
        .bind(analysis.sentiment.as_str())
        .bind(analysis.sentiment_score)
        .bind(analysis.impact.as_str())
        .bind(&analysis.summary)
        .bind(analysis.confidence)
        .bind(stocks)
        .bind(related)
        .bind(&analysis.raw_response)
        .bind(analysis.analyzed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist an alert. At most one alert exists per analysis; a second one
    /// for the same analysis is dropped and `Ok(false)` returned.
    pub async fn save_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        let stocks = serde_json::to_string(&alert.stocks)?;
        let result = sqlx::query(
            r#"
            INSERT INTO alerts
                (id, news_id, analysis_id, severity, title, message, stocks, created_at, acknowledged)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (analysis_id) DO NOTHING
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.news_id)
        .bind(&alert.analysis_id)
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(stocks)
        .bind(alert.created_at)
        .bind(alert.acknowledged as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Count of retryable unprocessed items and the oldest collection time among them.
    pub async fn unprocessed_stats(&self) -> Result<UnprocessedStats, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM news_items WHERE processed = 0 AND attempts < ?",
        )
        .bind(self.max_attempts as i64)
        .fetch_one(&self.pool)
        .await?;

        let oldest: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT collected_at FROM news_items
            WHERE processed = 0 AND attempts < ?
            ORDER BY collected_at ASC
            LIMIT 1
            "#,
        )
        .bind(self.max_attempts as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(UnprocessedStats {
            count: count.max(0) as u64,
            oldest_collected_at: oldest.map(|(t,)| t),
        })
    }
}

// ------------------------------------------------------------
// Row mapping
// ------------------------------------------------------------

#[derive(sqlx::FromRow)]
pub(crate) struct NewsRow {
    id: String,
    source: String,
    source_id: String,
    author: String,
    title: String,
    content: String,
    url: String,
    published_at: DateTime<Utc>,
    collected_at: DateTime<Utc>,
    processed: i64,
    attempts: i64,
    last_error: Option<String>,
}

impl From<NewsRow> for StoredItem {
    fn from(r: NewsRow) -> Self {
        Self {
            id: r.id,
            source: r.source,
            source_id: r.source_id,
            author: r.author,
            title: r.title,
            content: r.content,
            url: r.url,
            published_at: r.published_at,
            collected_at: r.collected_at,
            processed: r.processed != 0,
            attempts: r.attempts.max(0) as u32,
            last_error: r.last_error,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AnalysisRow {
    id: String,
    news_id: String,
    sentiment: String,
    sentiment_score: f64,
    impact_level: String,
    summary: String,
    confidence: f64,
    stocks: String,
    related_stocks: String,
    raw_response: String,
    analyzed_at: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for AnalysisResult {
    type Error = StoreError;

    fn try_from(r: AnalysisRow) -> Result<Self, Self::Error> {
        let stocks: Vec<StockImpact> = serde_json::from_str(&r.stocks)?;
        let related_stocks: Vec<String> = serde_json::from_str(&r.related_stocks)?;
        Ok(Self {
            id: r.id,
            news_id: r.news_id,
            sentiment: Sentiment::from_label(&r.sentiment),
            sentiment_score: r.sentiment_score,
            impact: Impact::from_label(&r.impact_level),
            summary: r.summary,
            confidence: r.confidence,
            stocks,
            related_stocks,
            raw_response: r.raw_response,
            analyzed_at: r.analyzed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AlertRow {
    id: String,
    news_id: String,
    analysis_id: String,
    severity: String,
    title: String,
    message: String,
    stocks: String,
    created_at: DateTime<Utc>,
    acknowledged: i64,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(r: AlertRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            news_id: r.news_id,
            analysis_id: r.analysis_id,
            severity: Severity::from_label(&r.severity),
            title: r.title,
            message: r.message,
            stocks: serde_json::from_str(&r.stocks)?,
            created_at: r.created_at,
            acknowledged: r.acknowledged != 0,
        })
    }
}
