//! Read-only query surface used by the REST layer.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::{AlertRow, AnalysisRow, NewsRow, Store};
use crate::error::StoreError;
use crate::models::{
    Alert, AnalysisResult, Impact, Report, Sentiment, Severity, StockSentiment, StoredItem,
};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Clamp to `1..=MAX_PAGE_LIMIT`, defaulting to `DEFAULT_PAGE_LIMIT`.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewsFilter {
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    pub impact: Option<Impact>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
}

fn push_news_filter(qb: &mut QueryBuilder<'_, Sqlite>, f: &NewsFilter) {
    if let Some(source) = &f.source {
        qb.push(" AND source = ").push_bind(source.clone());
    }
    if let Some(since) = f.since {
        qb.push(" AND published_at >= ").push_bind(since);
    }
    if let Some(until) = f.until {
        qb.push(" AND published_at <= ").push_bind(until);
    }
}

fn push_analysis_filter(qb: &mut QueryBuilder<'_, Sqlite>, f: &AnalysisFilter) {
    if let Some(impact) = f.impact {
        qb.push(" AND impact_level = ").push_bind(impact.as_str());
    }
    if let Some(since) = f.since {
        qb.push(" AND analyzed_at >= ").push_bind(since);
    }
    if let Some(until) = f.until {
        qb.push(" AND analyzed_at <= ").push_bind(until);
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, page: Page) {
    qb.push(" LIMIT ")
        .push_bind(page.limit as i64)
        .push(" OFFSET ")
        .push_bind(page.offset as i64);
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: String,
    #[sqlx(rename = "type")]
    report_type: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    summary: String,
    payload: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(r: ReportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            report_type: r.report_type,
            start_time: r.start_time,
            end_time: r.end_time,
            summary: r.summary,
            payload: serde_json::from_str(&r.payload)?,
            created_at: r.created_at,
        })
    }
}

impl Store {
    pub async fn list_news(
        &self,
        filter: &NewsFilter,
        page: Page,
    ) -> Result<(Vec<StoredItem>, u64), StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM news_items WHERE 1 = 1");
        push_news_filter(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM news_items WHERE 1 = 1");
        push_news_filter(&mut qb, filter);
        qb.push(" ORDER BY published_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<NewsRow> = qb.build_query_as().fetch_all(self.pool()).await?;

        Ok((rows.into_iter().map(StoredItem::from).collect(), total.max(0) as u64))
    }

    pub async fn get_news(&self, id: &str) -> Result<Option<StoredItem>, StoreError> {
        let row = sqlx::query_as::<_, NewsRow>("SELECT * FROM news_items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(StoredItem::from))
    }

    pub async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
        page: Page,
    ) -> Result<(Vec<AnalysisResult>, u64), StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM analyses WHERE 1 = 1");
        push_analysis_filter(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM analyses WHERE 1 = 1");
        push_analysis_filter(&mut qb, filter);
        qb.push(" ORDER BY analyzed_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<AnalysisRow> = qb.build_query_as().fetch_all(self.pool()).await?;

        let items = rows
            .into_iter()
            .map(AnalysisResult::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total.max(0) as u64))
    }

    pub async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        let row = sqlx::query_as::<_, AnalysisRow>("SELECT * FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(AnalysisResult::try_from).transpose()
    }

    /// Analyses recorded for one news item (normally exactly one).
    pub async fn analyses_for_news(&self, news_id: &str) -> Result<Vec<AnalysisResult>, StoreError> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            "SELECT * FROM analyses WHERE news_id = ? ORDER BY analyzed_at DESC",
        )
        .bind(news_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(AnalysisResult::try_from).collect()
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        page: Page,
    ) -> Result<(Vec<Alert>, u64), StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM alerts WHERE 1 = 1");
        if let Some(sev) = filter.severity {
            count.push(" AND severity = ").push_bind(sev.as_str());
        }
        let (total,): (i64,) = count.build_query_as().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM alerts WHERE 1 = 1");
        if let Some(sev) = filter.severity {
            qb.push(" AND severity = ").push_bind(sev.as_str());
        }
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<AlertRow> = qb.build_query_as().fetch_all(self.pool()).await?;

        let items = rows
            .into_iter()
            .map(Alert::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total.max(0) as u64))
    }

    pub async fn list_reports(
        &self,
        report_type: Option<&str>,
        page: Page,
    ) -> Result<(Vec<Report>, u64), StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM reports WHERE 1 = 1");
        if let Some(t) = report_type {
            count.push(" AND type = ").push_bind(t.to_string());
        }
        let (total,): (i64,) = count.build_query_as().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM reports WHERE 1 = 1");
        if let Some(t) = report_type {
            qb.push(" AND type = ").push_bind(t.to_string());
        }
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<ReportRow> = qb.build_query_as().fetch_all(self.pool()).await?;

        let items = rows
            .into_iter()
            .map(Report::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total.max(0) as u64))
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(Report::try_from).transpose()
    }

    pub async fn latest_report(&self) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(
            "SELECT * FROM reports ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        row.map(Report::try_from).transpose()
    }

    /// Sentiment over analyses from the last `hours` that list `symbol` as related.
    pub async fn stock_sentiment(
        &self,
        symbol: &str,
        hours: u32,
    ) -> Result<StockSentiment, StoreError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let hours = if hours == 0 { 24 } else { hours };
        let cutoff = Utc::now() - Duration::hours(hours as i64);
        // related_stocks is a JSON array of strings; match the quoted symbol
        let pattern = format!("%\"{symbol}\"%");

        let rows = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT * FROM analyses
            WHERE related_stocks LIKE ? AND analyzed_at > ?
            ORDER BY analyzed_at DESC
            "#,
        )
        .bind(pattern)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        let mut out = StockSentiment {
            symbol,
            total_mentions: 0,
            positive_count: 0,
            negative_count: 0,
            neutral_count: 0,
            overall_score: 0.0,
            recent_news: Vec::new(),
            last_updated: Utc::now(),
        };

        let mut total_score = 0.0;
        for row in rows {
            let a = AnalysisResult::try_from(row)?;
            out.total_mentions += 1;
            total_score += a.sentiment_score;
            match a.sentiment {
                Sentiment::Positive => out.positive_count += 1,
                Sentiment::Negative => out.negative_count += 1,
                Sentiment::Neutral => out.neutral_count += 1,
            }
            if out.recent_news.len() < 5 {
                if let Some(item) = self.get_news(&a.news_id).await? {
                    out.recent_news.push(item);
                }
            }
        }
        if out.total_mentions > 0 {
            out.overall_score = total_score / out.total_mentions as f64;
        }
        Ok(out)
    }
}
