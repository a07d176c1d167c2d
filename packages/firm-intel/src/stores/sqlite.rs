//! SQLite storage implementation.
//!
//! The embedded single-file backend. Good for:
//! - Local development and single-server deployments
//! - Testing with persistent data
//!
//! Uses WAL journaling (single writer, many readers) with a 5 s busy
//! timeout and a small connection cap. Structured values live in single
//! JSON columns; filter predicates use `json_extract`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{IntelError, Result};
use crate::traits::store::{
    url_hash, CacheStore, CheckpointStore, CrawlCacheEntry, DeadLetterStore, FirmCrawlRow,
    FirmStore, RunStore, StoreLifecycle, SyncLogStore,
};
use crate::types::{
    Answer, Checkpoint, ClassifiedPage, Company, DeadLetterEntry, DlqFilter, ErrorType, Firm,
    FirmRun, FirmRunStats, FirmSource, PageType, ResultAnswer, Run, RunError, RunFilter, RunPhase,
    RunResult, RunStatus,
};

fn storage_err(e: impl std::fmt::Display) -> IntelError {
    IntelError::storage(e.to_string())
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IntelError::storage(format!("invalid date {raw}: {e}")))
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a store at the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://./research.db`
    /// - `sqlite::memory:` - ephemeral, for tests
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn execute_schema(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// Row types for sqlx queries

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    company_json: String,
    status: String,
    result_json: Option<String>,
    error_json: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        Ok(Run {
            id: Uuid::parse_str(&self.id).map_err(storage_err)?,
            company: serde_json::from_str(&self.company_json)?,
            status: self.status.parse().map_err(IntelError::storage)?,
            result: self
                .result_json
                .as_deref()
                .map(serde_json::from_str::<RunResult>)
                .transpose()?,
            error: self
                .error_json
                .as_deref()
                .map(serde_json::from_str::<RunError>)
                .transpose()?,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct DeadLetterRow {
    id: String,
    company_json: String,
    error: String,
    error_type: String,
    failed_phase: Option<String>,
    retry_count: i64,
    max_retries: i64,
    next_retry_at: String,
    created_at: String,
    last_failed_at: String,
}

impl DeadLetterRow {
    fn into_entry(self) -> Result<DeadLetterEntry> {
        Ok(DeadLetterEntry {
            id: self.id,
            company: serde_json::from_str(&self.company_json)?,
            error: self.error,
            error_type: self.error_type.parse().map_err(IntelError::storage)?,
            failed_phase: self.failed_phase,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            next_retry_at: parse_rfc3339(&self.next_retry_at)?,
            created_at: parse_rfc3339(&self.created_at)?,
            last_failed_at: parse_rfc3339(&self.last_failed_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct FirmRow {
    firm_id: i64,
    firm_name: String,
    website_url: Option<String>,
    source: String,
    linkedin_url: Option<String>,
    twitter_url: Option<String>,
    facebook_url: Option<String>,
    instagram_url: Option<String>,
    youtube_url: Option<String>,
    crunchbase_url: Option<String>,
    updated_at: String,
}

impl FirmRow {
    fn into_firm(self) -> Result<Firm> {
        let source: FirmSource =
            serde_json::from_value(serde_json::Value::String(self.source.clone()))?;
        Ok(Firm {
            firm_id: self.firm_id,
            name: self.firm_name,
            website_url: self.website_url,
            source,
            linkedin_url: self.linkedin_url,
            twitter_url: self.twitter_url,
            facebook_url: self.facebook_url,
            instagram_url: self.instagram_url,
            youtube_url: self.youtube_url,
            crunchbase_url: self.crunchbase_url,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct FirmRunRow {
    id: i64,
    pe_firm_id: i64,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    stats_json: Option<String>,
    error_message: Option<String>,
}

impl FirmRunRow {
    fn into_run(self) -> Result<FirmRun> {
        Ok(FirmRun {
            id: self.id,
            firm_id: self.pe_firm_id,
            status: self.status.parse().map_err(IntelError::storage)?,
            started_at: parse_rfc3339(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_rfc3339)
                .transpose()?,
            stats: self
                .stats_json
                .as_deref()
                .map(serde_json::from_str::<FirmRunStats>)
                .transpose()?,
            error_message: self.error_message,
        })
    }
}

#[derive(Debug, FromRow)]
struct FirmCrawlRowRaw {
    pe_firm_id: i64,
    url: String,
    page_type: String,
    title: String,
    markdown: String,
    status_code: i64,
    crawled_at: String,
}

impl FirmCrawlRowRaw {
    fn into_row(self) -> Result<FirmCrawlRow> {
        let page_type: PageType = self.page_type.parse().map_err(IntelError::storage)?;
        Ok(FirmCrawlRow {
            firm_id: self.pe_firm_id,
            page: ClassifiedPage {
                url: self.url,
                title: self.title,
                markdown: self.markdown,
                status_code: self.status_code as u16,
                page_type,
            },
            crawled_at: parse_rfc3339(&self.crawled_at)?,
        })
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, company: &Company) -> Result<Run> {
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            company: company.clone(),
            status: RunStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO runs (id, company_json, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(serde_json::to_string(company)?)
        .bind(run.status.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(run)
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("run {run_id}"),
            });
        }
        Ok(())
    }

    async fn update_run_result(&self, run_id: Uuid, result: &RunResult) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE runs SET status = ?, result_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(RunStatus::Complete.as_str())
        .bind(serde_json::to_string(result)?)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if updated.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("run {run_id}"),
            });
        }
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, error: &RunError) -> Result<()> {
        let updated =
            sqlx::query("UPDATE runs SET status = ?, error_json = ?, updated_at = ? WHERE id = ?")
                .bind(RunStatus::Failed.as_str())
                .bind(serde_json::to_string(error)?)
                .bind(Utc::now().to_rfc3339())
                .bind(run_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;

        if updated.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("run {run_id}"),
            });
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT id, company_json, status, result_json, error_json, created_at, updated_at FROM runs WHERE id = ?",
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(RunRow::into_run).transpose()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut sql = String::from(
            "SELECT id, company_json, status, result_json, error_json, created_at, updated_at FROM runs WHERE 1=1",
        );
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.company_url.is_some() {
            sql.push_str(" AND json_extract(company_json, '$.url') = ?");
        }
        if filter.error_category.is_some() {
            sql.push_str(" AND json_extract(error_json, '$.category') = ?");
        }
        if filter.created_after.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, RunRow>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(url) = &filter.company_url {
            query = query.bind(url);
        }
        if let Some(category) = &filter.error_category {
            query = query.bind(category);
        }
        if let Some(after) = filter.created_after {
            query = query.bind(after.to_rfc3339());
        }
        query = query
            .bind(filter.effective_limit() as i64)
            .bind(filter.offset.unwrap_or(0) as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    async fn create_phase(&self, run_id: Uuid, name: &str) -> Result<RunPhase> {
        let phase = RunPhase {
            id: Uuid::new_v4(),
            run_id,
            name: name.to_string(),
            status: RunStatus::Running,
            result: None,
            started_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO run_phases (id, run_id, name, status, started_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(phase.id.to_string())
        .bind(run_id.to_string())
        .bind(&phase.name)
        .bind(phase.status.as_str())
        .bind(phase.started_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(phase)
    }

    async fn complete_phase(&self, phase_id: Uuid, result: &serde_json::Value) -> Result<()> {
        let updated =
            sqlx::query("UPDATE run_phases SET status = ?, result_json = ? WHERE id = ?")
                .bind(RunStatus::Complete.as_str())
                .bind(serde_json::to_string(result)?)
                .bind(phase_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;

        if updated.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("phase {phase_id}"),
            });
        }
        Ok(())
    }

    async fn high_confidence_answers(
        &self,
        company_url: &str,
        min_confidence: f64,
        max_age: Option<Duration>,
    ) -> Result<Vec<ResultAnswer>> {
        let cutoff = max_age
            .map(|age| (Utc::now() - age).to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string());

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT result_json FROM runs
            WHERE status = 'complete'
              AND json_extract(company_json, '$.url') = ?
              AND created_at >= ?
              AND result_json IS NOT NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(company_url)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some((result_json,)) = row else {
            return Ok(Vec::new());
        };
        let result: RunResult = serde_json::from_str(&result_json)?;
        Ok(result
            .answers
            .into_iter()
            .filter(|a| a.confidence >= min_confidence)
            .collect())
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get_cached_crawl(&self, company_url: &str) -> Result<Option<CrawlCacheEntry>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT pages_json, crawled_at, expires_at FROM crawl_cache WHERE company_url = ? AND expires_at > ?",
        )
        .bind(company_url)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|(pages_json, crawled_at, expires_at)| {
            Ok(CrawlCacheEntry {
                company_url: company_url.to_string(),
                pages: serde_json::from_str(&pages_json)?,
                crawled_at: parse_rfc3339(&crawled_at)?,
                expires_at: parse_rfc3339(&expires_at)?,
            })
        })
        .transpose()
    }

    async fn set_cached_crawl(
        &self,
        company_url: &str,
        pages: &[ClassifiedPage],
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO crawl_cache (company_url, pages_json, crawled_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(company_url) DO UPDATE SET
                pages_json = excluded.pages_json,
                crawled_at = excluded.crawled_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(company_url)
        .bind(serde_json::to_string(pages)?)
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_expired_crawls(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM crawl_cache WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn get_cached_scrape(&self, url: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT content FROM scrape_cache WHERE url_hash = ? AND expires_at > ?",
        )
        .bind(url_hash(url))
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.map(|(content,)| content))
    }

    async fn set_cached_scrape(&self, url: &str, content: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO scrape_cache (url_hash, content, cached_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url_hash) DO UPDATE SET
                content = excluded.content,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(url_hash(url))
        .bind(content)
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_expired_scrapes(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scrape_cache WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn get_cached_linkedin(&self, domain: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT data FROM linkedin_cache WHERE domain = ? AND expires_at > ?",
        )
        .bind(domain)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|(data,)| serde_json::from_str(&data).map_err(IntelError::from))
            .transpose()
    }

    async fn set_cached_linkedin(
        &self,
        domain: &str,
        data: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO linkedin_cache (domain, data, cached_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET
                data = excluded.data,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(domain)
        .bind(serde_json::to_string(data)?)
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_expired_linkedin(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM linkedin_cache WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn save_checkpoint(&self, entity_id: &str, phase: &str, data: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (entity_id, phase, data, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                phase = excluded.phase,
                data = excluded.data,
                created_at = excluded.created_at
            "#,
        )
        .bind(entity_id)
        .bind(phase)
        .bind(data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn load_checkpoint(&self, entity_id: &str) -> Result<Option<Checkpoint>> {
        let row: Option<(String, Vec<u8>, String)> = sqlx::query_as(
            "SELECT phase, data, created_at FROM checkpoints WHERE entity_id = ?",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|(phase, data, created_at)| {
            Ok(Checkpoint {
                entity_id: entity_id.to_string(),
                phase,
                data,
                created_at: parse_rfc3339(&created_at)?,
            })
        })
        .transpose()
    }

    async fn delete_checkpoint(&self, entity_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for SqliteStore {
    async fn enqueue_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_queue
                (id, company_json, error, error_type, failed_phase, retry_count, max_retries,
                 next_retry_at, created_at, last_failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                company_json = excluded.company_json,
                error = excluded.error,
                error_type = excluded.error_type,
                failed_phase = excluded.failed_phase,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                next_retry_at = excluded.next_retry_at,
                last_failed_at = excluded.last_failed_at
            "#,
        )
        .bind(&entry.id)
        .bind(serde_json::to_string(&entry.company)?)
        .bind(&entry.error)
        .bind(entry.error_type.as_str())
        .bind(&entry.failed_phase)
        .bind(entry.retry_count as i64)
        .bind(entry.max_retries as i64)
        .bind(entry.next_retry_at.to_rfc3339())
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.last_failed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn dequeue_dead_letters(&self, filter: &DlqFilter) -> Result<Vec<DeadLetterEntry>> {
        let mut sql = String::from(
            r#"
            SELECT id, company_json, error, error_type, failed_phase, retry_count, max_retries,
                   next_retry_at, created_at, last_failed_at
            FROM dead_letter_queue
            WHERE next_retry_at <= ? AND retry_count < max_retries
            "#,
        );
        if filter.error_type.is_some() {
            sql.push_str(" AND error_type = ?");
        }
        sql.push_str(" ORDER BY next_retry_at ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, DeadLetterRow>(&sql).bind(Utc::now().to_rfc3339());
        if let Some(error_type) = filter.error_type {
            query = query.bind(error_type.as_str());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.into_iter().map(DeadLetterRow::into_entry).collect()
    }

    async fn increment_dead_letter_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_queue
            SET retry_count = retry_count + 1, next_retry_at = ?, last_failed_at = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(next_retry_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() != 1 {
            return Err(IntelError::NotFound {
                entity: format!("dead letter {id}"),
            });
        }
        Ok(())
    }

    async fn remove_dead_letter(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dead_letter_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn count_dead_letters(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count.0 as u64)
    }
}

#[async_trait]
impl FirmStore for SqliteStore {
    async fn upsert_firm(&self, firm: &Firm) -> Result<Firm> {
        let now = Utc::now().to_rfc3339();
        let source = firm.source.as_str();

        let existing = self.get_firm_by_name(&firm.name).await?;
        match existing {
            Some(stored) => {
                // COALESCE keeps stored values when the update carries null.
                sqlx::query(
                    r#"
                    UPDATE pe_firms SET
                        website_url = COALESCE(?, website_url),
                        source = ?,
                        linkedin_url = COALESCE(?, linkedin_url),
                        twitter_url = COALESCE(?, twitter_url),
                        facebook_url = COALESCE(?, facebook_url),
                        instagram_url = COALESCE(?, instagram_url),
                        youtube_url = COALESCE(?, youtube_url),
                        crunchbase_url = COALESCE(?, crunchbase_url),
                        updated_at = ?
                    WHERE firm_id = ?
                    "#,
                )
                .bind(&firm.website_url)
                .bind(source)
                .bind(&firm.linkedin_url)
                .bind(&firm.twitter_url)
                .bind(&firm.facebook_url)
                .bind(&firm.instagram_url)
                .bind(&firm.youtube_url)
                .bind(&firm.crunchbase_url)
                .bind(&now)
                .bind(stored.firm_id)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;

                self.get_firm(stored.firm_id).await?.ok_or(IntelError::NotFound {
                    entity: format!("firm {}", stored.firm_id),
                })
            }
            None => {
                // NULLIF lets the rowid allocator assign ids for new firms.
                let result = sqlx::query(
                    r#"
                    INSERT INTO pe_firms
                        (firm_id, firm_name, website_url, source, linkedin_url, twitter_url,
                         facebook_url, instagram_url, youtube_url, crunchbase_url, updated_at)
                    VALUES (NULLIF(?, 0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(firm.firm_id)
                .bind(&firm.name)
                .bind(&firm.website_url)
                .bind(source)
                .bind(&firm.linkedin_url)
                .bind(&firm.twitter_url)
                .bind(&firm.facebook_url)
                .bind(&firm.instagram_url)
                .bind(&firm.youtube_url)
                .bind(&firm.crunchbase_url)
                .bind(&now)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;

                let firm_id = if firm.firm_id != 0 {
                    firm.firm_id
                } else {
                    result.last_insert_rowid()
                };
                self.get_firm(firm_id).await?.ok_or(IntelError::NotFound {
                    entity: format!("firm {firm_id}"),
                })
            }
        }
    }

    async fn get_firm(&self, firm_id: i64) -> Result<Option<Firm>> {
        let row = sqlx::query_as::<_, FirmRow>(
            "SELECT firm_id, firm_name, website_url, source, linkedin_url, twitter_url, facebook_url, instagram_url, youtube_url, crunchbase_url, updated_at FROM pe_firms WHERE firm_id = ?",
        )
        .bind(firm_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(FirmRow::into_firm).transpose()
    }

    async fn get_firm_by_name(&self, name: &str) -> Result<Option<Firm>> {
        let row = sqlx::query_as::<_, FirmRow>(
            "SELECT firm_id, firm_name, website_url, source, linkedin_url, twitter_url, facebook_url, instagram_url, youtube_url, crunchbase_url, updated_at FROM pe_firms WHERE firm_name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(FirmRow::into_firm).transpose()
    }

    async fn add_firm_crd(&self, firm_id: i64, crd_number: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO pe_firm_rias (pe_firm_id, crd_number) VALUES (?, ?) ON CONFLICT(pe_firm_id, crd_number) DO NOTHING",
        )
        .bind(firm_id)
        .bind(crd_number)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_firm_crawl_cache(&self, firm_id: i64) -> Result<Vec<FirmCrawlRow>> {
        let rows = sqlx::query_as::<_, FirmCrawlRowRaw>(
            "SELECT pe_firm_id, url, page_type, title, markdown, status_code, crawled_at FROM pe_crawl_cache WHERE pe_firm_id = ?",
        )
        .bind(firm_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(FirmCrawlRowRaw::into_row).collect()
    }

    async fn upsert_firm_crawl_cache(
        &self,
        firm_id: i64,
        pages: &[ClassifiedPage],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for page in pages {
            sqlx::query(
                r#"
                INSERT INTO pe_crawl_cache
                    (pe_firm_id, url, page_type, title, markdown, status_code, crawled_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(pe_firm_id, url) DO UPDATE SET
                    page_type = excluded.page_type,
                    title = excluded.title,
                    markdown = excluded.markdown,
                    status_code = excluded.status_code,
                    crawled_at = excluded.crawled_at
                "#,
            )
            .bind(firm_id)
            .bind(&page.url)
            .bind(page.page_type.as_str())
            .bind(&page.title)
            .bind(&page.markdown)
            .bind(page.status_code as i64)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn create_firm_run(&self, firm_id: i64) -> Result<FirmRun> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO pe_extraction_runs (pe_firm_id, status, started_at) VALUES (?, ?, ?)",
        )
        .bind(firm_id)
        .bind(RunStatus::Running.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(FirmRun {
            id: result.last_insert_rowid(),
            firm_id,
            status: RunStatus::Running,
            started_at: now,
            completed_at: None,
            stats: None,
            error_message: None,
        })
    }

    async fn complete_firm_run(&self, run_id: i64, stats: &FirmRunStats) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pe_extraction_runs SET status = ?, stats_json = ?, completed_at = ? WHERE id = ?",
        )
        .bind(RunStatus::Complete.as_str())
        .bind(serde_json::to_string(stats)?)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("firm run {run_id}"),
            });
        }
        Ok(())
    }

    async fn fail_firm_run(&self, run_id: i64, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pe_extraction_runs SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(RunStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("firm run {run_id}"),
            });
        }
        Ok(())
    }

    async fn skip_firm_run(&self, run_id: i64, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pe_extraction_runs SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(RunStatus::Skipped.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(IntelError::NotFound {
                entity: format!("firm run {run_id}"),
            });
        }
        Ok(())
    }

    async fn get_firm_run(&self, run_id: i64) -> Result<Option<FirmRun>> {
        let row = sqlx::query_as::<_, FirmRunRow>(
            "SELECT id, pe_firm_id, status, started_at, completed_at, stats_json, error_message FROM pe_extraction_runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(FirmRunRow::into_run).transpose()
    }

    async fn upsert_answers(&self, answers: &[Answer]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for answer in answers {
            sqlx::query(
                r#"
                INSERT INTO pe_answers (pe_firm_id, question_key, answer_json, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(pe_firm_id, question_key) DO UPDATE SET
                    answer_json = excluded.answer_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(answer.firm_id)
            .bind(&answer.question_key)
            .bind(serde_json::to_string(answer)?)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn answers_for_firm(&self, firm_id: i64) -> Result<Vec<Answer>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT answer_json FROM pe_answers WHERE pe_firm_id = ? ORDER BY question_key",
        )
        .bind(firm_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(IntelError::from))
            .collect()
    }
}

#[async_trait]
impl SyncLogStore for SqliteStore {
    async fn log_fedsync(&self, source: &str, status: &str, detail: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO fedsync_log (source, status, detail, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(source)
        .bind(status)
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn fedsync_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM fedsync_log WHERE created_at >= ? GROUP BY status",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl StoreLifecycle for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        self.execute_schema(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                company_json TEXT NOT NULL,
                status TEXT NOT NULL,
                result_json TEXT,
                error_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);
            "#,
        )
        .await?;

        self.execute_schema(
            r#"
            CREATE TABLE IF NOT EXISTS run_phases (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                result_json TEXT,
                started_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_phases_run_id ON run_phases(run_id);
            "#,
        )
        .await?;

        self.execute_schema(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_url TEXT NOT NULL UNIQUE,
                pages_json TEXT NOT NULL,
                crawled_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scrape_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url_hash TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS linkedin_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        )
        .await?;

        self.execute_schema(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                entity_id TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id TEXT PRIMARY KEY,
                company_json TEXT NOT NULL,
                error TEXT NOT NULL,
                error_type TEXT NOT NULL,
                failed_phase TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                next_retry_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_failed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dlq_next_retry ON dead_letter_queue(next_retry_at);
            "#,
        )
        .await?;

        self.execute_schema(
            r#"
            CREATE TABLE IF NOT EXISTS pe_firms (
                firm_id INTEGER PRIMARY KEY AUTOINCREMENT,
                firm_name TEXT NOT NULL UNIQUE,
                website_url TEXT,
                source TEXT NOT NULL,
                linkedin_url TEXT,
                twitter_url TEXT,
                facebook_url TEXT,
                instagram_url TEXT,
                youtube_url TEXT,
                crunchbase_url TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pe_firm_rias (
                pe_firm_id INTEGER NOT NULL,
                crd_number TEXT NOT NULL,
                UNIQUE(pe_firm_id, crd_number)
            );
            CREATE TABLE IF NOT EXISTS pe_crawl_cache (
                pe_firm_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                page_type TEXT NOT NULL,
                title TEXT NOT NULL,
                markdown TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                crawled_at TEXT NOT NULL,
                UNIQUE(pe_firm_id, url)
            );
            CREATE TABLE IF NOT EXISTS pe_extraction_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pe_firm_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                stats_json TEXT,
                error_message TEXT
            );
            CREATE TABLE IF NOT EXISTS pe_answers (
                pe_firm_id INTEGER NOT NULL,
                question_key TEXT NOT NULL,
                answer_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(pe_firm_id, question_key)
            );
            CREATE TABLE IF NOT EXISTS fedsync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
