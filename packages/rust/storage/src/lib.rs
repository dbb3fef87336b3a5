//! libsql-backed visit store.
//!
//! The [`VisitStore`] owns the two history tables (`urls`, `visits`) plus
//! the inert legacy `visit_source` table. Repeated query shapes go through
//! a prepared-statement cache: one compiled statement per distinct SQL
//! text, reset before each reuse.
//!
//! **Access rules:**
//! - exactly one logical owner executes statements; concurrent callers are
//!   serialized through the history service's request channel, not through
//!   locks here.
//! - multi-row deletes run inside a single transaction so a crash or an
//!   interleaved read never observes a partially deleted batch.

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Statement, params};
use retrace_shared::time::{from_webkit_micros, to_webkit_micros};
use retrace_shared::{HistoryError, PageSummary, Result, Transition, TransitionKind, VisitSummary};

const FIND_PAGE: &str = "SELECT id, url, title, visit_count, typed_count, last_visit_time, hidden \
     FROM urls WHERE url = ?1 LIMIT 1";

const INSERT_PAGE: &str =
    "INSERT INTO urls (url, title, visit_count, last_visit_time) VALUES (?1, ?2, 1, ?3)";

const UPDATE_PAGE_ON_VISIT: &str = "UPDATE urls SET title = ?1, visit_count = ?2 WHERE id = ?3";

const SET_TITLE: &str = "UPDATE urls SET title = ?1 WHERE url = ?2";

const INSERT_VISIT: &str = "INSERT INTO visits (url, visit_time, transition, from_visit, segment_id) \
     VALUES (?1, ?2, ?3, 0, 0)";

const SEARCH_PAGES: &str = "SELECT id, url, title, visit_count, typed_count, last_visit_time \
     FROM urls \
     WHERE hidden = 0 \
       AND last_visit_time >= ?1 \
       AND (?2 IS NULL OR last_visit_time <= ?2) \
       AND (?3 IS NULL OR url LIKE ?3 OR title LIKE ?3) \
     ORDER BY last_visit_time DESC LIMIT ?4";

const VISITS_FOR_PAGE: &str = "SELECT id, url, from_visit, visit_time, transition \
     FROM visits WHERE url = ?1 ORDER BY visit_time ASC";

const PAGES_IN_WINDOW: &str =
    "SELECT id, url FROM urls WHERE last_visit_time >= ?1 AND last_visit_time <= ?2";

const VISIT_TIMES_FOR_PAGE: &str = "SELECT visit_time FROM visits WHERE url = ?1";

const DELETE_PAGE: &str = "DELETE FROM urls WHERE id = ?1";

const DELETE_VISITS_OF_PAGE: &str = "DELETE FROM visits WHERE url = ?1";

const ALL_URLS: &str = "SELECT url FROM urls";

const DELETE_ALL_URLS: &str = "DELETE FROM urls";

const DELETE_ALL_VISITS: &str = "DELETE FROM visits";

const DELETE_ALL_VISIT_SOURCES: &str = "DELETE FROM visit_source";

const RECENT_LINK_VISITS: &str =
    "SELECT visits.id, urls.url, urls.title, urls.visit_count, urls.typed_count, visits.visit_time \
     FROM visits INNER JOIN urls ON urls.id = visits.url \
     WHERE visits.transition = ?1 \
     ORDER BY visits.visit_time DESC LIMIT ?2 OFFSET ?3";

/// A `urls` table row as read by point lookups.
#[derive(Debug, Clone)]
pub struct PageRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub visit_count: u32,
    pub typed_count: u32,
    pub last_visit_time: DateTime<Utc>,
    pub hidden: bool,
}

/// Primary storage handle wrapping a libsql database.
pub struct VisitStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    statements: HashMap<&'static str, Statement>,
}

impl VisitStore {
    /// Open or create a history database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut store = Self {
            db,
            conn,
            statements: HashMap::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&mut self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HistoryError::storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Fetch the compiled statement for `sql`, compiling it on first use.
    async fn prepare_cached(&mut self, sql: &'static str) -> Result<&mut Statement> {
        if !self.statements.contains_key(sql) {
            let stmt = self
                .conn
                .prepare(sql)
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?;
            self.statements.insert(sql, stmt);
        }

        let stmt = self
            .statements
            .get_mut(sql)
            .ok_or_else(|| HistoryError::storage("statement cache lookup failed"))?;
        stmt.reset();
        Ok(stmt)
    }

    // -----------------------------------------------------------------------
    // Transaction helpers
    // -----------------------------------------------------------------------

    async fn begin(&self) -> Result<()> {
        self.conn
            .execute("BEGIN IMMEDIATE", params![])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn
            .execute("COMMIT", params![])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;
        Ok(())
    }

    async fn rollback(&self) {
        // A failed rollback leaves nothing further to do here.
        let _ = self.conn.execute("ROLLBACK", params![]).await;
    }

    // -----------------------------------------------------------------------
    // Page operations
    // -----------------------------------------------------------------------

    /// Point lookup by unique url. A missing url is `None`, not an error.
    pub async fn find_page_by_url(&mut self, url: &str) -> Result<Option<PageRow>> {
        let stmt = self.prepare_cached(FIND_PAGE).await?;
        let mut rows = stmt
            .query(params![url])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_page(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HistoryError::storage(e.to_string())),
        }
    }

    /// Insert a page with `visit_count = 1` and `last_visit_time = now`, or
    /// update the title and increment the visit count if the url already has
    /// a row. Returns the page id either way.
    pub async fn upsert_page(&mut self, url: &str, title: &str, now: DateTime<Utc>) -> Result<i64> {
        if let Some(page) = self.find_page_by_url(url).await? {
            let stmt = self.prepare_cached(UPDATE_PAGE_ON_VISIT).await?;
            stmt.execute(params![title, i64::from(page.visit_count) + 1, page.id])
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?;
            Ok(page.id)
        } else {
            let stmt = self.prepare_cached(INSERT_PAGE).await?;
            stmt.execute(params![url, title, to_webkit_micros(now)])
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?;
            Ok(self.conn.last_insert_rowid())
        }
    }

    /// Update a page's title. Unknown urls update zero rows.
    pub async fn set_page_title(&mut self, url: &str, title: &str) -> Result<()> {
        let stmt = self.prepare_cached(SET_TITLE).await?;
        stmt.execute(params![title, url])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Visit operations
    // -----------------------------------------------------------------------

    /// Append a visit row for a page. Visits written here are never part of
    /// a referrer chain, so `from_visit` and `segment_id` stay 0.
    pub async fn insert_visit(
        &mut self,
        page_id: i64,
        time: DateTime<Utc>,
        transition: Transition,
    ) -> Result<()> {
        let stmt = self.prepare_cached(INSERT_VISIT).await?;
        stmt.execute(params![
            page_id,
            to_webkit_micros(time),
            i64::from(transition.to_mask())
        ])
        .await
        .map_err(|e| HistoryError::storage(e.to_string()))?;
        Ok(())
    }

    /// All visits for a page, oldest first.
    pub async fn visits_for_page(&mut self, page_id: i64) -> Result<Vec<VisitSummary>> {
        let stmt = self.prepare_cached(VISITS_FOR_PAGE).await?;
        let mut rows = stmt
            .query(params![page_id])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?
        {
            results.push(row_to_visit(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Non-hidden pages with a last visit inside the window, newest first.
    /// `text` matches url or title as a case-insensitive substring; `end`
    /// omitted means no upper bound.
    pub async fn search_pages(
        &mut self,
        text: Option<&str>,
        limit: u32,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PageSummary>> {
        let pattern = text.map(|t| format!("%{t}%"));
        let stmt = self.prepare_cached(SEARCH_PAGES).await?;
        let mut rows = stmt
            .query(params![
                to_webkit_micros(start),
                end.map(to_webkit_micros),
                pattern,
                i64::from(limit)
            ])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?
        {
            results.push(row_to_page_summary(&row)?);
        }
        Ok(results)
    }

    /// Visits with a plain link transition joined to their pages, newest
    /// first, windowed by `limit` and `offset`. One result row per visit.
    pub async fn recent_link_visits(&mut self, offset: u64, limit: u32) -> Result<Vec<PageSummary>> {
        let link_mask = Transition::navigation(TransitionKind::Link).to_mask();
        let stmt = self.prepare_cached(RECENT_LINK_VISITS).await?;
        let mut rows = stmt
            .query(params![
                i64::from(link_mask),
                i64::from(limit),
                offset as i64
            ])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?
        {
            results.push(row_to_page_summary(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Remove a page and every visit referencing it, as one atomic unit.
    pub async fn delete_page_and_visits(&mut self, page_id: i64) -> Result<()> {
        self.begin().await?;
        match self.delete_page_rows(page_id).await {
            Ok(()) => self.commit().await,
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn delete_page_rows(&mut self, page_id: i64) -> Result<()> {
        self.prepare_cached(DELETE_VISITS_OF_PAGE)
            .await?
            .execute(params![page_id])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;
        self.prepare_cached(DELETE_PAGE)
            .await?
            .execute(params![page_id])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;
        Ok(())
    }

    /// Delete every page whose entire visit history falls inside
    /// `[start, end]`, along with its visits. A page with even one visit
    /// outside the window is retained in full. The whole batch runs in one
    /// transaction. Returns the urls of the deleted pages.
    pub async fn delete_pages_in_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let start_micros = to_webkit_micros(start);
        let end_micros = to_webkit_micros(end);

        self.begin().await?;
        match self.delete_covered_pages(start_micros, end_micros).await {
            Ok(urls) => {
                self.commit().await?;
                tracing::debug!(deleted = urls.len(), "range delete finished");
                Ok(urls)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn delete_covered_pages(
        &mut self,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<String>> {
        // Candidates by last-visit stamp; each one's full visit list decides.
        let stmt = self.prepare_cached(PAGES_IN_WINDOW).await?;
        let mut rows = stmt
            .query(params![start_micros, end_micros])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut candidates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?
        {
            let id: i64 = row
                .get(0)
                .map_err(|e| HistoryError::storage(e.to_string()))?;
            let url: String = row
                .get(1)
                .map_err(|e| HistoryError::storage(e.to_string()))?;
            candidates.push((id, url));
        }

        let mut deleted = Vec::new();
        for (page_id, url) in candidates {
            let stmt = self.prepare_cached(VISIT_TIMES_FOR_PAGE).await?;
            let mut rows = stmt
                .query(params![page_id])
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?;

            let mut covered = true;
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?
            {
                let visit_time: i64 = row
                    .get(0)
                    .map_err(|e| HistoryError::storage(e.to_string()))?;
                if visit_time < start_micros || visit_time > end_micros {
                    covered = false;
                    break;
                }
            }

            if covered {
                self.delete_page_rows(page_id).await?;
                deleted.push(url);
            }
        }
        Ok(deleted)
    }

    /// Truncate the store, returning every url that existed beforehand.
    pub async fn delete_all_pages(&mut self) -> Result<Vec<String>> {
        self.begin().await?;
        match self.truncate_all().await {
            Ok(urls) => {
                self.commit().await?;
                Ok(urls)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn truncate_all(&mut self) -> Result<Vec<String>> {
        let stmt = self.prepare_cached(ALL_URLS).await?;
        let mut rows = stmt
            .query(params![])
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?;

        let mut urls = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HistoryError::storage(e.to_string()))?
        {
            urls.push(
                row.get::<String>(0)
                    .map_err(|e| HistoryError::storage(e.to_string()))?,
            );
        }

        for sql in [DELETE_ALL_URLS, DELETE_ALL_VISITS, DELETE_ALL_VISIT_SOURCES] {
            self.prepare_cached(sql)
                .await?
                .execute(params![])
                .await
                .map_err(|e| HistoryError::storage(e.to_string()))?;
        }
        Ok(urls)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_page(row: &libsql::Row) -> Result<PageRow> {
    Ok(PageRow {
        id: row
            .get::<i64>(0)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        url: row
            .get::<String>(1)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        title: row.get::<String>(2).unwrap_or_default(),
        visit_count: row
            .get::<u32>(3)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        typed_count: row
            .get::<u32>(4)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        last_visit_time: from_webkit_micros(
            row.get::<i64>(5)
                .map_err(|e| HistoryError::storage(e.to_string()))?,
        ),
        hidden: row
            .get::<i64>(6)
            .map_err(|e| HistoryError::storage(e.to_string()))?
            != 0,
    })
}

/// Shared by `search_pages` and `recent_link_visits`; both select the same
/// six columns, with the id and timestamp columns meaning page-or-visit
/// depending on the query.
fn row_to_page_summary(row: &libsql::Row) -> Result<PageSummary> {
    Ok(PageSummary {
        id: row
            .get::<i64>(0)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        url: row
            .get::<String>(1)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        title: row.get::<String>(2).unwrap_or_default(),
        visit_count: row
            .get::<u32>(3)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        typed_count: row
            .get::<u32>(4)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        last_visit_time: from_webkit_micros(
            row.get::<i64>(5)
                .map_err(|e| HistoryError::storage(e.to_string()))?,
        ),
    })
}

fn row_to_visit(row: &libsql::Row) -> Result<VisitSummary> {
    let mask = row
        .get::<i64>(4)
        .map_err(|e| HistoryError::storage(e.to_string()))?;
    let transition = Transition::from_mask(mask as u32)
        .ok_or_else(|| HistoryError::storage(format!("unrecognized transition value {mask}")))?;
    let from_visit = row
        .get::<i64>(2)
        .map_err(|e| HistoryError::storage(e.to_string()))?;

    Ok(VisitSummary {
        visit_id: row
            .get::<i64>(0)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        page_id: row
            .get::<i64>(1)
            .map_err(|e| HistoryError::storage(e.to_string()))?,
        referring_visit: (from_visit != 0).then_some(from_visit),
        visit_time: from_webkit_micros(
            row.get::<i64>(3)
                .map_err(|e| HistoryError::storage(e.to_string()))?,
        ),
        transition: transition.kind,
    })
}
