//! SQL migration definitions for the retrace history database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: urls, visits, visit_source",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per distinct visited url
CREATE TABLE IF NOT EXISTS urls (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    url             TEXT NOT NULL UNIQUE,
    title           TEXT NOT NULL DEFAULT '',
    visit_count     INTEGER NOT NULL DEFAULT 0,
    typed_count     INTEGER NOT NULL DEFAULT 0,
    last_visit_time INTEGER NOT NULL,
    hidden          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_urls_last_visit ON urls(last_visit_time);

-- One row per page-load event; url references urls.id
CREATE TABLE IF NOT EXISTS visits (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    url        INTEGER NOT NULL REFERENCES urls(id),
    visit_time INTEGER NOT NULL,
    transition INTEGER NOT NULL,
    from_visit INTEGER NOT NULL DEFAULT 0,
    segment_id INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_visits_url ON visits(url);
CREATE INDEX IF NOT EXISTS idx_visits_time ON visits(visit_time);

-- Legacy table kept for compatibility: truncated by delete-all, never read
CREATE TABLE IF NOT EXISTS visit_source (
    id     INTEGER PRIMARY KEY,
    source INTEGER NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
