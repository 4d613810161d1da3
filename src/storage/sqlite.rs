//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the LinkStore trait.

use crate::state::FetchVersion;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{LinkStore, StorageError, StorageResult};
use crate::storage::{BlobHandle, Link, LinkStats};
use crate::url::NormalizedUrl;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use tracing::debug;

const LINK_COLUMNS: &str = "seq_num, identifier, domain, url, source_id, last_fetch_version, \
     fetched_at, seed_ingest_timestamp, html_handle, text_handle, is_paywalled";

/// SQLite link store
pub struct SqliteLinkStore {
    conn: Connection,
    current_version: FetchVersion,
}

impl SqliteLinkStore {
    /// Opens or creates a link store
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `current_version` - Version the running extraction logic is at
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteLinkStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path, current_version: FetchVersion) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            current_version,
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(current_version: FetchVersion) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            current_version,
        })
    }
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    let fetched_at: Option<String> = row.get(6)?;
    Ok(Link {
        sequence_number: row.get(0)?,
        identifier: row.get(1)?,
        domain: row.get(2)?,
        url: row.get(3)?,
        source_id: row.get(4)?,
        last_fetch_version: row.get::<_, Option<i64>>(5)?.map(FetchVersion::new),
        fetched_at: fetched_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        seed_ingest_timestamp: row.get(7)?,
        html_handle: row.get::<_, Option<String>>(8)?.map(BlobHandle::from),
        text_handle: row.get::<_, Option<String>>(9)?.map(BlobHandle::from),
        is_paywalled: row.get(10)?,
    })
}

fn select_unfetched_for_domain(
    conn: &Connection,
    domain: &str,
    version: FetchVersion,
) -> rusqlite::Result<Option<Link>> {
    let sql = format!(
        "SELECT {} FROM links
         WHERE domain = ?1 AND (last_fetch_version IS NULL OR last_fetch_version < ?2)
         ORDER BY seq_num ASC
         LIMIT 1",
        LINK_COLUMNS
    );
    conn.query_row(&sql, params![domain, version.get()], row_to_link)
        .optional()
}

fn advance_version(conn: &Connection, identifier: &str, version: FetchVersion) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE links SET last_fetch_version = ?1
         WHERE identifier = ?2 AND (last_fetch_version IS NULL OR last_fetch_version < ?1)",
        params![version.get(), identifier],
    )
}

impl LinkStore for SqliteLinkStore {
    // ===== Discovery =====

    fn insert_links(&mut self, urls: &[NormalizedUrl]) -> StorageResult<usize> {
        if urls.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO links (identifier, domain, url, discovered_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(identifier) DO NOTHING",
            )?;
            for link in urls {
                inserted += stmt.execute(params![link.identifier, link.domain, link.url, now])?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} of {} links", inserted, urls.len());
        Ok(inserted)
    }

    fn upsert_seed_links(
        &mut self,
        urls: &[NormalizedUrl],
        source_id: Option<&str>,
        seed_ingest_timestamp: Option<i64>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO links (identifier, domain, url, source_id, seed_ingest_timestamp, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(identifier) DO UPDATE SET
                    last_fetch_version = NULL,
                    source_id = COALESCE(excluded.source_id, links.source_id),
                    seed_ingest_timestamp = COALESCE(links.seed_ingest_timestamp, excluded.seed_ingest_timestamp)",
            )?;
            for link in urls {
                stmt.execute(params![
                    link.identifier,
                    link.domain,
                    link.url,
                    source_id,
                    seed_ingest_timestamp,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Scheduling =====

    fn get_domains_with_unfetched_links(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain FROM links
             WHERE last_fetch_version IS NULL OR last_fetch_version < ?1
             GROUP BY domain
             ORDER BY MIN(seq_num)",
        )?;

        let domains = stmt
            .query_map(params![self.current_version.get()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(domains)
    }

    fn get_unfetched_link_for_domain(&self, domain: &str) -> StorageResult<Option<Link>> {
        Ok(select_unfetched_for_domain(
            &self.conn,
            domain,
            self.current_version,
        )?)
    }

    fn set_url_as_fetched(
        &mut self,
        identifier: &str,
        version: FetchVersion,
    ) -> StorageResult<()> {
        advance_version(&self.conn, identifier, version)?;
        Ok(())
    }

    fn claim_unfetched_link_for_domain(&mut self, domain: &str) -> StorageResult<Option<Link>> {
        let version = self.current_version;
        // Take the write lock up front so a second process cannot select the
        // same row between our read and our update.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let link = select_unfetched_for_domain(&tx, domain, version)?;
        if let Some(link) = &link {
            advance_version(&tx, &link.identifier, version)?;
        }
        tx.commit()?;

        Ok(link)
    }

    fn restore_fetch_version(
        &mut self,
        identifier: &str,
        previous: Option<FetchVersion>,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE links SET last_fetch_version = ?1 WHERE identifier = ?2",
            params![previous.map(FetchVersion::get), identifier],
        )?;
        if updated == 0 {
            return Err(StorageError::LinkNotFound(identifier.to_string()));
        }
        Ok(())
    }

    // ===== Fetch bookkeeping =====

    fn record_fetch_success(
        &mut self,
        identifier: &str,
        fetched_at: DateTime<Utc>,
        html: &BlobHandle,
        text: &BlobHandle,
        is_paywalled: bool,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE links SET fetched_at = ?1, html_handle = ?2, text_handle = ?3, is_paywalled = ?4
             WHERE identifier = ?5",
            params![
                fetched_at.to_rfc3339(),
                html.as_str(),
                text.as_str(),
                is_paywalled,
                identifier
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::LinkNotFound(identifier.to_string()));
        }
        Ok(())
    }

    fn get_link(&self, identifier: &str) -> StorageResult<Option<Link>> {
        let sql = format!("SELECT {} FROM links WHERE identifier = ?1", LINK_COLUMNS);
        let link = self
            .conn
            .query_row(&sql, params![identifier], row_to_link)
            .optional()?;
        Ok(link)
    }

    fn stats(&self) -> StorageResult<LinkStats> {
        let stats = self.conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(DISTINCT domain),
                COALESCE(SUM(CASE WHEN last_fetch_version IS NULL OR last_fetch_version < ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN fetched_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM links",
            params![self.current_version.get()],
            |row| {
                Ok(LinkStats {
                    total_links: row.get::<_, i64>(0)? as u64,
                    domains: row.get::<_, i64>(1)? as u64,
                    eligible_links: row.get::<_, i64>(2)? as u64,
                    fetched_links: row.get::<_, i64>(3)? as u64,
                    eligible_domains: 0,
                })
            },
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT COUNT(DISTINCT domain) FROM links
             WHERE last_fetch_version IS NULL OR last_fetch_version < ?1",
        )?;
        let eligible_domains: i64 =
            stmt.query_row(params![self.current_version.get()], |row| row.get(0))?;

        Ok(LinkStats {
            eligible_domains: eligible_domains as u64,
            ..stats
        })
    }
}
