//! Database schema definitions
//!
//! This module contains the SQL schema for the link store.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 2;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Every link ever discovered; seq_num doubles as discovery order
CREATE TABLE IF NOT EXISTS links (
    seq_num INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL UNIQUE,
    domain TEXT NOT NULL,
    url TEXT NOT NULL,
    source_id TEXT,
    last_fetch_version INTEGER,
    fetched_at TEXT,
    seed_ingest_timestamp INTEGER,
    html_handle TEXT,
    text_handle TEXT,
    is_paywalled INTEGER,
    discovered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_domain_version ON links(domain, last_fetch_version);
CREATE INDEX IF NOT EXISTS idx_links_version ON links(last_fetch_version);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let existing = get_schema_version(conn)?;
    conn.execute_batch(SCHEMA_SQL)?;

    // Version 1 databases predate paywall detection
    if existing == 1 {
        conn.execute_batch("ALTER TABLE links ADD COLUMN is_paywalled INTEGER;")?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Reads the schema version recorded in the database
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<u32, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}
