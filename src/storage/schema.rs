//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Reply-Trawl database.

/// Stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// Engagement sum the roots index is built on
pub const ENGAGEMENT_EXPR: &str = "like_count + retweet_count + quote_count";

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    query TEXT NOT NULL,
    status TEXT NOT NULL,
    phase TEXT NOT NULL
);

-- Posts found by the primary search and backfilled conversation roots
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER NOT NULL PRIMARY KEY,
    parent_id INTEGER,
    conversation_id INTEGER,
    author_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT,
    hashtags TEXT,
    mentions TEXT,
    urls TEXT,
    media_image_count INTEGER NOT NULL DEFAULT 0,
    media_video_count INTEGER NOT NULL DEFAULT 0,
    location TEXT,
    like_count INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    retweet_count INTEGER NOT NULL DEFAULT 0,
    quote_count INTEGER NOT NULL DEFAULT 0,
    sentiment_label TEXT,
    sentiment_score REAL
);

CREATE INDEX IF NOT EXISTS idx_posts_engagement
    ON posts(like_count + retweet_count + quote_count DESC, id);

-- Posts found only through reply searches
CREATE TABLE IF NOT EXISTS replies (
    id INTEGER NOT NULL PRIMARY KEY,
    parent_id INTEGER,
    conversation_id INTEGER,
    author_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT,
    hashtags TEXT,
    mentions TEXT,
    urls TEXT,
    media_image_count INTEGER NOT NULL DEFAULT 0,
    media_video_count INTEGER NOT NULL DEFAULT 0,
    location TEXT,
    like_count INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    retweet_count INTEGER NOT NULL DEFAULT 0,
    quote_count INTEGER NOT NULL DEFAULT 0,
    sentiment_label TEXT,
    sentiment_score REAL
);

CREATE INDEX IF NOT EXISTS idx_replies_conversation ON replies(conversation_id);

-- Author profiles, refreshed on every sighting
CREATE TABLE IF NOT EXISTS users (
    id INTEGER NOT NULL PRIMARY KEY,
    username TEXT NOT NULL,
    display_name TEXT,
    verified INTEGER NOT NULL DEFAULT 0,
    location TEXT,
    following_count INTEGER NOT NULL DEFAULT 0,
    follower_count INTEGER NOT NULL DEFAULT 0,
    joined_at TEXT,
    bio TEXT
);
"#;

/// Initializes the database schema
///
/// Every statement is `IF NOT EXISTS`, so this is safe against a populated database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_is_idempotent_with_data() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO posts (id, author_id, url, text) VALUES (1, 2, 'u', 't')",
            [],
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["runs", "posts", "replies", "users"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_engagement_index_exists() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_posts_engagement'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
