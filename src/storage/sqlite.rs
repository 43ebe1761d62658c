//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::CrawlPhase;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    join_list, split_list, Collection, EngagementWeights, Post, RootRef, RunRecord, RunStatus,
    User,
};
use crate::TrawlError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const POST_COLUMNS: &str = "id, parent_id, conversation_id, author_id, url, text, created_at,
     hashtags, mentions, urls, media_image_count, media_video_count, location,
     like_count, reply_count, retweet_count, quote_count, sentiment_label, sentiment_score";

const USER_COLUMNS: &str = "id, username, display_name, verified, location,
     following_count, follower_count, joined_at, bio";

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, query, status, phase";

/// Number of rows making up `percent` of `total`, rounded up
///
/// `percent >= 100` selects everything.
pub fn ceil_percent(total: u64, percent: u32) -> u64 {
    if percent >= 100 {
        return total;
    }
    (total * percent as u64 + 99) / 100
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(TrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, TrawlError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, TrawlError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run_from_row(row: &Row) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            query: row.get(4)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(RunStatus::Failed),
            phase: CrawlPhase::from_db_string(&row.get::<_, String>(6)?)
                .unwrap_or(CrawlPhase::Search),
        })
    }

    fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
        Ok(Post {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            conversation_id: row.get(2)?,
            author_id: row.get(3)?,
            url: row.get(4)?,
            text: row.get(5)?,
            created_at: row.get(6)?,
            hashtags: split_list(row.get(7)?),
            mentions: split_list(row.get(8)?),
            urls: split_list(row.get(9)?),
            media_image_count: row.get(10)?,
            media_video_count: row.get(11)?,
            location: row.get(12)?,
            like_count: row.get(13)?,
            reply_count: row.get(14)?,
            retweet_count: row.get(15)?,
            quote_count: row.get(16)?,
            sentiment_label: row.get(17)?,
            sentiment_score: row.get(18)?,
        })
    }

    fn user_from_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            verified: row.get(3)?,
            location: row.get(4)?,
            following_count: row.get(5)?,
            follower_count: row.get(6)?,
            joined_at: row.get(7)?,
            bio: row.get(8)?,
        })
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, query: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, query, status, phase)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                now,
                config_hash,
                query,
                RunStatus::Running.to_db_string(),
                CrawlPhase::Search.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], Self::run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        let run = self
            .conn
            .query_row(&sql, [], Self::run_from_row)
            .optional()?;
        Ok(run)
    }

    fn update_run_phase(&mut self, run_id: i64, phase: CrawlPhase) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET phase = ?1 WHERE id = ?2",
            params![phase.to_db_string(), run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Writes =====

    fn insert_posts(&mut self, collection: Collection, posts: &[Post]) -> StorageResult<usize> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(id) DO NOTHING",
            collection.table(),
            POST_COLUMNS
        );

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for post in posts {
                inserted += stmt.execute(params![
                    post.id,
                    post.parent_id,
                    post.conversation_id,
                    post.author_id,
                    post.url,
                    post.text,
                    post.created_at,
                    join_list(&post.hashtags),
                    join_list(&post.mentions),
                    join_list(&post.urls),
                    post.media_image_count,
                    post.media_video_count,
                    post.location,
                    post.like_count,
                    post.reply_count,
                    post.retweet_count,
                    post.quote_count,
                    post.sentiment_label,
                    post.sentiment_score,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn insert_users(&mut self, users: &[User]) -> StorageResult<usize> {
        let sql = format!(
            "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 display_name = excluded.display_name,
                 verified = excluded.verified,
                 location = excluded.location,
                 following_count = excluded.following_count,
                 follower_count = excluded.follower_count,
                 joined_at = excluded.joined_at,
                 bio = excluded.bio",
            USER_COLUMNS
        );

        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for user in users {
                written += stmt.execute(params![
                    user.id,
                    user.username,
                    user.display_name,
                    user.verified,
                    user.location,
                    user.following_count,
                    user.follower_count,
                    user.joined_at,
                    user.bio,
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    fn update_sentiment(
        &mut self,
        collection: Collection,
        id: i64,
        label: &str,
        score: f64,
    ) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE {} SET sentiment_label = ?1, sentiment_score = ?2 WHERE id = ?3",
            collection.table()
        );
        let changed = self.conn.execute(&sql, params![label, score, id])?;
        if changed > 1 {
            return Err(StorageError::ConstraintViolation(format!(
                "sentiment update touched {} rows for id {}",
                changed, id
            )));
        }
        Ok(changed == 1)
    }

    // ===== Reads =====

    fn get_post(&self, collection: Collection, id: i64) -> StorageResult<Option<Post>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            POST_COLUMNS,
            collection.table()
        );
        let post = self
            .conn
            .query_row(&sql, params![id], Self::post_from_row)
            .optional()?;
        Ok(post)
    }

    fn get_user(&self, id: i64) -> StorageResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        let user = self
            .conn
            .query_row(&sql, params![id], Self::user_from_row)
            .optional()?;
        Ok(user)
    }

    fn top_engagement_roots(
        &self,
        percent: u32,
        weights: &EngagementWeights,
        after: Option<&RootRef>,
        limit: usize,
    ) -> StorageResult<Vec<RootRef>> {
        let take = ceil_percent(self.count_posts(Collection::Posts)?, percent);
        if take == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        // The inner query fixes the ranked set; the outer one pages through it
        let sql = format!(
            "SELECT id, conversation_id, engagement FROM (
                 SELECT id, conversation_id, {} AS engagement
                 FROM posts
                 ORDER BY engagement DESC, id ASC
                 LIMIT ?1
             )
             WHERE ?2 IS NULL OR engagement < ?2 OR (engagement = ?2 AND id > ?3)
             ORDER BY engagement DESC, id ASC
             LIMIT ?4",
            weights.to_sql()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let roots = stmt
            .query_map(
                params![
                    take as i64,
                    after.map(|r| r.engagement),
                    after.map(|r| r.id),
                    limit as i64
                ],
                |row| {
                    Ok(RootRef {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        engagement: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(roots)
    }

    fn missing_conversation_roots(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> StorageResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT r.conversation_id
             FROM replies r
             WHERE r.conversation_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM posts p WHERE p.id = r.conversation_id)
               AND (?1 IS NULL OR r.conversation_id > ?1)
             ORDER BY r.conversation_id
             LIMIT ?2",
        )?;

        let ids = stmt
            .query_map(params![after, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    fn unscored_posts(
        &self,
        collection: Collection,
        after: Option<i64>,
        limit: usize,
    ) -> StorageResult<Vec<(i64, String)>> {
        let sql = format!(
            "SELECT id, text FROM {}
             WHERE sentiment_label IS NULL AND (?1 IS NULL OR id > ?1)
             ORDER BY id
             LIMIT ?2",
            collection.table()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    // ===== Statistics =====

    fn count_posts(&self, collection: Collection) -> StorageResult<u64> {
        self.count(&format!("SELECT COUNT(*) FROM {}", collection.table()))
    }

    fn count_users(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM users")
    }

    fn count_scored(&self, collection: Collection) -> StorageResult<u64> {
        self.count(&format!(
            "SELECT COUNT(*) FROM {} WHERE sentiment_label IS NOT NULL",
            collection.table()
        ))
    }

    fn count_missing_roots(&self) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(DISTINCT r.conversation_id)
             FROM replies r
             WHERE r.conversation_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM posts p WHERE p.id = r.conversation_id)",
        )
    }

    fn sentiment_breakdown(&self, collection: Collection) -> StorageResult<Vec<(String, u64)>> {
        let sql = format!(
            "SELECT sentiment_label, COUNT(*) AS count
             FROM {}
             WHERE sentiment_label IS NOT NULL
             GROUP BY sentiment_label
             ORDER BY count DESC, sentiment_label",
            collection.table()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
