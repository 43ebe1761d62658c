//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::CrawlPhase;
use crate::storage::{Collection, EngagementWeights, Post, RootRef, RunRecord, RunStatus, User};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Batch writes are atomic: either every row of a batch is applied or none is.
/// Posts are insert-or-ignore (first write wins), users are upserts (latest
/// profile wins).
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run in the `Search` phase
    fn create_run(&mut self, config_hash: &str, query: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Records the phase a run has entered
    fn update_run_phase(&mut self, run_id: i64, phase: CrawlPhase) -> StorageResult<()>;

    /// Marks a run finished with a terminal status
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Writes =====

    /// Inserts posts, ignoring ids already present
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted
    fn insert_posts(&mut self, collection: Collection, posts: &[Post]) -> StorageResult<usize>;

    /// Inserts users, overwriting the profile of ids already present
    fn insert_users(&mut self, users: &[User]) -> StorageResult<usize>;

    /// Sets the sentiment of one post, leaving every other field untouched
    ///
    /// # Returns
    ///
    /// Whether a row with that id existed
    fn update_sentiment(
        &mut self,
        collection: Collection,
        id: i64,
        label: &str,
        score: f64,
    ) -> StorageResult<bool>;

    // ===== Reads =====

    /// Gets a post by id
    fn get_post(&self, collection: Collection, id: i64) -> StorageResult<Option<Post>>;

    /// Gets a user by id
    fn get_user(&self, id: i64) -> StorageResult<Option<User>>;

    /// One chunk of the top `ceil(N * percent / 100)` posts by engagement
    ///
    /// Ranked by weighted engagement descending, ties by ascending id. `after`
    /// is the last root of the previous chunk.
    fn top_engagement_roots(
        &self,
        percent: u32,
        weights: &EngagementWeights,
        after: Option<&RootRef>,
        limit: usize,
    ) -> StorageResult<Vec<RootRef>>;

    /// One chunk of conversation ids referenced by replies but absent from posts
    ///
    /// Ascending; `after` is the last id of the previous chunk.
    fn missing_conversation_roots(&self, after: Option<i64>, limit: usize)
        -> StorageResult<Vec<i64>>;

    /// One chunk of `(id, text)` for posts without a sentiment label
    fn unscored_posts(
        &self,
        collection: Collection,
        after: Option<i64>,
        limit: usize,
    ) -> StorageResult<Vec<(i64, String)>>;

    // ===== Statistics =====

    /// Counts rows in a post table
    fn count_posts(&self, collection: Collection) -> StorageResult<u64>;

    /// Counts stored users
    fn count_users(&self) -> StorageResult<u64>;

    /// Counts posts that carry a sentiment label
    fn count_scored(&self, collection: Collection) -> StorageResult<u64>;

    /// Counts distinct conversation roots still missing
    fn count_missing_roots(&self) -> StorageResult<u64>;

    /// Label -> count, most frequent first
    fn sentiment_breakdown(&self, collection: Collection) -> StorageResult<Vec<(String, u64)>>;
}
