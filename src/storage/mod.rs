//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Insert-or-ignore persistence of posts and replies
//! - Upsert persistence of user profiles
//! - The analytic queries that drive reply crawling and root backfill
//! - Run tracking

mod paging;
mod schema;
mod sqlite;
mod traits;

pub use paging::Pager;
pub use sqlite::{ceil_percent, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::RankingConfig;
use crate::state::CrawlPhase;

/// Which of the two post tables a record belongs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Posts found by searching directly, plus backfilled conversation roots
    Posts,
    /// Posts found only through a reply search
    Replies,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Replies => "replies",
        }
    }
}

/// A post or reply, normalized for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub author_id: i64,
    pub url: String,
    pub text: String,
    pub created_at: Option<String>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub urls: Vec<String>,
    pub media_image_count: u32,
    pub media_video_count: u32,
    pub location: Option<String>,
    pub like_count: u32,
    pub reply_count: u32,
    pub retweet_count: u32,
    pub quote_count: u32,
    pub sentiment_label: Option<String>,
    pub sentiment_score: Option<f64>,
}

/// A user profile
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub verified: bool,
    pub location: Option<String>,
    pub following_count: u32,
    pub follower_count: u32,
    pub joined_at: Option<String>,
    pub bio: Option<String>,
}

/// A ranked conversation root returned by the engagement query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRef {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub engagement: i64,
}

impl RootRef {
    /// The conversation to search replies for
    pub fn conversation(&self) -> i64 {
        self.conversation_id.unwrap_or(self.id)
    }
}

/// Weights of the engagement sum used to rank roots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementWeights {
    pub likes: u32,
    pub retweets: u32,
    pub quotes: u32,
    pub replies: u32,
}

impl EngagementWeights {
    /// Likes + retweets + quotes, the ranking covered by the engagement index
    pub const DEFAULT: Self = Self {
        likes: 1,
        retweets: 1,
        quotes: 1,
        replies: 0,
    };

    /// SQL expression computing the weighted engagement of a row
    pub fn to_sql(&self) -> String {
        if *self == Self::DEFAULT {
            return schema::ENGAGEMENT_EXPR.to_string();
        }
        format!(
            "like_count * {} + retweet_count * {} + quote_count * {} + reply_count * {}",
            self.likes, self.retweets, self.quotes, self.replies
        )
    }
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<&RankingConfig> for EngagementWeights {
    fn from(config: &RankingConfig) -> Self {
        Self {
            likes: config.like_weight,
            retweets: config.retweet_weight,
            quotes: config.quote_weight,
            replies: config.reply_weight,
        }
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub query: String,
    pub status: RunStatus,
    pub phase: CrawlPhase,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Joins a list for storage; an empty list is stored as NULL
pub fn join_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

/// Inverse of [`join_list`]
pub fn split_list(text: Option<String>) -> Vec<String> {
    match text {
        Some(s) if !s.is_empty() => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
