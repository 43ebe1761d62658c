//! Record parsing
//!
//! This module turns raw API records into [`Post`] and [`User`] values:
//! - Required identifiers are checked, everything else defaults
//! - Entity lists (hashtags, mentions, links) are flattened
//! - Links pointing at photo or video permalinks are counted as media
//! - Geo place ids are resolved against the page's place expansions

use crate::crawler::Page;
use crate::storage::{Post, User};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid id in `{field}`: {value}")]
    InvalidId { field: &'static str, value: String },

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Ids arrive as decimal strings, occasionally as bare numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: Option<RawId>,
    author_id: Option<RawId>,
    text: Option<String>,
    conversation_id: Option<RawId>,
    created_at: Option<String>,
    #[serde(default)]
    entities: RawEntities,
    geo: Option<RawGeo>,
    #[serde(default)]
    public_metrics: RawPostMetrics,
    #[serde(default)]
    referenced_tweets: Vec<RawReference>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    hashtags: Vec<RawTag>,
    #[serde(default)]
    mentions: Vec<RawMention>,
    #[serde(default)]
    urls: Vec<RawLink>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    username: String,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    expanded_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGeo {
    place_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPostMetrics {
    #[serde(default)]
    like_count: u32,
    #[serde(default)]
    reply_count: u32,
    #[serde(default)]
    retweet_count: u32,
    #[serde(default)]
    quote_count: u32,
}

#[derive(Debug, Deserialize)]
struct RawReference {
    #[serde(rename = "type")]
    kind: String,
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: Option<RawId>,
    username: Option<String>,
    name: Option<String>,
    #[serde(default)]
    verified: bool,
    location: Option<String>,
    created_at: Option<String>,
    description: Option<String>,
    #[serde(default)]
    public_metrics: RawUserMetrics,
}

#[derive(Debug, Default, Deserialize)]
struct RawUserMetrics {
    #[serde(default)]
    following_count: u32,
    #[serde(default)]
    followers_count: u32,
}

/// Kind of media a permalink points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Records of one page that survived parsing
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub posts: Vec<Post>,
    pub users: Vec<User>,
    /// Records rejected as malformed
    pub skipped: usize,
}

fn parse_id(field: &'static str, raw: RawId) -> Result<i64, ParseError> {
    match raw {
        RawId::Number(n) if n >= 0 => Ok(n),
        RawId::Number(n) => Err(ParseError::InvalidId {
            field,
            value: n.to_string(),
        }),
        RawId::Text(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or(ParseError::InvalidId { field, value: s }),
    }
}

fn required_id(field: &'static str, raw: Option<RawId>) -> Result<i64, ParseError> {
    parse_id(field, raw.ok_or(ParseError::MissingField(field))?)
}

/// Canonical permalink of a post
pub fn permalink(author_id: i64, id: i64) -> String {
    format!("https://twitter.com/{}/status/{}", author_id, id)
}

/// Classifies a link as a photo or video permalink
///
/// Matches `<host>/<handle>/status/<id>/(photo|video)/<n>` on twitter.com or
/// x.com (with or without `www.`/`mobile.`).
pub fn classify_media_url(link: &str) -> Option<MediaKind> {
    let parsed = Url::parse(link).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("mobile."))
        .unwrap_or(host.as_str());

    if host != "twitter.com" && host != "x.com" {
        return None;
    }

    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [_handle, "status", id, kind, index] if is_number(id) && is_number(index) => {
            match *kind {
                "photo" => Some(MediaKind::Image),
                "video" => Some(MediaKind::Video),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parses one post record
///
/// # Arguments
///
/// * `raw` - The record as returned by the API
/// * `places` - Place id -> display name, from the page's expansions
///
/// # Returns
///
/// * `Ok(Post)` - `id`, `author_id` and `text` present and valid
/// * `Err(ParseError)` - The record must be skipped
pub fn parse_post(raw: &Value, places: &HashMap<String, String>) -> Result<Post, ParseError> {
    let raw = RawPost::deserialize(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let id = required_id("id", raw.id)?;
    let author_id = required_id("author_id", raw.author_id)?;
    let text = raw.text.ok_or(ParseError::MissingField("text"))?;
    let conversation_id = raw
        .conversation_id
        .map(|c| parse_id("conversation_id", c))
        .transpose()?;

    let parent_id = raw
        .referenced_tweets
        .into_iter()
        .find(|r| r.kind == "replied_to")
        .map(|r| parse_id("referenced_tweets.id", r.id))
        .transpose()?;

    let urls: Vec<String> = raw
        .entities
        .urls
        .into_iter()
        .filter_map(|link| link.expanded_url.or(link.url))
        .collect();

    let mut media_image_count = 0;
    let mut media_video_count = 0;
    for link in &urls {
        match classify_media_url(link) {
            Some(MediaKind::Image) => media_image_count += 1,
            Some(MediaKind::Video) => media_video_count += 1,
            None => {}
        }
    }

    let location = raw
        .geo
        .and_then(|g| g.place_id)
        .and_then(|place_id| places.get(&place_id).cloned());

    Ok(Post {
        id,
        parent_id,
        conversation_id,
        author_id,
        url: permalink(author_id, id),
        text,
        created_at: raw.created_at,
        hashtags: raw.entities.hashtags.into_iter().map(|h| h.tag).collect(),
        mentions: raw
            .entities
            .mentions
            .into_iter()
            .map(|m| m.username)
            .collect(),
        urls,
        media_image_count,
        media_video_count,
        location,
        like_count: raw.public_metrics.like_count,
        reply_count: raw.public_metrics.reply_count,
        retweet_count: raw.public_metrics.retweet_count,
        quote_count: raw.public_metrics.quote_count,
        sentiment_label: None,
        sentiment_score: None,
    })
}

/// Parses one user record; `id` and `username` are required
pub fn parse_user(raw: &Value) -> Result<User, ParseError> {
    let raw = RawUser::deserialize(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    Ok(User {
        id: required_id("id", raw.id)?,
        username: raw.username.ok_or(ParseError::MissingField("username"))?,
        display_name: raw.name,
        verified: raw.verified,
        location: raw.location,
        following_count: raw.public_metrics.following_count,
        follower_count: raw.public_metrics.followers_count,
        joined_at: raw.created_at,
        bio: raw.description,
    })
}

/// Parses every record of a page, skipping the malformed ones
pub fn parse_page(page: &Page) -> ParsedBatch {
    let mut batch = ParsedBatch::default();

    for record in &page.posts {
        match parse_post(record, &page.places) {
            Ok(post) => batch.posts.push(post),
            Err(e) => {
                tracing::warn!("Skipping post record: {}", e);
                batch.skipped += 1;
            }
        }
    }

    for record in &page.users {
        match parse_user(record) {
            Ok(user) => batch.users.push(user),
            Err(e) => {
                tracing::warn!("Skipping user record: {}", e);
                batch.skipped += 1;
            }
        }
    }

    batch
}
