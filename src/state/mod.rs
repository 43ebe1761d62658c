//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: Which step of the search/rank/replies/backfill sequence a run is in
//! - `WindowState`: Per-window request log backing the shared rate limiter

mod phase;
mod window_state;

// Re-export main types
pub use phase::CrawlPhase;
pub use window_state::{RateWindow, WindowState};
