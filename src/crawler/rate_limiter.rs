//! Shared request rate limiter
//!
//! This module handles:
//! - Enforcing every configured request window at once
//! - Smoothing bursts to the shortest per-request spacing
//! - Server-imposed back-off after a rate-limit rejection
//!
//! One limiter is shared by every cursor of a run so that all requests count
//! against the same budget.

use crate::config::RateLimitConfig;
use crate::state::{RateWindow, WindowState};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};

#[derive(Debug)]
struct LimiterState {
    windows: Vec<WindowState>,

    /// No request may be issued before this instant
    penalty_until: Option<Instant>,

    /// When the last permit was granted
    last_granted: Option<Instant>,

    granted: u64,
    penalties: u64,
}

impl LimiterState {
    /// Longest wait any constraint imposes at `now`, None if a request may go
    fn wait_time(&mut self, now: Instant, min_interval: Duration) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        if let Some(until) = self.penalty_until {
            if until > now {
                wait = wait.max(until - now);
            } else {
                self.penalty_until = None;
            }
        }

        if let Some(last) = self.last_granted {
            wait = wait.max((last + min_interval).saturating_duration_since(now));
        }

        for window in &mut self.windows {
            if let Some(w) = window.time_until_available(now) {
                wait = wait.max(w);
            }
        }

        if wait.is_zero() {
            None
        } else {
            Some(wait)
        }
    }

    fn grant(&mut self, now: Instant) {
        for window in &mut self.windows {
            window.record(now);
        }
        self.last_granted = Some(now);
        self.granted += 1;

        if tracing::enabled!(tracing::Level::TRACE) {
            let remaining: Vec<u32> = self.windows.iter_mut().map(|w| w.remaining(now)).collect();
            tracing::trace!(
                "Request {} granted, window budget left: {:?}",
                self.granted,
                remaining
            );
        }
    }
}

/// Counters describing what the limiter has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub granted: u64,
    pub penalties: u64,
}

/// Rate limiter enforcing several request windows simultaneously
pub struct RateLimiter {
    state: Mutex<LimiterState>,

    /// Minimum gap between two granted requests
    min_interval: Duration,

    /// Added on top of every server-imposed back-off
    safety_margin: Duration,
}

impl RateLimiter {
    /// Creates a limiter over the given windows
    ///
    /// The burst spacing is the tightest spacing any window implies.
    pub fn new(windows: Vec<RateWindow>, safety_margin: Duration) -> Self {
        let min_interval = windows
            .iter()
            .map(RateWindow::spacing)
            .min()
            .unwrap_or(Duration::ZERO);

        Self {
            state: Mutex::new(LimiterState {
                windows: windows.into_iter().map(WindowState::new).collect(),
                penalty_until: None,
                last_granted: None,
                granted: 0,
                penalties: 0,
            }),
            min_interval,
            safety_margin,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let windows = config
            .windows
            .iter()
            .map(|w| RateWindow::new(w.max_requests, Duration::from_secs(w.period_secs)))
            .collect();

        Self::new(windows, Duration::from_millis(config.safety_margin_ms))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request may be issued and counts it against every window
    ///
    /// Never returns while any window is full or a penalty is in force.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                match state.wait_time(now, self.min_interval) {
                    None => {
                        state.grant(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            tracing::trace!("Rate limiter holding request for {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Blocks all requests for `retry_after` plus the safety margin
    ///
    /// Called after the server rejected a request for exceeding its budget.
    /// Returns once the penalty has elapsed.
    pub async fn penalize(&self, retry_after: Duration) {
        let until = {
            let mut state = self.state.lock().await;
            let until = Instant::now() + retry_after + self.safety_margin;

            state.penalty_until = Some(match state.penalty_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
            state.penalties += 1;

            state.penalty_until.unwrap_or(until)
        };

        tracing::warn!(
            "Rate limit hit, pausing requests for {:?}",
            retry_after + self.safety_margin
        );
        sleep_until(until).await;
    }

    pub async fn stats(&self) -> LimiterStats {
        let state = self.state.lock().await;
        LimiterStats {
            granted: state.granted,
            penalties: state.penalties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use std::sync::Arc;

    fn standard_limiter() -> RateLimiter {
        RateLimiter::new(
            vec![
                RateWindow::new(1, Duration::from_secs(1)),
                RateWindow::new(300, Duration::from_secs(900)),
            ],
            Duration::ZERO,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = standard_limiter();
        let start = Instant::now();

        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_window_caps_requests() {
        let limiter = standard_limiter();
        let start = Instant::now();
        let mut last: Option<Instant> = None;

        for _ in 0..301 {
            limiter.acquire().await;
            let now = Instant::now();
            if let Some(prev) = last {
                assert!(now - prev >= Duration::from_secs(1));
            }
            last = Some(now);
        }

        assert!(start.elapsed() >= Duration::from_secs(900));
        assert_eq!(limiter.stats().await.granted, 301);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_is_tightest_spacing() {
        let limiter = RateLimiter::new(
            vec![
                RateWindow::new(10, Duration::from_secs(1)),
                RateWindow::new(300, Duration::from_secs(900)),
            ],
            Duration::ZERO,
        );
        assert_eq!(limiter.min_interval(), Duration::from_millis(100));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_waits_retry_after_plus_margin() {
        let limiter = RateLimiter::new(
            vec![RateWindow::new(1, Duration::from_secs(1))],
            Duration::from_secs(1),
        );
        let start = Instant::now();

        limiter.penalize(Duration::from_secs(10)).await;
        assert!(start.elapsed() >= Duration::from_secs(11));

        let resumed = Instant::now();
        limiter.acquire().await;
        assert_eq!(resumed.elapsed(), Duration::ZERO);
        assert_eq!(limiter.stats().await.penalties, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalty_blocks_other_callers() {
        let limiter = Arc::new(standard_limiter());
        let penalized = Arc::clone(&limiter);

        let handle = tokio::spawn(async move {
            penalized.penalize(Duration::from_secs(30)).await;
        });
        tokio::task::yield_now().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_penalty_does_not_shorten_existing() {
        let limiter = standard_limiter();
        let start = Instant::now();

        limiter.penalize(Duration::from_secs(20)).await;
        limiter.penalize(Duration::ZERO).await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[test]
    fn test_from_config() {
        let config = RateLimitConfig {
            safety_margin_ms: 250,
            windows: vec![
                WindowConfig {
                    max_requests: 1,
                    period_secs: 1,
                },
                WindowConfig {
                    max_requests: 450,
                    period_secs: 900,
                },
            ],
        };

        let limiter = RateLimiter::from_config(&config);
        assert_eq!(limiter.safety_margin, Duration::from_millis(250));
        assert_eq!(limiter.min_interval(), Duration::from_secs(1));
    }
}
