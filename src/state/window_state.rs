use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A single request-rate window: at most `max_requests` in any `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub max_requests: u32,
    pub period: Duration,
}

impl RateWindow {
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            max_requests,
            period,
        }
    }

    /// The even spacing this window implies between two requests
    pub fn spacing(&self) -> Duration {
        self.period / self.max_requests.max(1)
    }
}

/// Tracks the requests issued within one window
///
/// Holds a sliding log of request instants; entries older than the window
/// period are pruned on every check.
#[derive(Debug, Clone)]
pub struct WindowState {
    pub window: RateWindow,

    /// Instants of requests still inside the window, oldest first
    issued: VecDeque<Instant>,
}

impl WindowState {
    pub fn new(window: RateWindow) -> Self {
        Self {
            window,
            issued: VecDeque::with_capacity(window.max_requests as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.issued.front() {
            if now.duration_since(oldest) >= self.window.period {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until this window admits another request, None if it does now
    pub fn time_until_available(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);

        if (self.issued.len() as u32) < self.window.max_requests {
            return None;
        }

        // Full: the slot frees when the oldest entry leaves the window
        self.issued
            .front()
            .map(|&oldest| (oldest + self.window.period).saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
    }

    /// Records that a request was issued at `now`
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.issued.push_back(now);
    }

    /// Requests still available in the window at `now`
    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.window
            .max_requests
            .saturating_sub(self.issued.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_window_is_available() {
        let mut state = WindowState::new(RateWindow::new(2, Duration::from_secs(10)));
        let now = Instant::now();

        assert!(state.time_until_available(now).is_none());
        assert_eq!(state.remaining(now), 2);
    }

    #[test]
    fn test_full_window_waits_for_oldest() {
        let mut state = WindowState::new(RateWindow::new(2, Duration::from_secs(10)));
        let start = Instant::now();

        state.record(start);
        state.record(start + Duration::from_secs(4));

        let wait = state.time_until_available(start + Duration::from_secs(5));
        assert_eq!(wait, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_entries_expire_after_period() {
        let mut state = WindowState::new(RateWindow::new(1, Duration::from_secs(1)));
        let start = Instant::now();

        state.record(start);
        assert!(state.time_until_available(start).is_some());
        assert!(state
            .time_until_available(start + Duration::from_secs(1))
            .is_none());
        assert_eq!(state.remaining(start + Duration::from_secs(1)), 1);
    }

    #[test]
    fn test_spacing() {
        let window = RateWindow::new(300, Duration::from_secs(900));
        assert_eq!(window.spacing(), Duration::from_secs(3));
    }
}
