//! Sliding-window rate limiter for requests and tokens per minute

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Per-client limiter over a one-minute sliding window
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u32)>,
}

impl WindowState {
    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.requests.front() {
            if now.duration_since(front) > WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(&(time, _)) = self.tokens.front() {
            if now.duration_since(time) > WINDOW {
                self.tokens.pop_front();
            } else {
                break;
            }
        }
    }

    fn token_usage(&self) -> u64 {
        self.tokens.iter().map(|(_, t)| *t as u64).sum()
    }
}

impl RateLimiter {
    /// Create a new rate limiter. A limit of 0 disables that dimension.
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Wait until a request with roughly `estimated_tokens` fits both windows,
    /// then count the request
    pub async fn acquire(&self, estimated_tokens: u32) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.evict(now);

                match self.wait_time(&state, now, estimated_tokens) {
                    None => {
                        state.requests.push_back(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };
            tracing::debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    fn wait_time(&self, state: &WindowState, now: Instant, needed: u32) -> Option<Duration> {
        if self.requests_per_minute > 0
            && state.requests.len() >= self.requests_per_minute as usize
        {
            if let Some(&oldest) = state.requests.front() {
                return Some(WINDOW.saturating_sub(now.duration_since(oldest)) + Duration::from_millis(10));
            }
        }

        // A single oversized request is let through once the window is empty
        if self.tokens_per_minute > 0
            && !state.tokens.is_empty()
            && state.token_usage() + needed as u64 > self.tokens_per_minute as u64
        {
            if let Some(&(oldest, _)) = state.tokens.front() {
                return Some(WINDOW.saturating_sub(now.duration_since(oldest)) + Duration::from_millis(10));
            }
        }

        None
    }

    /// Record tokens actually consumed by a finished request
    pub async fn record_tokens(&self, tokens: u32) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.evict(now);
        state.tokens.push_back((now, tokens));
    }

    /// Tokens consumed in the last minute
    pub async fn current_token_usage(&self) -> u64 {
        let mut state = self.state.lock().await;
        state.evict(Instant::now());
        state.token_usage()
    }
}
