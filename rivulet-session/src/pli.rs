//! Keyframe-request rate limiting with an exponential-plus-period policy:
//! requests inside the current window coalesce with the previous one, and
//! the window doubles while requests keep arriving.

use std::time::{Duration, Instant};

const BASE_WINDOW: Duration = Duration::from_millis(500);
const MAX_WINDOW: Duration = Duration::from_secs(8);

pub struct PliRateLimiter {
    window: Duration,
    last_sent: Option<Instant>,
}

impl Default for PliRateLimiter {
    fn default() -> Self {
        PliRateLimiter {
            window: BASE_WINDOW,
            last_sent: None,
        }
    }
}

impl PliRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the request should be forwarded; false when it coalesces
    /// with the previous one.
    pub fn request(&mut self, now: Instant) -> bool {
        match self.last_sent {
            None => {
                self.last_sent = Some(now);
                self.window = BASE_WINDOW;
                true
            }
            Some(last) => {
                let since = now.duration_since(last);
                if since < self.window {
                    return false;
                }
                // quiet for two windows resets the backoff
                if since >= self.window * 2 {
                    self.window = BASE_WINDOW;
                } else {
                    self.window = (self.window * 2).min(MAX_WINDOW);
                }
                self.last_sent = Some(now);
                true
            }
        }
    }
}
