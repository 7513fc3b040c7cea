//! Per-identity request limits over fixed one-minute windows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::{Clock, SystemClock};

pub const WINDOW: Duration = Duration::from_secs(60);
const TOKEN_PREFIX_LEN: usize = 43;

/// Rate-limit key for a request: the signed-in user, else a bearer token
/// prefix, else the peer address.
pub fn identity(user: Option<&str>, authorization: Option<&str>, peer: Option<&str>) -> String {
    if let Some(user) = user.map(str::trim).filter(|u| !u.is_empty()) {
        return format!("user:{user}");
    }
    if let Some(token) = authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
        return format!("token:{prefix}");
    }
    format!("ip:{}", peer.unwrap_or("unknown"))
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), Window>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WINDOW)
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            clock,
        }
    }

    /// Count one request against `bucket` for `identity`; returns false once
    /// `limit` requests have been seen in the current window.
    pub fn check(&self, bucket: &str, identity: &str, limit: u32) -> bool {
        let now = self.clock.now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.len() > 10_000 {
            let span = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < span);
        }

        let entry = windows
            .entry((bucket.to_string(), identity.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= limit {
            tracing::warn!(bucket, identity, limit, "rate limit exceeded");
            return false;
        }
        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    #[test]
    fn identity_prefers_user_then_token_then_ip() {
        assert_eq!(
            identity(Some("ana@example.com"), Some("Bearer abc"), Some("10.0.0.1")),
            "user:ana@example.com"
        );
        assert_eq!(identity(None, Some("Bearer abc"), Some("10.0.0.1")), "token:abc");
        assert_eq!(identity(Some(" "), Some("Basic xyz"), Some("10.0.0.1")), "ip:10.0.0.1");
        assert_eq!(identity(None, None, None), "ip:unknown");
    }

    #[test]
    fn token_identity_is_truncated() {
        let token = "x".repeat(100);
        let id = identity(None, Some(&format!("Bearer {token}")), None);
        assert_eq!(id.len(), "token:".len() + TOKEN_PREFIX_LEN);
    }

    #[test]
    fn limit_resets_with_the_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(WINDOW, clock.clone());
        for _ in 0..5 {
            assert!(limiter.check("pdf", "ip:1", 5));
        }
        assert!(!limiter.check("pdf", "ip:1", 5));
        assert!(limiter.check("pdf", "ip:2", 5));
        assert!(limiter.check("predict", "ip:1", 5));

        clock.advance(WINDOW);
        assert!(limiter.check("pdf", "ip:1", 5));
    }
}
