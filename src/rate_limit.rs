use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::commands::ApiError;

/// Tracked clients above this count trigger a prune of idle entries.
const PRUNE_THRESHOLD: usize = 1024;

/// Sliding-window request limiter keyed by client address.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `limit` requests per `window` per client. A limit of 0 admits everything.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Arc<Self> {
        Arc::new(Self::new(limit, Duration::from_secs(60)))
    }

    /// Records a request from `client` and says whether it may proceed.
    pub fn check(&self, client: IpAddr) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut hits = match self.hits.lock() {
            Ok(hits) => hits,
            Err(poisoned) => poisoned.into_inner(),
        };

        if hits.len() > PRUNE_THRESHOLD {
            let window = self.window;
            hits.retain(|_, seen| seen.back().is_some_and(|t| now.duration_since(*t) < window));
        }

        let seen = hits.entry(client).or_default();
        while seen
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            seen.pop_front();
        }
        if seen.len() >= self.limit {
            return false;
        }
        seen.push_back(now);
        true
    }
}

/// Middleware rejecting clients over the limit with a JSON 429.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !limiter.check(client) {
        tracing::warn!("Rate limit hit by {} on {}", client, request.uri().path());
        return ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const BOB: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn limits_each_client_separately() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at(ALICE, now));
        assert!(limiter.check_at(ALICE, now));
        assert!(!limiter.check_at(ALICE, now));
        assert!(limiter.check_at(BOB, now));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at(ALICE, start));
        assert!(!limiter.check_at(ALICE, start + Duration::from_secs(59)));
        assert!(limiter.check_at(ALICE, start + Duration::from_secs(60)));
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at(ALICE, start));
        for s in 1..10 {
            assert!(!limiter.check_at(ALICE, start + Duration::from_secs(s)));
        }
        assert!(limiter.check_at(ALICE, start + Duration::from_secs(10)));
    }

    #[test]
    fn zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(limiter.check(ALICE));
        }
    }
}
