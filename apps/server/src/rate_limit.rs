//! Per-client throttling for job submissions.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use tracing::warn;

use crate::error::ApiError;

/// Upper bound on remembered clients before idle entries are evicted.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// How many generation requests one client may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(600),
        }
    }
}

impl RateLimit {
    /// Reads `REELSMITH_GENERATE_LIMIT` and `REELSMITH_GENERATE_WINDOW_SECS`.
    /// A limit of zero turns throttling off.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_requests = std::env::var("REELSMITH_GENERATE_LIMIT")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_requests);
        let window = std::env::var("REELSMITH_GENERATE_WINDOW_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.window);
        Self {
            max_requests,
            window,
        }
    }

    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.max_requests)?;
        Quota::with_period(self.window / self.max_requests).map(|q| q.allow_burst(burst))
    }
}

/// Keyed limiter in front of `POST /api/generate`.
pub struct GenerateLimiter {
    limit: RateLimit,
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    clock: DefaultClock,
}

impl GenerateLimiter {
    /// `None` when the limit disables throttling.
    pub fn new(limit: RateLimit) -> Option<Self> {
        let quota = limit.quota()?;
        Some(Self {
            limit,
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        })
    }

    /// Records one request from `client`, or says how long it must wait.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() > MAX_TRACKED_CLIENTS {
            self.limiter.retain_recent();
        }
        self.limiter
            .check_key(&client)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Requests without a peer address (in-process callers) share one bucket.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn limit_generate(
    State(limiter): State<Arc<GenerateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);
    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            warn!(%client, wait_secs = wait.as_secs(), "generation request throttled");
            ApiError::RateLimited {
                max_requests: limiter.limit.max_requests,
                window_secs: limiter.limit.window.as_secs(),
                retry_after_secs: wait.as_secs().max(1),
            }
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_throttling() {
        let limit = RateLimit {
            max_requests: 0,
            window: Duration::from_secs(60),
        };
        assert!(GenerateLimiter::new(limit).is_none());
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = GenerateLimiter::new(RateLimit {
            max_requests: 2,
            window: Duration::from_secs(600),
        })
        .unwrap();
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(first).is_ok());
        assert!(limiter.check(first).is_ok());
        let wait = limiter.check(first).unwrap_err();
        assert!(wait > Duration::from_secs(200) && wait <= Duration::from_secs(300));

        assert!(limiter.check(second).is_ok());
    }
}
