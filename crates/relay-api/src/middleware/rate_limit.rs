//! Fixed-window rate limiter middleware.
//!
//! Buckets are keyed by `bucket:client`, so the same client has independent
//! counters per bucket. A bucket is replaced once its window has passed, and
//! expired buckets are swept every `sweep_every` checks across the whole
//! limiter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tracing::{debug, warn};

use relay_core::config::rate_limit::{RateLimitConfig, RateLimitRule};

use crate::error::ApiErrorResponse;

/// `x-ratelimit-limit`
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `x-ratelimit-remaining`
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `x-ratelimit-reset`, in unix seconds
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Client key used when no forwarding header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

const CLIENT_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    count: u64,
    reset_at_ms: u64,
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Configured maximum for the window.
    pub limit: u64,
    /// Requests left in the window, never negative.
    pub remaining: u64,
    /// When the window resets, in unix milliseconds.
    pub reset_at_ms: u64,
}

impl RateDecision {
    /// Window reset in unix seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }

    /// Seconds a rejected caller should wait, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }

    /// Writes the limit, remaining and reset headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(RESET_HEADER, HeaderValue::from(self.reset_at_secs()));
    }
}

/// Process-wide fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, RateBucket>,
    checks: AtomicU64,
    sweep_every: u64,
}

impl RateLimiter {
    /// Creates a limiter that sweeps expired buckets every `sweep_every` checks.
    /// Zero disables sweeping.
    pub fn new(sweep_every: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            checks: AtomicU64::new(0),
            sweep_every,
        }
    }

    /// Creates a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.sweep_every)
    }

    /// Counts a request against `bucket` for `client` at the current time.
    pub fn check(&self, bucket: &str, client: &str, max: u64, window: Duration) -> RateDecision {
        self.check_at(bucket, client, max, window, now_ms())
    }

    /// Counts a request at an explicit time, in unix milliseconds.
    pub fn check_at(
        &self,
        bucket: &str,
        client: &str,
        max: u64,
        window: Duration,
        now_ms: u64,
    ) -> RateDecision {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sweep_every > 0 && checks % self.sweep_every == 0 {
            self.sweep(now_ms);
        }

        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let fresh = || RateBucket {
            count: 0,
            reset_at_ms: now_ms.saturating_add(window_ms),
        };

        // The entry guard holds the shard lock, so concurrent checks on one key serialize.
        let mut entry = self
            .buckets
            .entry(format!("{bucket}:{client}"))
            .or_insert_with(fresh);
        if entry.reset_at_ms <= now_ms {
            *entry = fresh();
        }
        entry.count += 1;

        RateDecision {
            allowed: entry.count <= max,
            limit: max,
            remaining: max.saturating_sub(entry.count),
            reset_at_ms: entry.reset_at_ms,
        }
    }

    /// Drops every bucket whose window has passed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at_ms > now_ms);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, "Swept expired rate-limit buckets");
        }
        removed
    }

    /// Forgets every bucket.
    pub fn reset(&self) {
        self.buckets.clear();
        self.checks.store(0, Ordering::Relaxed);
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Which bucket a route counts against, and its limits.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Bucket name
    pub bucket: String,
    /// Requests allowed per window
    pub max: u64,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Policy for `bucket` under `rule`.
    pub fn new(bucket: impl Into<String>, rule: RateLimitRule) -> Self {
        Self {
            bucket: bucket.into(),
            max: rule.max,
            window: rule.window(),
        }
    }

    /// Policy for `bucket` as configured.
    pub fn from_config(bucket: &str, config: &RateLimitConfig) -> Self {
        Self::new(bucket, config.rule(bucket))
    }
}

/// State for [`enforce`]: the shared limiter plus one route's policy.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Shared limiter
    pub limiter: Arc<RateLimiter>,
    /// Route policy
    pub policy: RateLimitPolicy,
}

/// Resolves the client key from proxy headers, or [`UNKNOWN_CLIENT`].
///
/// For `x-forwarded-for` the first hop is used.
pub fn client_address(headers: &HeaderMap) -> String {
    for name in CLIENT_ADDRESS_HEADERS {
        if let Some(value) = headers.get(name)
            && let Ok(value) = value.to_str()
            && let Some(first) = value.split(',').next()
            && !first.trim().is_empty()
        {
            return first.trim().to_string();
        }
    }
    UNKNOWN_CLIENT.to_string()
}

/// Admits or rejects a request against the route's bucket.
///
/// Admitted responses carry the limit headers; rejections are a 429 with
/// the same headers plus `retry-after`.
pub async fn enforce(State(state): State<RateLimitState>, request: Request, next: Next) -> Response {
    let client = client_address(request.headers());
    let policy = &state.policy;
    let decision = state
        .limiter
        .check(&policy.bucket, &client, policy.max, policy.window);

    if !decision.allowed {
        warn!(bucket = %policy.bucket, client = %client, "Rate limit exceeded");
        return rejection(&decision, now_ms());
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}

fn rejection(decision: &RateDecision, now_ms: u64) -> Response {
    let body = ApiErrorResponse {
        error: "RATE_LIMITED".to_string(),
        message: "Too Many Requests".to_string(),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    decision.apply_headers(headers);
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs(now_ms)));
    response
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
