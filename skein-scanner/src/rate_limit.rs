//! Per-domain token-bucket throttling.
//!
//! One [`RateLimiter`] is shared across every domain a crawl touches. Each
//! host gets its own governor bucket; asking for a host with a different rate
//! than its current bucket replaces the bucket, which is how domain rules and
//! robots.txt Crawl-delay override the default budget.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::url_utils::host_of;

const MIN_RATE: f64 = 0.001;
const MAX_RATE: f64 = 1_000_000.0;

struct HostBucket {
    rate: f64,
    limiter: Arc<DefaultDirectRateLimiter>,
}

pub struct RateLimiter {
    default_rate: f64,
    buckets: Mutex<HashMap<String, HostBucket>>,
}

impl RateLimiter {
    /// `requests_per_second` applies to any host without an explicit rate.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            default_rate: clamp_rate(requests_per_second),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_rate(&self) -> f64 {
        self.default_rate
    }

    /// Wait until a token is available for the URL's host at the default rate.
    pub async fn check_limit(&self, url: &str) {
        self.check_limit_with_rate(url, None).await
    }

    /// Wait until a token is available for the URL's host, using `rate`
    /// (requests per second) instead of the default when given.
    pub async fn check_limit_with_rate(&self, url: &str, rate: Option<f64>) {
        let Some(host) = host_of(url) else {
            return;
        };
        let rate = rate.map(clamp_rate).unwrap_or(self.default_rate);
        let limiter = self.limiter_for(&host, rate);
        limiter.until_ready().await;
    }

    /// Current rate for a host, if it has been throttled before.
    pub fn current_rate(&self, host: &str) -> Option<f64> {
        self.lock_buckets().get(host).map(|b| b.rate)
    }

    fn limiter_for(&self, host: &str, rate: f64) -> Arc<DefaultDirectRateLimiter> {
        let mut buckets = self.lock_buckets();
        if let Some(bucket) = buckets.get(host) {
            if (bucket.rate - rate).abs() < f64::EPSILON {
                return bucket.limiter.clone();
            }
            debug!(host = %host, from = bucket.rate, to = rate, "Swapping rate limit");
        }

        let limiter = Arc::new(GovernorLimiter::direct(quota_for(rate)));
        buckets.insert(
            host.to_string(),
            HostBucket {
                rate,
                limiter: limiter.clone(),
            },
        );
        limiter
    }

    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, HashMap<String, HostBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        return MIN_RATE;
    }
    rate.clamp(MIN_RATE, MAX_RATE)
}

/// One request per `1 / rate` seconds with no burst.
fn quota_for(rate: f64) -> Quota {
    Quota::with_period(Duration::from_secs_f64(1.0 / rate))
        .map(|q| q.allow_burst(NonZeroU32::MIN))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
}

/// Requests-per-second equivalent of a robots.txt Crawl-delay.
pub fn rate_from_delay(delay: Duration) -> Option<f64> {
    let secs = delay.as_secs_f64();
    (secs > 0.0).then(|| 1.0 / secs)
}
