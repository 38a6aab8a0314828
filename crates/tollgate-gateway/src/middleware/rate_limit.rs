//! Two-level token-bucket rate limiter.
//!
//! Every admission must find at least one token in both the gateway-wide
//! bucket and the caller's own bucket.  Buckets refill lazily: on each check
//! the elapsed time is converted to tokens, capped at capacity.  A rejected
//! check consumes nothing from either bucket.
//!
//! Per-client buckets may be sized independently of the global one.  With
//! equal parameters the global bucket always runs dry first, so only a
//! tighter client limit makes the second level reject on its own.
//!
//! Per-client buckets live in a [`DashMap`] and are dropped by
//! [`RateLimiter::sweep_idle`] once they have been idle for the configured
//! TTL; a full bucket and a missing bucket admit identically.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tollgate_kernel::gateway::{GatewayRequest, RateLimitConfig};
use tracing::debug;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant, limits: BucketLimits) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * limits.refill_per_sec).min(limits.capacity);
        self.last_refill = now;
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketLimits {
    capacity: f64,
    refill_per_sec: f64,
}

impl BucketLimits {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
        }
    }
}

/// Gateway-wide plus per-client token-bucket limiter.
pub struct RateLimiter {
    global_limits: BucketLimits,
    client_limits: BucketLimits,
    global: Mutex<TokenBucket>,
    clients: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Create a limiter; both levels use the same capacity and refill rate.
    ///
    /// * `capacity`       - burst size, tokens a bucket starts with
    /// * `refill_per_sec` - sustained rate
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let limits = BucketLimits::new(capacity, refill_per_sec);
        Self {
            global_limits: limits,
            client_limits: limits,
            global: Mutex::new(TokenBucket::full(limits.capacity, Instant::now())),
            clients: DashMap::new(),
        }
    }

    /// Builder: size every per-client bucket independently of the global one.
    pub fn with_client_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.client_limits = BucketLimits::new(capacity, refill_per_sec);
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec).with_client_limit(
            config.effective_client_capacity(),
            config.effective_client_refill_per_sec(),
        )
    }

    /// Return `true` and consume one token from both buckets if both hold at
    /// least one; otherwise return `false` and consume nothing.
    pub fn allow(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let client = self.client_bucket(client_key, now);

        // Lock order is always client then global.
        let mut client = client.lock();
        let mut global = self.global.lock();

        global.refill(now, self.global_limits);
        client.refill(now, self.client_limits);

        if global.tokens < 1.0 || client.tokens < 1.0 {
            return false;
        }
        global.tokens -= 1.0;
        client.tokens -= 1.0;
        true
    }

    /// Time for a single token to accrue in the slower of the two buckets;
    /// saturates at [`Duration::MAX`] for vanishingly small rates.
    pub fn retry_after(&self) -> Duration {
        let rate = self
            .global_limits
            .refill_per_sec
            .min(self.client_limits.refill_per_sec);
        Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX)
    }

    /// Burst size available to a single client.
    pub fn client_capacity(&self) -> u32 {
        self.client_limits.capacity.min(self.global_limits.capacity) as u32
    }

    /// Number of per-client buckets currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Drop per-client buckets idle for at least `ttl`; returns how many
    /// were removed.  Buckets locked by an in-flight check are kept.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients.retain(|_, bucket| match bucket.try_lock() {
            Some(bucket) => now.saturating_duration_since(bucket.last_refill) < ttl,
            None => true,
        });
        before.saturating_sub(self.clients.len())
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `every` on a background
    /// task until the returned handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, ttl: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_idle(ttl);
                if removed > 0 {
                    debug!(removed, remaining = self.tracked_clients(), "swept idle client buckets");
                }
            }
        })
    }

    fn client_bucket(&self, key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.clients.get(key) {
            return bucket.clone();
        }
        self.clients
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(self.client_limits.capacity, now))))
            .clone()
    }
}

/// Identify the caller: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address, falling back to `"anonymous"`.
pub fn client_key(request: &GatewayRequest) -> String {
    let forwarded = request
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    if let Some(ip) = request.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
        return ip.to_string();
    }
    request
        .remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_kernel::gateway::HttpMethod;

    fn global_tokens(rl: &RateLimiter) -> f64 {
        rl.global.lock().tokens
    }

    fn client_tokens(rl: &RateLimiter, key: &str) -> f64 {
        rl.clients.get(key).map(|b| b.lock().tokens).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let rl = RateLimiter::new(5, 1.0);
        for _ in 0..5 {
            assert!(rl.allow("c"));
        }
        assert!(!rl.allow("c"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_retry_after_admits_exactly_once() {
        let rl = RateLimiter::new(2, 4.0);
        assert!(rl.allow("c"));
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));

        tokio::time::advance(rl.retry_after()).await;
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let rl = RateLimiter::new(3, 10.0);
        assert!(rl.allow("c"));
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            assert!(rl.allow("c"));
        }
        assert!(!rl.allow("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn global_bucket_is_shared_across_clients() {
        let rl = RateLimiter::new(3, 1.0);
        assert!(rl.allow("a"));
        assert!(rl.allow("a"));
        assert!(rl.allow("b"));
        // "b" still holds 2 tokens, but the gateway-wide bucket is empty.
        assert!(!rl.allow("b"));
        assert_eq!(client_tokens(&rl, "b"), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tighter_client_limit_rejects_before_the_global_bucket() {
        let rl = RateLimiter::new(100, 50.0).with_client_limit(2, 1.0);
        assert!(rl.allow("a"));
        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        // Other clients still have their own allowance.
        assert!(rl.allow("b"));
        assert_eq!(global_tokens(&rl), 97.0);
        assert_eq!(rl.client_capacity(), 2);
        assert_eq!(rl.retry_after(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
    }

    #[test]
    fn config_client_limit_is_applied() {
        let cfg = RateLimitConfig::new(50, 10.0).with_client_limit(3, 0.5);
        let rl = RateLimiter::from_config(&cfg);
        assert_eq!(rl.client_capacity(), 3);
        assert_eq!(rl.retry_after(), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_saturates_for_tiny_rates() {
        let rl = RateLimiter::new(1, 1e-20);
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));
        assert_eq!(rl.retry_after(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_consumes_nothing() {
        let rl = RateLimiter::new(2, 1.0);
        assert!(rl.allow("a"));
        assert!(rl.allow("b"));
        for _ in 0..4 {
            assert!(!rl.allow("a"));
        }
        assert_eq!(global_tokens(&rl), 0.0);
        assert_eq!(client_tokens(&rl, "a"), 1.0);
        assert_eq!(client_tokens(&rl, "b"), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_clients_are_swept() {
        let rl = RateLimiter::new(5, 1.0);
        assert!(rl.allow("old"));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rl.allow("fresh"));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(rl.sweep_idle(Duration::from_secs(20)), 1);
        assert_eq!(rl.tracked_clients(), 1);
        assert!(rl.clients.contains_key("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_evicts_idle_clients() {
        let rl = Arc::new(RateLimiter::new(5, 1.0));
        assert!(rl.allow("idle"));
        let sweeper = rl.clone().spawn_sweeper(Duration::from_secs(10), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rl.tracked_clients(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rl.tracked_clients(), 0);
        sweeper.abort();
    }

    #[test]
    fn concurrent_checks_never_overdraw() {
        // Effectively no refill during the test.
        let rl = RateLimiter::new(20, 1e-9);
        let admitted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for t in 0..8 {
                let rl = &rl;
                let admitted = &admitted;
                s.spawn(move || {
                    for i in 0..10 {
                        if rl.allow(&format!("client-{}", (t + i) % 4)) {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        assert_eq!(admitted.into_inner(), 20);
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let req = GatewayRequest::new("r", "/", HttpMethod::Get)
            .with_header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .with_header("x-real-ip", "198.51.100.2");
        assert_eq!(client_key(&req), "203.0.113.9");
    }

    #[test]
    fn client_key_falls_back_to_real_ip_then_peer() {
        let req = GatewayRequest::new("r", "/", HttpMethod::Get).with_header("x-real-ip", "198.51.100.2");
        assert_eq!(client_key(&req), "198.51.100.2");

        let req = GatewayRequest::new("r", "/", HttpMethod::Get)
            .with_remote_addr("192.0.2.7:4000".parse().unwrap());
        assert_eq!(client_key(&req), "192.0.2.7");

        let req = GatewayRequest::new("r", "/", HttpMethod::Get);
        assert_eq!(client_key(&req), "anonymous");
    }
}
