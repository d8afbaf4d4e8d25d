use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimit;

/// Fixed retry window advertised on rejection, rather than a computed
/// exact refill time.
pub const RETRY_AFTER_SECS: u64 = 60;

const IDLE_EVICT: Duration = Duration::from_secs(5 * 60);

/// Bucket namespaces. Exhaustion in one never affects another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    AuthIp,
    AuthUsername,
    ApiIp,
    WsHandshakeIp,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// "No tokens" means "cannot afford one token"; a strict `<= 0`
    /// check would flap the moment a fraction refills.
    fn exhausted(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens < 1.0
    }
}

/// Token-bucket admission control keyed by `(scope, key)` with greedy
/// continuous refill. Buckets are created lazily per key; the sharded
/// map keeps unrelated keys off a shared lock.
pub struct RateLimiter {
    cfg: RateLimit,
    buckets: DashMap<(Scope, String), Bucket>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimit) -> Self {
        Self {
            cfg,
            buckets: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    fn capacity(&self, scope: Scope) -> u32 {
        match scope {
            Scope::AuthIp => self.cfg.auth_ip_per_minute,
            Scope::AuthUsername => self.cfg.auth_username_per_minute,
            Scope::ApiIp => self.cfg.api_ip_per_minute,
            Scope::WsHandshakeIp => self.cfg.ws_handshake_per_minute,
        }
    }

    /// Consume `cost` tokens if available. No side effect on failure.
    pub fn try_consume_cost(&self, scope: Scope, key: &str, cost: u32) -> bool {
        self.try_consume_at(scope, key, cost, Instant::now())
    }

    fn try_consume_at(&self, scope: Scope, key: &str, cost: u32, now: Instant) -> bool {
        if !self.cfg.enabled {
            return true;
        }
        let mut bucket = self
            .buckets
            .entry((scope, normalize(key)))
            .or_insert_with(|| Bucket::new(self.capacity(scope)));
        bucket.try_consume(cost as f64, now)
    }

    pub fn try_consume(&self, scope: Scope, key: &str) -> bool {
        self.try_consume_cost(scope, key, 1)
    }

    /// Read-only exhaustion check; never consumes.
    pub fn is_exhausted(&self, scope: Scope, key: &str) -> bool {
        if !self.cfg.enabled {
            return false;
        }
        let mut bucket = self
            .buckets
            .entry((scope, normalize(key)))
            .or_insert_with(|| Bucket::new(self.capacity(scope)));
        bucket.exhausted(Instant::now())
    }

    pub fn retry_after_secs(&self) -> u64 {
        RETRY_AFTER_SECS
    }

    /// Drop buckets idle for longer than the eviction window.
    pub fn sweep_idle(&self) {
        self.sweep_idle_at(Instant::now());
    }

    fn sweep_idle_at(&self, now: Instant) {
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < IDLE_EVICT);
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(api: u32, auth_ip: u32, auth_user: u32, ws: u32) -> RateLimiter {
        RateLimiter::new(RateLimit {
            enabled: true,
            use_x_forwarded_for: true,
            auth_ip_per_minute: auth_ip,
            auth_username_per_minute: auth_user,
            api_ip_per_minute: api,
            ws_handshake_per_minute: ws,
        })
    }

    #[test]
    fn test_capacity_then_reject() {
        let limiter = limiter(5, 50, 5, 20);
        for _ in 0..5 {
            assert!(limiter.try_consume(Scope::ApiIp, "10.0.0.1"));
        }
        assert!(!limiter.try_consume(Scope::ApiIp, "10.0.0.1"));
    }

    #[test]
    fn test_scopes_are_independent() {
        let limiter = limiter(300, 1, 5, 20);
        assert!(limiter.try_consume(Scope::AuthIp, "10.0.0.1"));
        assert!(!limiter.try_consume(Scope::AuthIp, "10.0.0.1"));
        // Same key, different scope: untouched.
        assert!(limiter.try_consume(Scope::ApiIp, "10.0.0.1"));
        assert!(limiter.try_consume(Scope::WsHandshakeIp, "10.0.0.1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(300, 50, 5, 1);
        assert!(limiter.try_consume(Scope::WsHandshakeIp, "192.168.1.1"));
        assert!(limiter.try_consume(Scope::WsHandshakeIp, "192.168.1.2"));
        assert!(!limiter.try_consume(Scope::WsHandshakeIp, "192.168.1.1"));
    }

    #[test]
    fn test_refill_restores_capacity() {
        let limiter = limiter(60, 50, 5, 20);
        let t0 = Instant::now();
        for _ in 0..60 {
            assert!(limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t0));
        }
        assert!(!limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t0));

        // One full window later the bucket is back at capacity.
        let t1 = t0 + Duration::from_secs(60);
        for _ in 0..60 {
            assert!(limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t1));
        }
        assert!(!limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t1));
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed_time() {
        let limiter = limiter(60, 50, 5, 20);
        let t0 = Instant::now();
        for _ in 0..60 {
            assert!(limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t0));
        }

        // Half a window accrues half the capacity.
        let t1 = t0 + Duration::from_secs(30);
        for _ in 0..30 {
            assert!(limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t1));
        }
        assert!(!limiter.try_consume_at(Scope::ApiIp, "10.0.0.9", 1, t1));
    }

    #[test]
    fn test_is_exhausted_does_not_consume() {
        let limiter = limiter(300, 50, 2, 20);
        assert!(!limiter.is_exhausted(Scope::AuthUsername, "dj.jane"));
        assert!(limiter.try_consume(Scope::AuthUsername, "dj.jane"));
        assert!(limiter.try_consume(Scope::AuthUsername, "dj.jane"));
        assert!(limiter.is_exhausted(Scope::AuthUsername, "dj.jane"));
        // Checking twice changes nothing.
        assert!(limiter.is_exhausted(Scope::AuthUsername, "dj.jane"));
    }

    #[test]
    fn test_disabled_passes_everything() {
        let mut cfg = RateLimit::default();
        cfg.enabled = false;
        cfg.api_ip_per_minute = 1;
        let limiter = RateLimiter::new(cfg);
        for _ in 0..100 {
            assert!(limiter.try_consume(Scope::ApiIp, "10.0.0.1"));
        }
        assert!(!limiter.is_exhausted(Scope::ApiIp, "10.0.0.1"));
    }

    #[test]
    fn test_key_normalization() {
        let limiter = limiter(300, 50, 1, 20);
        assert!(limiter.try_consume(Scope::AuthUsername, " DJ.Jane "));
        assert!(!limiter.try_consume(Scope::AuthUsername, "dj.jane"));
    }

    #[test]
    fn test_sweep_idle_evicts_stale_buckets() {
        let limiter = limiter(300, 50, 5, 20);
        let t0 = Instant::now();
        limiter.try_consume_at(Scope::ApiIp, "10.0.0.1", 1, t0);
        limiter.try_consume_at(Scope::ApiIp, "10.0.0.2", 1, t0);

        limiter.sweep_idle_at(t0 + IDLE_EVICT - Duration::from_secs(1));
        assert_eq!(limiter.buckets.len(), 2);

        // Touch one key, then sweep past the idle window.
        let t1 = t0 + Duration::from_secs(120);
        limiter.try_consume_at(Scope::ApiIp, "10.0.0.1", 1, t1);
        limiter.sweep_idle_at(t0 + IDLE_EVICT + Duration::from_secs(1));
        assert_eq!(limiter.buckets.len(), 1);
    }
}
