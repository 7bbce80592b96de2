// Per-client-IP token bucket. All state lives behind one mutex; a sweeper
// task evicts buckets that have gone quiet so the map cannot grow without
// bound.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_EVICTION: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn new(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_take(&mut self, now: Instant, rps: f64, burst: f64) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rps).min(burst);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    enabled: bool,
    rps: f64,
    burst: f64,
    clients: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, rps: f64, burst: u32) -> Self {
        Self {
            enabled,
            rps,
            burst: f64::from(burst),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `ip` may proceed right now. Always true when disabled.
    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(ip)
            .or_insert_with(|| Bucket::new(self.burst, now))
            .try_take(now, self.rps, self.burst)
    }

    fn sweep_at(&self, now: Instant) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|_, bucket| now.duration_since(bucket.last_seen) <= IDLE_EVICTION);
    }

    fn tracked_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Evict idle buckets once a minute for the process lifetime.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                limiter.sweep_at(Instant::now());
                tracing::debug!(clients = limiter.tracked_clients(), "rate limiter swept");
            }
        });
    }
}

/// Resolve the client address: `True-Client-IP`, then the leftmost
/// `X-Forwarded-For` entry, then the transport peer.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    if let Some(ip) = headers
        .get("true-client-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
    {
        return ip;
    }

    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
    {
        return ip;
    }

    peer
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    let ip = client_ip(req.headers(), peer);

    if !limiter.allow(ip) {
        return ApiError::RateLimited.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn burst_is_honored_then_requests_are_denied() {
        let limiter = RateLimiter::new(true, 2.0, 4);
        let now = Instant::now();
        let client = ip("10.0.0.1");

        for _ in 0..4 {
            assert!(limiter.allow_at(client, now));
        }
        assert!(!limiter.allow_at(client, now));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(true, 2.0, 4);
        let start = Instant::now();
        let client = ip("10.0.0.2");

        for _ in 0..4 {
            assert!(limiter.allow_at(client, start));
        }
        assert!(!limiter.allow_at(client, start));

        // 2 rps for one second buys two more requests.
        let later = start + Duration::from_secs(1);
        assert!(limiter.allow_at(client, later));
        assert!(limiter.allow_at(client, later));
        assert!(!limiter.allow_at(client, later));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = RateLimiter::new(true, 1.0, 1);
        let now = Instant::now();

        assert!(limiter.allow_at(ip("10.0.0.3"), now));
        assert!(!limiter.allow_at(ip("10.0.0.3"), now));
        assert!(limiter.allow_at(ip("10.0.0.4"), now));
    }

    #[test]
    fn disabled_limiter_is_a_no_op() {
        let limiter = RateLimiter::new(false, 0.0, 0);
        let now = Instant::now();

        for _ in 0..100 {
            assert!(limiter.allow_at(ip("10.0.0.5"), now));
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn sweep_evicts_only_idle_buckets() {
        let limiter = RateLimiter::new(true, 1.0, 1);
        let start = Instant::now();

        limiter.allow_at(ip("10.0.0.6"), start);
        limiter.allow_at(ip("10.0.0.7"), start + Duration::from_secs(150));
        assert_eq!(limiter.tracked_clients(), 2);

        limiter.sweep_at(start + Duration::from_secs(200));
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.sweep_at(start + Duration::from_secs(400));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn client_ip_prefers_true_client_ip_then_forwarded_for() {
        let peer = ip("192.0.2.1");

        let mut headers = HeaderMap::new();
        headers.insert("true-client-ip", HeaderValue::from_static("203.0.113.9"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.2, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer), ip("203.0.113.9"));

        headers.remove("true-client-ip");
        assert_eq!(client_ip(&headers, peer), ip("198.51.100.2"));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers, peer), peer);
    }

    #[test]
    fn client_ip_skips_malformed_headers() {
        let peer = ip("192.0.2.1");

        let mut headers = HeaderMap::new();
        headers.insert("true-client-ip", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, peer), peer);
    }
}
