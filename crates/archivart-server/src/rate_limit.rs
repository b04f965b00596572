//! Fixed-window request limiter for the public auth routes

use crate::error::ApiError;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use warp::{Filter, Rejection};

/// Per-client request counter
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    trusted_proxies: Vec<IpAddr>,
    windows: DashMap<String, (Instant, u32)>,
}

impl RateLimiter {
    /// Limiter allowing `max_requests` per `window`
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            trusted_proxies: Vec::new(),
            windows: DashMap::new(),
        }
    }

    /// Peers whose `x-forwarded-for` header names the real client
    #[must_use]
    pub fn with_trusted_proxies(mut self, proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        self.trusted_proxies = proxies.into_iter().collect();
        self
    }

    /// Count a request from `key`; `false` once the window's budget is spent
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert((now, 0));
        let (started, hits) = entry.value_mut();
        if now.duration_since(*started) >= self.window {
            *started = now;
            *hits = 0;
        }
        if *hits >= self.max_requests {
            return false;
        }
        *hits += 1;
        true
    }

    /// Forget windows that have ended
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, (started, _)| now.duration_since(*started) < self.window);
    }
}

/// Client identity: the peer address, or `unknown`
///
/// `x-forwarded-for` is read only when the peer is a trusted proxy. Hops are
/// walked right to left and the first address that is not itself a trusted
/// proxy is the client; anything left of it is caller-supplied.
fn client_key(remote: Option<SocketAddr>, forwarded: Option<&str>, trusted: &[IpAddr]) -> String {
    let Some(peer) = remote.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }
    forwarded
        .into_iter()
        .flat_map(|value| value.rsplit(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .find(|hop| !trusted.contains(hop))
        .unwrap_or(peer)
        .to_string()
}

/// Reject with 429 once the caller's budget is spent
pub fn limit(limiter: Arc<RateLimiter>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::addr::remote()
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and_then(move |remote: Option<SocketAddr>, forwarded: Option<String>| {
            let limiter = Arc::clone(&limiter);
            async move {
                let key = client_key(remote, forwarded.as_deref(), &limiter.trusted_proxies);
                if limiter.check(&key) {
                    Ok(())
                } else {
                    tracing::warn!("rate limit exceeded for {}", key);
                    Err(warp::reject::custom(ApiError::RateLimited))
                }
            }
        })
        .untuple_one()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_resets_with_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0));
        assert!(limiter.check_at("a", t0));
        assert!(!limiter.check_at("a", t0));
        assert!(limiter.check_at("b", t0));
        assert!(limiter.check_at("a", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn client_key_ignores_forwarded_from_untrusted_peers() {
        let peer = Some(SocketAddr::from(([203, 0, 113, 9], 4000)));
        assert_eq!(client_key(peer, Some("1.2.3.4"), &[]), "203.0.113.9");
        assert_eq!(client_key(peer, None, &[]), "203.0.113.9");
        assert_eq!(client_key(None, Some("1.2.3.4"), &[]), "unknown");
    }

    #[test]
    fn client_key_walks_forwarded_behind_trusted_proxy() {
        let proxy: IpAddr = [10, 0, 0, 1].into();
        let inner: IpAddr = [10, 0, 0, 2].into();
        let peer = Some(SocketAddr::new(proxy, 4000));
        let trusted = [proxy, inner];
        // The left-most hop is whatever the client sent
        assert_eq!(client_key(peer, Some("6.6.6.6, 1.2.3.4, 10.0.0.2"), &trusted), "1.2.3.4");
        assert_eq!(client_key(peer, Some("garbage"), &trusted), "10.0.0.1");
        assert_eq!(client_key(peer, None, &trusted), "10.0.0.1");
    }

    #[tokio::test]
    async fn filter_rejects_once_budget_is_spent() {
        let filter = limit(Arc::new(RateLimiter::new(1, Duration::from_secs(60))));
        let peer = SocketAddr::from(([198, 51, 100, 7], 5000));
        let request = || warp::test::request().remote_addr(peer);

        tokio_test::assert_ok!(request().filter(&filter).await);
        let rejection = tokio_test::assert_err!(request().filter(&filter).await);
        assert!(matches!(rejection.find::<ApiError>(), Some(ApiError::RateLimited)));
    }

    #[tokio::test]
    async fn rotating_forwarded_header_does_not_reset_budget() {
        let filter = limit(Arc::new(RateLimiter::new(2, Duration::from_secs(60))));
        let peer = SocketAddr::from(([198, 51, 100, 7], 5000));
        let mut rejected = 0;
        for i in 0..10 {
            let result = warp::test::request()
                .remote_addr(peer)
                .header("x-forwarded-for", format!("10.0.0.{i}"))
                .filter(&filter)
                .await;
            if result.is_err() {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 8);
    }
}
