//! Shared application state

use crate::auth::{AuthError, TokenIssuer};
use crate::authz::PermissionCache;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::matching::{HttpMatcher, Matcher};
use crate::rate_limit::RateLimiter;
use archivart_store::Database;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

/// Handles shared by every request
#[derive(Debug, Clone)]
pub struct AppState {
    /// Database
    pub db: Database,
    /// Token signer
    pub tokens: Arc<TokenIssuer>,
    /// Effective permissions per principal
    pub permissions: PermissionCache,
    /// Auth route limiter
    pub limiter: Arc<RateLimiter>,
    /// Feature matcher
    pub matcher: Arc<dyn Matcher>,
    /// Configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Build state from configuration and an open database
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidKey`] for a malformed signing key
    pub fn new(config: ServerConfig, db: Database) -> Result<Self, AuthError> {
        let tokens = match &config.auth.signing_key {
            Some(seed) => TokenIssuer::from_hex_seed(seed, config.auth.access_ttl(), config.auth.refresh_ttl())?,
            None => {
                tracing::warn!("no signing key configured, tokens will not survive a restart");
                TokenIssuer::generate(config.auth.access_ttl(), config.auth.refresh_ttl())
            }
        };
        let matcher = HttpMatcher::new(
            config.matching.base_url.clone(),
            Duration::from_millis(config.matching.health_timeout_ms),
            Duration::from_millis(config.matching.compare_timeout_ms),
        );
        Ok(Self {
            db,
            tokens: Arc::new(tokens),
            permissions: PermissionCache::new(
                config.permission_cache.capacity,
                Duration::from_secs(config.permission_cache.ttl_secs),
            ),
            limiter: Arc::new(
                RateLimiter::new(
                    config.rate_limit.max_requests,
                    Duration::from_secs(config.rate_limit.window_secs),
                )
                .with_trusted_proxies(config.rate_limit.trusted_proxies.iter().copied()),
            ),
            matcher: Arc::new(matcher),
            config: Arc::new(config),
        })
    }

    /// Replace the feature matcher
    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Run a store call on the blocking pool
    ///
    /// # Errors
    /// Returns the store error mapped to an API error
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> archivart_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
            .map_err(ApiError::from)
    }

    /// Run a store call that changes the RBAC graph, then drop cached permissions
    ///
    /// # Errors
    /// Returns the store error mapped to an API error
    pub async fn run_rbac<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> archivart_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = self.run(f).await;
        if result.is_ok() {
            self.permissions.invalidate_all();
        }
        result
    }

    /// Absolute URL for a stored media path
    #[must_use]
    pub fn media_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/uploads/media/{}",
                self.config.public_base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }
}

/// Inject the state into a filter chain
pub fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_urls() {
        let state = AppState::new(ServerConfig::new(), Database::open_in_memory().unwrap()).unwrap();
        assert_eq!(
            state.media_url("a/b.jpg"),
            "http://localhost:3000/uploads/media/a/b.jpg"
        );
        assert_eq!(state.media_url("https://cdn/x.jpg"), "https://cdn/x.jpg");
    }
}
