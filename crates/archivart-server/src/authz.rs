//! Permission checks and the resolved-permission cache
//!
//! Checks are deny by default: a route passes only when the caller's
//! effective permissions satisfy its [`Requirement`]. No account kind or
//! role name bypasses the check.

use crate::auth::{authenticated, Principal};
use crate::error::ApiError;
use crate::state::AppState;
use archivart_core::{Authorizer, PermissionSet, Requirement, UserId};
use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warp::{Filter, Rejection};

/// Effective permissions per principal
///
/// Any RBAC write may change many principals at once, so writes drop the
/// whole cache rather than single entries. Every invalidation bumps a
/// generation; a load that overlapped one never stays cached.
#[derive(Debug, Clone)]
pub struct PermissionCache {
    inner: Cache<UserId, Arc<PermissionSet>>,
    generation: Arc<AtomicU64>,
}

impl PermissionCache {
    /// Cache with capacity and entry lifetime
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cached set for `user`, loading it on a miss
    ///
    /// # Errors
    /// Returns the loader's error; nothing is cached in that case
    pub async fn get_or_load<E, F>(&self, user: UserId, load: F) -> Result<Arc<PermissionSet>, E>
    where
        F: Future<Output = Result<PermissionSet, E>>,
    {
        if let Some(hit) = self.inner.get(&user).await {
            return Ok(hit);
        }
        let started = self.generation.load(Ordering::Acquire);
        let set = Arc::new(load.await?);
        self.inner.insert(user, Arc::clone(&set)).await;
        // Invalidations bump the generation before clearing, so either the
        // clear removes this insert or the bump is visible here
        if self.generation.load(Ordering::Acquire) != started {
            self.inner.invalidate(&user).await;
        }
        Ok(set)
    }

    /// Drop one principal
    pub async fn invalidate(&self, user: UserId) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.invalidate(&user).await;
    }

    /// Drop every principal
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.invalidate_all();
        tracing::debug!("permission cache cleared");
    }

    /// Entries currently held
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

/// Pass the caller through when they satisfy `requirement`
///
/// Answers 401 without a valid token and 403 when the check fails.
pub fn authorized(state: AppState, requirement: Requirement) -> impl Filter<Extract = (Principal,), Error = Rejection> + Clone {
    let requirement = Arc::new(requirement);
    authenticated(state).and_then(move |principal: Principal| {
        let requirement = Arc::clone(&requirement);
        async move {
            if let Err(err) = Authorizer::check(&principal.permissions, &requirement) {
                tracing::info!(
                    "denied {} ({}): requires {}",
                    principal.user.email,
                    principal.user.id,
                    requirement
                );
                return Err(warp::reject::custom(ApiError::from(err)));
            }
            Ok(principal)
        }
    })
}

/// Shorthand for a single-permission requirement
pub fn require(state: &AppState, permission: &str) -> impl Filter<Extract = (Principal,), Error = Rejection> + Clone {
    authorized(state.clone(), Requirement::permission(permission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn loads_once_until_invalidated() {
        let cache = PermissionCache::new(100, Duration::from_secs(60));
        let loads = AtomicUsize::new(0);
        let load = || async {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(["media.view"].into_iter().collect::<PermissionSet>())
        };

        let first = cache.get_or_load(UserId(1), load()).await.unwrap();
        let second = cache.get_or_load(UserId(1), load()).await.unwrap();
        assert!(first.contains("media.view"));
        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.invalidate_all();
        cache.get_or_load(UserId(1), load()).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_overlapping_invalidation_is_not_kept() {
        let cache = PermissionCache::new(100, Duration::from_secs(60));
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let loading = cache.clone();
        let pending = tokio::spawn(async move {
            loading
                .get_or_load(UserId(7), async move {
                    let _ = started_tx.send(());
                    release_rx.await.map_err(|_| "dropped")?;
                    Ok::<_, &'static str>(["rbac.update"].into_iter().collect::<PermissionSet>())
                })
                .await
        });

        started_rx.await.unwrap();
        cache.invalidate_all();
        release_tx.send(()).unwrap();

        let stale = pending.await.unwrap().unwrap();
        assert!(stale.contains("rbac.update"));

        let fresh = cache
            .get_or_load(UserId(7), async { Ok::<_, &str>(PermissionSet::new()) })
            .await
            .unwrap();
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache = PermissionCache::new(100, Duration::from_secs(60));
        let err = cache
            .get_or_load(UserId(2), async { Err::<PermissionSet, _>("db down") })
            .await;
        assert_eq!(err.unwrap_err(), "db down");
        let ok = cache
            .get_or_load(UserId(2), async { Ok::<_, &str>(PermissionSet::new()) })
            .await
            .unwrap();
        assert!(ok.is_empty());
    }
}
