//! ArchivArt Server - HTTP API of the ArchivArt admin service
//!
//! Provides:
//! - Ed25519-signed bearer tokens with revocation and session invalidation
//! - Deny-by-default `module.action` checks with a cached permission set per user
//! - Public media browsing and image matching backed by an external matcher
//! - Admin and RBAC management routes with cascading deletes
//!
//! # Example
//!
//! ```rust,no_run
//! use archivart_server::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServerConfig::new().with_database_path("archivart.db");
//! serve(config).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod auth;
pub mod authz;
pub mod config;
pub mod error;
pub mod matching;
pub mod rate_limit;
pub mod reply;
pub mod routes;
pub mod state;

pub use auth::{Principal, TokenIssuer, TokenKind, TokenPair};
pub use authz::PermissionCache;
pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use matching::{HttpMatcher, MatchOutcome, Matcher, MatchingError, StoredDescriptors};
pub use rate_limit::RateLimiter;
pub use state::AppState;

use archivart_store::Database;
use std::convert::Infallible;
use std::time::Duration;
use warp::{Filter, Reply};

/// Interval between sweeps of expired revocations and rate windows
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// The whole HTTP application
pub fn app(state: &AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    routes::api(state)
        .recover(error::recover)
        .with(warp::trace::request())
}

/// Drop expired revocations and idle rate windows
///
/// # Errors
/// Returns an error if the purge query fails
pub async fn maintain(state: &AppState) -> Result<usize, ApiError> {
    state.limiter.prune();
    let now = chrono::Utc::now();
    state.run(move |db| db.tokens().purge_expired(now)).await
}

/// Open the database and serve until the process is stopped
///
/// # Errors
/// Returns an error if the database cannot be opened or the signing key is invalid
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    if db.modules().list(None)?.is_empty() {
        tracing::warn!(
            "RBAC catalog is empty; run `archivart-admin setup --database {}`",
            config.database_path.display()
        );
    }
    let bind = config.bind;
    let state = AppState::new(config, db)?;

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            match maintain(&sweeper).await {
                Ok(purged) if purged > 0 => tracing::debug!("purged {} expired revocations", purged),
                Ok(_) => {}
                Err(e) => tracing::warn!("maintenance failed: {}", e),
            }
        }
    });

    tracing::info!("ArchivArt server v{} listening on {}", VERSION, bind);
    warp::serve(app(&state)).run(bind).await;
    Ok(())
}

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the ArchivArt server
    pub use crate::{app, serve, ApiError, AppState, Matcher, ServerConfig};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
