//! ArchivArt Store - SQLite persistence for the ArchivArt admin service
//!
//! Provides:
//! - Versioned schema migrations
//! - Repositories for accounts, media, settings and the RBAC catalog
//! - Transactional cascading deletes with impact reports
//! - Dashboard statistics
//! - Catalog seeding and administrator bootstrap
//!
//! Repositories borrow the shared [`Database`] handle:
//!
//! ```rust
//! use archivart_store::{seed, Database};
//!
//! let db = Database::open_in_memory()?;
//! seed::reset_rbac_catalog(&db)?;
//! let view = db.permissions().get_by_name("media.view")?;
//! assert!(view.is_some());
//! # Ok::<(), archivart_store::StoreError>(())
//! ```

#![warn(unreachable_pub)]

pub mod actions;
pub mod cascade;
pub mod db;
pub mod error;
pub mod media;
pub mod modules;
pub mod permissions;
pub mod roles;
pub mod schema;
pub mod seed;
pub mod settings;
pub mod stats;
pub mod tokens;
pub mod users;

pub use actions::{ActionUpdate, Actions, NewAction};
pub use cascade::{Cascade, Removal};
pub use db::Database;
pub use error::{Result, StoreError};
pub use media::{MediaFilter, MediaRepo, MediaStats, MediaUpdate, NewMedia};
pub use modules::{ModuleUpdate, Modules, NewModule};
pub use permissions::{NewPermission, PermissionFilter, PermissionUpdate, Permissions};
pub use roles::{NewRole, RoleFilter, RoleStat, RoleUpdate, Roles};
pub use seed::SeedSummary;
pub use settings::Settings;
pub use stats::{Dashboard, RbacOverview, Stats};
pub use tokens::Tokens;
pub use users::{NewUser, UserFilter, UserUpdate, Users};

pub(crate) use db::count;

use rusqlite::{Connection, OptionalExtension, Params};

/// Whether a `SELECT 1 ...` query yields a row
pub(crate) fn exists(conn: &Connection, sql: &str, params: impl Params) -> Result<bool> {
    Ok(conn.query_row(sql, params, |_| Ok(())).optional()?.is_some())
}

pub(crate) const fn default_true() -> bool {
    true
}

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with ArchivArt Store
    pub use crate::{
        Database, MediaFilter, NewMedia, NewUser, Removal, StoreError, UserFilter,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
