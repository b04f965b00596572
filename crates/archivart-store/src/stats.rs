//! Dashboard figures

use crate::count;
use crate::db::Database;
use crate::error::Result;
use crate::media::{map_media, MediaStats, MEDIA_COLUMNS, MEDIA_JOINS};
use crate::users::{map_user, USER_COLUMNS};
use archivart_core::{Media, User};
use serde::{Deserialize, Serialize};

/// Rows shown in the dashboard's recent lists
pub const RECENT_LIMIT: usize = 5;

/// Admin dashboard summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    /// All accounts
    pub total_users: u64,
    /// Accounts of kind `user`
    pub regular_users: u64,
    /// Media figures
    pub media: MediaStats,
    /// Newest accounts of kind `user`
    pub recent_users: Vec<User>,
    /// Newest media
    pub recent_media: Vec<Media>,
}

/// RBAC graph sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacOverview {
    /// Roles
    pub roles: u64,
    /// Permissions
    pub permissions: u64,
    /// Active memberships
    pub user_roles: u64,
    /// Active grants
    pub role_permissions: u64,
}

/// Aggregate queries
#[derive(Debug, Clone, Copy)]
pub struct Stats<'a> {
    db: &'a Database,
}

impl Database {
    /// Aggregate queries
    #[inline]
    #[must_use]
    pub fn stats(&self) -> Stats<'_> {
        Stats { db: self }
    }
}

impl Stats<'_> {
    /// Dashboard summary
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn dashboard(&self) -> Result<Dashboard> {
        let media = self.db.media().stats()?;
        self.db.with_conn(|conn| {
            let total_users = count(conn, "SELECT COUNT(*) FROM users", [])?;
            let regular_users = count(conn, "SELECT COUNT(*) FROM users WHERE account_type = 'user'", [])?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.account_type = 'user'
                 ORDER BY u.created_at DESC, u.id DESC LIMIT {RECENT_LIMIT}"
            ))?;
            let recent_users = stmt
                .query_map([], map_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDIA_COLUMNS} {MEDIA_JOINS} ORDER BY md.created_at DESC, md.id DESC LIMIT {RECENT_LIMIT}"
            ))?;
            let recent_media = stmt
                .query_map([], map_media)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Dashboard {
                total_users,
                regular_users,
                media,
                recent_users,
                recent_media,
            })
        })
    }

    /// RBAC graph sizes
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn rbac_overview(&self) -> Result<RbacOverview> {
        self.db.with_conn(|conn| {
            Ok(RbacOverview {
                roles: count(conn, "SELECT COUNT(*) FROM roles", [])?,
                permissions: count(conn, "SELECT COUNT(*) FROM permissions", [])?,
                user_roles: count(conn, "SELECT COUNT(*) FROM user_roles WHERE is_active = 1", [])?,
                role_permissions: count(
                    conn,
                    "SELECT COUNT(*) FROM role_permissions WHERE is_active = 1",
                    [],
                )?,
            })
        })
    }
}
