//! Cascading deletes across the RBAC graph
//!
//! Each delete runs in one transaction and removes dependents before the
//! entity itself, so enforced foreign keys never see a dangling row. The
//! returned [`DeletionImpact`] is counted inside the same transaction.
//!
//! | entity     | removes                                                   |
//! |------------|-----------------------------------------------------------|
//! | module     | grants of its permissions, its permissions, its actions   |
//! | action     | grants of its permissions, its permissions                |
//! | permission | its grants                                                |
//! | role       | its grants, its memberships                               |
//! | user       | its memberships and revoked tokens; detaches its media    |

use crate::db::{count, Database};
use crate::error::{Result, StoreError};
use crate::modules::{map_module, MODULE_COLUMNS};
use crate::permissions::find_permission;
use crate::roles::find_role;
use crate::users::find_user;
use archivart_core::{
    ActionId, DeletionImpact, Module, ModuleAction, ModuleId, Permission, PermissionId, Role,
    RoleId, User, UserId,
};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// A deleted entity and everything removed with it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Removal<T> {
    /// Entity as it was before deletion
    pub removed: T,
    /// Dependent rows removed
    pub impact: DeletionImpact,
}

const MODULE_PERMISSIONS: &str = "SELECT id FROM permissions WHERE module_id = ?1
     OR action_id IN (SELECT id FROM module_actions WHERE module_id = ?1)";

fn find_module_any(conn: &Connection, id: ModuleId) -> Result<Module> {
    conn.query_row(
        &format!("SELECT {MODULE_COLUMNS} FROM modules m WHERE m.id = ?1"),
        [id.get()],
        map_module,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("module", id))
}

fn find_action_any(conn: &Connection, id: ActionId) -> Result<ModuleAction> {
    conn.query_row(
        "SELECT a.id, a.module_id, m.name, a.name, a.display_name, a.description, a.route,
            a.is_active, a.created_at, a.updated_at
         FROM module_actions a LEFT JOIN modules m ON m.id = a.module_id
         WHERE a.id = ?1",
        [id.get()],
        |row| {
            Ok(ModuleAction {
                id: ActionId(row.get(0)?),
                module_id: ModuleId(row.get(1)?),
                module_name: row.get(2)?,
                name: row.get(3)?,
                display_name: row.get(4)?,
                description: row.get(5)?,
                route: row.get(6)?,
                is_active: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("module action", id))
}

fn module_impact(conn: &Connection, id: ModuleId) -> Result<DeletionImpact> {
    Ok(DeletionImpact {
        actions: count(conn, "SELECT COUNT(*) FROM module_actions WHERE module_id = ?1", [id.get()])?,
        permissions: count(
            conn,
            &format!("SELECT COUNT(*) FROM ({MODULE_PERMISSIONS})"),
            [id.get()],
        )?,
        role_permissions: count(
            conn,
            &format!("SELECT COUNT(*) FROM role_permissions WHERE permission_id IN ({MODULE_PERMISSIONS})"),
            [id.get()],
        )?,
        user_roles: 0,
    })
}

fn action_impact(conn: &Connection, id: ActionId) -> Result<DeletionImpact> {
    Ok(DeletionImpact {
        actions: 0,
        permissions: count(conn, "SELECT COUNT(*) FROM permissions WHERE action_id = ?1", [id.get()])?,
        role_permissions: count(
            conn,
            "SELECT COUNT(*) FROM role_permissions
             WHERE permission_id IN (SELECT id FROM permissions WHERE action_id = ?1)",
            [id.get()],
        )?,
        user_roles: 0,
    })
}

fn permission_impact(conn: &Connection, id: PermissionId) -> Result<DeletionImpact> {
    Ok(DeletionImpact {
        role_permissions: count(
            conn,
            "SELECT COUNT(*) FROM role_permissions WHERE permission_id = ?1",
            [id.get()],
        )?,
        ..DeletionImpact::default()
    })
}

fn role_impact(conn: &Connection, id: RoleId) -> Result<DeletionImpact> {
    Ok(DeletionImpact {
        role_permissions: count(conn, "SELECT COUNT(*) FROM role_permissions WHERE role_id = ?1", [id.get()])?,
        user_roles: count(conn, "SELECT COUNT(*) FROM user_roles WHERE role_id = ?1", [id.get()])?,
        ..DeletionImpact::default()
    })
}

fn user_impact(conn: &Connection, id: UserId) -> Result<DeletionImpact> {
    Ok(DeletionImpact {
        user_roles: count(conn, "SELECT COUNT(*) FROM user_roles WHERE user_id = ?1", [id.get()])?,
        ..DeletionImpact::default()
    })
}

/// Cascading delete operations
#[derive(Debug, Clone, Copy)]
pub struct Cascade<'a> {
    db: &'a Database,
}

impl Database {
    /// Cascading delete operations
    #[inline]
    #[must_use]
    pub fn cascade(&self) -> Cascade<'_> {
        Cascade { db: self }
    }
}

impl Cascade<'_> {
    /// Rows a module delete would remove
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn module_impact(&self, id: ModuleId) -> Result<DeletionImpact> {
        self.db.with_conn(|conn| {
            find_module_any(conn, id)?;
            module_impact(conn, id)
        })
    }

    /// Rows an action delete would remove
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn action_impact(&self, id: ActionId) -> Result<DeletionImpact> {
        self.db.with_conn(|conn| {
            find_action_any(conn, id)?;
            action_impact(conn, id)
        })
    }

    /// Rows a permission delete would remove
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn permission_impact(&self, id: PermissionId) -> Result<DeletionImpact> {
        self.db.with_conn(|conn| {
            find_permission(conn, id)?;
            permission_impact(conn, id)
        })
    }

    /// Rows a role delete would remove
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn role_impact(&self, id: RoleId) -> Result<DeletionImpact> {
        self.db.with_conn(|conn| {
            find_role(conn, id)?;
            role_impact(conn, id)
        })
    }

    /// Rows a user delete would remove
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn user_impact(&self, id: UserId) -> Result<DeletionImpact> {
        self.db.with_conn(|conn| {
            find_user(conn, id)?;
            user_impact(conn, id)
        })
    }

    /// Delete a module with its actions, permissions and grants
    ///
    /// # Errors
    /// Returns not-found, or [`StoreError::Protected`] for system modules
    pub fn delete_module(&self, id: ModuleId) -> Result<Removal<Module>> {
        self.db.transaction(|tx| {
            let module = find_module_any(tx, id)?;
            if module.is_system {
                return Err(StoreError::Protected("Cannot delete system modules".to_string()));
            }
            let impact = module_impact(tx, id)?;
            tx.execute(
                &format!("DELETE FROM role_permissions WHERE permission_id IN ({MODULE_PERMISSIONS})"),
                [id.get()],
            )?;
            tx.execute(
                &format!("DELETE FROM permissions WHERE id IN ({MODULE_PERMISSIONS})"),
                [id.get()],
            )?;
            tx.execute("DELETE FROM module_actions WHERE module_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM modules WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted module {} ({}): {}", module.name, id, impact);
            Ok(Removal {
                removed: module,
                impact,
            })
        })
    }

    /// Delete an action with its permissions and grants
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn delete_action(&self, id: ActionId) -> Result<Removal<ModuleAction>> {
        self.db.transaction(|tx| {
            let action = find_action_any(tx, id)?;
            let impact = action_impact(tx, id)?;
            tx.execute(
                "DELETE FROM role_permissions
                 WHERE permission_id IN (SELECT id FROM permissions WHERE action_id = ?1)",
                [id.get()],
            )?;
            tx.execute("DELETE FROM permissions WHERE action_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM module_actions WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted module action {} ({}): {}", action.name, id, impact);
            Ok(Removal {
                removed: action,
                impact,
            })
        })
    }

    /// Delete a permission with its grants
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn delete_permission(&self, id: PermissionId) -> Result<Removal<Permission>> {
        self.db.transaction(|tx| {
            let permission = find_permission(tx, id)?;
            let impact = permission_impact(tx, id)?;
            tx.execute("DELETE FROM role_permissions WHERE permission_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM permissions WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted permission {} ({}): {}", permission.name, id, impact);
            Ok(Removal {
                removed: permission,
                impact,
            })
        })
    }

    /// Delete a role with its grants and memberships
    ///
    /// # Errors
    /// Returns not-found, or [`StoreError::Protected`] for system roles
    pub fn delete_role(&self, id: RoleId) -> Result<Removal<Role>> {
        self.db.transaction(|tx| {
            let role = find_role(tx, id)?;
            if role.is_system {
                return Err(StoreError::Protected("Cannot delete system roles".to_string()));
            }
            let impact = role_impact(tx, id)?;
            tx.execute("DELETE FROM role_permissions WHERE role_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM user_roles WHERE role_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM roles WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted role {} ({}): {}", role.name, id, impact);
            Ok(Removal {
                removed: role,
                impact,
            })
        })
    }

    /// Delete a user account with its memberships and revoked tokens
    ///
    /// Media uploaded by the account is kept with no uploader.
    ///
    /// # Errors
    /// Returns not-found, or [`StoreError::Protected`] for admin accounts
    pub fn delete_user(&self, id: UserId) -> Result<Removal<User>> {
        self.db.transaction(|tx| {
            let user = find_user(tx, id)?;
            if user.is_admin_account() {
                return Err(StoreError::Protected("Cannot delete admin users".to_string()));
            }
            let impact = user_impact(tx, id)?;
            tx.execute("DELETE FROM user_roles WHERE user_id = ?1", [id.get()])?;
            tx.execute("DELETE FROM revoked_tokens WHERE user_id = ?1", [id.get()])?;
            tx.execute("UPDATE media SET uploaded_by = NULL WHERE uploaded_by = ?1", [id.get()])?;
            tx.execute("DELETE FROM users WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted user {} ({}): {}", user.email, id, impact);
            Ok(Removal {
                removed: user,
                impact,
            })
        })
    }
}
