//! Built-in RBAC catalog and first-run bootstrap
//!
//! The catalog is five system modules with their actions, one
//! `module.action` permission per action, and the `admin` and `super_admin`
//! system roles holding every permission.

use crate::actions::{insert_action, NewAction};
use crate::db::{now, Database};
use crate::error::Result;
use crate::modules::{insert_module, NewModule};
use crate::permissions::{insert_permission, NewPermission};
use crate::roles::{find_role_by_name, insert_role, upsert_grant, NewRole};
use crate::users::{find_user, insert_user, upsert_membership, NewUser};
use crate::count;
use archivart_core::{AccountKind, Role, User};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Email of the bootstrap administrator
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@archivart.com";

/// Role holding every permission
pub const SUPER_ADMIN_ROLE: &str = "super_admin";

/// Administrative role holding every permission
pub const ADMIN_ROLE: &str = "admin";

/// name, label, description, icon, route
const MODULES: &[(&str, &str, &str, &str, &str)] = &[
    ("dashboard", "Dashboard", "Main dashboard overview", "fas fa-tachometer-alt", "/admin/dashboard"),
    ("users", "User Management", "Manage users and their accounts", "fas fa-users", "/admin/users"),
    ("media", "Media Management", "Manage media files and content", "fas fa-images", "/admin/media"),
    ("rbac", "RBAC Management", "Manage roles, permissions and access control", "fas fa-shield-alt", "/admin/rbac"),
    ("settings", "App Settings", "Configure application settings", "fas fa-cog", "/admin/settings"),
];

/// module, action, label, description, route
const ACTIONS: &[(&str, &str, &str, &str, &str)] = &[
    ("dashboard", "view", "View Dashboard", "Access the dashboard", "/admin/dashboard"),
    ("users", "view", "View Users", "View user list and details", "/admin/users"),
    ("users", "create", "Create Users", "Create new user accounts", "/admin/users/create"),
    ("users", "update", "Update Users", "Edit user information", "/admin/users/edit"),
    ("users", "delete", "Delete Users", "Delete user accounts", "/admin/users/delete"),
    ("users", "block", "Block Users", "Block and unblock user accounts", "/admin/users/block"),
    ("media", "view", "View Media", "View media files", "/admin/media"),
    ("media", "create", "Upload Media", "Upload new media files", "/admin/media/upload"),
    ("media", "update", "Edit Media", "Edit media information", "/admin/media/edit"),
    ("media", "delete", "Delete Media", "Delete media files", "/admin/media/delete"),
    ("media", "manage", "Manage Media", "Full media management", "/admin/media/manage"),
    ("rbac", "view", "View RBAC", "View roles and permissions", "/admin/rbac"),
    ("rbac", "create", "Create RBAC", "Create roles and permissions", "/admin/rbac/create"),
    ("rbac", "update", "Update RBAC", "Edit roles and permissions", "/admin/rbac/edit"),
    ("rbac", "delete", "Delete RBAC", "Delete roles and permissions", "/admin/rbac/delete"),
    ("settings", "view", "View Settings", "View application settings", "/admin/settings"),
    ("settings", "update", "Update Settings", "Update application settings", "/admin/settings/update"),
];

/// What a catalog reset created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    /// Modules created
    pub modules: usize,
    /// Actions created
    pub actions: usize,
    /// Permissions created
    pub permissions: usize,
    /// Grants given to each system role
    pub grants_per_role: usize,
}

fn label(word: &str) -> String {
    match word {
        "rbac" => "RBAC".to_string(),
        _ => {
            let mut chars = word.chars();
            chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        }
    }
}

fn ensure_system_role(conn: &Connection, name: &str, display_name: &str, description: &str) -> Result<Role> {
    if let Some(role) = find_role_by_name(conn, name)? {
        conn.execute(
            "UPDATE roles SET is_system = 1, is_active = 1, updated_at = ?1 WHERE id = ?2",
            params![now(), role.id.get()],
        )?;
        return Ok(role);
    }
    insert_role(
        conn,
        &NewRole {
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: Some(description.to_string()),
            is_active: true,
            is_system: true,
        },
    )
}

fn reset_catalog(conn: &Connection) -> Result<SeedSummary> {
    conn.execute("DELETE FROM role_permissions", [])?;
    conn.execute("DELETE FROM permissions", [])?;
    conn.execute("DELETE FROM module_actions", [])?;
    conn.execute("DELETE FROM modules", [])?;

    let mut module_ids = Vec::with_capacity(MODULES.len());
    for (order, (name, display_name, description, icon, route)) in (1_i64..).zip(MODULES) {
        let module = insert_module(
            conn,
            &NewModule {
                name: (*name).to_string(),
                display_name: (*display_name).to_string(),
                description: Some((*description).to_string()),
                icon: Some((*icon).to_string()),
                route: Some((*route).to_string()),
                order_index: Some(order),
                is_system: true,
            },
        )?;
        module_ids.push((*name, module.id));
    }

    let mut permission_ids = Vec::with_capacity(ACTIONS.len());
    for (module_name, action_name, display_name, description, route) in ACTIONS {
        let Some(&(_, module_id)) = module_ids.iter().find(|(name, _)| name == module_name) else {
            continue;
        };
        let action = insert_action(
            conn,
            &NewAction {
                module_id,
                name: (*action_name).to_string(),
                display_name: (*display_name).to_string(),
                description: Some((*description).to_string()),
                route: Some((*route).to_string()),
            },
        )?;
        let permission = insert_permission(
            conn,
            &NewPermission {
                name: None,
                display_name: format!("{} {}", label(module_name), label(action_name)),
                description: Some(format!("Permission to {action_name} {module_name}")),
                module_id,
                action_id: action.id,
                resource: Some((*module_name).to_string()),
                is_system: true,
            },
        )?;
        permission_ids.push(permission.id);
    }

    for role in [
        ensure_system_role(conn, ADMIN_ROLE, "Administrator", "Full administrative access")?,
        ensure_system_role(conn, SUPER_ADMIN_ROLE, "Super Administrator", "Full system access with all permissions")?,
    ] {
        for &permission in &permission_ids {
            upsert_grant(conn, role.id, permission)?;
        }
    }

    Ok(SeedSummary {
        modules: module_ids.len(),
        actions: ACTIONS.len(),
        permissions: permission_ids.len(),
        grants_per_role: permission_ids.len(),
    })
}

/// Drop every module, action, permission and grant and recreate the built-in catalog
///
/// Roles and memberships survive; the system roles get every new permission.
///
/// # Errors
/// Returns error on database failure, leaving the catalog untouched
pub fn reset_rbac_catalog(db: &Database) -> Result<SeedSummary> {
    let summary = db.transaction(|tx| reset_catalog(tx))?;
    tracing::info!(
        "rbac catalog reset: {} modules, {} actions, {} permissions",
        summary.modules,
        summary.actions,
        summary.permissions
    );
    Ok(summary)
}

/// Seed an empty catalog and make sure the administrator account exists
///
/// An existing account keeps its password; it is promoted to the admin
/// kind and given the `super_admin` role.
///
/// # Errors
/// Returns validation errors for a new account or error on database failure
pub fn bootstrap(db: &Database, admin_email: &str, admin_password: &str) -> Result<User> {
    db.transaction(|tx| {
        if count(tx, "SELECT COUNT(*) FROM modules", [])? == 0 {
            let summary = reset_catalog(tx)?;
            tracing::info!("seeded rbac catalog with {} permissions", summary.permissions);
        }
        let super_admin = ensure_system_role(
            tx,
            SUPER_ADMIN_ROLE,
            "Super Administrator",
            "Full system access with all permissions",
        )?;

        let email = archivart_core::validation::normalize_email(admin_email);
        let existing: Option<i64> = tx
            .query_row("SELECT id FROM users WHERE email = ?1", [&email], |row| row.get(0))
            .optional()?;
        let admin = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE users SET account_type = 'admin', is_active = 1, is_blocked = 0, updated_at = ?1
                     WHERE id = ?2",
                    params![now(), id],
                )?;
                find_user(tx, archivart_core::UserId(id))?
            }
            None => {
                let mut new = NewUser::local("Admin User", email, admin_password).with_kind(AccountKind::Admin);
                new.is_verified = true;
                insert_user(tx, &new)?
            }
        };
        upsert_membership(tx, admin.id, super_admin.id)?;
        tracing::info!("administrator {} ready with role {}", admin.email, SUPER_ADMIN_ROLE);
        Ok(admin)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_every_module_action_pair() {
        let db = Database::open_in_memory().unwrap();
        let summary = reset_rbac_catalog(&db).unwrap();
        assert_eq!(summary.modules, 5);
        assert_eq!(summary.actions, 17);
        assert_eq!(summary.permissions, 17);

        let users_block = db.permissions().get_by_name("users.block").unwrap().unwrap();
        assert_eq!(users_block.display_name, "Users Block");
        assert!(users_block.is_system);
        let rbac = db.permissions().get_by_name("rbac.view").unwrap().unwrap();
        assert_eq!(rbac.display_name, "RBAC View");
    }

    #[test]
    fn reset_is_repeatable() {
        let db = Database::open_in_memory().unwrap();
        reset_rbac_catalog(&db).unwrap();
        let summary = reset_rbac_catalog(&db).unwrap();
        assert_eq!(summary.permissions, 17);
        let admin = db.roles().get_by_name(ADMIN_ROLE).unwrap().unwrap();
        assert_eq!(db.roles().permissions_of(admin.id).unwrap().len(), 17);
    }

    #[test]
    fn bootstrap_creates_admin_with_all_permissions() {
        let db = Database::open_in_memory().unwrap();
        let admin = bootstrap(&db, DEFAULT_ADMIN_EMAIL, "Admin123!").unwrap();
        assert!(admin.is_admin_account());
        assert!(admin.is_verified);

        let perms = db.users().effective_permissions(admin.id).unwrap();
        assert_eq!(perms.len(), 17);
        assert!(perms.contains("settings.update"));

        let again = bootstrap(&db, DEFAULT_ADMIN_EMAIL, "Other123!").unwrap();
        assert_eq!(again.id, admin.id);
        assert_eq!(db.users().roles_of(admin.id).unwrap().len(), 1);
    }
}
