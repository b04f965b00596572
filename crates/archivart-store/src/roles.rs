//! Role repository and role-permission grants
//!
//! Grants are never deleted outside a cascade: revoking flips `is_active`, and
//! granting again re-activates the same row.

use crate::db::{now, Database};
use crate::error::{Result, StoreError};
use crate::permissions::{find_permission, map_permission, PERMISSION_COLUMNS, PERMISSION_JOINS};
use crate::{count, exists};
use archivart_core::{ListQuery, Page, Permission, PermissionId, Role, RoleId, RoleSummary, Validator};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const ROLE_COLUMNS: &str =
    "r.id, r.name, r.display_name, r.description, r.is_system, r.is_active, r.created_at, r.updated_at";

const SUMMARY_COUNTS: &str = "(SELECT COUNT(DISTINCT ur.user_id) FROM user_roles ur
         WHERE ur.role_id = r.id AND ur.is_active = 1) AS user_count,
     (SELECT COUNT(DISTINCT rp.permission_id) FROM role_permissions rp
         WHERE rp.role_id = r.id AND rp.is_active = 1) AS permission_count";

const SORTS: &[(&str, &str)] = &[
    ("id", "r.id"),
    ("name", "r.name"),
    ("display_name", "r.display_name"),
    ("description", "r.description"),
    ("is_active", "r.is_active"),
    ("user_count", "user_count"),
    ("permission_count", "permission_count"),
    ("created_at", "r.created_at"),
    ("updated_at", "r.updated_at"),
];

pub(crate) fn map_role(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: RoleId(row.get(0)?),
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        is_system: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Fields for a new role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Initial activity
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
    /// System roles are only created by seeding
    #[serde(skip_deserializing)]
    pub is_system: bool,
}

impl NewRole {
    /// Active, non-system role
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            is_active: true,
            is_system: false,
        }
    }
}

/// Replacement fields for an existing role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Activity
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
}

/// Role list filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFilter {
    /// Activity flag
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Users per role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStat {
    /// Role
    pub role_id: RoleId,
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Active members
    pub user_count: i64,
}

fn validate(name: &str, display_name: &str, description: Option<&str>) -> Result<()> {
    Validator::new()
        .slug("name", name)
        .label("display_name", display_name)
        .description("description", description)
        .finish()?;
    Ok(())
}

fn check_unique(conn: &Connection, name: &str, exclude: Option<RoleId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM roles WHERE name = ?1 AND id != ?2",
        params![name, exclude.map_or(-1, RoleId::get)],
    )? {
        return Err(StoreError::conflict("name", "Role name already exists"));
    }
    Ok(())
}

pub(crate) fn find_role(conn: &Connection, id: RoleId) -> Result<Role> {
    conn.query_row(
        &format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = ?1"),
        [id.get()],
        map_role,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("role", id))
}

pub(crate) fn find_role_by_name(conn: &Connection, name: &str) -> Result<Option<Role>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = ?1"),
            [name],
            map_role,
        )
        .optional()?)
}

pub(crate) fn insert_role(conn: &Connection, new: &NewRole) -> Result<Role> {
    validate(&new.name, &new.display_name, new.description.as_deref())?;
    check_unique(conn, &new.name, None)?;
    let ts = now();
    conn.execute(
        "INSERT INTO roles (name, display_name, description, is_system, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            new.name,
            new.display_name.trim(),
            new.description,
            new.is_system,
            new.is_active,
            ts
        ],
    )?;
    let id = RoleId(conn.last_insert_rowid());
    tracing::info!("created role {} ({})", new.name, id);
    find_role(conn, id)
}

pub(crate) fn upsert_grant(conn: &Connection, role: RoleId, permission: PermissionId) -> Result<()> {
    conn.execute(
        "INSERT INTO role_permissions (role_id, permission_id, is_active, granted_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT (role_id, permission_id) DO UPDATE SET is_active = 1, granted_at = excluded.granted_at",
        params![role.get(), permission.get(), now()],
    )?;
    Ok(())
}

/// Role repository
#[derive(Debug, Clone, Copy)]
pub struct Roles<'a> {
    db: &'a Database,
}

impl Database {
    /// Role repository
    #[inline]
    #[must_use]
    pub fn roles(&self) -> Roles<'_> {
        Roles { db: self }
    }
}

impl Roles<'_> {
    /// Page through roles with membership counts
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, query: &ListQuery, filter: &RoleFilter) -> Result<Page<RoleSummary>> {
        let mut conditions = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(pattern) = query.like_pattern() {
            args.push(Value::Text(pattern));
            let n = args.len();
            conditions.push(format!(
                "(r.name LIKE ?{n} ESCAPE '\\' OR r.display_name LIKE ?{n} ESCAPE '\\' \
                 OR r.description LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(active) = filter.is_active {
            args.push(Value::Integer(i64::from(active)));
            conditions.push(format!("r.is_active = ?{}", args.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order = query.sort_spec(SORTS, "r.display_name").to_sql();

        self.db.with_conn(|conn| {
            let total = count(
                conn,
                &format!("SELECT COUNT(*) FROM roles r {where_clause}"),
                params_from_iter(args.iter()),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROLE_COLUMNS}, {SUMMARY_COUNTS} FROM roles r {where_clause}
                 ORDER BY {order}, r.display_name ASC LIMIT {} OFFSET {}",
                query.limit(),
                query.offset()
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(RoleSummary {
                    role: map_role(row)?,
                    user_count: row.get(8)?,
                    permission_count: row.get(9)?,
                })
            })?;
            let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Page::new(items, total, query))
        })
    }

    /// Role by id with counts
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn get(&self, id: RoleId) -> Result<RoleSummary> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ROLE_COLUMNS}, {SUMMARY_COUNTS} FROM roles r WHERE r.id = ?1"),
                [id.get()],
                |row| {
                    Ok(RoleSummary {
                        role: map_role(row)?,
                        user_count: row.get(8)?,
                        permission_count: row.get(9)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("role", id))
        })
    }

    /// Role by name
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.db.with_conn(|conn| find_role_by_name(conn, name))
    }

    /// Create a role
    ///
    /// # Errors
    /// Returns validation or conflict errors
    pub fn create(&self, new: &NewRole) -> Result<Role> {
        self.db.with_conn(|conn| insert_role(conn, new))
    }

    /// Replace a role's fields
    ///
    /// # Errors
    /// Returns not-found, validation, conflict or protection errors
    pub fn update(&self, id: RoleId, update: &RoleUpdate) -> Result<Role> {
        validate(&update.name, &update.display_name, update.description.as_deref())?;
        self.db.transaction(|tx| {
            let existing = find_role(tx, id)?;
            if existing.is_system && (existing.name != update.name || !update.is_active) {
                return Err(StoreError::Protected(
                    "Cannot rename or deactivate system roles".to_string(),
                ));
            }
            check_unique(tx, &update.name, Some(id))?;
            tx.execute(
                "UPDATE roles SET name = ?1, display_name = ?2, description = ?3, is_active = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    update.name,
                    update.display_name.trim(),
                    update.description,
                    update.is_active,
                    now(),
                    id.get()
                ],
            )?;
            tracing::info!("updated role {} ({})", update.name, id);
            find_role(tx, id)
        })
    }

    /// Active permissions granted to a role
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the role is missing
    pub fn permissions_of(&self, id: RoleId) -> Result<Vec<Permission>> {
        self.db.with_conn(|conn| {
            find_role(conn, id)?;
            granted(conn, id)
        })
    }

    /// Grant a permission, re-activating an earlier grant
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if either side is missing
    pub fn grant(&self, role: RoleId, permission: PermissionId) -> Result<()> {
        self.db.with_conn(|conn| {
            find_role(conn, role)?;
            find_permission(conn, permission)?;
            upsert_grant(conn, role, permission)?;
            tracing::info!("granted permission {} to role {}", permission, role);
            Ok(())
        })
    }

    /// Deactivate a grant; returns whether one was active
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn revoke(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE role_permissions SET is_active = 0
                 WHERE role_id = ?1 AND permission_id = ?2 AND is_active = 1",
                params![role.get(), permission.get()],
            )?;
            tracing::info!("revoked permission {} from role {}", permission, role);
            Ok(changed > 0)
        })
    }

    /// Replace a role's grants with exactly `permissions`
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for a missing role or permission; no
    /// grant changes in that case
    pub fn replace_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<Vec<Permission>> {
        self.db.transaction(|tx| {
            find_role(tx, role)?;
            tx.execute(
                "UPDATE role_permissions SET is_active = 0 WHERE role_id = ?1",
                [role.get()],
            )?;
            for permission in permissions {
                find_permission(tx, *permission)?;
                upsert_grant(tx, role, *permission)?;
            }
            tracing::info!("set {} permissions on role {}", permissions.len(), role);
            granted(tx, role)
        })
    }

    /// Member counts of active roles
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn role_stats(&self) -> Result<Vec<RoleStat>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.display_name, COUNT(DISTINCT ur.user_id)
                 FROM roles r
                 LEFT JOIN user_roles ur ON ur.role_id = r.id AND ur.is_active = 1
                 WHERE r.is_active = 1
                 GROUP BY r.id
                 ORDER BY r.display_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(RoleStat {
                    role_id: RoleId(row.get(0)?),
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                    user_count: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn granted(conn: &Connection, role: RoleId) -> Result<Vec<Permission>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERMISSION_COLUMNS} {PERMISSION_JOINS}
         JOIN role_permissions rp ON rp.permission_id = p.id
         WHERE rp.role_id = ?1 AND rp.is_active = 1 AND p.is_active = 1
         ORDER BY p.name"
    ))?;
    let rows = stmt.query_map([role.get()], map_permission)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::NewAction;
    use crate::modules::NewModule;
    use crate::permissions::NewPermission;
    use archivart_core::SortOrder;

    fn with_permissions(n: usize) -> (Database, Vec<PermissionId>) {
        let db = Database::open_in_memory().unwrap();
        let module = db
            .modules()
            .create(&NewModule {
                name: "media".into(),
                display_name: "Media".into(),
                order_index: Some(1),
                ..NewModule::default()
            })
            .unwrap();
        let ids = ["view", "create", "update", "delete"][..n]
            .iter()
            .map(|action| {
                let a = db.actions().create(&NewAction::new(module.id, *action, *action)).unwrap();
                db.permissions()
                    .create(&NewPermission {
                        name: None,
                        display_name: (*action).to_string(),
                        description: None,
                        module_id: module.id,
                        action_id: a.id,
                        resource: None,
                        is_system: false,
                    })
                    .unwrap()
                    .id
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn unique_role_names() {
        let (db, _) = with_permissions(0);
        db.roles().create(&NewRole::new("editor", "Editor")).unwrap();
        assert!(db.roles().create(&NewRole::new("editor", "Other")).unwrap_err().is_conflict());
    }

    #[test]
    fn grant_revoke_regrant_reuses_row() {
        let (db, perms) = with_permissions(1);
        let role = db.roles().create(&NewRole::new("editor", "Editor")).unwrap();
        db.roles().grant(role.id, perms[0]).unwrap();
        assert!(db.roles().revoke(role.id, perms[0]).unwrap());
        assert!(!db.roles().revoke(role.id, perms[0]).unwrap());
        assert!(db.roles().permissions_of(role.id).unwrap().is_empty());

        db.roles().grant(role.id, perms[0]).unwrap();
        assert_eq!(db.roles().permissions_of(role.id).unwrap().len(), 1);
        let rows = db
            .with_conn(|c| count(c, "SELECT COUNT(*) FROM role_permissions", []))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn replace_permissions_is_exact() {
        let (db, perms) = with_permissions(4);
        let role = db.roles().create(&NewRole::new("editor", "Editor")).unwrap();
        db.roles().replace_permissions(role.id, &perms[..3]).unwrap();
        let after = db.roles().replace_permissions(role.id, &perms[2..]).unwrap();
        let names: Vec<_> = after.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["media.delete", "media.update"]);
        assert_eq!(db.roles().get(role.id).unwrap().permission_count, 2);
    }

    #[test]
    fn replace_with_unknown_permission_changes_nothing() {
        let (db, perms) = with_permissions(2);
        let role = db.roles().create(&NewRole::new("editor", "Editor")).unwrap();
        db.roles().replace_permissions(role.id, &perms).unwrap();
        let err = db
            .roles()
            .replace_permissions(role.id, &[perms[0], PermissionId(999)])
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(db.roles().permissions_of(role.id).unwrap().len(), 2);
    }

    #[test]
    fn system_roles_keep_their_name() {
        let (db, _) = with_permissions(0);
        let mut new = NewRole::new("admin", "Administrator");
        new.is_system = true;
        let role = db.roles().create(&new).unwrap();
        let err = db
            .roles()
            .update(
                role.id,
                &RoleUpdate {
                    name: "boss".into(),
                    display_name: "Boss".into(),
                    description: None,
                    is_active: true,
                },
            )
            .unwrap_err();
        assert!(err.is_protected());
    }

    #[test]
    fn list_sorts_by_counts() {
        let (db, perms) = with_permissions(2);
        let a = db.roles().create(&NewRole::new("alpha", "Alpha")).unwrap();
        let b = db.roles().create(&NewRole::new("beta", "Beta")).unwrap();
        db.roles().replace_permissions(b.id, &perms).unwrap();
        db.roles().grant(a.id, perms[0]).unwrap();

        let page = db
            .roles()
            .list(
                &ListQuery::new().with_sort("permission_count", SortOrder::Desc),
                &RoleFilter::default(),
            )
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|r| r.role.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
        assert_eq!(page.items[0].permission_count, 2);
    }
}
