//! Permission repository
//!
//! A permission names a `module.action` pair and references both rows. The
//! name defaults to that pair and must parse as a [`PermissionName`].

use crate::db::{now, Database};
use crate::error::{Result, StoreError};
use crate::{count, exists};
use archivart_core::{
    ActionId, ListQuery, ModuleId, Page, Permission, PermissionId, PermissionName, Validator,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const PERMISSION_COLUMNS: &str = "p.id, p.name, p.display_name, p.description, \
     p.module_id, p.action_id, m.name, a.name, p.resource, p.is_system, p.is_active, \
     p.created_at, p.updated_at";

pub(crate) const PERMISSION_JOINS: &str = "FROM permissions p
     LEFT JOIN modules m ON m.id = p.module_id
     LEFT JOIN module_actions a ON a.id = p.action_id";

const SORTS: &[(&str, &str)] = &[
    ("id", "p.id"),
    ("name", "p.name"),
    ("display_name", "p.display_name"),
    ("description", "p.description"),
    ("module", "m.name"),
    ("action", "a.name"),
    ("resource", "p.resource"),
    ("created_at", "p.created_at"),
    ("updated_at", "p.updated_at"),
];

pub(crate) fn map_permission(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: PermissionId(row.get(0)?),
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        module_id: row.get::<_, Option<i64>>(4)?.map(ModuleId),
        action_id: row.get::<_, Option<i64>>(5)?.map(ActionId),
        module_name: row.get(6)?,
        action_name: row.get(7)?,
        resource: row.get(8)?,
        is_system: row.get(9)?,
        is_active: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Fields for a new permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    /// `module.action`; derived from the referenced rows when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Referenced module
    pub module_id: ModuleId,
    /// Referenced action, which must belong to the module
    pub action_id: ActionId,
    /// Optional resource qualifier
    #[serde(default)]
    pub resource: Option<String>,
    /// Seeded permission
    #[serde(default)]
    pub is_system: bool,
}

/// Replacement fields for an existing permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUpdate {
    /// `module.action`; derived when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Referenced module
    pub module_id: ModuleId,
    /// Referenced action
    pub action_id: ActionId,
    /// Optional resource qualifier
    #[serde(default)]
    pub resource: Option<String>,
    /// Visibility
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
}

/// Permission list filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFilter {
    /// Module name
    #[serde(default)]
    pub module: Option<String>,
    /// Activity flag
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Resolve the permission name for a module/action pair, checking ownership
fn resolve_name(
    conn: &Connection,
    requested: Option<&str>,
    module_id: ModuleId,
    action_id: ActionId,
) -> Result<String> {
    let pair: Option<(String, String)> = conn
        .query_row(
            "SELECT m.name, a.name FROM module_actions a
             JOIN modules m ON m.id = a.module_id
             WHERE a.id = ?1 AND a.module_id = ?2 AND a.is_active = 1 AND m.is_active = 1",
            params![action_id.get(), module_id.get()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((module, action)) = pair else {
        return Err(archivart_core::CoreError::invalid(
            "action_id",
            "Action does not belong to the selected module",
        )
        .into());
    };

    let name = match requested.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("{module}.{action}"),
    };
    name.parse::<PermissionName>()?;
    Ok(name)
}

fn check_unique(conn: &Connection, name: &str, exclude: Option<PermissionId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM permissions WHERE name = ?1 AND id != ?2",
        params![name, exclude.map_or(-1, PermissionId::get)],
    )? {
        return Err(StoreError::conflict("name", "Permission name already exists"));
    }
    Ok(())
}

pub(crate) fn find_permission(conn: &Connection, id: PermissionId) -> Result<Permission> {
    conn.query_row(
        &format!("SELECT {PERMISSION_COLUMNS} {PERMISSION_JOINS} WHERE p.id = ?1"),
        [id.get()],
        map_permission,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("permission", id))
}

pub(crate) fn insert_permission(conn: &Connection, new: &NewPermission) -> Result<Permission> {
    Validator::new()
        .label("display_name", &new.display_name)
        .description("description", new.description.as_deref())
        .finish()?;
    let name = resolve_name(conn, new.name.as_deref(), new.module_id, new.action_id)?;
    check_unique(conn, &name, None)?;
    let ts = now();
    conn.execute(
        "INSERT INTO permissions (name, display_name, description, module_id, action_id, resource, is_system, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        params![
            name,
            new.display_name.trim(),
            new.description,
            new.module_id.get(),
            new.action_id.get(),
            new.resource,
            new.is_system,
            ts
        ],
    )?;
    let id = PermissionId(conn.last_insert_rowid());
    tracing::debug!("created permission {} ({})", name, id);
    find_permission(conn, id)
}

/// Permission repository
#[derive(Debug, Clone, Copy)]
pub struct Permissions<'a> {
    db: &'a Database,
}

impl Database {
    /// Permission repository
    #[inline]
    #[must_use]
    pub fn permissions(&self) -> Permissions<'_> {
        Permissions { db: self }
    }
}

impl Permissions<'_> {
    /// Page through permissions
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, query: &ListQuery, filter: &PermissionFilter) -> Result<Page<Permission>> {
        let mut conditions = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(pattern) = query.like_pattern() {
            args.push(Value::Text(pattern));
            let n = args.len();
            conditions.push(format!(
                "(p.name LIKE ?{n} ESCAPE '\\' OR p.display_name LIKE ?{n} ESCAPE '\\' \
                 OR p.description LIKE ?{n} ESCAPE '\\' OR m.name LIKE ?{n} ESCAPE '\\' \
                 OR a.name LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(module) = filter.module.as_deref().filter(|m| !m.is_empty()) {
            args.push(Value::Text(module.to_string()));
            conditions.push(format!("m.name = ?{}", args.len()));
        }
        if let Some(active) = filter.is_active {
            args.push(Value::Integer(i64::from(active)));
            conditions.push(format!("p.is_active = ?{}", args.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order = query.sort_spec(SORTS, "p.created_at").to_sql();

        self.db.with_conn(|conn| {
            let total = count(
                conn,
                &format!("SELECT COUNT(*) {PERMISSION_JOINS} {where_clause}"),
                params_from_iter(args.iter()),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERMISSION_COLUMNS} {PERMISSION_JOINS} {where_clause}
                 ORDER BY {order}, p.id ASC LIMIT {} OFFSET {}",
                query.limit(),
                query.offset()
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), map_permission)?;
            let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Page::new(items, total, query))
        })
    }

    /// Permission by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn get(&self, id: PermissionId) -> Result<Permission> {
        self.db.with_conn(|conn| find_permission(conn, id))
    }

    /// Permission by name
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get_by_name(&self, name: &str) -> Result<Option<Permission>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PERMISSION_COLUMNS} {PERMISSION_JOINS} WHERE p.name = ?1"),
                    [name],
                    map_permission,
                )
                .optional()?)
        })
    }

    /// Create a permission
    ///
    /// # Errors
    /// Returns validation or conflict errors
    pub fn create(&self, new: &NewPermission) -> Result<Permission> {
        self.db.with_conn(|conn| insert_permission(conn, new))
    }

    /// Replace a permission's fields
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn update(&self, id: PermissionId, update: &PermissionUpdate) -> Result<Permission> {
        Validator::new()
            .label("display_name", &update.display_name)
            .description("description", update.description.as_deref())
            .finish()?;
        self.db.transaction(|tx| {
            find_permission(tx, id)?;
            let name = resolve_name(tx, update.name.as_deref(), update.module_id, update.action_id)?;
            check_unique(tx, &name, Some(id))?;
            tx.execute(
                "UPDATE permissions SET name = ?1, display_name = ?2, description = ?3, module_id = ?4,
                    action_id = ?5, resource = ?6, is_active = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    name,
                    update.display_name.trim(),
                    update.description,
                    update.module_id.get(),
                    update.action_id.get(),
                    update.resource,
                    update.is_active,
                    now(),
                    id.get()
                ],
            )?;
            tracing::info!("updated permission {} ({})", name, id);
            find_permission(tx, id)
        })
    }

    /// Whether a name is taken by another permission
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn name_exists(&self, name: &str, exclude: Option<PermissionId>) -> Result<bool> {
        self.db.with_conn(|conn| {
            exists(
                conn,
                "SELECT 1 FROM permissions WHERE name = ?1 AND id != ?2",
                params![name.trim(), exclude.map_or(-1, PermissionId::get)],
            )
        })
    }

    /// Module names that have active permissions
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn module_names(&self) -> Result<Vec<String>> {
        self.distinct("m.name")
    }

    /// Action names that have active permissions
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn action_names(&self) -> Result<Vec<String>> {
        self.distinct("a.name")
    }

    fn distinct(&self, column: &'static str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {column} {PERMISSION_JOINS}
                 WHERE p.is_active = 1 AND {column} IS NOT NULL AND {column} != ''
                 ORDER BY {column}"
            ))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::NewAction;
    use crate::modules::NewModule;
    use archivart_core::SortOrder;

    struct Catalog {
        db: Database,
        users: ModuleId,
        view: ActionId,
        update: ActionId,
        media: ModuleId,
        media_view: ActionId,
    }

    fn catalog() -> Catalog {
        let db = Database::open_in_memory().unwrap();
        let module = |name: &str, order| {
            db.modules()
                .create(&NewModule {
                    name: name.into(),
                    display_name: name.to_uppercase(),
                    order_index: Some(order),
                    ..NewModule::default()
                })
                .unwrap()
                .id
        };
        let users = module("users", 1);
        let media = module("media", 2);
        let action = |m, name: &str| db.actions().create(&NewAction::new(m, name, name)).unwrap().id;
        let view = action(users, "view");
        let update = action(users, "update");
        let media_view = action(media, "view");
        Catalog {
            db,
            users,
            view,
            update,
            media,
            media_view,
        }
    }

    fn new_permission(module_id: ModuleId, action_id: ActionId) -> NewPermission {
        NewPermission {
            name: None,
            display_name: "Permission".into(),
            description: None,
            module_id,
            action_id,
            resource: None,
            is_system: false,
        }
    }

    #[test]
    fn name_defaults_to_module_action() {
        let c = catalog();
        let p = c.db.permissions().create(&new_permission(c.users, c.view)).unwrap();
        assert_eq!(p.name, "users.view");
        assert_eq!(p.module_name.as_deref(), Some("users"));
        assert_eq!(p.action_name.as_deref(), Some("view"));
    }

    #[test]
    fn action_must_belong_to_module() {
        let c = catalog();
        let err = c
            .db
            .permissions()
            .create(&new_permission(c.media, c.view))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn duplicate_names_conflict() {
        let c = catalog();
        c.db.permissions().create(&new_permission(c.users, c.view)).unwrap();
        let err = c
            .db
            .permissions()
            .create(&new_permission(c.users, c.view))
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(c.db.permissions().name_exists("users.view", None).unwrap());
    }

    #[test]
    fn malformed_explicit_name_rejected() {
        let c = catalog();
        let mut bad = new_permission(c.users, c.view);
        bad.name = Some("users view".into());
        assert!(matches!(
            c.db.permissions().create(&bad).unwrap_err(),
            StoreError::Invalid(_)
        ));
    }

    #[test]
    fn update_excludes_self() {
        let c = catalog();
        let p = c.db.permissions().create(&new_permission(c.users, c.view)).unwrap();
        let updated = c
            .db
            .permissions()
            .update(
                p.id,
                &PermissionUpdate {
                    name: Some("users.view".into()),
                    display_name: "View Users".into(),
                    description: Some("List accounts".into()),
                    module_id: c.users,
                    action_id: c.view,
                    resource: None,
                    is_active: true,
                },
            )
            .unwrap();
        assert_eq!(updated.display_name, "View Users");
        assert!(!c.db.permissions().name_exists("users.view", Some(p.id)).unwrap());
    }

    #[test]
    fn list_filters_and_sorts() {
        let c = catalog();
        for (m, a) in [(c.users, c.view), (c.users, c.update), (c.media, c.media_view)] {
            c.db.permissions().create(&new_permission(m, a)).unwrap();
        }
        let query = ListQuery::new().with_sort("name", SortOrder::Asc);
        let page = c
            .db
            .permissions()
            .list(
                &query,
                &PermissionFilter {
                    module: Some("users".into()),
                    is_active: Some(true),
                },
            )
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["users.update", "users.view"]);
        assert_eq!(page.total, 2);

        let searched = c
            .db
            .permissions()
            .list(&ListQuery::new().with_search("media"), &PermissionFilter::default())
            .unwrap();
        assert_eq!(searched.total, 1);

        assert_eq!(c.db.permissions().module_names().unwrap(), vec!["media", "users"]);
        assert_eq!(c.db.permissions().action_names().unwrap(), vec!["update", "view"]);
    }
}
