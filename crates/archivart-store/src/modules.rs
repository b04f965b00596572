//! Module repository
//!
//! Modules are the top level of the RBAC catalog. Name, display name, route
//! and order index each identify a module in the admin navigation, so each
//! must be unique among active modules.

use crate::db::{now, Database};
use crate::error::{Result, StoreError};
use crate::exists;
use archivart_core::{Module, ModuleAction, ModuleId, ModuleSummary, Validator};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const MODULE_COLUMNS: &str = "m.id, m.name, m.display_name, m.description, m.icon, \
     m.route, m.order_index, m.is_system, m.is_active, m.created_at, m.updated_at";

pub(crate) fn map_module(row: &Row<'_>) -> rusqlite::Result<Module> {
    Ok(Module {
        id: ModuleId(row.get(0)?),
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        route: row.get(5)?,
        order_index: row.get(6)?,
        is_system: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Fields for a new module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModule {
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Icon class
    #[serde(default)]
    pub icon: Option<String>,
    /// Admin route
    #[serde(default)]
    pub route: Option<String>,
    /// Navigation order; appended after the last module when absent
    #[serde(default)]
    pub order_index: Option<i64>,
    /// Protect from deletion
    #[serde(default)]
    pub is_system: bool,
}

/// Replacement fields for an existing module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUpdate {
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Icon class
    #[serde(default)]
    pub icon: Option<String>,
    /// Admin route
    #[serde(default)]
    pub route: Option<String>,
    /// Navigation order
    pub order_index: i64,
    /// Visibility
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
}

fn validate(name: &str, display_name: &str, description: Option<&str>) -> Result<()> {
    Validator::new()
        .slug("name", name)
        .label("display_name", display_name)
        .description("description", description)
        .finish()?;
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_unique(
    conn: &Connection,
    name: &str,
    display_name: &str,
    route: Option<&str>,
    order_index: Option<i64>,
    exclude: Option<ModuleId>,
) -> Result<()> {
    let exclude = exclude.map_or(-1, ModuleId::get);
    if exists(
        conn,
        "SELECT 1 FROM modules WHERE name = ?1 AND is_active = 1 AND id != ?2",
        params![name, exclude],
    )? {
        return Err(StoreError::conflict("name", "Module name already exists"));
    }
    if exists(
        conn,
        "SELECT 1 FROM modules WHERE display_name = ?1 AND is_active = 1 AND id != ?2",
        params![display_name, exclude],
    )? {
        return Err(StoreError::conflict(
            "display_name",
            "Module display name already exists",
        ));
    }
    if let Some(route) = route {
        if exists(
            conn,
            "SELECT 1 FROM modules WHERE route = ?1 AND is_active = 1 AND id != ?2",
            params![route, exclude],
        )? {
            return Err(StoreError::conflict("route", "Module route already exists"));
        }
    }
    if let Some(order_index) = order_index {
        if exists(
            conn,
            "SELECT 1 FROM modules WHERE order_index = ?1 AND is_active = 1 AND id != ?2",
            params![order_index, exclude],
        )? {
            return Err(StoreError::conflict(
                "order_index",
                "Module order index already in use",
            ));
        }
    }
    Ok(())
}

pub(crate) fn get_module(conn: &Connection, id: ModuleId) -> Result<Module> {
    conn.query_row(
        &format!("SELECT {MODULE_COLUMNS} FROM modules m WHERE m.id = ?1 AND m.is_active = 1"),
        [id.get()],
        map_module,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("module", id))
}

pub(crate) fn insert_module(conn: &Connection, new: &NewModule) -> Result<Module> {
    validate(&new.name, &new.display_name, new.description.as_deref())?;
    let route = non_empty(new.route.as_deref());
    check_unique(conn, &new.name, &new.display_name, route, new.order_index, None)?;

    let order_index = match new.order_index {
        Some(order) => order,
        None => conn.query_row(
            "SELECT COALESCE(MAX(order_index), 0) + 1 FROM modules WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?,
    };
    let ts = now();
    conn.execute(
        "INSERT INTO modules (name, display_name, description, icon, route, order_index, is_system, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        params![
            new.name,
            new.display_name.trim(),
            new.description,
            new.icon,
            route,
            order_index,
            new.is_system,
            ts
        ],
    )?;
    let id = ModuleId(conn.last_insert_rowid());
    tracing::info!("created module {} ({})", new.name, id);
    get_module(conn, id)
}

/// Module repository
#[derive(Debug, Clone, Copy)]
pub struct Modules<'a> {
    db: &'a Database,
}

impl Database {
    /// Module repository
    #[inline]
    #[must_use]
    pub fn modules(&self) -> Modules<'_> {
        Modules { db: self }
    }
}

impl Modules<'_> {
    /// Active modules with counts, in navigation order
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, search: Option<&str>) -> Result<Vec<ModuleSummary>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODULE_COLUMNS},
                    (SELECT COUNT(*) FROM module_actions a WHERE a.module_id = m.id AND a.is_active = 1),
                    (SELECT COUNT(*) FROM permissions p WHERE p.module_id = m.id AND p.is_active = 1)
                 FROM modules m
                 WHERE m.is_active = 1
                   AND (?1 IS NULL OR m.name LIKE ?1 OR m.display_name LIKE ?1 OR m.description LIKE ?1)
                 ORDER BY m.order_index ASC, m.display_name ASC"
            ))?;
            let rows = stmt.query_map([pattern], |row| {
                Ok(ModuleSummary {
                    module: map_module(row)?,
                    action_count: row.get(11)?,
                    permission_count: row.get(12)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Active module by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing or inactive
    pub fn get(&self, id: ModuleId) -> Result<Module> {
        self.db.with_conn(|conn| get_module(conn, id))
    }

    /// Active module by name
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get_by_name(&self, name: &str) -> Result<Option<Module>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {MODULE_COLUMNS} FROM modules m WHERE m.name = ?1 AND m.is_active = 1"
                    ),
                    [name],
                    map_module,
                )
                .optional()?)
        })
    }

    /// Create a module
    ///
    /// # Errors
    /// Returns validation or conflict errors
    pub fn create(&self, new: &NewModule) -> Result<Module> {
        self.db.with_conn(|conn| insert_module(conn, new))
    }

    /// Replace a module's fields
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn update(&self, id: ModuleId, update: &ModuleUpdate) -> Result<Module> {
        validate(&update.name, &update.display_name, update.description.as_deref())?;
        let route = non_empty(update.route.as_deref());
        self.db.transaction(|tx| {
            let existing = get_module(tx, id)?;
            if existing.is_system && existing.name != update.name {
                return Err(StoreError::Protected(
                    "Cannot rename system modules".to_string(),
                ));
            }
            check_unique(
                tx,
                &update.name,
                &update.display_name,
                route,
                Some(update.order_index),
                Some(id),
            )?;
            tx.execute(
                "UPDATE modules SET name = ?1, display_name = ?2, description = ?3, icon = ?4,
                    route = ?5, order_index = ?6, is_active = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    update.name,
                    update.display_name.trim(),
                    update.description,
                    update.icon,
                    route,
                    update.order_index,
                    update.is_active,
                    now(),
                    id.get()
                ],
            )?;
            tracing::info!("updated module {}", id);
            Ok(tx.query_row(
                &format!("SELECT {MODULE_COLUMNS} FROM modules m WHERE m.id = ?1"),
                [id.get()],
                map_module,
            )?)
        })
    }

    /// Active actions of a module
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn actions_of(&self, id: ModuleId) -> Result<Vec<ModuleAction>> {
        self.db.actions().list(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, display: &str, order: i64) -> NewModule {
        NewModule {
            name: name.into(),
            display_name: display.into(),
            route: Some(format!("/admin/{name}")),
            order_index: Some(order),
            ..NewModule::default()
        }
    }

    #[test]
    fn create_and_list_in_order() {
        let db = Database::open_in_memory().unwrap();
        db.modules().create(&module("media", "Media", 2)).unwrap();
        db.modules().create(&module("users", "Users", 1)).unwrap();
        let names: Vec<_> = db
            .modules()
            .list(None)
            .unwrap()
            .into_iter()
            .map(|m| m.module.name)
            .collect();
        assert_eq!(names, vec!["users", "media"]);
        assert_eq!(db.modules().list(Some("med")).unwrap().len(), 1);
    }

    #[test]
    fn order_index_defaults_to_next() {
        let db = Database::open_in_memory().unwrap();
        db.modules().create(&module("users", "Users", 4)).unwrap();
        let created = db
            .modules()
            .create(&NewModule {
                name: "reports".into(),
                display_name: "Reports".into(),
                ..NewModule::default()
            })
            .unwrap();
        assert_eq!(created.order_index, 5);
    }

    #[test]
    fn uniqueness_per_field() {
        let db = Database::open_in_memory().unwrap();
        db.modules().create(&module("users", "Users", 1)).unwrap();

        let err = db.modules().create(&module("users", "Other", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "name", .. }));

        let err = db.modules().create(&module("people", "Users", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "display_name", .. }));

        let mut same_route = module("people", "People", 2);
        same_route.route = Some("/admin/users".into());
        let err = db.modules().create(&same_route).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "route", .. }));

        let err = db.modules().create(&module("people", "People", 1)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "order_index", .. }));
    }

    #[test]
    fn update_excludes_self_from_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let m = db.modules().create(&module("users", "Users", 1)).unwrap();
        let updated = db
            .modules()
            .update(
                m.id,
                &ModuleUpdate {
                    name: "users".into(),
                    display_name: "User Accounts".into(),
                    description: Some("Accounts".into()),
                    icon: Some("fas fa-users".into()),
                    route: Some("/admin/users".into()),
                    order_index: 1,
                    is_active: true,
                },
            )
            .unwrap();
        assert_eq!(updated.display_name, "User Accounts");
    }

    #[test]
    fn deactivated_module_frees_its_name() {
        let db = Database::open_in_memory().unwrap();
        let old = db.modules().create(&module("gallery", "Gallery", 1)).unwrap();
        db.modules()
            .update(
                old.id,
                &ModuleUpdate {
                    name: "gallery".into(),
                    display_name: "Gallery".into(),
                    description: None,
                    icon: None,
                    route: Some("/admin/gallery".into()),
                    order_index: 1,
                    is_active: false,
                },
            )
            .unwrap();
        assert!(db.modules().get(old.id).unwrap_err().is_not_found());

        let fresh = db.modules().create(&module("gallery", "Gallery", 1)).unwrap();
        assert_ne!(fresh.id, old.id);
        assert_eq!(db.modules().get_by_name("gallery").unwrap().map(|m| m.id), Some(fresh.id));

        let err = db.modules().create(&module("gallery", "Other", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "name", .. }));
    }

    #[test]
    fn rejects_invalid_names() {
        let db = Database::open_in_memory().unwrap();
        let err = db.modules().create(&module("Bad Name", "Bad", 1)).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(db.modules().get(ModuleId(42)).unwrap_err().is_not_found());
    }
}
