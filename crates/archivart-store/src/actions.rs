//! Module action repository

use crate::db::{now, Database};
use crate::error::{Result, StoreError};
use crate::exists;
use crate::modules::get_module;
use archivart_core::{ActionId, ModuleAction, ModuleId, Validator};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const ACTION_COLUMNS: &str = "a.id, a.module_id, m.name, a.name, a.display_name, a.description, \
     a.route, a.is_active, a.created_at, a.updated_at";

fn map_action(row: &Row<'_>) -> rusqlite::Result<ModuleAction> {
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
}

/// Fields for a new action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAction {
    /// Owning module
    pub module_id: ModuleId,
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Optional sub-route
    #[serde(default)]
    pub route: Option<String>,
}

impl NewAction {
    /// Action with a name and label
    pub fn new(module_id: ModuleId, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            module_id,
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            route: None,
        }
    }
}

/// Replacement fields for an existing action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionUpdate {
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Optional sub-route
    #[serde(default)]
    pub route: Option<String>,
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

fn check_unique(conn: &Connection, module: ModuleId, name: &str, exclude: Option<ActionId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM module_actions WHERE module_id = ?1 AND name = ?2 AND id != ?3",
        params![module.get(), name, exclude.map_or(-1, ActionId::get)],
    )? {
        return Err(StoreError::conflict(
            "name",
            "Action name already exists for this module",
        ));
    }
    Ok(())
}

fn find(conn: &Connection, id: ActionId, active_only: bool) -> Result<ModuleAction> {
    let filter = if active_only { "AND a.is_active = 1" } else { "" };
    conn.query_row(
        &format!(
            "SELECT {ACTION_COLUMNS} FROM module_actions a
             JOIN modules m ON m.id = a.module_id
             WHERE a.id = ?1 AND m.is_active = 1 {filter}"
        ),
        [id.get()],
        map_action,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("module action", id))
}

pub(crate) fn insert_action(conn: &Connection, new: &NewAction) -> Result<ModuleAction> {
    validate(&new.name, &new.display_name, new.description.as_deref())?;
    get_module(conn, new.module_id)?;
    check_unique(conn, new.module_id, &new.name, None)?;
    let ts = now();
    conn.execute(
        "INSERT INTO module_actions (module_id, name, display_name, description, route, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![
            new.module_id.get(),
            new.name,
            new.display_name.trim(),
            new.description,
            new.route,
            ts
        ],
    )?;
    let id = ActionId(conn.last_insert_rowid());
    tracing::debug!("created action {} in module {}", new.name, new.module_id);
    find(conn, id, true)
}

/// Module action repository
#[derive(Debug, Clone, Copy)]
pub struct Actions<'a> {
    db: &'a Database,
}

impl Database {
    /// Module action repository
    #[inline]
    #[must_use]
    pub fn actions(&self) -> Actions<'_> {
        Actions { db: self }
    }
}

impl Actions<'_> {
    /// Active actions of active modules, optionally for one module
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, module: Option<ModuleId>) -> Result<Vec<ModuleAction>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM module_actions a
                 JOIN modules m ON m.id = a.module_id
                 WHERE a.is_active = 1 AND m.is_active = 1
                   AND (?1 IS NULL OR a.module_id = ?1)
                 ORDER BY m.order_index ASC, a.name ASC"
            ))?;
            let rows = stmt.query_map([module.map(ModuleId::get)], map_action)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Active action by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing or inactive
    pub fn get(&self, id: ActionId) -> Result<ModuleAction> {
        self.db.with_conn(|conn| find(conn, id, true))
    }

    /// Action by id, including deactivated ones
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn get_any(&self, id: ActionId) -> Result<ModuleAction> {
        self.db.with_conn(|conn| find(conn, id, false))
    }

    /// Create an action in an active module
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn create(&self, new: &NewAction) -> Result<ModuleAction> {
        self.db.with_conn(|conn| insert_action(conn, new))
    }

    /// Replace an action's fields
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn update(&self, id: ActionId, update: &ActionUpdate) -> Result<ModuleAction> {
        validate(&update.name, &update.display_name, update.description.as_deref())?;
        self.db.transaction(|tx| {
            let existing = find(tx, id, false)?;
            check_unique(tx, existing.module_id, &update.name, Some(id))?;
            tx.execute(
                "UPDATE module_actions SET name = ?1, display_name = ?2, description = ?3,
                    route = ?4, is_active = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    update.name,
                    update.display_name.trim(),
                    update.description,
                    update.route,
                    update.is_active,
                    now(),
                    id.get()
                ],
            )?;
            find(tx, id, false)
        })
    }

    /// Reactivate a deactivated action
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn restore(&self, id: ActionId) -> Result<ModuleAction> {
        self.db.with_conn(|conn| {
            find(conn, id, false)?;
            conn.execute(
                "UPDATE module_actions SET is_active = 1, updated_at = ?1 WHERE id = ?2",
                params![now(), id.get()],
            )?;
            tracing::info!("restored module action {}", id);
            find(conn, id, true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::NewModule;

    fn setup() -> (Database, ModuleId) {
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
        (db, module.id)
    }

    #[test]
    fn names_unique_per_module() {
        let (db, module) = setup();
        let view = db.actions().create(&NewAction::new(module, "view", "View")).unwrap();
        assert_eq!(view.module_name.as_deref(), Some("media"));

        let err = db.actions().create(&NewAction::new(module, "view", "View")).unwrap_err();
        assert!(err.is_conflict());

        let other = db
            .modules()
            .create(&NewModule {
                name: "users".into(),
                display_name: "Users".into(),
                order_index: Some(2),
                ..NewModule::default()
            })
            .unwrap();
        assert!(db.actions().create(&NewAction::new(other.id, "view", "View")).is_ok());
        assert_eq!(db.actions().list(Some(module)).unwrap().len(), 1);
        assert_eq!(db.actions().list(None).unwrap().len(), 2);
    }

    #[test]
    fn deactivate_then_restore() {
        let (db, module) = setup();
        let action = db.actions().create(&NewAction::new(module, "manage", "Manage")).unwrap();
        db.actions()
            .update(
                action.id,
                &ActionUpdate {
                    name: "manage".into(),
                    display_name: "Manage".into(),
                    description: None,
                    route: None,
                    is_active: false,
                },
            )
            .unwrap();

        assert!(db.actions().get(action.id).unwrap_err().is_not_found());
        assert!(!db.actions().get_any(action.id).unwrap().is_active);

        let restored = db.actions().restore(action.id).unwrap();
        assert!(restored.is_active);
    }

    #[test]
    fn requires_active_module() {
        let (db, _) = setup();
        let err = db
            .actions()
            .create(&NewAction::new(ModuleId(999), "view", "View"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
