//! User accounts, role memberships and effective permissions
//!
//! A user's authority is resolved here and nowhere else: a permission counts
//! only while every link on the path to it is active (membership, role,
//! grant, permission, module and action).

use crate::db::{now, parse_col, Database};
use crate::error::{Result, StoreError};
use crate::roles::{find_role, map_role, ROLE_COLUMNS};
use crate::{count, exists};
use archivart_core::validation::normalize_email;
use archivart_core::{
    hash_password, AccountKind, AuthProvider, ListQuery, Page, PermissionSet, Role, RoleId, User,
    UserId, UserRole, UserStatus, Validator,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const USER_COLUMNS: &str = "u.id, u.name, u.email, u.username, u.mobile, u.account_type, \
     u.is_active, u.is_blocked, u.is_verified, u.auth_provider, u.provider_id, u.password_hash, \
     u.last_login_at, u.created_at, u.updated_at";

const SORTS: &[(&str, &str)] = &[
    ("name", "u.name"),
    ("email", "u.email"),
    ("role", "u.account_type"),
    ("created_at", "u.created_at"),
    ("updated_at", "u.updated_at"),
    ("status", "u.is_active {dir}, u.is_blocked {rev}"),
];

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        username: row.get(3)?,
        mobile: row.get(4)?,
        account_type: parse_col(row, 5)?,
        is_active: row.get(6)?,
        is_blocked: row.get(7)?,
        is_verified: row.get(8)?,
        auth_provider: parse_col(row, 9)?,
        provider_id: row.get(10)?,
        password_hash: row.get(11)?,
        last_login_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Fields for a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Display name
    pub name: String,
    /// Email, stored lowercased
    pub email: String,
    /// Optional handle
    #[serde(default)]
    pub username: Option<String>,
    /// Optional E.164 number
    #[serde(default)]
    pub mobile: Option<String>,
    /// Plaintext password; required for local accounts
    #[serde(default)]
    pub password: Option<String>,
    /// Account class
    #[serde(default = "default_kind")]
    pub account_type: AccountKind,
    /// Sign-in method
    #[serde(default = "default_provider")]
    pub auth_provider: AuthProvider,
    /// Provider subject id
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Email verified
    #[serde(default)]
    pub is_verified: bool,
    /// Initial activity
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
}

fn default_kind() -> AccountKind {
    AccountKind::User
}

fn default_provider() -> AuthProvider {
    AuthProvider::Local
}

impl NewUser {
    /// Local account with a password
    pub fn local(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            username: None,
            mobile: None,
            password: Some(password.into()),
            account_type: AccountKind::User,
            auth_provider: AuthProvider::Local,
            provider_id: None,
            is_verified: false,
            is_active: true,
        }
    }

    /// Set the account class
    #[must_use]
    pub fn with_kind(mut self, kind: AccountKind) -> Self {
        self.account_type = kind;
        self
    }

    /// Set the handle
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Partial account update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Handle
    #[serde(default)]
    pub username: Option<String>,
    /// Phone
    #[serde(default)]
    pub mobile: Option<String>,
    /// Account class
    #[serde(default)]
    pub account_type: Option<AccountKind>,
    /// Activity
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Email verified
    #[serde(default)]
    pub is_verified: Option<bool>,
    /// New plaintext password
    #[serde(default)]
    pub password: Option<String>,
}

/// User list filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    /// Derived status
    #[serde(default)]
    pub status: Option<UserStatus>,
    /// Account class
    #[serde(default, rename = "role")]
    pub account_type: Option<AccountKind>,
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_email_free(conn: &Connection, email: &str, exclude: Option<UserId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM users WHERE email = ?1 AND id != ?2",
        params![email, exclude.map_or(-1, UserId::get)],
    )? {
        return Err(StoreError::conflict("email", "Email is already registered"));
    }
    Ok(())
}

fn check_username_free(conn: &Connection, username: &str, exclude: Option<UserId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM users WHERE username = ?1 AND id != ?2",
        params![username, exclude.map_or(-1, UserId::get)],
    )? {
        return Err(StoreError::conflict("username", "Username is already taken"));
    }
    Ok(())
}

pub(crate) fn find_user(conn: &Connection, id: UserId) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
        [id.get()],
        map_user,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("user", id))
}

fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1"),
            [normalize_email(email)],
            map_user,
        )
        .optional()?)
}

pub(crate) fn insert_user(conn: &Connection, new: &NewUser) -> Result<User> {
    let username = blank_to_none(new.username.as_deref());
    let mobile = blank_to_none(new.mobile.as_deref());
    let mut validator = Validator::new();
    validator
        .name("name", &new.name)
        .email("email", &new.email)
        .username("username", username)
        .mobile("mobile", mobile);
    if new.auth_provider == AuthProvider::Local {
        validator.password("password", new.password.as_deref().unwrap_or_default());
    }
    validator.finish()?;

    let email = normalize_email(&new.email);
    check_email_free(conn, &email, None)?;
    if let Some(username) = username {
        check_username_free(conn, username, None)?;
    }
    let password_hash = new.password.as_deref().map(hash_password).transpose()?;

    let ts = now();
    conn.execute(
        "INSERT INTO users (name, email, username, mobile, password_hash, account_type, is_active,
            is_blocked, is_verified, auth_provider, provider_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11, ?11)",
        params![
            new.name.trim(),
            email,
            username,
            mobile,
            password_hash,
            new.account_type.as_str(),
            new.is_active,
            new.is_verified,
            new.auth_provider.as_str(),
            new.provider_id,
            ts
        ],
    )?;
    let id = UserId(conn.last_insert_rowid());
    tracing::info!("created {} account {} ({})", new.account_type, email, id);
    find_user(conn, id)
}

pub(crate) fn upsert_membership(conn: &Connection, user: UserId, role: RoleId) -> Result<()> {
    conn.execute(
        "INSERT INTO user_roles (user_id, role_id, is_active, assigned_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT (user_id, role_id) DO UPDATE SET is_active = 1, assigned_at = excluded.assigned_at",
        params![user.get(), role.get(), now()],
    )?;
    Ok(())
}

/// User repository
#[derive(Debug, Clone, Copy)]
pub struct Users<'a> {
    db: &'a Database,
}

impl Database {
    /// User repository
    #[inline]
    #[must_use]
    pub fn users(&self) -> Users<'_> {
        Users { db: self }
    }
}

impl Users<'_> {
    /// Create an account
    ///
    /// # Errors
    /// Returns validation or conflict errors
    pub fn create(&self, new: &NewUser) -> Result<User> {
        self.db.with_conn(|conn| insert_user(conn, new))
    }

    /// Account by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn get(&self, id: UserId) -> Result<User> {
        self.db.with_conn(|conn| find_user(conn, id))
    }

    /// Account by email, case-insensitively
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.db.with_conn(|conn| find_user_by_email(conn, email))
    }

    /// Account linked to a social provider
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get_by_provider(&self, provider: AuthProvider, provider_id: &str) -> Result<Option<User>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {USER_COLUMNS} FROM users u WHERE u.auth_provider = ?1 AND u.provider_id = ?2"
                    ),
                    params![provider.as_str(), provider_id],
                    map_user,
                )
                .optional()?)
        })
    }

    /// Page through accounts
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, query: &ListQuery, filter: &UserFilter) -> Result<Page<User>> {
        let mut conditions = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(pattern) = query.like_pattern() {
            args.push(Value::Text(pattern));
            let n = args.len();
            conditions.push(format!(
                "(u.name LIKE ?{n} ESCAPE '\\' OR u.email LIKE ?{n} ESCAPE '\\')"
            ));
        }
        match filter.status {
            Some(UserStatus::Active) => conditions.push("u.is_active = 1 AND u.is_blocked = 0".into()),
            Some(UserStatus::Blocked) => conditions.push("u.is_blocked = 1".into()),
            Some(UserStatus::Inactive) => conditions.push("u.is_active = 0 AND u.is_blocked = 0".into()),
            None => {}
        }
        if let Some(kind) = filter.account_type {
            args.push(Value::Text(kind.as_str().to_string()));
            conditions.push(format!("u.account_type = ?{}", args.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order = query.sort_spec(SORTS, "u.created_at").to_sql();

        self.db.with_conn(|conn| {
            let total = count(
                conn,
                &format!("SELECT COUNT(*) FROM users u {where_clause}"),
                params_from_iter(args.iter()),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u {where_clause}
                 ORDER BY {order}, u.id DESC LIMIT {} OFFSET {}",
                query.limit(),
                query.offset()
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), map_user)?;
            let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Page::new(items, total, query))
        })
    }

    /// Apply a partial update
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn update(&self, id: UserId, update: &UserUpdate) -> Result<User> {
        let mut validator = Validator::new();
        if let Some(name) = &update.name {
            validator.name("name", name);
        }
        if let Some(email) = &update.email {
            validator.email("email", email);
        }
        if let Some(password) = &update.password {
            validator.password("password", password);
        }
        validator
            .username("username", blank_to_none(update.username.as_deref()))
            .mobile("mobile", blank_to_none(update.mobile.as_deref()))
            .finish()?;
        let password_hash = update.password.as_deref().map(hash_password).transpose()?;

        self.db.transaction(|tx| {
            let existing = find_user(tx, id)?;
            let email = update
                .email
                .as_deref()
                .map_or_else(|| existing.email.clone(), normalize_email);
            check_email_free(tx, &email, Some(id))?;
            let username = match update.username.as_deref() {
                Some(raw) => blank_to_none(Some(raw)).map(str::to_string),
                None => existing.username.clone(),
            };
            if let Some(username) = &username {
                check_username_free(tx, username, Some(id))?;
            }
            let mobile = match update.mobile.as_deref() {
                Some(raw) => blank_to_none(Some(raw)).map(str::to_string),
                None => existing.mobile.clone(),
            };

            tx.execute(
                "UPDATE users SET name = ?1, email = ?2, username = ?3, mobile = ?4, account_type = ?5,
                    is_active = ?6, is_verified = ?7, password_hash = COALESCE(?8, password_hash),
                    updated_at = ?9
                 WHERE id = ?10",
                params![
                    update.name.as_deref().map_or(existing.name.as_str(), str::trim),
                    email,
                    username,
                    mobile,
                    update.account_type.unwrap_or(existing.account_type).as_str(),
                    update.is_active.unwrap_or(existing.is_active),
                    update.is_verified.unwrap_or(existing.is_verified),
                    password_hash,
                    now(),
                    id.get()
                ],
            )?;
            tracing::info!("updated user {}", id);
            find_user(tx, id)
        })
    }

    /// Block or unblock an account
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn set_blocked(&self, id: UserId, blocked: bool) -> Result<User> {
        self.db.with_conn(|conn| {
            find_user(conn, id)?;
            conn.execute(
                "UPDATE users SET is_blocked = ?1, updated_at = ?2 WHERE id = ?3",
                params![blocked, now(), id.get()],
            )?;
            tracing::info!("user {} {}", id, if blocked { "blocked" } else { "unblocked" });
            find_user(conn, id)
        })
    }

    /// Replace an account's password
    ///
    /// # Errors
    /// Returns validation or not-found errors
    pub fn set_password(&self, id: UserId, password: &str) -> Result<()> {
        Validator::new().password("password", password).finish()?;
        let hash = hash_password(password)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
                params![hash, now(), id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("user", id));
            }
            Ok(())
        })
    }

    /// Record a successful sign-in
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn touch_login(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
                params![at, id.get()],
            )?;
            Ok(())
        })
    }

    /// Attach a social provider identity to an existing account
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn link_provider(&self, id: UserId, provider: AuthProvider, provider_id: &str) -> Result<User> {
        self.db.with_conn(|conn| {
            find_user(conn, id)?;
            conn.execute(
                "UPDATE users SET auth_provider = ?1, provider_id = ?2, is_verified = 1, updated_at = ?3
                 WHERE id = ?4",
                params![provider.as_str(), provider_id, now(), id.get()],
            )?;
            tracing::info!("linked {} identity to user {}", provider, id);
            find_user(conn, id)
        })
    }

    /// Whether a username is free (optionally ignoring one account)
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn username_available(&self, username: &str, exclude: Option<UserId>) -> Result<bool> {
        self.db.with_conn(|conn| {
            Ok(!exists(
                conn,
                "SELECT 1 FROM users WHERE username = ?1 AND id != ?2",
                params![username, exclude.map_or(-1, UserId::get)],
            )?)
        })
    }

    /// Administrative accounts
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn admins(&self) -> Result<Vec<User>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.account_type = 'admin' ORDER BY u.id"
            ))?;
            let rows = stmt.query_map([], map_user)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Add (or re-activate) a role membership
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if either side is missing
    pub fn assign_role(&self, user: UserId, role: RoleId) -> Result<()> {
        self.db.with_conn(|conn| {
            find_user(conn, user)?;
            find_role(conn, role)?;
            upsert_membership(conn, user, role)?;
            tracing::info!("assigned role {} to user {}", role, user);
            Ok(())
        })
    }

    /// Deactivate a role membership; returns whether one was active
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn remove_role(&self, user: UserId, role: RoleId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_roles SET is_active = 0 WHERE user_id = ?1 AND role_id = ?2 AND is_active = 1",
                params![user.get(), role.get()],
            )?;
            tracing::info!("removed role {} from user {}", role, user);
            Ok(changed > 0)
        })
    }

    /// Active memberships in active roles
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn roles_of(&self, user: UserId) -> Result<Vec<UserRole>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROLE_COLUMNS}, ur.assigned_at FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = ?1 AND ur.is_active = 1 AND r.is_active = 1
                 ORDER BY r.display_name"
            ))?;
            let rows = stmt.query_map([user.get()], |row| {
                Ok(UserRole {
                    role: map_role(row)?,
                    assigned_at: row.get(8)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Earliest active membership
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn primary_role(&self, user: UserId) -> Result<Option<Role>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {ROLE_COLUMNS} FROM user_roles ur
                         JOIN roles r ON r.id = ur.role_id
                         WHERE ur.user_id = ?1 AND ur.is_active = 1 AND r.is_active = 1
                         ORDER BY ur.assigned_at ASC, ur.id ASC LIMIT 1"
                    ),
                    [user.get()],
                    map_role,
                )
                .optional()?)
        })
    }

    /// Make `role` the user's only active membership
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if either side is missing
    pub fn set_primary_role(&self, user: UserId, role: RoleId) -> Result<()> {
        self.db.transaction(|tx| {
            find_user(tx, user)?;
            find_role(tx, role)?;
            tx.execute(
                "UPDATE user_roles SET is_active = 0 WHERE user_id = ?1",
                [user.get()],
            )?;
            upsert_membership(tx, user, role)?;
            tracing::info!("set primary role of user {} to {}", user, role);
            Ok(())
        })
    }

    /// Accounts holding an active membership in a role
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn users_with_role(&self, role: RoleId) -> Result<Vec<User>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM user_roles ur
                 JOIN users u ON u.id = ur.user_id
                 WHERE ur.role_id = ?1 AND ur.is_active = 1
                 ORDER BY u.name"
            ))?;
            let rows = stmt.query_map([role.get()], map_user)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Resolve a user's effective permissions
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn effective_permissions(&self, user: UserId) -> Result<PermissionSet> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p.name FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id AND r.is_active = 1
                 JOIN role_permissions rp ON rp.role_id = r.id AND rp.is_active = 1
                 JOIN permissions p ON p.id = rp.permission_id AND p.is_active = 1
                 JOIN modules m ON m.id = p.module_id AND m.is_active = 1
                 JOIN module_actions a ON a.id = p.action_id AND a.is_active = 1
                 WHERE ur.user_id = ?1 AND ur.is_active = 1",
            )?;
            let rows = stmt.query_map([user.get()], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<PermissionSet>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::NewRole;
    use archivart_core::{verify_password, SortOrder};

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_normalizes_and_hashes() {
        let db = db();
        let user = db
            .users()
            .create(&NewUser::local("Ada Lovelace", "Ada@Example.com", "Secret@123"))
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(verify_password("Secret@123", user.password_hash.as_deref().unwrap()));
        assert!(db.users().get_by_email("ADA@example.com").unwrap().is_some());
    }

    #[test]
    fn create_rejects_weak_password_and_duplicates() {
        let db = db();
        let err = db
            .users()
            .create(&NewUser::local("Ada", "ada@example.com", "weak"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        db.users()
            .create(&NewUser::local("Ada", "ada@example.com", "Secret@123").with_username("ada"))
            .unwrap();
        let err = db
            .users()
            .create(&NewUser::local("Ada Two", "ADA@example.com", "Secret@123"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "email", .. }));
        let err = db
            .users()
            .create(&NewUser::local("Ada Two", "ada2@example.com", "Secret@123").with_username("ada"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "username", .. }));
        assert!(!db.users().username_available("ada", None).unwrap());
    }

    #[test]
    fn update_email_unique_excluding_self() {
        let db = db();
        let a = db.users().create(&NewUser::local("Ada", "ada@example.com", "Secret@123")).unwrap();
        db.users().create(&NewUser::local("Bob", "bob@example.com", "Secret@123")).unwrap();

        let same = UserUpdate {
            email: Some("ada@example.com".into()),
            name: Some("Ada L".into()),
            ..UserUpdate::default()
        };
        assert_eq!(db.users().update(a.id, &same).unwrap().name, "Ada L");

        let taken = UserUpdate {
            email: Some("bob@example.com".into()),
            ..UserUpdate::default()
        };
        assert!(db.users().update(a.id, &taken).unwrap_err().is_conflict());
    }

    #[test]
    fn list_filters_by_status_and_sorts() {
        let db = db();
        for (name, email) in [("Carol", "c@x.io"), ("Alice", "a@x.io"), ("Bob", "b@x.io")] {
            db.users().create(&NewUser::local(name, email, "Secret@123")).unwrap();
        }
        let bob = db.users().get_by_email("b@x.io").unwrap().unwrap();
        db.users().set_blocked(bob.id, true).unwrap();

        let active = db
            .users()
            .list(
                &ListQuery::new().with_sort("name", SortOrder::Asc),
                &UserFilter {
                    status: Some(UserStatus::Active),
                    account_type: None,
                },
            )
            .unwrap();
        let names: Vec<_> = active.items.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Carol"]);

        let blocked = db
            .users()
            .list(
                &ListQuery::new(),
                &UserFilter {
                    status: Some(UserStatus::Blocked),
                    account_type: None,
                },
            )
            .unwrap();
        assert_eq!(blocked.total, 1);
        assert_eq!(blocked.items[0].status(), UserStatus::Blocked);

        let searched = db
            .users()
            .list(&ListQuery::new().with_search("ali"), &UserFilter::default())
            .unwrap();
        assert_eq!(searched.total, 1);
    }

    #[test]
    fn inactive_filter_leaves_out_blocked_accounts() {
        let db = db();
        let deactivate = UserUpdate {
            is_active: Some(false),
            ..UserUpdate::default()
        };
        let idle = db.users().create(&NewUser::local("Idle", "idle@x.io", "Secret@123")).unwrap();
        db.users().update(idle.id, &deactivate).unwrap();
        let both = db.users().create(&NewUser::local("Both", "both@x.io", "Secret@123")).unwrap();
        db.users().update(both.id, &deactivate).unwrap();
        db.users().set_blocked(both.id, true).unwrap();

        let inactive = db
            .users()
            .list(
                &ListQuery::new(),
                &UserFilter {
                    status: Some(UserStatus::Inactive),
                    account_type: None,
                },
            )
            .unwrap();
        assert_eq!(inactive.total, 1);
        assert_eq!(inactive.items[0].id, idle.id);
        assert!(inactive.items.iter().all(|u| u.status() == UserStatus::Inactive));
    }

    #[test]
    fn primary_role_is_earliest_and_can_be_replaced() {
        let db = db();
        let user = db.users().create(&NewUser::local("Ada", "ada@example.com", "Secret@123")).unwrap();
        let editor = db.roles().create(&NewRole::new("editor", "Editor")).unwrap();
        let viewer = db.roles().create(&NewRole::new("viewer", "Viewer")).unwrap();

        db.users().assign_role(user.id, editor.id).unwrap();
        db.users().assign_role(user.id, viewer.id).unwrap();
        assert_eq!(db.users().primary_role(user.id).unwrap().unwrap().name, "editor");
        assert_eq!(db.users().roles_of(user.id).unwrap().len(), 2);

        db.users().set_primary_role(user.id, viewer.id).unwrap();
        let roles = db.users().roles_of(user.id).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role.name, "viewer");

        assert!(db.users().remove_role(user.id, viewer.id).unwrap());
        assert!(db.users().primary_role(user.id).unwrap().is_none());
        assert_eq!(db.users().users_with_role(viewer.id).unwrap().len(), 0);
    }

    #[test]
    fn no_roles_means_no_permissions() {
        let db = db();
        let user = db.users().create(&NewUser::local("Ada", "ada@example.com", "Secret@123")).unwrap();
        assert!(db.users().effective_permissions(user.id).unwrap().is_empty());
    }

    #[test]
    fn social_account_needs_no_password() {
        let db = db();
        let user = db
            .users()
            .create(&NewUser {
                password: None,
                auth_provider: AuthProvider::Google,
                provider_id: Some("g-123".into()),
                is_verified: true,
                ..NewUser::local("Ada", "ada@example.com", "")
            })
            .unwrap();
        assert!(user.password_hash.is_none());
        let found = db.users().get_by_provider(AuthProvider::Google, "g-123").unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }
}
