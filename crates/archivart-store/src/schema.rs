//! Schema migrations
//!
//! Migrations are applied in order and recorded in `schema_migrations`, so
//! opening an existing database is idempotent. Foreign keys carry no
//! `ON DELETE` actions: dependent rows are removed explicitly by
//! [`crate::cascade`], which keeps each cascade inspectable and countable.

use crate::db::now;
use crate::error::Result;
use rusqlite::{params, Connection};

const V1_ACCOUNTS_AND_RBAC: &str = r"
CREATE TABLE users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    email           TEXT NOT NULL UNIQUE,
    username        TEXT UNIQUE,
    mobile          TEXT,
    password_hash   TEXT,
    account_type    TEXT NOT NULL DEFAULT 'user' CHECK (account_type IN ('user', 'admin')),
    is_active       INTEGER NOT NULL DEFAULT 1,
    is_blocked      INTEGER NOT NULL DEFAULT 0,
    is_verified     INTEGER NOT NULL DEFAULT 0,
    auth_provider   TEXT NOT NULL DEFAULT 'local',
    provider_id     TEXT,
    last_login_at   TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX idx_users_provider ON users (auth_provider, provider_id)
    WHERE provider_id IS NOT NULL;

CREATE TABLE modules (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    description     TEXT,
    icon            TEXT,
    route           TEXT,
    order_index     INTEGER NOT NULL DEFAULT 0,
    is_system       INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE module_actions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    module_id       INTEGER NOT NULL REFERENCES modules (id),
    name            TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    description     TEXT,
    route           TEXT,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (module_id, name)
);

CREATE TABLE permissions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    description     TEXT,
    module_id       INTEGER REFERENCES modules (id),
    action_id       INTEGER REFERENCES module_actions (id),
    resource        TEXT,
    is_system       INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX idx_permissions_module ON permissions (module_id);
CREATE INDEX idx_permissions_action ON permissions (action_id);

CREATE TABLE roles (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    description     TEXT,
    is_system       INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE role_permissions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    role_id         INTEGER NOT NULL REFERENCES roles (id),
    permission_id   INTEGER NOT NULL REFERENCES permissions (id),
    is_active       INTEGER NOT NULL DEFAULT 1,
    granted_at      TEXT NOT NULL,
    UNIQUE (role_id, permission_id)
);
CREATE INDEX idx_role_permissions_permission ON role_permissions (permission_id);

CREATE TABLE user_roles (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users (id),
    role_id         INTEGER NOT NULL REFERENCES roles (id),
    is_active       INTEGER NOT NULL DEFAULT 1,
    assigned_at     TEXT NOT NULL,
    UNIQUE (user_id, role_id)
);
CREATE INDEX idx_user_roles_role ON user_roles (role_id);
";

const V2_MEDIA_TOKENS_SETTINGS: &str = r"
CREATE TABLE media (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    title           TEXT NOT NULL,
    description     TEXT,
    scanning_image  TEXT NOT NULL UNIQUE,
    image_hash      TEXT NOT NULL UNIQUE,
    media_type      TEXT NOT NULL CHECK (media_type IN ('image', 'video', 'audio')),
    file_path       TEXT NOT NULL,
    file_size       INTEGER NOT NULL DEFAULT 0,
    mime_type       TEXT,
    uploaded_by     INTEGER REFERENCES users (id),
    descriptors     TEXT,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX idx_media_uploaded_by ON media (uploaded_by);

CREATE TABLE revoked_tokens (
    token_hash      TEXT PRIMARY KEY,
    user_id         INTEGER NOT NULL REFERENCES users (id),
    expires_at      TEXT NOT NULL,
    revoked_at      TEXT NOT NULL
);
CREATE INDEX idx_revoked_tokens_user ON revoked_tokens (user_id);

CREATE TABLE settings (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    site_name       TEXT NOT NULL,
    site_tagline    TEXT NOT NULL,
    primary_color   TEXT NOT NULL,
    logo_path       TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
";

// Module names only need to be unique among active modules. SQLite cannot
// drop a column constraint, so the table is rebuilt. Runs before foreign
// keys are switched on.
const V3_ACTIVE_MODULE_NAMES: &str = r"
CREATE TABLE modules_v3 (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    description     TEXT,
    icon            TEXT,
    route           TEXT,
    order_index     INTEGER NOT NULL DEFAULT 0,
    is_system       INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
INSERT INTO modules_v3 (id, name, display_name, description, icon, route, order_index,
                        is_system, is_active, created_at, updated_at)
    SELECT id, name, display_name, description, icon, route, order_index,
           is_system, is_active, created_at, updated_at
    FROM modules;
DROP TABLE modules;
ALTER TABLE modules_v3 RENAME TO modules;
CREATE UNIQUE INDEX idx_modules_active_name ON modules (name) WHERE is_active = 1;
";

/// Ordered migrations
pub const MIGRATIONS: &[(i64, &str)] = &[
    (1, V1_ACCOUNTS_AND_RBAC),
    (2, V2_MEDIA_TOKENS_SETTINGS),
    (3, V3_ACTIVE_MODULE_NAMES),
];

/// Apply pending migrations, returning how many ran
///
/// Each migration commits together with its `schema_migrations` row.
///
/// # Errors
/// Returns error if any migration fails; earlier migrations stay applied
pub fn migrate(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let current = current_version(conn)?;

    let mut applied = 0;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now()],
        )?;
        tx.commit()?;
        tracing::info!("applied schema migration v{}", version);
        applied += 1;
    }
    Ok(applied)
}

/// Highest applied migration
///
/// # Errors
/// Returns error if the migrations table cannot be read
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}
