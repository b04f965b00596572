//! Testing utilities for the ArchivArt workspace
//!
//! Shared fixtures: seeded databases, accounts with chosen permissions and
//! sample media.

#![allow(missing_docs)]

use archivart_core::{ImageHash, MediaType, PermissionSet, User, UserId};
use archivart_store::seed::{self, DEFAULT_ADMIN_EMAIL};
use archivart_store::{Database, NewMedia, NewRole, NewUser};

/// Password that satisfies the strength rule
pub const TEST_PASSWORD: &str = "Secret1@x";

/// Password of the bootstrap administrator in fixtures
pub const ADMIN_PASSWORD: &str = "Admin123!";

/// In-memory database with the built-in catalog
pub fn seeded_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    seed::reset_rbac_catalog(&db).unwrap();
    db
}

/// In-memory database with the catalog and the bootstrap administrator
pub fn bootstrapped_db() -> (Database, User) {
    let db = Database::open_in_memory().unwrap();
    let admin = seed::bootstrap(&db, DEFAULT_ADMIN_EMAIL, ADMIN_PASSWORD).unwrap();
    (db, admin)
}

/// Local account of kind `user` with [`TEST_PASSWORD`]
pub fn create_user(db: &Database, email: &str) -> User {
    db.users()
        .create(&NewUser::local("Test User", email, TEST_PASSWORD))
        .unwrap()
}

/// Role named `name` holding exactly the given catalog permissions
pub fn create_role_with(db: &Database, name: &str, permissions: &[&str]) -> archivart_core::Role {
    let role = db.roles().create(&NewRole::new(name, name)).unwrap();
    for permission in permissions {
        let p = db
            .permissions()
            .get_by_name(permission)
            .unwrap()
            .unwrap_or_else(|| panic!("permission {permission} not seeded"));
        db.roles().grant(role.id, p.id).unwrap();
    }
    role
}

/// Account whose only role grants the given permissions
pub fn user_with_permissions(db: &Database, email: &str, permissions: &[&str]) -> User {
    let user = create_user(db, email);
    let role_name = format!("role_{}", user.id);
    let role = create_role_with(db, &role_name, permissions);
    db.users().assign_role(user.id, role.id).unwrap();
    user
}

/// Effective permissions of an account
pub fn permissions_of(db: &Database, user: UserId) -> PermissionSet {
    db.users().effective_permissions(user).unwrap()
}

/// Media record input with a hash derived from `bytes`
pub fn sample_media(title: &str, bytes: &[u8]) -> NewMedia {
    NewMedia {
        title: title.to_string(),
        description: Some(format!("{title} description")),
        scanning_image: format!("uploads/scans/{title}.jpg"),
        image_hash: ImageHash::compute(bytes),
        media_type: MediaType::Image,
        file_path: format!("uploads/media/{title}.jpg"),
        file_size: i64::try_from(bytes.len()).unwrap(),
        mime_type: Some("image/jpeg".to_string()),
        uploaded_by: None,
        descriptors: None,
    }
}

/// Media record input carrying matcher descriptors
pub fn sample_media_with_descriptors(title: &str, bytes: &[u8]) -> NewMedia {
    NewMedia {
        descriptors: Some(serde_json::json!({ "keypoints": 3, "vectors": [[0.1, 0.2], [0.3, 0.4]] })),
        ..sample_media(title, bytes)
    }
}
