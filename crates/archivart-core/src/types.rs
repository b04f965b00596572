//! Core types for ArchivArt
//!
//! Defines the records the admin service works with:
//! - Typed row identifiers
//! - The RBAC catalog (modules, actions, permissions, roles)
//! - User accounts and their derived status
//! - AR media records and site settings

use crate::image_hash::ImageHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw row id
            #[inline]
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Module row id
    ModuleId
);
row_id!(
    /// Module action row id
    ActionId
);
row_id!(
    /// Permission row id
    PermissionId
);
row_id!(
    /// Role row id
    RoleId
);
row_id!(
    /// User row id
    UserId
);
row_id!(
    /// Media row id
    MediaId
);

/// Error returned when parsing an enum from its wire name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire and storage name
            #[inline]
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Account class stored on the user row
    ///
    /// Distinct from RBAC roles: `admin` accounts may sign in to the admin
    /// surface and cannot be deleted, but still need granted permissions.
    AccountKind, "account kind" {
        /// Regular application user
        User => "user",
        /// Administrative account
        Admin => "admin",
    }
);

wire_enum!(
    /// How an account authenticates
    AuthProvider, "auth provider" {
        /// Email and password
        Local => "local",
        /// Google sign-in
        Google => "google",
        /// Facebook sign-in
        Facebook => "facebook",
    }
);

wire_enum!(
    /// Media content class
    MediaType, "media type" {
        /// Still image
        Image => "image",
        /// Video clip
        Video => "video",
        /// Audio clip
        Audio => "audio",
    }
);

wire_enum!(
    /// Derived account status
    UserStatus, "user status" {
        /// Active and not blocked
        Active => "active",
        /// Blocked by an administrator
        Blocked => "blocked",
        /// Deactivated
        Inactive => "inactive",
    }
);

impl UserStatus {
    /// Derive status from the stored flags; blocking wins over deactivation
    #[inline]
    #[must_use]
    pub const fn from_flags(is_active: bool, is_blocked: bool) -> Self {
        if is_blocked {
            Self::Blocked
        } else if is_active {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

/// Top-level admin area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Row id
    pub id: ModuleId,
    /// Machine name, first half of a permission name
    pub name: String,
    /// Label shown in navigation
    pub display_name: String,
    /// Free text
    pub description: Option<String>,
    /// Icon class
    pub icon: Option<String>,
    /// Admin route
    pub route: Option<String>,
    /// Navigation order
    pub order_index: i64,
    /// Seeded modules cannot be deleted
    pub is_system: bool,
    /// Soft-delete flag
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Module with catalog counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    /// The module
    #[serde(flatten)]
    pub module: Module,
    /// Active actions in the module
    pub action_count: i64,
    /// Active permissions in the module
    pub permission_count: i64,
}

/// Verb available inside a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAction {
    /// Row id
    pub id: ActionId,
    /// Owning module
    pub module_id: ModuleId,
    /// Owning module's name, when joined
    pub module_name: Option<String>,
    /// Machine name, second half of a permission name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    pub description: Option<String>,
    /// Optional sub-route
    pub route: Option<String>,
    /// Soft-delete flag
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Named `module.action` grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Row id
    pub id: PermissionId,
    /// `module.action`
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    pub description: Option<String>,
    /// Referenced module
    pub module_id: Option<ModuleId>,
    /// Referenced action
    pub action_id: Option<ActionId>,
    /// Joined module name
    pub module_name: Option<String>,
    /// Joined action name
    pub action_name: Option<String>,
    /// Optional resource qualifier
    pub resource: Option<String>,
    /// Seeded permissions
    pub is_system: bool,
    /// Soft-delete flag
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Named bundle of permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Row id
    pub id: RoleId,
    /// Machine name
    pub name: String,
    /// Label
    pub display_name: String,
    /// Free text
    pub description: Option<String>,
    /// System roles cannot be deleted
    pub is_system: bool,
    /// Inactive roles grant nothing
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Role with membership counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    /// The role
    #[serde(flatten)]
    pub role: Role,
    /// Users holding the role
    pub user_count: i64,
    /// Permissions granted to the role
    pub permission_count: i64,
}

/// Role membership as seen from a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    /// The role
    #[serde(flatten)]
    pub role: Role,
    /// When the membership was (re)activated
    pub assigned_at: DateTime<Utc>,
}

/// User account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row id
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Lowercased email, unique
    pub email: String,
    /// Optional unique handle
    pub username: Option<String>,
    /// E.164 phone number
    pub mobile: Option<String>,
    /// Account class
    pub account_type: AccountKind,
    /// Deactivated accounts cannot sign in
    pub is_active: bool,
    /// Blocked accounts cannot sign in
    pub is_blocked: bool,
    /// Email verified
    pub is_verified: bool,
    /// Sign-in method
    pub auth_provider: AuthProvider,
    /// Provider subject id
    pub provider_id: Option<String>,
    /// Argon2 PHC string; never serialized
    #[serde(skip)]
    pub password_hash: Option<String>,
    /// Last successful sign-in
    pub last_login_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Derived status
    #[inline]
    #[must_use]
    pub const fn status(&self) -> UserStatus {
        UserStatus::from_flags(self.is_active, self.is_blocked)
    }

    /// Whether the account may authenticate
    #[inline]
    #[must_use]
    pub const fn can_sign_in(&self) -> bool {
        self.is_active && !self.is_blocked
    }

    /// Whether the account is an administrative account
    #[inline]
    #[must_use]
    pub fn is_admin_account(&self) -> bool {
        self.account_type == AccountKind::Admin
    }
}

/// AR media record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Row id
    pub id: MediaId,
    /// Title
    pub title: String,
    /// Free text
    pub description: Option<String>,
    /// Path of the scanning image; unique
    pub scanning_image: String,
    /// SHA-256 of the scanning image; unique
    pub image_hash: ImageHash,
    /// Content class
    pub media_type: MediaType,
    /// Path or URL of the media file
    pub file_path: String,
    /// Size in bytes
    pub file_size: i64,
    /// MIME type
    pub mime_type: Option<String>,
    /// Uploading account, cleared when that account is deleted
    pub uploaded_by: Option<UserId>,
    /// Joined uploader name
    pub uploader_name: Option<String>,
    /// Joined uploader email
    pub uploader_email: Option<String>,
    /// Feature descriptors for the external matcher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<serde_json::Value>,
    /// Visibility flag
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Site branding, a single row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Site name
    pub site_name: String,
    /// Tagline
    pub site_tagline: String,
    /// `#rrggbb`
    pub primary_color: String,
    /// Logo location
    pub logo_path: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            site_name: "ArchivArt".to_string(),
            site_tagline: "Your Digital Archive Solution".to_string(),
            primary_color: "#4f46e5".to_string(),
            logo_path: None,
        }
    }
}

/// Rows removed (or that would be removed) by a cascading delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionImpact {
    /// Module actions
    pub actions: u64,
    /// Permissions
    pub permissions: u64,
    /// Role-permission grants
    pub role_permissions: u64,
    /// User-role memberships
    pub user_roles: u64,
}

impl DeletionImpact {
    /// Total dependent rows
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.actions + self.permissions + self.role_permissions + self.user_roles
    }
}

impl fmt::Display for DeletionImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} actions, {} permissions, {} role grants, {} user roles",
            self.actions, self.permissions, self.role_permissions, self.user_roles
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_serializes_transparently() {
        assert_eq!(serde_json::to_string(&UserId(7)).unwrap(), "7");
        let id: RoleId = serde_json::from_str("12").unwrap();
        assert_eq!(id, RoleId(12));
        assert_eq!(id.to_string(), "12");
    }

    #[test]
    fn wire_enums_round_trip_names() {
        for kind in MediaType::ALL {
            assert_eq!(kind.as_str().parse::<MediaType>().unwrap(), *kind);
        }
        assert_eq!(
            serde_json::to_string(&AccountKind::Admin).unwrap(),
            "\"admin\""
        );
        let err = "podcast".parse::<MediaType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown media type: podcast");
    }

    #[test]
    fn status_blocked_wins() {
        assert_eq!(UserStatus::from_flags(true, false), UserStatus::Active);
        assert_eq!(UserStatus::from_flags(true, true), UserStatus::Blocked);
        assert_eq!(UserStatus::from_flags(false, true), UserStatus::Blocked);
        assert_eq!(UserStatus::from_flags(false, false), UserStatus::Inactive);
    }

    #[test]
    fn user_password_hash_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: UserId(1),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            username: None,
            mobile: None,
            account_type: AccountKind::User,
            is_active: true,
            is_blocked: false,
            is_verified: false,
            auth_provider: AuthProvider::Local,
            provider_id: None,
            password_hash: Some("$argon2id$secret".into()),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(user.can_sign_in());
        assert!(!user.is_admin_account());
    }

    #[test]
    fn deletion_impact_total() {
        let impact = DeletionImpact {
            actions: 2,
            permissions: 3,
            role_permissions: 4,
            user_roles: 1,
        };
        assert_eq!(impact.total(), 10);
        assert_eq!(
            impact.to_string(),
            "2 actions, 3 permissions, 4 role grants, 1 user roles"
        );
    }
}
