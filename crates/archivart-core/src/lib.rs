//! ArchivArt Core - domain model of the ArchivArt admin service
//!
//! Provides:
//! - Typed records for accounts, media and the RBAC catalog
//! - The `module.action` permission model and its deny-by-default check
//! - Input validation rules shared by every write path
//! - SHA-256 image hashing and Argon2 password hashing
//! - List queries with whitelisted sorting and pagination windows
//!
//! # Example
//!
//! ```rust
//! use archivart_core::prelude::*;
//!
//! let granted: PermissionSet = ["media.view", "media.update"].into_iter().collect();
//! assert!(Authorizer::check(&granted, &Requirement::permission("media.view")).is_ok());
//! assert!(Authorizer::check(&granted, &Requirement::permission("media.delete")).is_err());
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod image_hash;
pub mod listing;
pub mod password;
pub mod permission;
pub mod types;
pub mod validation;

pub use error::{CoreError, FieldError, Result};
pub use image_hash::{HashError, ImageHash};
pub use listing::{ListQuery, Page, PageWindow, SortOrder, SortSpec};
pub use password::{hash_password, verify_password};
pub use permission::{Authorizer, PermissionName, PermissionSet, Requirement};
pub use types::{
    AccountKind, ActionId, AppSettings, AuthProvider, DeletionImpact, Media, MediaId, MediaType,
    Module, ModuleAction, ModuleId, ModuleSummary, Permission, PermissionId, Role, RoleId,
    RoleSummary, UnknownVariant, User, UserId, UserRole, UserStatus,
};
pub use validation::Validator;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with ArchivArt Core
    pub use crate::{
        AccountKind, Authorizer, CoreError, ImageHash, ListQuery, MediaType, Page, PermissionName,
        PermissionSet, Requirement, UserId, Validator,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
