//! Permission model and authorization check
//!
//! A principal's authority is the [`PermissionSet`] resolved from its active
//! role memberships. Every guarded operation states a [`Requirement`] and the
//! [`Authorizer`] answers it against that set.
//!
//! The check is deny-by-default:
//! - An empty set satisfies nothing
//! - No account class or role name bypasses the check
//! - Administrative roles hold their authority through explicit grants

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Maximum length of one name segment
pub const MAX_SEGMENT_LEN: usize = 50;

/// Validated `module.action` permission name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName {
    full: String,
    dot: usize,
}

impl PermissionName {
    /// Build from separate module and action segments
    ///
    /// # Errors
    /// Returns error if either segment is not a valid name
    pub fn new(module: &str, action: &str) -> Result<Self> {
        format!("{module}.{action}").parse()
    }

    /// Module segment
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        &self.full[..self.dot]
    }

    /// Action segment
    #[inline]
    #[must_use]
    pub fn action(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// Full `module.action` form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= MAX_SEGMENT_LEN
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl FromStr for PermissionName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidPermissionName(s.to_string());
        let dot = s.find('.').ok_or_else(invalid)?;
        let (module, action) = (&s[..dot], &s[dot + 1..]);
        if action.contains('.') || !valid_segment(module) || !valid_segment(action) {
            return Err(invalid());
        }
        Ok(Self {
            full: s.to_string(),
            dot,
        })
    }
}

impl TryFrom<String> for PermissionName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PermissionName> for String {
    fn from(name: PermissionName) -> Self {
        name.full
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Resolved permissions of one principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    names: BTreeSet<String>,
}

impl PermissionSet {
    /// Empty set; denies everything
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a permission name
    #[inline]
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// Exact membership
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Any permission within a module
    #[must_use]
    pub fn contains_module(&self, module: &str) -> bool {
        self.names.iter().any(|n| {
            n.split_once('.')
                .is_some_and(|(m, _)| m == module)
        })
    }

    /// At least one of the names
    #[must_use]
    pub fn contains_any<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| self.contains(n.as_ref()))
    }

    /// All of the names; an empty list is never satisfied
    #[must_use]
    pub fn contains_all<S: AsRef<str>>(&self, names: &[S]) -> bool {
        !names.is_empty() && names.iter().all(|n| self.contains(n.as_ref()))
    }

    /// Number of permissions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Sorted iterator over names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a guarded operation demands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Every listed permission
    All(Vec<String>),
    /// At least one listed permission
    Any(Vec<String>),
    /// Some permission within the module
    Module(String),
}

impl Requirement {
    /// Single permission
    #[inline]
    pub fn permission(name: impl Into<String>) -> Self {
        Self::All(vec![name.into()])
    }

    /// Evaluate against a set
    #[must_use]
    pub fn is_satisfied_by(&self, set: &PermissionSet) -> bool {
        match self {
            Self::All(names) => set.contains_all(names),
            Self::Any(names) => set.contains_any(names),
            Self::Module(module) => set.contains_module(module),
        }
    }

    /// Names reported back to a denied caller
    #[must_use]
    pub fn required(&self) -> Vec<String> {
        match self {
            Self::All(names) | Self::Any(names) => names.clone(),
            Self::Module(module) => vec![format!("{module}.*")],
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(names) => write!(f, "all of [{}]", names.join(", ")),
            Self::Any(names) => write!(f, "any of [{}]", names.join(", ")),
            Self::Module(module) => write!(f, "module {module}"),
        }
    }
}

/// Deny-by-default permission check
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    /// Check a requirement against a principal's permissions
    ///
    /// # Errors
    /// Returns [`CoreError::Forbidden`] naming what was required
    pub fn check(set: &PermissionSet, requirement: &Requirement) -> Result<()> {
        if requirement.is_satisfied_by(set) {
            Ok(())
        } else {
            tracing::debug!("permission denied: {}", requirement);
            Err(CoreError::Forbidden {
                required: requirement.required(),
            })
        }
    }
}
