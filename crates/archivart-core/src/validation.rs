//! Input validation rules
//!
//! Field checks are accumulated in a [`Validator`] so a request reports every
//! bad field at once rather than failing on the first.

use crate::error::{CoreError, FieldError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z\s\-'.]+$").unwrap());
static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static MOBILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap());
static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());
static COLOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

/// Characters accepted as the required password symbol
pub const PASSWORD_SYMBOLS: &str = "@$!%*?&";

/// Maximum email length
pub const MAX_EMAIL_LEN: usize = 255;
/// Maximum description length
pub const MAX_DESCRIPTION_LEN: usize = 1000;
/// Maximum slug length
pub const MAX_SLUG_LEN: usize = 50;

fn char_len(value: &str) -> usize {
    value.chars().count()
}

/// Person name: 2-100 letters, spaces, hyphens, apostrophes or periods
#[must_use]
pub fn is_valid_name(value: &str) -> bool {
    let value = value.trim();
    (2..=100).contains(&char_len(value)) && NAME_RE.is_match(value)
}

/// Username: 3-50 letters, digits or underscores
#[must_use]
pub fn is_valid_username(value: &str) -> bool {
    (3..=50).contains(&value.len()) && USERNAME_RE.is_match(value)
}

/// Email address of at most 255 characters
#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    let value = value.trim();
    value.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(value)
}

/// Canonical stored form of an email
#[must_use]
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Password strength rule
///
/// 8-128 characters with a lowercase letter, an uppercase letter, a digit
/// and one of [`PASSWORD_SYMBOLS`].
#[must_use]
pub fn is_strong_password(value: &str) -> bool {
    (8..=128).contains(&char_len(value))
        && value.chars().any(|c| c.is_ascii_lowercase())
        && value.chars().any(|c| c.is_ascii_uppercase())
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
}

/// E.164 phone number
#[must_use]
pub fn is_valid_mobile(value: &str) -> bool {
    MOBILE_RE.is_match(value)
}

/// Machine name for modules, actions and roles
#[must_use]
pub fn is_valid_slug(value: &str) -> bool {
    value.len() <= MAX_SLUG_LEN && SLUG_RE.is_match(value)
}

/// `#rrggbb` colour
#[must_use]
pub fn is_valid_color(value: &str) -> bool {
    COLOR_RE.is_match(value)
}

/// Accumulates field errors
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    /// Create empty validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error unless `ok`
    pub fn check(&mut self, field: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    /// Required, non-blank value
    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, !value.trim().is_empty(), &format!("{field} is required"))
    }

    /// Person name
    pub fn name(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            is_valid_name(value),
            "Name must be 2-100 characters and contain only letters, spaces, hyphens, apostrophes, and periods",
        )
    }

    /// Email
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, is_valid_email(value), "Please provide a valid email address")
    }

    /// Strong password
    pub fn password(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            is_strong_password(value),
            "Password must be 8-128 characters and contain at least one lowercase letter, one uppercase letter, one number, and one special character (@$!%*?&)",
        )
    }

    /// Optional username
    pub fn username(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        let ok = value.map_or(true, is_valid_username);
        self.check(
            field,
            ok,
            "Username must be 3-50 characters and contain only letters, numbers, and underscores",
        )
    }

    /// Optional mobile number
    pub fn mobile(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        let ok = value.map_or(true, is_valid_mobile);
        self.check(
            field,
            ok,
            "Mobile number must be in international format (e.g., +1234567890)",
        )
    }

    /// Title of 1-255 characters
    pub fn title(&mut self, field: &str, value: &str) -> &mut Self {
        let len = char_len(value.trim());
        self.check(field, (1..=255).contains(&len), "Title must be 1-255 characters")
    }

    /// Optional description of at most 1000 characters
    pub fn description(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        let ok = value.map_or(true, |v| char_len(v) <= MAX_DESCRIPTION_LEN);
        self.check(field, ok, "Description must be at most 1000 characters")
    }

    /// Machine name
    pub fn slug(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            is_valid_slug(value),
            "Name must start with a lowercase letter and contain only lowercase letters, numbers, and underscores",
        )
    }

    /// Display label of 1-100 characters
    pub fn label(&mut self, field: &str, value: &str) -> &mut Self {
        let len = char_len(value.trim());
        self.check(field, (1..=100).contains(&len), &format!("{field} must be 1-100 characters"))
    }

    /// Hex colour
    pub fn color(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, is_valid_color(value), "Color must be a hex value like #4f46e5")
    }

    /// Whether no errors were recorded
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Finish validation
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] with every recorded field error
    pub fn finish(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}
