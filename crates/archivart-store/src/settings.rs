//! Site settings
//!
//! A single row with id 1. Until it is first written, reads return
//! [`AppSettings::default`].

use crate::db::{now, Database};
use crate::error::Result;
use archivart_core::{AppSettings, Validator};
use rusqlite::{params, OptionalExtension};

/// Settings repository
#[derive(Debug, Clone, Copy)]
pub struct Settings<'a> {
    db: &'a Database,
}

impl Database {
    /// Settings repository
    #[inline]
    #[must_use]
    pub fn settings(&self) -> Settings<'_> {
        Settings { db: self }
    }
}

impl Settings<'_> {
    /// Current settings
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn get(&self) -> Result<AppSettings> {
        self.db.with_conn(|conn| {
            let stored = conn
                .query_row(
                    "SELECT site_name, site_tagline, primary_color, logo_path FROM settings WHERE id = 1",
                    [],
                    |row| {
                        Ok(AppSettings {
                            site_name: row.get(0)?,
                            site_tagline: row.get(1)?,
                            primary_color: row.get(2)?,
                            logo_path: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(stored.unwrap_or_default())
        })
    }

    /// Replace the settings
    ///
    /// # Errors
    /// Returns validation errors or error on database failure
    pub fn upsert(&self, settings: &AppSettings) -> Result<AppSettings> {
        Validator::new()
            .label("site_name", &settings.site_name)
            .check(
                "site_tagline",
                settings.site_tagline.chars().count() <= 255,
                "Tagline must be at most 255 characters",
            )
            .color("primary_color", &settings.primary_color)
            .finish()?;
        self.db.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO settings (id, site_name, site_tagline, primary_color, logo_path, created_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (id) DO UPDATE SET site_name = excluded.site_name,
                    site_tagline = excluded.site_tagline, primary_color = excluded.primary_color,
                    logo_path = excluded.logo_path, updated_at = excluded.updated_at",
                params![
                    settings.site_name.trim(),
                    settings.site_tagline.trim(),
                    settings.primary_color,
                    settings.logo_path,
                    ts
                ],
            )?;
            tracing::info!("updated site settings");
            Ok(())
        })?;
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn defaults_until_written() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.settings().get().unwrap(), AppSettings::default());

        let custom = AppSettings {
            site_name: "Museum".into(),
            site_tagline: "Scan it".into(),
            primary_color: "#112233".into(),
            logo_path: Some("logo.png".into()),
        };
        assert_eq!(db.settings().upsert(&custom).unwrap(), custom);
        let again = AppSettings {
            logo_path: None,
            ..custom
        };
        assert_eq!(db.settings().upsert(&again).unwrap(), again);
    }

    #[test]
    fn bad_color_rejected() {
        let db = Database::open_in_memory().unwrap();
        let bad = AppSettings {
            primary_color: "blue".into(),
            ..AppSettings::default()
        };
        assert!(matches!(db.settings().upsert(&bad), Err(StoreError::Invalid(_))));
    }
}
