//! Media repository
//!
//! Scanning image path and image hash are both unique: the path identifies
//! the stored file and the hash rejects the same picture under another name.

use crate::db::{now, parse_col, Database};
use crate::error::{Result, StoreError};
use crate::{count, exists};
use archivart_core::{ImageHash, ListQuery, Media, MediaId, MediaType, Page, UserId, Validator};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const MEDIA_COLUMNS: &str = "md.id, md.title, md.description, md.scanning_image, md.image_hash, \
     md.media_type, md.file_path, md.file_size, md.mime_type, md.uploaded_by, u.name, u.email, \
     md.descriptors, md.is_active, md.created_at, md.updated_at";

pub(crate) const MEDIA_JOINS: &str = "FROM media md LEFT JOIN users u ON u.id = md.uploaded_by";

const SORTS: &[(&str, &str)] = &[
    ("id", "md.id"),
    ("title", "md.title"),
    ("description", "md.description"),
    ("media_type", "md.media_type"),
    ("is_active", "md.is_active"),
    ("created_at", "md.created_at"),
    ("updated_at", "md.updated_at"),
];

pub(crate) fn map_media(row: &Row<'_>) -> rusqlite::Result<Media> {
    let descriptors: Option<String> = row.get(12)?;
    let descriptors = descriptors
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Media {
        id: MediaId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        scanning_image: row.get(3)?,
        image_hash: parse_col(row, 4)?,
        media_type: parse_col(row, 5)?,
        file_path: row.get(6)?,
        file_size: row.get(7)?,
        mime_type: row.get(8)?,
        uploaded_by: row.get::<_, Option<i64>>(9)?.map(UserId),
        uploader_name: row.get(10)?,
        uploader_email: row.get(11)?,
        descriptors,
        is_active: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Fields for a new media record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMedia {
    /// Title
    pub title: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Scanning image path
    pub scanning_image: String,
    /// SHA-256 of the scanning image
    pub image_hash: ImageHash,
    /// Content class
    pub media_type: MediaType,
    /// Media file path or URL
    pub file_path: String,
    /// Size in bytes
    #[serde(default)]
    pub file_size: i64,
    /// MIME type
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Uploading account
    #[serde(default)]
    pub uploaded_by: Option<UserId>,
    /// Feature descriptors for the external matcher
    #[serde(default)]
    pub descriptors: Option<serde_json::Value>,
}

/// Replacement fields for an existing media record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUpdate {
    /// Title
    pub title: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// New scanning image path
    #[serde(default)]
    pub scanning_image: Option<String>,
    /// New scanning image hash
    #[serde(default)]
    pub image_hash: Option<ImageHash>,
    /// Content class
    pub media_type: MediaType,
    /// Visibility
    #[serde(default = "crate::default_true")]
    pub is_active: bool,
    /// New descriptors
    #[serde(default)]
    pub descriptors: Option<serde_json::Value>,
}

/// Media list filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFilter {
    /// Content class
    #[serde(default)]
    pub media_type: Option<MediaType>,
    /// Visibility
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Aggregate media figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    /// All records
    pub total_media: u64,
    /// Visible records
    pub active_media: u64,
    /// Images
    pub image_count: u64,
    /// Videos
    pub video_count: u64,
    /// Audio clips
    pub audio_count: u64,
    /// Sum of file sizes in bytes
    pub total_size: u64,
}

fn check_scanning_image_free(conn: &Connection, path: &str, exclude: Option<MediaId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM media WHERE scanning_image = ?1 AND id != ?2",
        params![path, exclude.map_or(-1, MediaId::get)],
    )? {
        return Err(StoreError::conflict(
            "scanning_image",
            "Scanning image already exists. Please use a different image.",
        ));
    }
    Ok(())
}

fn check_hash_free(conn: &Connection, hash: &ImageHash, exclude: Option<MediaId>) -> Result<()> {
    if exists(
        conn,
        "SELECT 1 FROM media WHERE image_hash = ?1 AND id != ?2",
        params![hash.to_string(), exclude.map_or(-1, MediaId::get)],
    )? {
        return Err(StoreError::conflict(
            "image_hash",
            "This image has already been uploaded. Please use a different image.",
        ));
    }
    Ok(())
}

fn find(conn: &Connection, id: MediaId, active_only: bool) -> Result<Media> {
    let filter = if active_only { "AND md.is_active = 1" } else { "" };
    conn.query_row(
        &format!("SELECT {MEDIA_COLUMNS} {MEDIA_JOINS} WHERE md.id = ?1 {filter}"),
        [id.get()],
        map_media,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("media", id))
}

fn encode_descriptors(value: Option<&serde_json::Value>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

/// Media repository
#[derive(Debug, Clone, Copy)]
pub struct MediaRepo<'a> {
    db: &'a Database,
}

impl Database {
    /// Media repository
    #[inline]
    #[must_use]
    pub fn media(&self) -> MediaRepo<'_> {
        MediaRepo { db: self }
    }
}

impl MediaRepo<'_> {
    /// Create a media record
    ///
    /// # Errors
    /// Returns validation or conflict errors
    pub fn create(&self, new: &NewMedia) -> Result<Media> {
        Validator::new()
            .title("title", &new.title)
            .description("description", new.description.as_deref())
            .required("scanning_image", &new.scanning_image)
            .required("file_path", &new.file_path)
            .check("file_size", new.file_size >= 0, "File size cannot be negative")
            .finish()?;
        let descriptors = encode_descriptors(new.descriptors.as_ref())?;
        self.db.with_conn(|conn| {
            check_scanning_image_free(conn, &new.scanning_image, None)?;
            check_hash_free(conn, &new.image_hash, None)?;
            let ts = now();
            conn.execute(
                "INSERT INTO media (title, description, scanning_image, image_hash, media_type, file_path,
                    file_size, mime_type, uploaded_by, descriptors, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                params![
                    new.title.trim(),
                    new.description,
                    new.scanning_image,
                    new.image_hash.to_string(),
                    new.media_type.as_str(),
                    new.file_path,
                    new.file_size,
                    new.mime_type,
                    new.uploaded_by.map(UserId::get),
                    descriptors,
                    ts
                ],
            )?;
            let id = MediaId(conn.last_insert_rowid());
            tracing::info!("created media {} ({}) hash {}", new.title, id, new.image_hash.short());
            find(conn, id, false)
        })
    }

    /// Media by id, any visibility
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn get(&self, id: MediaId) -> Result<Media> {
        self.db.with_conn(|conn| find(conn, id, false))
    }

    /// Visible media by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing or hidden
    pub fn get_active(&self, id: MediaId) -> Result<Media> {
        self.db.with_conn(|conn| find(conn, id, true))
    }

    /// Media with an identical scanning image
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn find_by_hash(&self, hash: &ImageHash) -> Result<Option<Media>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {MEDIA_COLUMNS} {MEDIA_JOINS} WHERE md.image_hash = ?1"),
                    [hash.to_string()],
                    map_media,
                )
                .optional()?)
        })
    }

    /// Page through media
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list(&self, query: &ListQuery, filter: &MediaFilter) -> Result<Page<Media>> {
        let mut conditions = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(pattern) = query.like_pattern() {
            args.push(Value::Text(pattern));
            let n = args.len();
            conditions.push(format!(
                "(md.title LIKE ?{n} ESCAPE '\\' OR md.description LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(kind) = filter.media_type {
            args.push(Value::Text(kind.as_str().to_string()));
            conditions.push(format!("md.media_type = ?{}", args.len()));
        }
        if let Some(active) = filter.is_active {
            args.push(Value::Integer(i64::from(active)));
            conditions.push(format!("md.is_active = ?{}", args.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order = query.sort_spec(SORTS, "md.created_at").to_sql();

        self.db.with_conn(|conn| {
            let total = count(
                conn,
                &format!("SELECT COUNT(*) FROM media md {where_clause}"),
                params_from_iter(args.iter()),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDIA_COLUMNS} {MEDIA_JOINS} {where_clause}
                 ORDER BY {order}, md.id DESC LIMIT {} OFFSET {}",
                query.limit(),
                query.offset()
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), map_media)?;
            let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Page::new(items, total, query))
        })
    }

    /// Page through visible media
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn list_active(&self, query: &ListQuery, media_type: Option<MediaType>) -> Result<Page<Media>> {
        self.list(
            query,
            &MediaFilter {
                media_type,
                is_active: Some(true),
            },
        )
    }

    /// Visible media that carry matcher descriptors
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn with_descriptors(&self) -> Result<Vec<Media>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDIA_COLUMNS} {MEDIA_JOINS}
                 WHERE md.is_active = 1 AND md.descriptors IS NOT NULL
                 ORDER BY md.id"
            ))?;
            let rows = stmt.query_map([], map_media)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Replace a media record's fields
    ///
    /// # Errors
    /// Returns not-found, validation or conflict errors
    pub fn update(&self, id: MediaId, update: &MediaUpdate) -> Result<Media> {
        Validator::new()
            .title("title", &update.title)
            .description("description", update.description.as_deref())
            .finish()?;
        let descriptors = encode_descriptors(update.descriptors.as_ref())?;
        self.db.transaction(|tx| {
            let existing = find(tx, id, false)?;
            let scanning_image = update
                .scanning_image
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(existing.scanning_image);
            check_scanning_image_free(tx, &scanning_image, Some(id))?;
            let image_hash = update.image_hash.unwrap_or(existing.image_hash);
            check_hash_free(tx, &image_hash, Some(id))?;
            tx.execute(
                "UPDATE media SET title = ?1, description = ?2, scanning_image = ?3, image_hash = ?4,
                    media_type = ?5, is_active = ?6, descriptors = COALESCE(?7, descriptors), updated_at = ?8
                 WHERE id = ?9",
                params![
                    update.title.trim(),
                    update.description,
                    scanning_image,
                    image_hash.to_string(),
                    update.media_type.as_str(),
                    update.is_active,
                    descriptors,
                    now(),
                    id.get()
                ],
            )?;
            tracing::info!("updated media {}", id);
            find(tx, id, false)
        })
    }

    /// Flip visibility
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn toggle_active(&self, id: MediaId) -> Result<Media> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE media SET is_active = NOT is_active, updated_at = ?1 WHERE id = ?2",
                params![now(), id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("media", id));
            }
            find(conn, id, false)
        })
    }

    /// Delete a media record
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if missing
    pub fn delete(&self, id: MediaId) -> Result<Media> {
        self.db.with_conn(|conn| {
            let media = find(conn, id, false)?;
            conn.execute("DELETE FROM media WHERE id = ?1", [id.get()])?;
            tracing::info!("deleted media {} ({})", media.title, id);
            Ok(media)
        })
    }

    /// Aggregate figures
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn stats(&self) -> Result<MediaStats> {
        self.db.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                    COUNT(CASE WHEN is_active = 1 THEN 1 END),
                    COUNT(CASE WHEN media_type = 'image' THEN 1 END),
                    COUNT(CASE WHEN media_type = 'video' THEN 1 END),
                    COUNT(CASE WHEN media_type = 'audio' THEN 1 END),
                    COALESCE(SUM(file_size), 0)
                 FROM media",
                [],
                |row| {
                    let get = |i: usize| row.get::<_, i64>(i).map(|n| u64::try_from(n).unwrap_or(0));
                    Ok(MediaStats {
                        total_media: get(0)?,
                        active_media: get(1)?,
                        image_count: get(2)?,
                        video_count: get(3)?,
                        audio_count: get(4)?,
                        total_size: get(5)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(title: &str, bytes: &[u8], kind: MediaType) -> NewMedia {
        NewMedia {
            title: title.into(),
            description: None,
            scanning_image: format!("scans/{title}.jpg"),
            image_hash: ImageHash::compute(bytes),
            media_type: kind,
            file_path: format!("media/{title}.bin"),
            file_size: 100,
            mime_type: None,
            uploaded_by: None,
            descriptors: None,
        }
    }

    #[test]
    fn duplicate_hash_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.media().create(&sample("one", b"pixels", MediaType::Image)).unwrap();
        let err = db
            .media()
            .create(&sample("two", b"pixels", MediaType::Image))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "image_hash", .. }));
    }

    #[test]
    fn duplicate_scanning_image_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.media().create(&sample("one", b"a", MediaType::Image)).unwrap();
        let mut other = sample("one", b"b", MediaType::Video);
        other.file_path = "media/other.bin".into();
        let err = db.media().create(&other).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "scanning_image", .. }));
    }

    #[test]
    fn find_by_hash_and_toggle() {
        let db = Database::open_in_memory().unwrap();
        let m = db.media().create(&sample("one", b"a", MediaType::Audio)).unwrap();
        let found = db.media().find_by_hash(&ImageHash::compute(b"a")).unwrap().unwrap();
        assert_eq!(found.id, m.id);

        let hidden = db.media().toggle_active(m.id).unwrap();
        assert!(!hidden.is_active);
        assert!(db.media().get_active(m.id).unwrap_err().is_not_found());
        assert!(db.media().toggle_active(m.id).unwrap().is_active);
    }

    #[test]
    fn stats_and_filters() {
        let db = Database::open_in_memory().unwrap();
        db.media().create(&sample("a", b"1", MediaType::Image)).unwrap();
        db.media().create(&sample("b", b"2", MediaType::Image)).unwrap();
        let v = db.media().create(&sample("c", b"3", MediaType::Video)).unwrap();
        db.media().toggle_active(v.id).unwrap();

        let stats = db.media().stats().unwrap();
        assert_eq!(stats.total_media, 3);
        assert_eq!(stats.active_media, 2);
        assert_eq!(stats.image_count, 2);
        assert_eq!(stats.video_count, 1);
        assert_eq!(stats.total_size, 300);

        let images = db
            .media()
            .list_active(&ListQuery::new(), Some(MediaType::Image))
            .unwrap();
        assert_eq!(images.total, 2);
        assert_eq!(db.media().list_active(&ListQuery::new(), None).unwrap().total, 2);
    }

    #[test]
    fn descriptors_round_trip_and_filter() {
        let db = Database::open_in_memory().unwrap();
        let mut with = sample("with", b"1", MediaType::Image);
        with.descriptors = Some(serde_json::json!([[1, 2, 3]]));
        db.media().create(&with).unwrap();
        db.media().create(&sample("without", b"2", MediaType::Image)).unwrap();

        let candidates = db.media().with_descriptors().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].descriptors, Some(serde_json::json!([[1, 2, 3]])));
    }

    #[test]
    fn update_keeps_scanning_image_unique() {
        let db = Database::open_in_memory().unwrap();
        db.media().create(&sample("a", b"1", MediaType::Image)).unwrap();
        let b = db.media().create(&sample("b", b"2", MediaType::Image)).unwrap();
        let err = db
            .media()
            .update(
                b.id,
                &MediaUpdate {
                    title: "b".into(),
                    description: None,
                    scanning_image: Some("scans/a.jpg".into()),
                    image_hash: None,
                    media_type: MediaType::Image,
                    is_active: true,
                    descriptors: None,
                },
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
