//! Public media routes
//!
//! Only active media is visible here. `POST /api/media/match` resolves a
//! scanned photo to a media record:
//! - an identical scanning image (same SHA-256) wins outright with score 1.0
//! - otherwise the external matcher compares it against stored descriptors

use crate::error::ApiError;
use crate::matching::{similarity_label, StoredDescriptors};
use crate::reply;
use crate::routes::{ListParams, IMAGE_LIMIT};
use crate::state::{with_state, AppState};
use archivart_core::{ImageHash, Media, MediaId, MediaType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Rejection};

const UNAVAILABLE: &str = "Image processing service is temporarily unavailable. Please try again later.";

/// Media as shown to app clients
#[derive(Debug, Clone, Serialize)]
pub struct PublicMedia {
    /// Row id
    pub id: MediaId,
    /// Title
    pub title: String,
    /// Free text
    pub description: Option<String>,
    /// Content class
    pub media_type: MediaType,
    /// Absolute URL of the scanning image
    pub scanning_image_url: String,
    /// Absolute URL of the media file
    pub file_url: String,
    /// Size in bytes
    pub file_size: i64,
    /// MIME type
    pub mime_type: Option<String>,
    /// Uploader display name
    pub uploader_name: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl PublicMedia {
    /// Public view of `media` with URLs rooted at the configured base
    #[must_use]
    pub fn from_media(state: &AppState, media: Media) -> Self {
        Self {
            id: media.id,
            scanning_image_url: state.media_url(&media.scanning_image),
            file_url: state.media_url(&media.file_path),
            title: media.title,
            description: media.description,
            media_type: media.media_type,
            file_size: media.file_size,
            mime_type: media.mime_type,
            uploader_name: media.uploader_name,
            created_at: media.created_at,
        }
    }
}

/// Similarity of a match
#[derive(Debug, Clone, Serialize)]
pub struct Similarity {
    /// Score in `0.0..=1.0`
    pub score: f64,
    /// Matched feature count; zero for hash matches
    pub match_count: u32,
    /// Threshold percentage applied
    pub threshold: f64,
    /// Human label for the score
    pub description: &'static str,
    /// `hash` or `matcher`
    pub method: &'static str,
}

/// Matched media with its similarity
#[derive(Debug, Clone, Serialize)]
pub struct MatchedMedia {
    /// Matched record
    #[serde(flatten)]
    pub media: PublicMedia,
    /// How close the match is
    pub similarity: Similarity,
}

/// Match outcome payload
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Best match, if any
    #[serde(rename = "match")]
    pub matched: Option<MatchedMedia>,
}

/// Match parameters
#[derive(Debug, Default, Deserialize)]
pub struct MatchQuery {
    /// Minimum similarity percentage
    #[serde(default)]
    pub threshold: Option<f64>,
}

async fn list_media(params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let list = params.query();
    let media_type = params.media_type;
    let page = state
        .run(move |db| db.media().list_active(&list, media_type))
        .await?;
    let page = page.map(|media| PublicMedia::from_media(&state, media));
    Ok(reply::ok(reply::Listing::from(page)))
}

async fn get_media(id: i64, state: AppState) -> Result<Response, Rejection> {
    let media = state.run(move |db| db.media().get_active(MediaId(id))).await?;
    Ok(reply::ok(PublicMedia::from_media(&state, media)))
}

fn no_match(message: &str) -> Response {
    reply::ok_with(message, MatchResult { matched: None })
}

fn found(state: &AppState, media: Media, similarity: Similarity) -> Response {
    tracing::info!(
        "matched media {} by {} with score {:.3}",
        media.id,
        similarity.method,
        similarity.score
    );
    reply::ok_with(
        "Match found",
        MatchResult {
            matched: Some(MatchedMedia {
                media: PublicMedia::from_media(state, media),
                similarity,
            }),
        },
    )
}

/// Write the query image where the matcher can read it
async fn spool(image: bytes::Bytes) -> Result<tempfile::NamedTempFile, ApiError> {
    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::Builder::new().prefix("archivart-match-").tempfile()?;
        file.write_all(&image)?;
        file.flush()?;
        Ok::<_, std::io::Error>(file)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("spool task failed: {e}")))?
    .map_err(|e| ApiError::Internal(format!("cannot spool query image: {e}")))
}

async fn match_image(query: MatchQuery, image: bytes::Bytes, state: AppState) -> Result<Response, Rejection> {
    if image.is_empty() {
        return Err(ApiError::BadRequest("Image data is required".to_string()).into());
    }
    let threshold = query.threshold.unwrap_or(state.config.matching.default_threshold);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ApiError::BadRequest("Threshold must be between 0 and 100".to_string()).into());
    }

    let hash = ImageHash::compute(&image);
    let (exact, candidates) = state
        .run(move |db| {
            let exact = db.media().find_by_hash(&hash)?.filter(|media| media.is_active);
            let candidates = match exact {
                Some(_) => Vec::new(),
                None => db.media().with_descriptors()?,
            };
            Ok((exact, candidates))
        })
        .await?;

    if let Some(media) = exact {
        let similarity = Similarity {
            score: 1.0,
            match_count: 0,
            threshold,
            description: similarity_label(1.0),
            method: "hash",
        };
        return Ok(found(&state, media, similarity));
    }
    if candidates.is_empty() {
        return Ok(no_match("No media available for matching"));
    }
    if !state.matcher.is_healthy().await {
        return Err(ApiError::Unavailable(UNAVAILABLE.to_string()).into());
    }

    let stored: Vec<StoredDescriptors> = candidates
        .iter()
        .filter_map(|media| {
            media.descriptors.clone().map(|descriptors| StoredDescriptors {
                id: media.id,
                descriptors,
            })
        })
        .collect();
    let spooled = spool(image).await?;
    let outcome = state
        .matcher
        .compare(spooled.path(), &stored, threshold)
        .await
        .map_err(|e| {
            tracing::error!("matching failed: {}", e);
            ApiError::Unavailable(UNAVAILABLE.to_string())
        })?;
    drop(spooled);

    let Some(outcome) = outcome else {
        return Ok(no_match("No matching media found"));
    };
    let Some(media) = candidates.into_iter().find(|media| media.id == outcome.id) else {
        tracing::warn!("matcher returned unknown media {}", outcome.id);
        return Ok(no_match("No matching media found"));
    };
    let similarity = Similarity {
        score: outcome.similarity,
        match_count: outcome.match_count,
        threshold,
        description: similarity_label(outcome.similarity),
        method: "matcher",
    };
    Ok(found(&state, media, similarity))
}

/// Public media routes
pub fn routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "media")
        .and(warp::get())
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_media);

    let get = warp::path!("api" / "media" / i64)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_media);

    let match_image = warp::path!("api" / "media" / "match")
        .and(warp::post())
        .and(warp::query::<MatchQuery>())
        .and(warp::body::content_length_limit(IMAGE_LIMIT))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(match_image);

    list.or(get).unify().or(match_image).unify().boxed()
}
