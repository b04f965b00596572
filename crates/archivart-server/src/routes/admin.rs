//! `/api/admin` routes
//!
//! Every route requires a `module.action` permission on top of a valid token.

use crate::auth::Principal;
use crate::authz::require;
use crate::error::ApiError;
use crate::reply::{self, Listing};
use crate::routes::{json_body, ListParams, IMAGE_LIMIT};
use crate::state::{with_state, AppState};
use archivart_core::{AppSettings, ImageHash, MediaId, MediaType, User, UserId, UserRole};
use archivart_store::{MediaFilter, MediaUpdate, NewMedia, NewUser, UserFilter, UserUpdate};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Rejection};

/// New media record with its scanning image inline
#[derive(Debug, Deserialize)]
pub struct CreateMediaRequest {
    /// Title
    pub title: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Stored path of the scanning image
    pub scanning_image: String,
    /// Base64 scanning image bytes, optionally as a data URL
    pub scanning_image_data: String,
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
    /// Feature descriptors for the external matcher
    #[serde(default)]
    pub descriptors: Option<serde_json::Value>,
}

/// Replacement media fields, optionally with a new scanning image
#[derive(Debug, Deserialize)]
pub struct UpdateMediaRequest {
    /// Title
    pub title: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Content class
    pub media_type: MediaType,
    /// Visibility
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// New stored path of the scanning image
    #[serde(default)]
    pub scanning_image: Option<String>,
    /// New base64 scanning image bytes
    #[serde(default)]
    pub scanning_image_data: Option<String>,
    /// New descriptors
    #[serde(default)]
    pub descriptors: Option<serde_json::Value>,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct UserDetail {
    #[serde(flatten)]
    user: User,
    roles: Vec<UserRole>,
}

/// Decode base64 image bytes, accepting a `data:` URL prefix
fn decode_image(field: &str, encoded: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match encoded.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::BadRequest(format!("{field} is not valid base64")))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is empty")));
    }
    Ok(bytes)
}

fn refuse_self(principal: &Principal, target: UserId, message: &str) -> Result<(), ApiError> {
    if principal.user.id == target {
        return Err(ApiError::Protected(message.to_string()));
    }
    Ok(())
}

async fn dashboard(_: Principal, state: AppState) -> Result<Response, Rejection> {
    let dashboard = state.run(|db| db.stats().dashboard()).await?;
    Ok(reply::ok(dashboard))
}

async fn list_users(_: Principal, params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let query = params.query();
    let filter = UserFilter {
        status: params.status,
        account_type: params.role,
    };
    let page = state.run(move |db| db.users().list(&query, &filter)).await?;
    Ok(reply::ok(Listing::from(page)))
}

async fn get_user(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let id = UserId(id);
    let detail = state
        .run(move |db| {
            Ok(UserDetail {
                user: db.users().get(id)?,
                roles: db.users().roles_of(id)?,
            })
        })
        .await?;
    Ok(reply::ok(detail))
}

async fn create_user(principal: Principal, body: NewUser, state: AppState) -> Result<Response, Rejection> {
    let user = state.run(move |db| db.users().create(&body)).await?;
    tracing::info!("{} created account {} ({})", principal.user.email, user.email, user.id);
    Ok(reply::created("User created successfully", user))
}

async fn update_user(id: i64, principal: Principal, body: UserUpdate, state: AppState) -> Result<Response, Rejection> {
    let id = UserId(id);
    if body.is_active == Some(false) {
        refuse_self(&principal, id, "You cannot deactivate your own account")?;
    }
    let user = state.run(move |db| db.users().update(id, &body)).await?;
    Ok(reply::ok_with("User updated successfully", user))
}

async fn set_blocked(principal: Principal, id: i64, blocked: bool, state: AppState) -> Result<Response, Rejection> {
    let id = UserId(id);
    if blocked {
        refuse_self(&principal, id, "You cannot block your own account")?;
    }
    let user = state.run(move |db| db.users().set_blocked(id, blocked)).await?;
    state.permissions.invalidate(id).await;
    tracing::info!(
        "{} {} account {}",
        principal.user.email,
        if blocked { "blocked" } else { "unblocked" },
        id
    );
    let message = if blocked {
        "User blocked successfully"
    } else {
        "User unblocked successfully"
    };
    Ok(reply::ok_with(message, user))
}

async fn block_user(id: i64, principal: Principal, state: AppState) -> Result<Response, Rejection> {
    set_blocked(principal, id, true, state).await
}

async fn unblock_user(id: i64, principal: Principal, state: AppState) -> Result<Response, Rejection> {
    set_blocked(principal, id, false, state).await
}

async fn delete_user(id: i64, principal: Principal, state: AppState) -> Result<Response, Rejection> {
    let id = UserId(id);
    refuse_self(&principal, id, "You cannot delete your own account")?;
    let removal = state.run_rbac(move |db| db.cascade().delete_user(id)).await?;
    Ok(reply::ok_with("User deleted successfully", removal))
}

async fn list_media(_: Principal, params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let query = params.query();
    let filter = MediaFilter {
        media_type: params.media_type,
        is_active: params.is_active,
    };
    let page = state.run(move |db| db.media().list(&query, &filter)).await?;
    Ok(reply::ok(Listing::from(page)))
}

async fn media_stats(_: Principal, state: AppState) -> Result<Response, Rejection> {
    let stats = state.run(|db| db.media().stats()).await?;
    Ok(reply::ok(stats))
}

async fn get_media(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let media = state.run(move |db| db.media().get(MediaId(id))).await?;
    Ok(reply::ok(media))
}

async fn create_media(principal: Principal, body: CreateMediaRequest, state: AppState) -> Result<Response, Rejection> {
    let image = decode_image("scanning_image_data", &body.scanning_image_data)?;
    let new = NewMedia {
        title: body.title,
        description: body.description,
        scanning_image: body.scanning_image,
        image_hash: ImageHash::compute(&image),
        media_type: body.media_type,
        file_path: body.file_path,
        file_size: body.file_size,
        mime_type: body.mime_type,
        uploaded_by: Some(principal.user.id),
        descriptors: body.descriptors,
    };
    let media = state.run(move |db| db.media().create(&new)).await?;
    tracing::info!("{} uploaded media {} ({})", principal.user.email, media.title, media.id);
    Ok(reply::created("Media uploaded successfully", media))
}

async fn update_media(id: i64, _: Principal, body: UpdateMediaRequest, state: AppState) -> Result<Response, Rejection> {
    let image_hash = match (&body.scanning_image, &body.scanning_image_data) {
        (Some(_), Some(data)) => Some(ImageHash::compute(&decode_image("scanning_image_data", data)?)),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "scanning_image and scanning_image_data must be given together".to_string(),
            )
            .into())
        }
    };
    let update = MediaUpdate {
        title: body.title,
        description: body.description,
        scanning_image: body.scanning_image,
        image_hash,
        media_type: body.media_type,
        is_active: body.is_active,
        descriptors: body.descriptors,
    };
    let media = state.run(move |db| db.media().update(MediaId(id), &update)).await?;
    Ok(reply::ok_with("Media updated successfully", media))
}

async fn toggle_media(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let media = state.run(move |db| db.media().toggle_active(MediaId(id))).await?;
    let message = if media.is_active {
        "Media activated successfully"
    } else {
        "Media deactivated successfully"
    };
    Ok(reply::ok_with(message, media))
}

async fn delete_media(id: i64, principal: Principal, state: AppState) -> Result<Response, Rejection> {
    let media = state.run(move |db| db.media().delete(MediaId(id))).await?;
    tracing::info!("{} deleted media {} ({})", principal.user.email, media.title, media.id);
    Ok(reply::ok_with("Media deleted successfully", media))
}

async fn get_settings(_: Principal, state: AppState) -> Result<Response, Rejection> {
    let settings = state.run(|db| db.settings().get()).await?;
    Ok(reply::ok(settings))
}

async fn update_settings(_: Principal, body: AppSettings, state: AppState) -> Result<Response, Rejection> {
    let settings = state.run(move |db| db.settings().upsert(&body)).await?;
    Ok(reply::ok_with("Settings updated successfully", settings))
}

fn user_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "admin" / "users")
        .and(warp::get())
        .and(require(state, "users.view"))
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_users);

    let get = warp::path!("api" / "admin" / "users" / i64)
        .and(warp::get())
        .and(require(state, "users.view"))
        .and(with_state(state.clone()))
        .and_then(get_user);

    let create = warp::path!("api" / "admin" / "users")
        .and(warp::post())
        .and(require(state, "users.create"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_user);

    let update = warp::path!("api" / "admin" / "users" / i64)
        .and(warp::put())
        .and(require(state, "users.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_user);

    let block = warp::path!("api" / "admin" / "users" / i64 / "block")
        .and(warp::post())
        .and(require(state, "users.block"))
        .and(with_state(state.clone()))
        .and_then(block_user);

    let unblock = warp::path!("api" / "admin" / "users" / i64 / "unblock")
        .and(warp::post())
        .and(require(state, "users.block"))
        .and(with_state(state.clone()))
        .and_then(unblock_user);

    let delete = warp::path!("api" / "admin" / "users" / i64)
        .and(warp::delete())
        .and(require(state, "users.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_user);

    list.or(get)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(block)
        .unify()
        .or(unblock)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn media_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "admin" / "media")
        .and(warp::get())
        .and(require(state, "media.view"))
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_media);

    let stats = warp::path!("api" / "admin" / "media" / "stats")
        .and(warp::get())
        .and(require(state, "media.view"))
        .and(with_state(state.clone()))
        .and_then(media_stats);

    let get = warp::path!("api" / "admin" / "media" / i64)
        .and(warp::get())
        .and(require(state, "media.view"))
        .and(with_state(state.clone()))
        .and_then(get_media);

    let create = warp::path!("api" / "admin" / "media")
        .and(warp::post())
        .and(require(state, "media.create"))
        .and(warp::body::content_length_limit(IMAGE_LIMIT).and(warp::body::json()))
        .and(with_state(state.clone()))
        .and_then(create_media);

    let update = warp::path!("api" / "admin" / "media" / i64)
        .and(warp::put())
        .and(require(state, "media.update"))
        .and(warp::body::content_length_limit(IMAGE_LIMIT).and(warp::body::json()))
        .and(with_state(state.clone()))
        .and_then(update_media);

    let toggle = warp::path!("api" / "admin" / "media" / i64 / "toggle")
        .and(warp::patch())
        .and(require(state, "media.update"))
        .and(with_state(state.clone()))
        .and_then(toggle_media);

    let delete = warp::path!("api" / "admin" / "media" / i64)
        .and(warp::delete())
        .and(require(state, "media.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_media);

    list.or(stats)
        .unify()
        .or(get)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(toggle)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

/// `/api/admin` routes
pub fn routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let dashboard = warp::path!("api" / "admin" / "dashboard")
        .and(warp::get())
        .and(require(state, "dashboard.view"))
        .and(with_state(state.clone()))
        .and_then(dashboard);

    let get_settings = warp::path!("api" / "admin" / "settings")
        .and(warp::get())
        .and(require(state, "settings.view"))
        .and(with_state(state.clone()))
        .and_then(get_settings);

    let update_settings = warp::path!("api" / "admin" / "settings")
        .and(warp::put())
        .and(require(state, "settings.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_settings);

    dashboard
        .or(get_settings)
        .unify()
        .or(update_settings)
        .unify()
        .or(user_routes(state))
        .unify()
        .or(media_routes(state))
        .unify()
        .boxed()
}
