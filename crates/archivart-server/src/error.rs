//! API errors and their JSON rendering
//!
//! Handlers fail with [`ApiError`]; it travels through warp as a custom
//! rejection and [`recover`] turns it into the response envelope.

use crate::reply::ErrorBody;
use archivart_core::{CoreError, FieldError};
use archivart_store::StoreError;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

/// Error returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request fields failed validation
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Malformed request
    #[error("{0}")]
    BadRequest(String),

    /// Missing or unusable credentials
    #[error("{message}")]
    Unauthenticated {
        /// Machine readable reason
        code: &'static str,
        /// Human readable reason
        message: String,
    },

    /// Authenticated principal lacks a permission
    #[error("Insufficient permissions")]
    Forbidden {
        /// Permissions that would satisfy the check
        required: Vec<String>,
    },

    /// Entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness rule violated
    #[error("{0}")]
    Conflict(String),

    /// Entity is protected from the change
    #[error("{0}")]
    Protected(String),

    /// Client exceeded the request budget
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// A dependency is down
    #[error("{0}")]
    Unavailable(String),

    /// Unexpected failure
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// Build an authentication failure
    #[inline]
    pub fn unauthenticated(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            code,
            message: message.into(),
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) | Self::Protected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let mut body = ErrorBody::new(self.to_string());
        match self {
            Self::Validation(details) => body.details = Some(details.clone()),
            Self::Forbidden { required } => body.required = Some(required.clone()),
            Self::Unauthenticated { code, .. } => body.code = Some(*code),
            _ => {}
        }
        body
    }
}

impl Reject for ApiError {}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(details) => Self::Validation(details),
            CoreError::Forbidden { required } => Self::Forbidden { required },
            CoreError::InvalidPermissionName(_) | CoreError::Hash(_) => Self::BadRequest(err.to_string()),
            CoreError::Password(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => Self::NotFound(format!("{} not found", capitalize(entity))),
            StoreError::Conflict { message, .. } => Self::Conflict(message),
            StoreError::Protected(message) => Self::Protected(message),
            StoreError::Invalid(core) => core.into(),
            other if other.is_conflict() => Self::Conflict(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Render any rejection as a JSON error envelope
///
/// # Errors
/// Never fails; the result type is what `recover` requires
pub async fn recover(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    let err = if let Some(err) = rejection.find::<ApiError>() {
        if let ApiError::Internal(cause) = err {
            tracing::error!("request failed: {}", cause);
        }
        return Ok(render(err));
    } else if rejection.is_not_found() {
        ApiError::NotFound("Route not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::BadRequest(format!("Invalid request body: {e}"))
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        ApiError::BadRequest(format!("Invalid query string: {e}"))
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(with_status(
            &ErrorBody::new("Method not allowed".to_string()),
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(with_status(
            &ErrorBody::new("Payload too large".to_string()),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    } else if let Some(e) = rejection.find::<warp::reject::UnsupportedMediaType>() {
        ApiError::BadRequest(e.to_string())
    } else {
        tracing::warn!("unhandled rejection: {:?}", rejection);
        ApiError::Internal(format!("{rejection:?}"))
    };
    Ok(render(&err))
}

fn render(err: &ApiError) -> warp::reply::Response {
    with_status(&err.body(), err.status())
}

fn with_status(body: &ErrorBody, status: StatusCode) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}
