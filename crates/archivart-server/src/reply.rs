//! Response envelope
//!
//! Every body has the shape `{ success, message?, data? }`.

use archivart_core::{FieldError, Page, PageWindow};
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

/// Successful response body
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always `true`
    pub success: bool,
    /// Human readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always `false`
    pub success: bool,
    /// Human readable reason
    pub message: String,
    /// Machine readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Per-field validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    /// Missing permissions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ErrorBody {
    /// Body with only a message
    #[must_use]
    pub fn new(message: String) -> Self {
        Self {
            success: false,
            message,
            code: None,
            details: None,
            required: None,
        }
    }
}

/// A page of items with navigation metadata
#[derive(Debug, Serialize)]
pub struct Listing<T> {
    /// Items and totals
    #[serde(flatten)]
    pub page: Page<T>,
    /// Navigation window
    pub pagination: PageWindow,
}

impl<T> From<Page<T>> for Listing<T> {
    fn from(page: Page<T>) -> Self {
        let pagination = page.window();
        Self { page, pagination }
    }
}

fn envelope<T: Serialize>(status: StatusCode, message: Option<String>, data: Option<T>) -> Response {
    let body = Envelope {
        success: true,
        message,
        data,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// 200 with data
pub fn ok<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, None, Some(data))
}

/// 200 with a message and data
pub fn ok_with<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    envelope(StatusCode::OK, Some(message.into()), Some(data))
}

/// 200 with only a message
pub fn message(message: impl Into<String>) -> Response {
    envelope::<()>(StatusCode::OK, Some(message.into()), None)
}

/// 201 with a message and the created entity
pub fn created<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    envelope(StatusCode::CREATED, Some(message.into()), Some(data))
}
