//! HTTP routes
//!
//! Every route matches path and method first, then authenticates, then
//! reads the body, so an unmatched or unauthorized request never consumes it.

pub mod admin;
pub mod auth;
pub mod media;
pub mod rbac;

use crate::state::AppState;
use archivart_core::{AccountKind, ListQuery, MediaType, SortOrder, UserStatus};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Rejection};

/// Largest accepted JSON body
pub const JSON_LIMIT: u64 = 1024 * 1024;

/// Largest accepted image body, raw or base64 inside JSON
pub const IMAGE_LIMIT: u64 = 16 * 1024 * 1024;

/// Size-limited JSON body
pub fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(JSON_LIMIT).and(warp::body::json())
}

/// List parameters accepted by every listing route
///
/// Fields are spelled out because query strings cannot fill a flattened
/// struct. Each route reads only the filters that apply to it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    /// Free-text search
    #[serde(default)]
    pub search: Option<String>,
    /// Sort key
    #[serde(default)]
    pub sort: Option<String>,
    /// Sort direction
    #[serde(default)]
    pub order: Option<SortOrder>,
    /// 1-based page
    #[serde(default)]
    pub page: Option<u32>,
    /// Page size
    #[serde(default)]
    pub limit: Option<u32>,
    /// Derived account status
    #[serde(default)]
    pub status: Option<UserStatus>,
    /// Account class
    #[serde(default)]
    pub role: Option<AccountKind>,
    /// Media content class
    #[serde(default)]
    pub media_type: Option<MediaType>,
    /// Activity flag
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Module name
    #[serde(default)]
    pub module: Option<String>,
}

impl ListParams {
    /// Common list parameters
    #[must_use]
    pub fn query(&self) -> ListQuery {
        ListQuery {
            search: self.search.clone(),
            sort: self.sort.clone(),
            order: self.order,
            page: self.page,
            limit: self.limit,
        }
    }
}

/// Every API route
pub fn api(state: &AppState) -> BoxedFilter<(Response,)> {
    auth::routes(state)
        .or(media::routes(state))
        .unify()
        .or(admin::routes(state))
        .unify()
        .or(rbac::routes(state))
        .unify()
        .boxed()
}
