//! `/api/auth` routes

use crate::auth::{authenticated, check_status, fingerprint, verify_presented, Principal, TokenKind};
use crate::error::ApiError;
use crate::rate_limit::limit;
use crate::reply;
use crate::routes::json_body;
use crate::state::{with_state, AppState};
use archivart_core::{validation, AccountKind, AuthProvider, Role, User, Validator};
use archivart_core::{verify_password, PermissionSet};
use archivart_store::{NewUser, UserUpdate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Rejection};

/// Self-service registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Display name
    pub name: String,
    /// Email
    pub email: String,
    /// Plaintext password
    pub password: String,
    /// Optional handle
    #[serde(default)]
    pub username: Option<String>,
    /// Optional phone
    #[serde(default)]
    pub mobile: Option<String>,
}

/// Password sign-in
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email
    pub email: String,
    /// Plaintext password
    pub password: String,
}

/// Sign-in with a verified external identity
#[derive(Debug, Deserialize)]
pub struct SocialLoginRequest {
    /// `google` or `facebook`
    pub provider: AuthProvider,
    /// Identity id at the provider
    pub provider_id: String,
    /// Email reported by the provider
    pub email: String,
    /// Name reported by the provider
    pub name: String,
}

/// Refresh token exchange
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token
    pub refresh_token: String,
}

/// Optional refresh token to revoke on logout
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Username availability query
#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    /// Candidate handle
    #[serde(default)]
    pub username: String,
}

/// Fields a user may change on their own account
#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Handle
    #[serde(default)]
    pub username: Option<String>,
    /// Phone
    #[serde(default)]
    pub mobile: Option<String>,
}

#[derive(Debug, Serialize)]
struct Session {
    user: User,
    tokens: crate::auth::TokenPair,
    permissions: Arc<PermissionSet>,
    role: Option<Role>,
}

#[derive(Debug, Serialize)]
struct CallerPermissions {
    permissions: Arc<PermissionSet>,
    role: Option<Role>,
}

/// Record the sign-in and issue a token pair
async fn start_session(state: &AppState, user: User) -> Result<Response, ApiError> {
    check_status(&user)?;
    let now = Utc::now();
    let user_id = user.id;
    let (user, role, permissions) = state
        .run(move |db| {
            db.users().touch_login(user_id, now)?;
            Ok((
                db.users().get(user_id)?,
                db.users().primary_role(user_id)?,
                db.users().effective_permissions(user_id)?,
            ))
        })
        .await?;
    state.permissions.invalidate(user_id).await;
    let tokens = state.tokens.issue_pair(&user, now);
    tracing::info!("user {} ({}) signed in", user.email, user.id);
    Ok(reply::ok_with(
        "Login successful",
        Session {
            user,
            tokens,
            permissions: Arc::new(permissions),
            role,
        },
    ))
}

async fn register(body: RegisterRequest, state: AppState) -> Result<Response, Rejection> {
    let new = NewUser {
        username: body.username,
        mobile: body.mobile,
        ..NewUser::local(body.name, body.email, body.password)
    };
    let user = state.run(move |db| db.users().create(&new)).await?;
    let now = Utc::now();
    let user_id = user.id;
    let user = state
        .run(move |db| {
            db.users().touch_login(user_id, now)?;
            db.users().get(user_id)
        })
        .await?;
    let tokens = state.tokens.issue_pair(&user, now);
    Ok(reply::created(
        "Registration successful",
        serde_json::json!({ "user": user, "tokens": tokens }),
    ))
}

async fn login(body: LoginRequest, state: AppState) -> Result<Response, Rejection> {
    let invalid = || ApiError::unauthenticated("INVALID_CREDENTIALS", "Invalid email or password");
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(invalid().into());
    }
    let email = body.email.clone();
    let user = state
        .run(move |db| db.users().get_by_email(&email))
        .await?
        .ok_or_else(invalid)?;
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(ApiError::unauthenticated(
            "SOCIAL_ACCOUNT",
            format!("This account signs in with {}", user.auth_provider),
        )
        .into());
    };
    if !verify_password(&body.password, hash) {
        tracing::warn!("failed sign-in for {}", user.email);
        return Err(invalid().into());
    }
    Ok(start_session(&state, user).await?)
}

async fn social_login(body: SocialLoginRequest, state: AppState) -> Result<Response, Rejection> {
    if body.provider == AuthProvider::Local {
        return Err(ApiError::BadRequest("Provider must be google or facebook".to_string()).into());
    }
    Validator::new()
        .required("provider_id", &body.provider_id)
        .email("email", &body.email)
        .name("name", &body.name)
        .finish()
        .map_err(ApiError::from)?;

    let user = state
        .run(move |db| {
            if let Some(user) = db.users().get_by_provider(body.provider, &body.provider_id)? {
                return Ok(user);
            }
            if let Some(user) = db.users().get_by_email(&body.email)? {
                return db.users().link_provider(user.id, body.provider, &body.provider_id);
            }
            db.users().create(&NewUser {
                name: body.name,
                email: body.email,
                username: None,
                mobile: None,
                password: None,
                account_type: AccountKind::User,
                auth_provider: body.provider,
                provider_id: Some(body.provider_id),
                is_verified: true,
                is_active: true,
            })
        })
        .await?;
    Ok(start_session(&state, user).await?)
}

async fn refresh(body: RefreshRequest, state: AppState) -> Result<Response, Rejection> {
    let (user, claims) = verify_presented(&state, &body.refresh_token, TokenKind::Refresh).await?;
    let digest = fingerprint(&body.refresh_token);
    let user_id = user.id;
    state
        .run(move |db| db.tokens().revoke(&digest, user_id, claims.expires_at()))
        .await?;
    let tokens = state.tokens.issue_pair(&user, Utc::now());
    Ok(reply::ok_with("Token refreshed", tokens))
}

async fn logout(principal: Principal, body: LogoutRequest, state: AppState) -> Result<Response, Rejection> {
    let user_id = principal.user.id;
    let access = (fingerprint(&principal.token), principal.claims.expires_at());
    let refresh = body
        .refresh_token
        .as_deref()
        .and_then(|token| state.tokens.verify(token, TokenKind::Refresh, Utc::now()).ok().map(|c| (token, c)))
        .filter(|(_, claims)| claims.sub == user_id)
        .map(|(token, claims)| (fingerprint(token), claims.expires_at()));
    state
        .run(move |db| {
            db.tokens().revoke(&access.0, user_id, access.1)?;
            if let Some((digest, expires_at)) = refresh {
                db.tokens().revoke(&digest, user_id, expires_at)?;
            }
            Ok(())
        })
        .await?;
    state.permissions.invalidate(user_id).await;
    tracing::info!("user {} signed out", user_id);
    Ok(reply::message("Logged out successfully"))
}

async fn check_username(query: UsernameQuery, state: AppState) -> Result<Response, Rejection> {
    let username = query.username.trim().to_string();
    if !validation::is_valid_username(&username) {
        return Ok(reply::ok_with(
            "Username must be 3-50 characters of letters, numbers and underscores",
            serde_json::json!({ "available": false }),
        ));
    }
    let available = state
        .run(move |db| db.users().username_available(&username, None))
        .await?;
    let message = if available {
        "Username is available"
    } else {
        "Username is already taken"
    };
    Ok(reply::ok_with(message, serde_json::json!({ "available": available })))
}

async fn profile(principal: Principal) -> Result<Response, Rejection> {
    Ok(reply::ok(principal.user))
}

async fn update_profile(principal: Principal, body: ProfileUpdate, state: AppState) -> Result<Response, Rejection> {
    let update = UserUpdate {
        name: body.name,
        username: body.username,
        mobile: body.mobile,
        ..UserUpdate::default()
    };
    let user_id = principal.user.id;
    let user = state.run(move |db| db.users().update(user_id, &update)).await?;
    Ok(reply::ok_with("Profile updated successfully", user))
}

async fn my_permissions(principal: Principal, state: AppState) -> Result<Response, Rejection> {
    let user_id = principal.user.id;
    let role = state.run(move |db| db.users().primary_role(user_id)).await?;
    Ok(reply::ok(CallerPermissions {
        permissions: principal.permissions,
        role,
    }))
}

/// `/api/auth` routes
pub fn routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let limited = limit(Arc::clone(&state.limiter));

    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(register);

    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(login);

    let social_login = warp::path!("api" / "auth" / "social-login")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(social_login);

    let refresh = warp::path!("api" / "auth" / "refresh")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(refresh);

    // the body is optional, so no length header is demanded
    let logout_body = warp::body::bytes()
        .map(|bytes: bytes::Bytes| serde_json::from_slice::<LogoutRequest>(&bytes).unwrap_or_default());
    let logout = warp::path!("api" / "auth" / "logout")
        .and(warp::post())
        .and(limited)
        .and(authenticated(state.clone()))
        .and(logout_body)
        .and(with_state(state.clone()))
        .and_then(logout);

    let check_username = warp::path!("api" / "auth" / "check-username")
        .and(warp::get())
        .and(warp::query::<UsernameQuery>())
        .and(with_state(state.clone()))
        .and_then(check_username);

    let profile = warp::path!("api" / "auth" / "profile")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(profile);

    let update_profile = warp::path!("api" / "auth" / "profile")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_profile);

    let my_permissions = warp::path!("api" / "auth" / "permissions")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and(with_state(state.clone()))
        .and_then(my_permissions);

    register
        .or(login)
        .unify()
        .or(social_login)
        .unify()
        .or(refresh)
        .unify()
        .or(logout)
        .unify()
        .or(check_username)
        .unify()
        .or(profile)
        .unify()
        .or(update_profile)
        .unify()
        .or(my_permissions)
        .unify()
        .boxed()
}
