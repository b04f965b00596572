//! Signed bearer tokens
//!
//! A token is `base64url(claims_json) "." base64url(ed25519_signature)`,
//! where the signature covers the first segment as sent. Revocation is keyed
//! by the SHA-256 fingerprint of the whole token string.

use crate::error::ApiError;
use crate::state::{with_state, AppState};
use archivart_core::{PermissionSet, User, UserId, UserStatus};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use warp::{Filter, Rejection};

/// Token verification failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Not two base64url segments of the expected shape
    #[error("malformed token")]
    Malformed,
    /// Signature does not match the claims
    #[error("invalid token signature")]
    BadSignature,
    /// Refresh token used as access token or the reverse
    #[error("wrong token kind")]
    WrongKind,
    /// Past its expiry
    #[error("token expired")]
    Expired,
    /// Signing key seed is not 32 hex-encoded bytes
    #[error("signing key must be 64 hex characters")]
    InvalidKey,
}

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Authenticates API calls
    Access,
    /// Obtains new access tokens
    Refresh,
}

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account
    pub sub: UserId,
    /// Account email at issue time
    pub email: String,
    /// Usage
    pub kind: TokenKind,
    /// Unique token id
    pub jti: String,
    /// Issue time, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
}

impl TokenClaims {
    /// Expiry as a timestamp
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Access and refresh tokens issued together
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// Short-lived API token
    pub access_token: String,
    /// Long-lived token for `/api/auth/refresh`
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Stable revocation key of a token
#[must_use]
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issues and verifies signed tokens
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Issuer with a known key
    #[must_use]
    pub fn new(signing_key: SigningKey, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Issuer with a fresh random key
    #[must_use]
    pub fn generate(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self::new(SigningKey::generate(&mut csprng), access_ttl, refresh_ttl)
    }

    /// Issuer from a hex-encoded 32-byte seed
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidKey`] if the seed is malformed
    pub fn from_hex_seed(seed: &str, access_ttl: Duration, refresh_ttl: Duration) -> Result<Self, AuthError> {
        let bytes = hex::decode(seed.trim()).map_err(|_| AuthError::InvalidKey)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| AuthError::InvalidKey)?;
        Ok(Self::new(SigningKey::from_bytes(&seed), access_ttl, refresh_ttl))
    }

    /// Access token lifetime
    #[inline]
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign a token for `user`
    #[must_use]
    pub fn issue(&self, user: &User, kind: TokenKind, now: DateTime<Utc>) -> (String, TokenClaims) {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = now.timestamp();
        let claims = TokenClaims {
            sub: user.id,
            email: user.email.clone(),
            kind,
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp: iat.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        // Claims are plain data, serialization cannot fail
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature: Signature = self.signing_key.sign(payload.as_bytes());
        let token = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));
        (token, claims)
    }

    /// Sign an access and refresh token for `user`
    #[must_use]
    pub fn issue_pair(&self, user: &User, now: DateTime<Utc>) -> TokenPair {
        let (access_token, _) = self.issue(user, TokenKind::Access, now);
        let (refresh_token, _) = self.issue(user, TokenKind::Refresh, now);
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.access_ttl.as_secs(),
        }
    }

    /// Check signature, kind and expiry
    ///
    /// # Errors
    /// Returns the first failed check
    pub fn verify(&self, token: &str, expected: TokenKind, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        let signature = Signature::from_slice(&signature).map_err(|_| AuthError::Malformed)?;
        self.verifying_key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims_json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| AuthError::Malformed)?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json).map_err(|_| AuthError::Malformed)?;
        if claims.kind != expected {
            return Err(AuthError::WrongKind);
        }
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Principal {
    /// Account as currently stored
    pub user: User,
    /// Effective permissions
    pub permissions: Arc<PermissionSet>,
    /// Verified token claims
    pub claims: TokenClaims,
    /// Raw bearer token
    pub token: String,
}

/// Reject blocked and inactive accounts
///
/// # Errors
/// Returns an authentication error naming the reason
pub fn check_status(user: &User) -> Result<(), ApiError> {
    match user.status() {
        UserStatus::Blocked => Err(ApiError::unauthenticated(
            "ACCOUNT_BLOCKED",
            "Your account has been blocked. Please contact support.",
        )),
        UserStatus::Inactive => Err(ApiError::unauthenticated("ACCOUNT_INACTIVE", "Your account is inactive")),
        UserStatus::Active => Ok(()),
    }
}

/// Reject accounts that may not use a token issued at `issued_at`
///
/// A sign-in invalidates every token issued in an earlier second.
///
/// # Errors
/// Returns an authentication error naming the reason
pub fn check_account(user: &User, issued_at: i64) -> Result<(), ApiError> {
    check_status(user)?;
    if let Some(last_login) = user.last_login_at {
        if issued_at < last_login.timestamp() {
            return Err(ApiError::unauthenticated(
                "TOKEN_INVALIDATED",
                "Session has been invalidated. Please sign in again.",
            ));
        }
    }
    Ok(())
}

fn token_error(err: AuthError) -> ApiError {
    match err {
        AuthError::Expired => ApiError::unauthenticated("TOKEN_EXPIRED", "Token has expired"),
        _ => ApiError::unauthenticated("INVALID_TOKEN", "Invalid token"),
    }
}

/// Verify a presented token of `kind` and load its account
///
/// # Errors
/// Returns an authentication error for any failed check
pub async fn verify_presented(state: &AppState, token: &str, kind: TokenKind) -> Result<(User, TokenClaims), ApiError> {
    let claims = state.tokens.verify(token, kind, Utc::now()).map_err(token_error)?;
    let digest = fingerprint(token);
    let user_id = claims.sub;
    let (revoked, user) = state
        .run(move |db| {
            let revoked = db.tokens().is_revoked(&digest)?;
            let user = match db.users().get(user_id) {
                Ok(user) => Some(user),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            Ok((revoked, user))
        })
        .await?;
    if revoked {
        return Err(ApiError::unauthenticated("TOKEN_REVOKED", "Token has been revoked"));
    }
    let user = user.ok_or_else(|| ApiError::unauthenticated("USER_NOT_FOUND", "User no longer exists"))?;
    check_account(&user, claims.iat)?;
    Ok((user, claims))
}

/// Resolve the caller from an `Authorization` header value
///
/// # Errors
/// Returns an authentication error for any failed check
pub async fn authenticate(state: &AppState, header: Option<&str>) -> Result<Principal, ApiError> {
    let token = header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthenticated("NO_TOKEN", "Access denied. No token provided."))?;
    let (user, claims) = verify_presented(state, token, TokenKind::Access).await?;
    let user_id = user.id;
    let permissions = state
        .permissions
        .get_or_load(user_id, state.run(move |db| db.users().effective_permissions(user_id)))
        .await?;
    Ok(Principal {
        user,
        permissions,
        claims,
        token: token.to_string(),
    })
}

/// Extract the authenticated caller or reject with 401
pub fn authenticated(state: AppState) -> impl Filter<Extract = (Principal,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            authenticate(&state, header.as_deref())
                .await
                .map_err(warp::reject::custom)
        })
}
