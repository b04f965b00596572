//! Revoked session tokens
//!
//! Tokens are stored by digest only. Rows past their expiry are dead weight
//! since an expired token fails verification anyway, so they can be purged.

use crate::db::{now, Database};
use crate::error::Result;
use archivart_core::UserId;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// Revocation list
#[derive(Debug, Clone, Copy)]
pub struct Tokens<'a> {
    db: &'a Database,
}

impl Database {
    /// Revocation list
    #[inline]
    #[must_use]
    pub fn tokens(&self) -> Tokens<'_> {
        Tokens { db: self }
    }
}

impl Tokens<'_> {
    /// Revoke a token by digest. Revoking twice is a no-op.
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn revoke(&self, token_hash: &str, user: UserId, expires_at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (token_hash, user_id, expires_at, revoked_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user.get(), expires_at, now()],
            )?;
            if inserted > 0 {
                tracing::debug!("revoked token for user {}", user);
            }
            Ok(())
        })
    }

    /// Check whether a digest is on the list
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM revoked_tokens WHERE token_hash = ?1",
                    [token_hash],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    /// Drop entries whose token has expired, returning how many went
    ///
    /// # Errors
    /// Returns error on database failure
    pub fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM revoked_tokens WHERE expires_at <= ?1", [at])?;
            if n > 0 {
                tracing::info!("purged {} expired token revocations", n);
            }
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;
    use chrono::Duration;

    #[test]
    fn revoke_is_idempotent_and_purgeable() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .users()
            .create(&NewUser::local("Ann Lee", "ann@example.com", "Secret1@x"))
            .unwrap();
        let expiry = now() + Duration::hours(1);

        assert!(!db.tokens().is_revoked("abc").unwrap());
        db.tokens().revoke("abc", user.id, expiry).unwrap();
        db.tokens().revoke("abc", user.id, expiry).unwrap();
        assert!(db.tokens().is_revoked("abc").unwrap());

        assert_eq!(db.tokens().purge_expired(now()).unwrap(), 0);
        assert_eq!(db.tokens().purge_expired(expiry + Duration::seconds(1)).unwrap(), 1);
        assert!(!db.tokens().is_revoked("abc").unwrap());
    }
}
