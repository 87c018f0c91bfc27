use crate::models::{TokenCheck, TokenRow, to_db_time};
use crate::users::query_user_by_id;
use crate::{Database, OptionalExt};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::Connection;
use tracing::debug;

/// 40 hex characters from 20 random bytes.
pub fn generate_token_key() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

impl Database {
    /// Get or create the user's token. An existing token older than
    /// `session_age` gets a fresh key; the key is probed once and the old key
    /// is kept on collision. Either way the save bumps `updated_at`.
    pub fn obtain_token(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        session_age: Duration,
    ) -> Result<TokenRow> {
        self.with_tx(|conn| {
            let ts = to_db_time(now);

            let Some(token) = query_token_by_user(conn, user_id)? else {
                conn.execute(
                    "INSERT INTO auth_tokens (key, user_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    rusqlite::params![generate_token_key(), user_id, ts],
                )?;
                return query_token_by_user(conn, user_id)?
                    .ok_or_else(|| anyhow!("Token vanished after insert for user {}", user_id));
            };

            if now - token.updated_at <= session_age {
                return Ok(token);
            }

            let candidate = generate_token_key();
            let key = if query_token_by_key(conn, &candidate)?.is_some() {
                debug!("Token key collision for user {}, keeping old key", user_id);
                token.key.clone()
            } else {
                candidate
            };

            conn.execute(
                "UPDATE auth_tokens SET key = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![key, ts, token.id],
            )?;
            query_token_by_user(conn, user_id)?
                .ok_or_else(|| anyhow!("Token vanished after refresh for user {}", user_id))
        })
    }

    /// Resolve a token key to its user, rejecting unknown keys, inactive
    /// owners and tokens idle for longer than `session_age`.
    pub fn authenticate_token(
        &self,
        key: &str,
        now: DateTime<Utc>,
        session_age: Duration,
    ) -> Result<TokenCheck> {
        self.with_conn(|conn| {
            let Some(token) = query_token_by_key(conn, key)? else {
                return Ok(TokenCheck::Unknown);
            };
            let Some(user) = query_user_by_id(conn, token.user_id)? else {
                return Ok(TokenCheck::Unknown);
            };

            if !user.is_active {
                return Ok(TokenCheck::Inactive);
            }
            if token.updated_at < now - session_age {
                return Ok(TokenCheck::Expired);
            }
            Ok(TokenCheck::Valid(user))
        })
    }
}

fn query_token_by_user(conn: &Connection, user_id: i64) -> Result<Option<TokenRow>> {
    conn.query_row(
        &format!("SELECT {} FROM auth_tokens WHERE user_id = ?1", TokenRow::COLUMNS),
        [user_id],
        TokenRow::from_row,
    )
    .optional()
}

fn query_token_by_key(conn: &Connection, key: &str) -> Result<Option<TokenRow>> {
    conn.query_row(
        &format!("SELECT {} FROM auth_tokens WHERE key = ?1", TokenRow::COLUMNS),
        [key],
        TokenRow::from_row,
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{active_user, phone, t0};

    fn age() -> Duration {
        Duration::days(14)
    }

    #[test]
    fn token_keys_are_forty_hex_chars() {
        let key = generate_token_key();
        assert_eq!(key.len(), 40);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_token_key());
    }

    #[test]
    fn fresh_token_is_reused_stale_token_is_rotated() {
        let db = Database::open_in_memory().unwrap();
        let user = active_user(&db, "+18005551234");

        let first = db.obtain_token(user.id, t0(), age()).unwrap();
        let again = db
            .obtain_token(user.id, t0() + Duration::days(1), age())
            .unwrap();
        assert_eq!(first.key, again.key);
        assert_eq!(again.updated_at, t0());

        let later = t0() + Duration::days(15);
        let rotated = db.obtain_token(user.id, later, age()).unwrap();
        assert_ne!(rotated.key, first.key);
        assert_eq!(rotated.updated_at, later);
        assert_eq!(rotated.id, first.id);
    }

    #[test]
    fn authentication_checks_owner_and_age() {
        let db = Database::open_in_memory().unwrap();
        let user = active_user(&db, "+18005551234");
        let token = db.obtain_token(user.id, t0(), age()).unwrap();

        let check = db.authenticate_token(&token.key, t0(), age()).unwrap();
        assert!(matches!(check, TokenCheck::Valid(u) if u.id == user.id));

        // Exactly at the window edge is still valid.
        let edge = t0() + age();
        assert!(matches!(
            db.authenticate_token(&token.key, edge, age()).unwrap(),
            TokenCheck::Valid(_)
        ));

        let late = edge + Duration::seconds(1);
        assert!(matches!(
            db.authenticate_token(&token.key, late, age()).unwrap(),
            TokenCheck::Expired
        ));

        assert!(matches!(
            db.authenticate_token("nope", t0(), age()).unwrap(),
            TokenCheck::Unknown
        ));
    }

    #[test]
    fn inactive_owner_is_rejected_even_with_valid_key() {
        let db = Database::open_in_memory().unwrap();
        let (user, _) = db
            .get_or_create_inactive_user(&phone("+18005551234"), t0())
            .unwrap();
        let token = db.obtain_token(user.id, t0(), age()).unwrap();

        assert!(matches!(
            db.authenticate_token(&token.key, t0(), age()).unwrap(),
            TokenCheck::Inactive
        ));
    }
}
