use crate::models::{RegistrationProfileRow, UserRow, to_db_time};
use crate::users::{ensure_user, query_user_by_id};
use crate::{Database, OptionalExt};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use gravvy_types::PhoneNumber;
use rand::Rng;
use rusqlite::Connection;
use tracing::info;

/// Random code with exactly `digits` digits: `[10^(d-1), 10^d - 1]`.
pub fn generate_verification_code(digits: u32) -> u32 {
    let digits = digits.clamp(1, 9);
    let min = 10u32.pow(digits - 1);
    let max = 10u32.pow(digits) - 1;
    rand::rng().random_range(min..=max)
}

/// Result of an activation attempt. Anything but `Activated` is reported to
/// clients as a plain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    NoProfile,
    WrongCode,
    Expired,
}

impl Database {
    /// Register a phone number: reuse or create the (inactive) user and
    /// (re)generate its verification code, restarting the expiry clock.
    /// `password_hash` only applies to newly created users.
    pub fn register_inactive_user(
        &self,
        phone: &PhoneNumber,
        password_hash: &str,
        code_digits: u32,
        now: DateTime<Utc>,
    ) -> Result<(UserRow, RegistrationProfileRow)> {
        self.with_tx(|conn| {
            let (user, created) = ensure_user(conn, phone, Some(password_hash), now)?;
            let profile = upsert_profile(conn, user.id, code_digits, now)?;
            if !created {
                info!("Re-issued verification code for user {}", user.id);
            }
            Ok((user, profile))
        })
    }

    pub fn get_registration_profile(&self, user_id: i64) -> Result<Option<RegistrationProfileRow>> {
        self.with_conn(|conn| query_profile(conn, user_id))
    }

    /// Activate the user when its profile exists, the code matches and it
    /// has not expired. On success the user becomes active with the new
    /// password.
    pub fn activate_user(
        &self,
        user_id: i64,
        code: u32,
        password_hash: &str,
        activation_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Activation> {
        self.with_tx(|conn| {
            let Some(profile) = query_profile(conn, user_id)? else {
                return Ok(Activation::NoProfile);
            };
            if profile.verification_code != code {
                return Ok(Activation::WrongCode);
            }
            if profile.is_expired(now, activation_days) {
                return Ok(Activation::Expired);
            }

            let changed = conn.execute(
                "UPDATE users SET is_active = 1, password = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![password_hash, to_db_time(now), user_id],
            )?;
            if changed == 0 {
                return Err(anyhow!("User not found: {}", user_id));
            }

            info!("Activated user {}", user_id);
            Ok(Activation::Activated)
        })
    }
}

fn query_profile(conn: &Connection, user_id: i64) -> Result<Option<RegistrationProfileRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM registration_profiles WHERE user_id = ?1",
            RegistrationProfileRow::COLUMNS
        ),
        [user_id],
        RegistrationProfileRow::from_row,
    )
    .optional()
}

fn upsert_profile(
    conn: &Connection,
    user_id: i64,
    code_digits: u32,
    now: DateTime<Utc>,
) -> Result<RegistrationProfileRow> {
    if query_user_by_id(conn, user_id)?.is_none() {
        return Err(anyhow!("User not found: {}", user_id));
    }

    let code = generate_verification_code(code_digits);
    conn.execute(
        "INSERT INTO registration_profiles (user_id, verification_code, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             verification_code = excluded.verification_code,
             updated_at = excluded.updated_at",
        rusqlite::params![user_id, code, to_db_time(now)],
    )?;

    query_profile(conn, user_id)?
        .ok_or_else(|| anyhow!("Registration profile vanished for user {}", user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{phone, t0};
    use chrono::Duration;

    #[test]
    fn codes_have_requested_digit_count() {
        for _ in 0..200 {
            let code = generate_verification_code(4);
            assert!((1000..=9999).contains(&code));
        }
        for _ in 0..50 {
            assert!((1..=9).contains(&generate_verification_code(1)));
        }
    }

    #[test]
    fn reregistration_resets_code_clock_but_keeps_user() {
        let db = Database::open_in_memory().unwrap();
        let number = phone("+18005551234");

        let (user, first) = db
            .register_inactive_user(&number, "hash-1", 4, t0())
            .unwrap();
        assert!(!user.is_active);
        assert_eq!(user.password, "hash-1");

        let later = t0() + Duration::hours(5);
        let (again, second) = db
            .register_inactive_user(&number, "hash-2", 4, later)
            .unwrap();
        assert_eq!(user.id, again.id);
        assert_eq!(again.password, "hash-1");
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, t0());
        assert_eq!(second.updated_at, later);
    }

    #[test]
    fn activation_requires_profile_matching_code_and_fresh_clock() {
        let db = Database::open_in_memory().unwrap();
        let (bare, _) = db
            .get_or_create_inactive_user(&phone("+18005551299"), t0())
            .unwrap();
        assert_eq!(
            db.activate_user(bare.id, 1234, "pw", 2, t0()).unwrap(),
            Activation::NoProfile
        );

        let (user, profile) = db
            .register_inactive_user(&phone("+18005551234"), "old", 4, t0())
            .unwrap();
        let code = profile.verification_code;
        let wrong = if code == 9999 { 1000 } else { code + 1 };

        assert_eq!(
            db.activate_user(user.id, wrong, "pw", 2, t0()).unwrap(),
            Activation::WrongCode
        );

        // updated_at + 2 days <= now means expired
        let deadline = t0() + Duration::days(2);
        assert_eq!(
            db.activate_user(user.id, code, "pw", 2, deadline).unwrap(),
            Activation::Expired
        );
        assert!(!db.get_user(user.id).unwrap().unwrap().is_active);

        let just_in_time = deadline - Duration::seconds(1);
        assert_eq!(
            db.activate_user(user.id, code, "new-hash", 2, just_in_time)
                .unwrap(),
            Activation::Activated
        );
        let user = db.get_user(user.id).unwrap().unwrap();
        assert!(user.is_active);
        assert_eq!(user.password, "new-hash");
    }
}
