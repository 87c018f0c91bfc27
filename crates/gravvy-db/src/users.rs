use crate::models::{AvatarChange, ProfileUpdate, UserRow, to_db_time};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use gravvy_types::PhoneNumber;
use gravvy_types::events::ObjectKind;
use rand::Rng;
use rand::distr::Alphanumeric;
use rusqlite::Connection;
use tracing::info;

impl Database {
    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_phone(conn, phone.as_str()))
    }

    /// Batch-fetch users, in no particular order.
    pub fn get_users(&self, ids: &[i64]) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| query_users(conn, ids))
    }

    /// Look up a user by phone number, creating an inactive placeholder with
    /// an unusable password when none exists. Returns the user and whether it
    /// was created.
    pub fn get_or_create_inactive_user(
        &self,
        phone: &PhoneNumber,
        now: DateTime<Utc>,
    ) -> Result<(UserRow, bool)> {
        self.with_tx(|conn| ensure_user(conn, phone, None, now))
    }

    /// Apply a profile edit. The previous avatar is handed back when it was
    /// replaced or cleared so the caller can remove its files.
    pub fn update_user_profile(
        &self,
        user_id: i64,
        full_name: Option<&str>,
        avatar: AvatarChange,
        now: DateTime<Utc>,
    ) -> Result<ProfileUpdate> {
        self.with_tx(|conn| {
            let before = query_user_by_id(conn, user_id)?
                .ok_or_else(|| anyhow!("User not found: {}", user_id))?;

            let full_name = full_name
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| before.full_name.clone());
            let new_avatar = match &avatar {
                AvatarChange::Keep => before.avatar.clone(),
                AvatarChange::Clear => None,
                AvatarChange::Replace(path) => Some(path.clone()),
            };

            conn.execute(
                "UPDATE users SET full_name = ?1, avatar = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![full_name, new_avatar, to_db_time(now), user_id],
            )?;

            let replaced_avatar = match before.avatar {
                Some(old) if new_avatar.as_deref() != Some(old.as_str()) => Some(old),
                _ => None,
            };

            let user = query_user_by_id(conn, user_id)?
                .ok_or_else(|| anyhow!("User not found: {}", user_id))?;
            Ok(ProfileUpdate {
                user,
                replaced_avatar,
            })
        })
    }

    /// Delete a user with everything that hangs off their identity. Videos and
    /// clips they own are kept. Returns the avatar file left behind, if any.
    pub fn delete_user(&self, user_id: i64) -> Result<Option<String>> {
        self.with_tx(|conn| {
            let user = query_user_by_id(conn, user_id)?
                .ok_or_else(|| anyhow!("User not found: {}", user_id))?;

            conn.execute(
                "DELETE FROM activities
                 WHERE actor_id = ?1
                    OR (object_kind = ?2 AND object_id = ?1)
                    OR (target_kind = ?2 AND target_id = ?1)",
                rusqlite::params![user_id, ObjectKind::User.as_str()],
            )?;
            // tokens, profile, memberships, devices and feedback cascade
            conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;

            info!("Deleted user {} ({})", user.id, user.phone_number);
            Ok(user.avatar)
        })
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", UserRow::COLUMNS),
        [id],
        UserRow::from_row,
    )
    .optional()
}

pub(crate) fn query_user_by_phone(conn: &Connection, phone: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE phone_number = ?1", UserRow::COLUMNS),
        [phone],
        UserRow::from_row,
    )
    .optional()
}

pub(crate) fn query_users(conn: &Connection, ids: &[i64]) -> Result<Vec<UserRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {} FROM users WHERE id IN ({})",
        UserRow::COLUMNS,
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), UserRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Random password no hash will ever match.
pub(crate) fn unusable_password() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("!{}", suffix)
}

/// Fetch or create the user behind `phone`. New users are inactive; they get
/// `password_hash` when given, an unusable password otherwise.
pub(crate) fn ensure_user(
    conn: &Connection,
    phone: &PhoneNumber,
    password_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(UserRow, bool)> {
    if let Some(user) = query_user_by_phone(conn, phone.as_str())? {
        return Ok((user, false));
    }

    let password = match password_hash {
        Some(hash) => hash.to_string(),
        None => unusable_password(),
    };
    let ts = to_db_time(now);
    conn.execute(
        "INSERT INTO users (phone_number, full_name, password, is_active, date_joined, updated_at)
         VALUES (?1, '', ?2, 0, ?3, ?3)",
        rusqlite::params![phone.as_str(), password, ts],
    )?;

    let id = conn.last_insert_rowid();
    let user =
        query_user_by_id(conn, id)?.ok_or_else(|| anyhow!("User vanished after insert: {}", id))?;
    info!("Created inactive user {} ({})", user.id, user.phone_number);
    Ok((user, true))
}
