use std::collections::HashSet;

use crate::clips::{query_clips, remove_clip};
use crate::models::{MemberRow, PhotoChange, RemovedMember, UserRow, VideoRow, to_db_time};
use crate::users::{ensure_user, query_user_by_id, query_users};
use crate::videos::{HASH_ATTEMPTS, query_video, refresh_clip_stats, refresh_photo, touch_video};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use gravvy_types::PhoneNumber;
use gravvy_types::models::MemberStatus;
use rand::Rng;
use rusqlite::Connection;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

pub const VIDEO_USERS_HASH_LENGTH: usize = 10;

fn sha1_hex(input: &[u8]) -> String {
    hex::encode(Sha1::digest(input))
}

/// Membership hash used in SMS links: SHA-1 over a random salt, the member's
/// phone number and the video hash, truncated.
pub fn generate_member_hash(phone_number: &str, video_hash: &str) -> String {
    let seed: [u8; 16] = rand::rng().random();
    let salt = &sha1_hex(&seed)[..5];
    let mut hash = sha1_hex(format!("{}{}{}", salt, phone_number, video_hash).as_bytes());
    hash.truncate(VIDEO_USERS_HASH_LENGTH);
    hash
}

impl Database {
    pub fn get_member(&self, video_id: i64, user_id: i64) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| query_member(conn, video_id, user_id))
    }

    /// Memberships of a video, oldest first.
    pub fn list_members(&self, video_id: i64) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| query_members(conn, video_id))
    }

    /// The users behind a video's memberships, oldest membership first.
    pub fn list_member_users(&self, video_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let members = query_members(conn, video_id)?;
            let ids: Vec<i64> = members.iter().map(|m| m.user_id).collect();
            let mut users = query_users(conn, &ids)?;
            users.sort_by_key(|u| ids.iter().position(|id| *id == u.id));
            Ok(users)
        })
    }

    /// Memberships of `user_id` in the given videos.
    pub fn memberships_for(&self, user_id: i64, video_ids: &[i64]) -> Result<Vec<MemberRow>> {
        if video_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM video_users WHERE user_id = ?1 AND video_id IN ({})",
                MemberRow::COLUMNS,
                (2..=video_ids.len() + 1)
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut params: Vec<i64> = Vec::with_capacity(video_ids.len() + 1);
            params.push(user_id);
            params.extend_from_slice(video_ids);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), MemberRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Owner or member of the video.
    pub fn is_associated(&self, video_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let associated: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM video_users WHERE video_id = ?1 AND user_id = ?2)
                     OR EXISTS(SELECT 1 FROM videos WHERE id = ?1 AND owner_id = ?2)",
                [video_id, user_id],
                |row| row.get(0),
            )?;
            Ok(associated)
        })
    }

    /// Add the users that are not members yet. Returns only the new rows.
    pub fn add_users_to_video(
        &self,
        video_id: i64,
        user_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberRow>> {
        self.with_tx(|conn| {
            let video = query_video(conn, video_id)?
                .ok_or_else(|| anyhow!("Video not found: {}", video_id))?;
            add_users(conn, &video, user_ids, now)
        })
    }

    /// Invite phone numbers to a video, creating placeholder users for
    /// unknown numbers. Returns the new memberships and bumps the video's
    /// `updated_at`.
    pub fn invite_to_video(
        &self,
        video_id: i64,
        phones: &[PhoneNumber],
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberRow>> {
        self.with_tx(|conn| {
            let video = query_video(conn, video_id)?
                .ok_or_else(|| anyhow!("Video not found: {}", video_id))?;
            let user_ids = ensure_invitees(conn, phones, now)?;
            let added = add_users(conn, &video, &user_ids, now)?;
            touch_video(conn, video_id, now)?;
            Ok(added)
        })
    }

    /// Bulk delete of memberships, without the per-member cleanup of
    /// [`Database::remove_member`]. Returns the number of rows removed.
    pub fn remove_users_from_video(&self, video_id: i64, user_ids: &[i64]) -> Result<usize> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let sql = format!(
                "DELETE FROM video_users WHERE video_id = ?{} AND user_id IN ({})",
                user_ids.len() + 1,
                placeholders(user_ids.len())
            );
            let mut params: Vec<i64> = user_ids.to_vec();
            params.push(video_id);
            let removed = conn.execute(&sql, rusqlite::params_from_iter(params))?;
            Ok(removed)
        })
    }

    /// Drop a membership along with the member's clips in the video, then
    /// refresh the video's stats and photo once and bump its `updated_at`.
    pub fn remove_member(
        &self,
        video_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<RemovedMember>> {
        self.with_tx(|conn| {
            let Some(member) = query_member(conn, video_id, user_id)? else {
                return Ok(None);
            };

            let mut clips = Vec::new();
            for clip in query_clips(conn, video_id)? {
                if clip.owner_id == user_id {
                    clips.push(remove_clip(conn, clip, false, now)?);
                }
            }

            let mut photo_change = PhotoChange::default();
            if !clips.is_empty() {
                refresh_clip_stats(conn, video_id, now)?;
                if clips.iter().any(|c| c.was_lead) {
                    photo_change = refresh_photo(conn, video_id, now)?;
                }
            }

            conn.execute("DELETE FROM video_users WHERE id = ?1", [member.id])?;
            touch_video(conn, video_id, now)?;

            info!(
                "Removed user {} from video {} ({} clips)",
                user_id,
                video_id,
                clips.len()
            );
            Ok(Some(RemovedMember {
                member,
                clips,
                photo_change,
            }))
        })
    }

    /// Zero the caller's unread counters and mark an invitation as viewed.
    pub fn clear_notifications(
        &self,
        video_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>> {
        self.with_tx(|conn| {
            conn.execute(
                "UPDATE video_users SET new_likes_count = 0, new_clips_count = 0, updated_at = ?1
                 WHERE video_id = ?2 AND user_id = ?3",
                rusqlite::params![to_db_time(now), video_id, user_id],
            )?;
            escalate_status(conn, video_id, user_id, MemberStatus::Viewed, now)
        })
    }

    /// Number of memberships waiting on the user: invitations not yet seen
    /// plus videos with unread likes or clips. `None` when nothing is pending.
    pub fn user_badge(&self, user_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM video_users
                 WHERE user_id = ?1
                   AND (status = ?2 OR new_likes_count > 0 OR new_clips_count > 0)",
                [user_id, MemberStatus::Invited.code()],
                |row| row.get(0),
            )?;
            Ok((count > 0).then_some(count))
        })
    }
}

pub(crate) fn query_member(
    conn: &Connection,
    video_id: i64,
    user_id: i64,
) -> Result<Option<MemberRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM video_users WHERE video_id = ?1 AND user_id = ?2",
            MemberRow::COLUMNS
        ),
        [video_id, user_id],
        MemberRow::from_row,
    )
    .optional()
}

/// Raise a member's status to at least `to`. Non-members are left alone.
pub(crate) fn escalate_status(
    conn: &Connection,
    video_id: i64,
    user_id: i64,
    to: MemberStatus,
    now: DateTime<Utc>,
) -> Result<Option<MemberRow>> {
    let Some(member) = query_member(conn, video_id, user_id)? else {
        return Ok(None);
    };
    let status = member.status.escalate(to);
    if status == member.status {
        return Ok(Some(member));
    }
    conn.execute(
        "UPDATE video_users SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.code(), to_db_time(now), member.id],
    )?;
    query_member(conn, video_id, user_id)
}

fn query_members(conn: &Connection, video_id: i64) -> Result<Vec<MemberRow>> {
    let sql = format!(
        "SELECT {} FROM video_users WHERE video_id = ?1 ORDER BY id ASC",
        MemberRow::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([video_id], MemberRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Resolve phone numbers to user ids, creating placeholders. Duplicates
/// collapse to one id.
pub(crate) fn ensure_invitees(
    conn: &Connection,
    phones: &[PhoneNumber],
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(phones.len());
    for phone in phones {
        let (user, _) = ensure_user(conn, phone, None, now)?;
        if !ids.contains(&user.id) {
            ids.push(user.id);
        }
    }
    Ok(ids)
}

fn unique_member_hash(conn: &Connection, phone_number: &str, video_hash: &str) -> Result<String> {
    for _ in 0..HASH_ATTEMPTS {
        let candidate = generate_member_hash(phone_number, video_hash);
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM video_users WHERE hash_key = ?1)",
            [&candidate],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(candidate);
        }
        warn!("Membership hash collision on {}, retrying", candidate);
    }
    bail!(
        "Could not allocate a unique membership hash after {} attempts",
        HASH_ATTEMPTS
    )
}

/// Insert memberships for the users not already in the video.
pub(crate) fn add_users(
    conn: &Connection,
    video: &VideoRow,
    user_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<Vec<MemberRow>> {
    let existing: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT user_id FROM video_users WHERE video_id = ?1")?;
        stmt.query_map([video.id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()?
    };

    let ts = to_db_time(now);
    let mut seen = HashSet::new();
    let mut added = Vec::new();
    for &user_id in user_ids {
        if existing.contains(&user_id) || !seen.insert(user_id) {
            continue;
        }
        let user = query_user_by_id(conn, user_id)?
            .ok_or_else(|| anyhow!("User not found: {}", user_id))?;
        let hash_key = unique_member_hash(conn, &user.phone_number, &video.hash_key)?;

        conn.execute(
            "INSERT INTO video_users (video_id, user_id, hash_key, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![
                video.id,
                user_id,
                hash_key,
                MemberStatus::Invited.code(),
                ts
            ],
        )?;
        let member = query_member(conn, video.id, user_id)?
            .ok_or_else(|| anyhow!("Membership vanished after insert"))?;
        added.push(member);
    }
    Ok(added)
}
