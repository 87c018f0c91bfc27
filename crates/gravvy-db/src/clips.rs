use crate::members::escalate_status;
use crate::models::{ClipRow, CreatedClip, DeletedClip, NewClip, PhotoChange, to_db_time};
use crate::videos::{query_video, refresh_clip_stats, refresh_photo};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use gravvy_types::events::ObjectRef;
use gravvy_types::models::MemberStatus;
use rusqlite::Connection;
use tracing::debug;

impl Database {
    /// Append a clip to the video. The order is assigned inside the write
    /// transaction, so concurrent uploads cannot share an order.
    pub fn create_clip(
        &self,
        video_id: i64,
        owner_id: i64,
        clip: &NewClip,
        now: DateTime<Utc>,
    ) -> Result<CreatedClip> {
        self.with_tx(|conn| insert_clip(conn, video_id, owner_id, clip, now))
    }

    pub fn get_clip(&self, video_id: i64, clip_id: i64) -> Result<Option<ClipRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM clips WHERE video_id = ?1 AND id = ?2",
                    ClipRow::COLUMNS
                ),
                [video_id, clip_id],
                ClipRow::from_row,
            )
            .optional()
        })
    }

    /// Clips by id, across videos. Unknown ids are skipped.
    pub fn get_clips(&self, ids: &[i64]) -> Result<Vec<ClipRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM clips WHERE id IN ({})",
                ClipRow::COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids), ClipRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Clips of a video in playback order.
    pub fn list_clips(&self, video_id: i64) -> Result<Vec<ClipRow>> {
        self.with_conn(|conn| query_clips(conn, video_id))
    }

    pub fn lead_clip(&self, video_id: i64) -> Result<Option<ClipRow>> {
        self.with_conn(|conn| query_lead_clip(conn, video_id))
    }

    /// Remove a clip and refresh the video's stats and, when the lead clip
    /// went away, its cached photo.
    pub fn delete_clip(&self, clip_id: i64, now: DateTime<Utc>) -> Result<Option<DeletedClip>> {
        self.with_tx(|conn| {
            let Some(clip) = query_clip(conn, clip_id)? else {
                return Ok(None);
            };
            remove_clip(conn, clip, true, now).map(Some)
        })
    }
}

pub(crate) fn query_clip(conn: &Connection, clip_id: i64) -> Result<Option<ClipRow>> {
    conn.query_row(
        &format!("SELECT {} FROM clips WHERE id = ?1", ClipRow::COLUMNS),
        [clip_id],
        ClipRow::from_row,
    )
    .optional()
}

pub(crate) fn query_clips(conn: &Connection, video_id: i64) -> Result<Vec<ClipRow>> {
    let sql = format!(
        "SELECT {} FROM clips WHERE video_id = ?1 ORDER BY ord ASC",
        ClipRow::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([video_id], ClipRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn query_lead_clip(conn: &Connection, video_id: i64) -> Result<Option<ClipRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM clips WHERE video_id = ?1 ORDER BY ord ASC LIMIT 1",
            ClipRow::COLUMNS
        ),
        [video_id],
        ClipRow::from_row,
    )
    .optional()
}

pub(crate) fn insert_clip(
    conn: &Connection,
    video_id: i64,
    owner_id: i64,
    clip: &NewClip,
    now: DateTime<Utc>,
) -> Result<CreatedClip> {
    let order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(ord) + 1, 0) FROM clips WHERE video_id = ?1",
        [video_id],
        |row| row.get(0),
    )?;

    let ts = to_db_time(now);
    conn.execute(
        "INSERT INTO clips (video_id, owner_id, ord, mp4, photo, duration, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            video_id,
            owner_id,
            order,
            clip.mp4,
            clip.photo,
            clip.duration.max(0.0),
            ts
        ],
    )?;
    let clip_id = conn.last_insert_rowid();

    let photo_change = if order == 0 {
        refresh_photo(conn, video_id, now)?
    } else {
        PhotoChange::default()
    };

    escalate_status(conn, video_id, owner_id, MemberStatus::Contributed, now)?;
    conn.execute(
        "UPDATE video_users SET new_clips_count = new_clips_count + 1
         WHERE video_id = ?1 AND user_id != ?2",
        [video_id, owner_id],
    )?;

    refresh_clip_stats(conn, video_id, now)?;

    let clip = query_clip(conn, clip_id)?
        .ok_or_else(|| anyhow!("Clip vanished after insert: {}", clip_id))?;
    let video =
        query_video(conn, video_id)?.ok_or_else(|| anyhow!("Video not found: {}", video_id))?;
    debug!("Added clip {} at order {} to video {}", clip.id, clip.order, video.hash_key);

    Ok(CreatedClip {
        clip,
        video,
        photo_change,
    })
}

/// Delete the activities that point at `object`, as object or as target.
pub(crate) fn remove_activities_for(conn: &Connection, object: ObjectRef) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM activities
         WHERE (object_kind = ?1 AND object_id = ?2)
            OR (target_kind = ?1 AND target_id = ?2)",
        rusqlite::params![object.kind.as_str(), object.id],
    )?;
    Ok(removed)
}

/// Delete one clip. With `refresh_video` the video's stats are recounted and,
/// if this was the lead clip, its photo is refreshed. Callers removing many
/// clips pass `false` and refresh once at the end.
pub(crate) fn remove_clip(
    conn: &Connection,
    clip: ClipRow,
    refresh_video: bool,
    now: DateTime<Utc>,
) -> Result<DeletedClip> {
    let was_lead = query_lead_clip(conn, clip.video_id)?
        .map(|lead| lead.id == clip.id)
        .unwrap_or(false);

    remove_activities_for(conn, ObjectRef::clip(clip.id))?;
    conn.execute("DELETE FROM clips WHERE id = ?1", [clip.id])?;

    let mut photo_change = PhotoChange::default();
    if refresh_video {
        refresh_clip_stats(conn, clip.video_id, now)?;
        if was_lead {
            photo_change = refresh_photo(conn, clip.video_id, now)?;
        }
    }

    Ok(DeletedClip {
        clip,
        was_lead,
        photo_change,
    })
}
