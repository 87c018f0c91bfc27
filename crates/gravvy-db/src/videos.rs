use crate::activities::{insert_activity, query_has_liked};
use crate::clips::{insert_clip, query_clips, remove_activities_for};
use crate::members::{add_users, ensure_invitees};
use crate::models::{
    CreatedVideo, DeletedVideo, NewClip, PhotoChange, VideoRow, to_db_time,
};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use gravvy_types::PhoneNumber;
use gravvy_types::events::{ActivityVerb, ObjectKind, ObjectRef};
use gravvy_types::models::RankWeights;
use rusqlite::Connection;
use tracing::{debug, info, warn};

pub const VIDEO_HASH_LENGTH: usize = 10;

/// Hash probes before giving up on a unique key.
pub(crate) const HASH_ATTEMPTS: usize = 5;

/// Truncated UUIDv4, used in video URLs.
pub fn generate_video_hash() -> String {
    let mut hash = uuid::Uuid::new_v4().simple().to_string();
    hash.truncate(VIDEO_HASH_LENGTH);
    hash
}

impl Database {
    pub fn get_video(&self, id: i64) -> Result<Option<VideoRow>> {
        self.with_conn(|conn| query_video(conn, id))
    }

    pub fn get_videos(&self, ids: &[i64]) -> Result<Vec<VideoRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM videos WHERE id IN ({})",
                VideoRow::COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids), VideoRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn get_video_by_hash(&self, hash_key: &str) -> Result<Option<VideoRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM videos WHERE hash_key = ?1", VideoRow::COLUMNS),
                [hash_key],
                VideoRow::from_row,
            )
            .optional()
        })
    }

    /// Create a video with its lead clip. The owner becomes a member and the
    /// given phone numbers are invited, creating placeholder users as needed.
    pub fn create_video(
        &self,
        owner_id: i64,
        title: &str,
        description: &str,
        lead_clip: &NewClip,
        invitees: &[PhoneNumber],
        now: DateTime<Utc>,
    ) -> Result<CreatedVideo> {
        self.with_tx(|conn| {
            let hash_key = unique_video_hash(conn)?;
            let ts = to_db_time(now);
            conn.execute(
                "INSERT INTO videos (hash_key, owner_id, title, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![hash_key, owner_id, title.trim(), description.trim(), ts],
            )?;
            let video_id = conn.last_insert_rowid();
            let video = query_video(conn, video_id)?
                .ok_or_else(|| anyhow!("Video vanished after insert: {}", video_id))?;

            add_users(conn, &video, &[owner_id], now)?;
            let created = insert_clip(conn, video_id, owner_id, lead_clip, now)?;

            let invitee_ids = ensure_invitees(conn, invitees, now)?;
            let invited = add_users(conn, &created.video, &invitee_ids, now)?;

            info!(
                "Created video {} ({}) with {} invitees",
                video.hash_key,
                video.id,
                invited.len()
            );
            Ok(CreatedVideo {
                video: created.video,
                lead_clip: created.clip,
                invited,
            })
        })
    }

    pub fn update_video(
        &self,
        video_id: i64,
        title: Option<&str>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VideoRow> {
        self.with_tx(|conn| {
            let video = query_video(conn, video_id)?
                .ok_or_else(|| anyhow!("Video not found: {}", video_id))?;
            let title = title.map(str::trim).unwrap_or(&video.title);
            let description = description.map(str::trim).unwrap_or(&video.description);

            conn.execute(
                "UPDATE videos SET title = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![title, description, to_db_time(now), video_id],
            )?;
            query_video(conn, video_id)?.ok_or_else(|| anyhow!("Video not found: {}", video_id))
        })
    }

    /// Count a play. Plays do not bump `updated_at`.
    pub fn record_play(&self, video_id: i64) -> Result<VideoRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE videos SET plays_count = plays_count + 1 WHERE id = ?1",
                [video_id],
            )?;
            query_video(conn, video_id)?.ok_or_else(|| anyhow!("Video not found: {}", video_id))
        })
    }

    /// Record a like, recount `likes_count` and bump the unread likes of
    /// every other member. Returns whether a like was added; liking twice
    /// changes nothing.
    pub fn like_video(&self, video_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.with_tx(|conn| {
            if query_has_liked(conn, video_id, user_id)? {
                debug!("User {} already likes video {}", user_id, video_id);
                return Ok(false);
            }
            insert_activity(
                conn,
                user_id,
                ActivityVerb::Like,
                Some(ObjectRef::video(video_id)),
                None,
                now,
            )?;
            refresh_likes_count(conn, video_id, now)?;
            conn.execute(
                "UPDATE video_users SET new_likes_count = new_likes_count + 1
                 WHERE video_id = ?1 AND user_id != ?2",
                [video_id, user_id],
            )?;
            Ok(true)
        })
    }

    /// Drop every like of `user_id` on the video and recount. Returns whether
    /// a like was removed.
    pub fn unlike_video(&self, video_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.with_tx(|conn| {
            let removed = conn.execute(
                "DELETE FROM activities
                 WHERE actor_id = ?1 AND verb = ?2 AND object_kind = ?3 AND object_id = ?4",
                rusqlite::params![
                    user_id,
                    ActivityVerb::Like.as_str(),
                    ObjectKind::Video.as_str(),
                    video_id
                ],
            )?;
            refresh_likes_count(conn, video_id, now)?;
            Ok(removed > 0)
        })
    }

    /// Videos the user owns or belongs to, most recently updated first.
    pub fn list_user_videos(&self, user_id: i64) -> Result<Vec<VideoRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM videos
                 WHERE owner_id = ?1
                    OR id IN (SELECT video_id FROM video_users WHERE user_id = ?1)
                 ORDER BY updated_at DESC, id DESC",
                VideoRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], VideoRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// One page of all videos ordered by rank score, highest first. Returns
    /// the total count alongside the page. Pages are 1-based.
    pub fn list_videos_ranked(
        &self,
        now: DateTime<Utc>,
        weights: &RankWeights,
        page: usize,
        per_page: usize,
    ) -> Result<(usize, Vec<VideoRow>)> {
        let videos = self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM videos", VideoRow::COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], VideoRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut scored: Vec<(f64, VideoRow)> = videos
            .into_iter()
            .map(|v| (v.score(now, weights), v))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.id.cmp(&a.1.id)));

        let count = scored.len();
        let start = page.saturating_sub(1).saturating_mul(per_page);
        let page = scored
            .into_iter()
            .skip(start)
            .take(per_page)
            .map(|(_, v)| v)
            .collect();
        Ok((count, page))
    }

    /// Database half of the video delete: capture what the video looked like,
    /// then drop its activities, clips and memberships. File cleanup and
    /// notifications are the caller's next steps.
    pub fn delete_video(&self, video_id: i64) -> Result<Option<DeletedVideo>> {
        self.with_tx(|conn| {
            let Some(video) = query_video(conn, video_id)? else {
                return Ok(None);
            };
            let clips = query_clips(conn, video_id)?;

            let mut stmt =
                conn.prepare("SELECT user_id FROM video_users WHERE video_id = ?1 ORDER BY id")?;
            let member_ids = stmt
                .query_map([video_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;

            for clip in &clips {
                remove_activities_for(conn, ObjectRef::clip(clip.id))?;
            }
            remove_activities_for(conn, ObjectRef::video(video_id))?;

            // clips and memberships cascade
            conn.execute("DELETE FROM videos WHERE id = ?1", [video_id])?;

            info!(
                "Deleted video {} ({} clips, {} members)",
                video.hash_key,
                clips.len(),
                member_ids.len()
            );
            Ok(Some(DeletedVideo {
                video,
                clips,
                member_ids,
            }))
        })
    }
}

pub(crate) fn query_video(conn: &Connection, id: i64) -> Result<Option<VideoRow>> {
    conn.query_row(
        &format!("SELECT {} FROM videos WHERE id = ?1", VideoRow::COLUMNS),
        [id],
        VideoRow::from_row,
    )
    .optional()
}

fn unique_video_hash(conn: &Connection) -> Result<String> {
    for _ in 0..HASH_ATTEMPTS {
        let candidate = generate_video_hash();
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM videos WHERE hash_key = ?1)",
            [&candidate],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(candidate);
        }
        warn!("Video hash collision on {}, retrying", candidate);
    }
    bail!("Could not allocate a unique video hash after {} attempts", HASH_ATTEMPTS)
}

/// Point the cached photo at the lowest-ordered clip's photo, or clear it.
pub(crate) fn refresh_photo(
    conn: &Connection,
    video_id: i64,
    now: DateTime<Utc>,
) -> Result<PhotoChange> {
    let previous: Option<String> = conn.query_row(
        "SELECT photo FROM videos WHERE id = ?1",
        [video_id],
        |row| row.get(0),
    )?;
    let current: Option<String> = conn
        .query_row(
            "SELECT photo FROM clips WHERE video_id = ?1 ORDER BY ord ASC LIMIT 1",
            [video_id],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "UPDATE videos SET photo = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![current, to_db_time(now), video_id],
    )?;
    Ok(PhotoChange { previous, current })
}

/// Recompute `clips_count` and `duration` from the clip set.
pub(crate) fn refresh_clip_stats(conn: &Connection, video_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE videos SET
             clips_count = (SELECT COUNT(*) FROM clips WHERE video_id = ?1),
             duration = (SELECT COALESCE(SUM(duration), 0) FROM clips WHERE video_id = ?1),
             updated_at = ?2
         WHERE id = ?1",
        rusqlite::params![video_id, to_db_time(now)],
    )?;
    Ok(())
}

/// Recompute `likes_count` from the like activities pointing at the video.
pub(crate) fn refresh_likes_count(conn: &Connection, video_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE videos SET
             likes_count = (SELECT COUNT(*) FROM activities
                            WHERE verb = ?2 AND object_kind = ?3 AND object_id = ?1),
             updated_at = ?4
         WHERE id = ?1",
        rusqlite::params![
            video_id,
            ActivityVerb::Like.as_str(),
            ObjectKind::Video.as_str(),
            to_db_time(now)
        ],
    )?;
    Ok(())
}

pub(crate) fn touch_video(conn: &Connection, video_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE videos SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![to_db_time(now), video_id],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::MemberRow;
    use crate::users::tests::{active_user, phone, t0};
    use chrono::Duration;
    use gravvy_types::models::MemberStatus;

    pub(crate) fn clip(name: &str, duration: f64) -> NewClip {
        NewClip {
            mp4: format!("vid/c/{}.mp4", name),
            photo: format!("img/c/{}.jpg", name),
            duration,
        }
    }

    #[test]
    fn video_hashes_are_short_and_distinct() {
        let a = generate_video_hash();
        assert_eq!(a.len(), VIDEO_HASH_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_video_hash());
    }

    #[test]
    fn create_video_adds_owner_and_lead_clip() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");

        let created = db
            .create_video(owner.id, " Beach ", "", &clip("a", 3.5), &[], t0())
            .unwrap();
        let video = &created.video;

        assert_eq!(video.title, "Beach");
        assert_eq!(video.clips_count, 1);
        assert_eq!(video.duration, 3.5);
        assert_eq!(video.photo.as_deref(), Some("img/c/a.jpg"));
        assert_eq!(created.lead_clip.order, 0);
        assert!(created.invited.is_empty());

        let members: Vec<MemberRow> = db.list_members(video.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, owner.id);
        assert_eq!(members[0].status, MemberStatus::Contributed);
    }

    #[test]
    fn create_video_invites_placeholders() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");
        let invitees = [phone("+18005551299"), phone("+18005551234")];

        let created = db
            .create_video(owner.id, "", "", &clip("a", 1.0), &invitees, t0())
            .unwrap();

        // The owner is already a member and is not re-invited.
        assert_eq!(created.invited.len(), 1);
        let invitee = db.get_user(created.invited[0].user_id).unwrap().unwrap();
        assert_eq!(invitee.phone_number, "+18005551299");
        assert!(!invitee.is_active);
        assert_eq!(created.invited[0].status, MemberStatus::Invited);
        assert_eq!(created.video.display_title(), "a video");
    }

    #[test]
    fn plays_and_updates() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");
        let video = db
            .create_video(owner.id, "t", "d", &clip("a", 1.0), &[], t0())
            .unwrap()
            .video;

        db.record_play(video.id).unwrap();
        let played = db.record_play(video.id).unwrap();
        assert_eq!(played.plays_count, 2);
        assert_eq!(played.updated_at, video.updated_at);

        let later = t0() + Duration::minutes(1);
        let updated = db
            .update_video(video.id, Some("New title"), None, later)
            .unwrap();
        assert_eq!(updated.title, "New title");
        assert_eq!(updated.description, "d");
        assert_eq!(updated.updated_at, later);
    }

    #[test]
    fn ranked_listing_orders_by_score_and_pages() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");
        let quiet = db
            .create_video(owner.id, "quiet", "", &clip("a", 1.0), &[], t0())
            .unwrap()
            .video;
        let popular = db
            .create_video(owner.id, "popular", "", &clip("b", 1.0), &[], t0())
            .unwrap()
            .video;
        for _ in 0..3 {
            db.record_play(popular.id).unwrap();
        }

        let weights = RankWeights::default();
        let now = t0() + Duration::hours(1);
        let (count, first) = db.list_videos_ranked(now, &weights, 1, 1).unwrap();
        assert_eq!(count, 2);
        assert_eq!(first[0].id, popular.id);

        let (_, second) = db.list_videos_ranked(now, &weights, 2, 1).unwrap();
        assert_eq!(second[0].id, quiet.id);

        let (_, past_end) = db.list_videos_ranked(now, &weights, 3, 1).unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn equal_scores_page_newest_id_first() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");
        let ids: Vec<i64> = (0..5)
            .map(|i| {
                db.create_video(owner.id, "", "", &clip(&format!("c{i}"), 1.0), &[], t0())
                    .unwrap()
                    .video
                    .id
            })
            .collect();

        let weights = RankWeights::default();
        let now = t0() + Duration::hours(1);
        let mut listed = Vec::new();
        for page in 1..=3 {
            let (count, rows) = db.list_videos_ranked(now, &weights, page, 2).unwrap();
            assert_eq!(count, 5);
            listed.extend(rows.into_iter().map(|v| v.id));
        }

        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);
    }

    #[test]
    fn delete_video_cascades_and_reports_what_was_removed() {
        let db = Database::open_in_memory().unwrap();
        let owner = active_user(&db, "+18005551234");
        let friend = active_user(&db, "+18005551235");
        let created = db
            .create_video(
                owner.id,
                "",
                "",
                &clip("a", 1.0),
                &[phone("+18005551235")],
                t0(),
            )
            .unwrap();
        let video = created.video;
        db.create_clip(video.id, friend.id, &clip("b", 2.0), t0())
            .unwrap();
        db.like_video(video.id, friend.id, t0()).unwrap();

        let deleted = db.delete_video(video.id).unwrap().unwrap();
        assert_eq!(deleted.clips.len(), 2);
        assert_eq!(deleted.member_ids, vec![owner.id, friend.id]);

        assert!(db.get_video(video.id).unwrap().is_none());
        assert!(db.list_clips(video.id).unwrap().is_empty());
        assert!(db.list_members(video.id).unwrap().is_empty());
        assert!(!db.has_liked(video.id, friend.id).unwrap());
        assert!(db.delete_video(video.id).unwrap().is_none());
    }
}
