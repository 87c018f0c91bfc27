use crate::models::{ActivityRow, UserRow, to_db_time};
use crate::users::query_users;
use crate::{Database, OptionalExt};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use gravvy_types::events::{ActivityVerb, ObjectKind, ObjectRef};
use rusqlite::Connection;

/// Position in the activity feed, ordered by `(created_at, id)` descending.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCursor {
    /// Rows strictly older than this one.
    Before { created_at: DateTime<Utc>, id: i64 },
    /// Rows strictly newer than this one.
    After { created_at: DateTime<Utc>, id: i64 },
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Newest first.
    pub rows: Vec<ActivityRow>,
    pub has_older: bool,
    pub has_newer: bool,
}

impl Database {
    /// Append an activity. Likes go through [`Database::like_video`],
    /// which also maintains the counters.
    pub fn record_activity(
        &self,
        actor_id: i64,
        verb: ActivityVerb,
        object: Option<ObjectRef>,
        target: Option<ObjectRef>,
        now: DateTime<Utc>,
    ) -> Result<ActivityRow> {
        self.with_conn_mut(|conn| insert_activity(conn, actor_id, verb, object, target, now))
    }

    pub fn has_liked(&self, video_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| query_has_liked(conn, video_id, user_id))
    }

    /// Of `video_ids`, the ones `user_id` likes.
    pub fn liked_video_ids(&self, user_id: i64, video_ids: &[i64]) -> Result<Vec<i64>> {
        if video_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT DISTINCT object_id FROM activities
                 WHERE actor_id = ?1 AND verb = ?2 AND object_kind = ?3 AND object_id IN ({})",
                (4..video_ids.len() + 4)
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(user_id),
                Box::new(ActivityVerb::Like.as_str()),
                Box::new(ObjectKind::Video.as_str()),
            ];
            for id in video_ids {
                params.push(Box::new(*id));
            }

            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    /// Users who like the video, most recent like first.
    pub fn likers(&self, video_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT actor_id FROM activities
                 WHERE verb = ?1 AND object_kind = ?2 AND object_id = ?3
                 GROUP BY actor_id
                 ORDER BY MAX(created_at) DESC, MAX(id) DESC",
            )?;
            let ids = stmt
                .query_map(
                    rusqlite::params![
                        ActivityVerb::Like.as_str(),
                        ObjectKind::Video.as_str(),
                        video_id
                    ],
                    |row| row.get(0),
                )?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            ordered_users(conn, &ids)
        })
    }

    /// People the user invited, most recent invitation first, without
    /// repeats or the user themself.
    pub fn recent_contacts(&self, user_id: i64, limit: usize) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT object_id FROM activities
                 WHERE actor_id = ?1 AND verb = ?2 AND object_kind = ?3 AND object_id != ?1
                 GROUP BY object_id
                 ORDER BY MAX(created_at) DESC, MAX(id) DESC
                 LIMIT ?4",
            )?;
            let ids = stmt
                .query_map(
                    rusqlite::params![
                        user_id,
                        ActivityVerb::Invite.as_str(),
                        ObjectKind::User.as_str(),
                        limit as i64
                    ],
                    |row| row.get(0),
                )?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            ordered_users(conn, &ids)
        })
    }

    /// Activities whose object or target is a video the user owns or belongs
    /// to, newest first.
    pub fn activity_feed(
        &self,
        user_id: i64,
        cursor: Option<FeedCursor>,
        limit: usize,
    ) -> Result<FeedPage> {
        self.with_conn(|conn| {
            let base = format!(
                "SELECT {} FROM activities
                 WHERE ((object_kind = ?2 AND object_id IN (SELECT id FROM my_videos))
                     OR (target_kind = ?2 AND target_id IN (SELECT id FROM my_videos)))",
                ActivityRow::COLUMNS
            );
            let with = "WITH my_videos(id) AS (
                            SELECT id FROM videos WHERE owner_id = ?1
                            UNION
                            SELECT video_id FROM video_users WHERE user_id = ?1
                        )";
            let video = ObjectKind::Video.as_str();
            let fetch = (limit + 1) as i64;

            let (sql, params): (String, Vec<Box<dyn rusqlite::ToSql>>) = match &cursor {
                None => (
                    format!("{with} {base} ORDER BY created_at DESC, id DESC LIMIT ?3"),
                    vec![Box::new(user_id), Box::new(video), Box::new(fetch)],
                ),
                Some(FeedCursor::Before { created_at, id }) => (
                    format!(
                        "{with} {base} AND (created_at < ?3 OR (created_at = ?3 AND id < ?4))
                         ORDER BY created_at DESC, id DESC LIMIT ?5"
                    ),
                    vec![
                        Box::new(user_id),
                        Box::new(video),
                        Box::new(to_db_time(*created_at)),
                        Box::new(*id),
                        Box::new(fetch),
                    ],
                ),
                Some(FeedCursor::After { created_at, id }) => (
                    format!(
                        "{with} {base} AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
                         ORDER BY created_at ASC, id ASC LIMIT ?5"
                    ),
                    vec![
                        Box::new(user_id),
                        Box::new(video),
                        Box::new(to_db_time(*created_at)),
                        Box::new(*id),
                        Box::new(fetch),
                    ],
                ),
            };

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params_from_iter(params), ActivityRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let more = rows.len() > limit;
            rows.truncate(limit);

            Ok(match cursor {
                None => FeedPage {
                    rows,
                    has_older: more,
                    has_newer: false,
                },
                Some(FeedCursor::Before { .. }) => FeedPage {
                    rows,
                    has_older: more,
                    has_newer: true,
                },
                Some(FeedCursor::After { .. }) => {
                    rows.reverse();
                    FeedPage {
                        rows,
                        has_older: true,
                        has_newer: more,
                    }
                }
            })
        })
    }
}

pub(crate) fn query_has_liked(conn: &Connection, video_id: i64, user_id: i64) -> Result<bool> {
    let liked: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM activities
                       WHERE actor_id = ?1 AND verb = ?2 AND object_kind = ?3 AND object_id = ?4)",
        rusqlite::params![
            user_id,
            ActivityVerb::Like.as_str(),
            ObjectKind::Video.as_str(),
            video_id
        ],
        |row| row.get(0),
    )?;
    Ok(liked)
}

/// Fetch users keeping the order of `ids`.
fn ordered_users(conn: &Connection, ids: &[i64]) -> Result<Vec<UserRow>> {
    let mut users = query_users(conn, ids)?;
    users.sort_by_key(|u| ids.iter().position(|id| *id == u.id));
    Ok(users)
}

pub(crate) fn insert_activity(
    conn: &Connection,
    actor_id: i64,
    verb: ActivityVerb,
    object: Option<ObjectRef>,
    target: Option<ObjectRef>,
    now: DateTime<Utc>,
) -> Result<ActivityRow> {
    conn.execute(
        "INSERT INTO activities (actor_id, verb, object_kind, object_id, target_kind, target_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            actor_id,
            verb.as_str(),
            object.map(|o| o.kind.as_str()),
            object.map(|o| o.id),
            target.map(|t| t.kind.as_str()),
            target.map(|t| t.id),
            to_db_time(now)
        ],
    )?;
    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!("SELECT {} FROM activities WHERE id = ?1", ActivityRow::COLUMNS),
        [id],
        ActivityRow::from_row,
    )
    .optional()?
    .ok_or_else(|| anyhow!("Activity vanished after insert: {}", id))
}
