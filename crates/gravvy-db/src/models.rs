/// Database row types. These map directly to SQLite rows and stay distinct
/// from the gravvy-types API models to keep the DB layer independent.
use chrono::{DateTime, SecondsFormat, Utc};
use gravvy_types::PhoneNumber;
use gravvy_types::events::{ActivityVerb, ObjectKind, ObjectRef};
use gravvy_types::models::{DevicePlatform, MemberStatus, RankWeights};
use rusqlite::Row;
use rusqlite::types::Type;

/// Titles longer than this are truncated when rendered into messages.
pub const VIDEO_TITLE_LENGTH: usize = 50;

pub fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub phone_number: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub password: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub(crate) const COLUMNS: &'static str =
        "id, phone_number, full_name, avatar, password, is_active, date_joined, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            phone_number: row.get(1)?,
            full_name: row.get(2)?,
            avatar: row.get(3)?,
            password: row.get(4)?,
            is_active: row.get(5)?,
            date_joined: get_time(row, 6)?,
            updated_at: get_time(row, 7)?,
        })
    }

    /// Name used in notification texts: full name, else the phone number.
    pub fn short_name(&self) -> &str {
        let name = self.full_name.trim();
        if name.is_empty() {
            &self.phone_number
        } else {
            name
        }
    }

    pub fn phone(&self) -> Option<PhoneNumber> {
        PhoneNumber::parse(&self.phone_number).ok()
    }

    /// Placeholder users carry a `!`-prefixed password that no hash matches.
    pub fn has_usable_password(&self) -> bool {
        !self.password.starts_with('!')
    }
}

#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: i64,
    pub key: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRow {
    pub(crate) const COLUMNS: &'static str = "id, key, user_id, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            user_id: row.get(2)?,
            created_at: get_time(row, 3)?,
            updated_at: get_time(row, 4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationProfileRow {
    pub id: i64,
    pub user_id: i64,
    pub verification_code: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationProfileRow {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, verification_code, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            verification_code: row.get(2)?,
            created_at: get_time(row, 3)?,
            updated_at: get_time(row, 4)?,
        })
    }

    /// A code is expired once `updated_at + activation_days <= now`. A
    /// window too large to represent never runs out.
    pub fn is_expired(&self, now: DateTime<Utc>, activation_days: i64) -> bool {
        chrono::Duration::try_days(activation_days)
            .and_then(|window| self.updated_at.checked_add_signed(window))
            .is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Clone)]
pub struct VideoRow {
    pub id: i64,
    pub hash_key: String,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub photo: Option<String>,
    pub likes_count: i64,
    pub plays_count: i64,
    pub clips_count: i64,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRow {
    pub(crate) const COLUMNS: &'static str = "id, hash_key, owner_id, title, description, photo, \
         likes_count, plays_count, clips_count, duration, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hash_key: row.get(1)?,
            owner_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            photo: row.get(5)?,
            likes_count: row.get(6)?,
            plays_count: row.get(7)?,
            clips_count: row.get(8)?,
            duration: row.get(9)?,
            created_at: get_time(row, 10)?,
            updated_at: get_time(row, 11)?,
        })
    }

    /// Title as it appears in push and SMS texts.
    pub fn display_title(&self) -> String {
        render_title(&self.title)
    }

    pub fn score(&self, now: DateTime<Utc>, weights: &RankWeights) -> f64 {
        let hours = (now - self.created_at).num_milliseconds() as f64 / 3_600_000.0;
        weights.score(self.plays_count, self.likes_count, hours)
    }
}

pub fn render_title(title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        return "a video".to_string();
    }

    if title.chars().count() > VIDEO_TITLE_LENGTH {
        let cut: String = title.chars().take(VIDEO_TITLE_LENGTH - 3).collect();
        format!("\"{}...\"", cut)
    } else {
        format!("\"{}\"", title)
    }
}

#[derive(Debug, Clone)]
pub struct ClipRow {
    pub id: i64,
    pub video_id: i64,
    pub owner_id: i64,
    pub order: i64,
    pub mp4: String,
    pub photo: String,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClipRow {
    pub(crate) const COLUMNS: &'static str =
        "id, video_id, owner_id, ord, mp4, photo, duration, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            owner_id: row.get(2)?,
            order: row.get(3)?,
            mp4: row.get(4)?,
            photo: row.get(5)?,
            duration: row.get(6)?,
            created_at: get_time(row, 7)?,
            updated_at: get_time(row, 8)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub id: i64,
    pub video_id: i64,
    pub user_id: i64,
    pub hash_key: String,
    pub status: MemberStatus,
    pub new_likes_count: i64,
    pub new_clips_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemberRow {
    pub(crate) const COLUMNS: &'static str = "id, video_id, user_id, hash_key, status, \
         new_likes_count, new_clips_count, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let code: i64 = row.get(4)?;
        let status = MemberStatus::from_code(code)
            .ok_or_else(|| conversion_error(4, format!("invalid member status: {}", code)))?;

        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            user_id: row.get(2)?,
            hash_key: row.get(3)?,
            status,
            new_likes_count: row.get(5)?,
            new_clips_count: row.get(6)?,
            created_at: get_time(row, 7)?,
            updated_at: get_time(row, 8)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub id: i64,
    pub actor_id: i64,
    pub verb: ActivityVerb,
    pub object: Option<ObjectRef>,
    pub target: Option<ObjectRef>,
    pub created_at: DateTime<Utc>,
}

fn get_object_ref(
    row: &Row<'_>,
    kind_idx: usize,
    id_idx: usize,
) -> rusqlite::Result<Option<ObjectRef>> {
    let kind: Option<String> = row.get(kind_idx)?;
    let id: Option<i64> = row.get(id_idx)?;
    match (kind, id) {
        (Some(kind), Some(id)) => {
            let kind: ObjectKind = kind.parse().map_err(|e| conversion_error(kind_idx, e))?;
            Ok(Some(ObjectRef { kind, id }))
        }
        _ => Ok(None),
    }
}

impl ActivityRow {
    pub(crate) const COLUMNS: &'static str =
        "id, actor_id, verb, object_kind, object_id, target_kind, target_id, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let verb: String = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            actor_id: row.get(1)?,
            verb: verb.parse().map_err(|e| conversion_error(2, e))?,
            object: get_object_ref(row, 3, 4)?,
            target: get_object_ref(row, 5, 6)?,
            created_at: get_time(row, 7)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackRow {
    pub id: i64,
    pub user_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub id: i64,
    pub user_id: i64,
    pub platform: DevicePlatform,
    pub registration_id: String,
    pub name: String,
    pub active: bool,
    pub date_created: DateTime<Utc>,
}

impl DeviceRow {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, platform, registration_id, name, active, date_created";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let platform: String = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            platform: platform.parse().map_err(|e| conversion_error(2, e))?,
            registration_id: row.get(3)?,
            name: row.get(4)?,
            active: row.get(5)?,
            date_created: get_time(row, 6)?,
        })
    }
}

// -- Write-path outcomes --

/// Cached video photo before and after a write. Callers delete the derived
/// thumbnails of `previous` when it differs from `current`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoChange {
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl PhotoChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// The photo whose thumbnails went stale, if any.
    pub fn stale(&self) -> Option<&str> {
        if self.changed() {
            self.previous.as_deref()
        } else {
            None
        }
    }
}

/// Media of a clip about to be inserted.
#[derive(Debug, Clone)]
pub struct NewClip {
    pub mp4: String,
    pub photo: String,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct CreatedVideo {
    pub video: VideoRow,
    pub lead_clip: ClipRow,
    pub invited: Vec<MemberRow>,
}

#[derive(Debug, Clone)]
pub struct CreatedClip {
    pub clip: ClipRow,
    pub video: VideoRow,
    pub photo_change: PhotoChange,
}

#[derive(Debug, Clone)]
pub struct DeletedClip {
    pub clip: ClipRow,
    pub was_lead: bool,
    pub photo_change: PhotoChange,
}

#[derive(Debug, Clone)]
pub struct DeletedVideo {
    pub video: VideoRow,
    pub clips: Vec<ClipRow>,
    /// Users that were members right before the delete.
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct RemovedMember {
    pub member: MemberRow,
    pub clips: Vec<DeletedClip>,
    pub photo_change: PhotoChange,
}

#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub user: UserRow,
    /// Previous avatar file, when the avatar was replaced or cleared.
    pub replaced_avatar: Option<String>,
}

/// Outcome of a token lookup.
#[derive(Debug, Clone)]
pub enum TokenCheck {
    Valid(UserRow),
    Unknown,
    Inactive,
    Expired,
}

/// What to do with a user's avatar in a profile update.
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarChange {
    Keep,
    Clear,
    Replace(String),
}
