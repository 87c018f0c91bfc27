use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::ActivityVerb;
use crate::models::MemberStatus;

// -- Account --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub phone_number: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObtainTokenRequest {
    pub phone_number: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    pub phone_number: String,
    pub password: String,
    pub verification_code: u32,
}

/// `{ "detail": ... }` bodies used for boolean outcomes and error messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct Detail<T> {
    pub detail: T,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct UserCreated {
    pub url: String,
    pub id: i64,
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPublic {
    pub url: String,
    pub id: i64,
    pub phone_number: String,
    pub full_name: String,
    pub avatar_thumbnail: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserPrivate {
    pub url: String,
    pub id: i64,
    pub phone_number: String,
    pub full_name: String,
    pub avatar_thumbnail: String,
    pub videos_url: String,
    pub updated_at: DateTime<Utc>,
}

/// Public or private rendering of a user, depending on who asks.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UserView {
    Public(UserPublic),
    Private(UserPrivate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMinimal {
    pub phone_number: String,
    pub full_name: String,
    pub avatar_thumbnail: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhoneEntry {
    pub phone_number: String,
}

// -- Videos --

#[derive(Debug, Serialize, Deserialize)]
pub struct ClipResponse {
    pub url: String,
    pub id: i64,
    pub owner: Option<UserPublic>,
    pub order: i64,
    pub mp4: String,
    pub photo_thumbnail: String,
    pub duration: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipMinimal {
    pub id: i64,
    pub order: i64,
    pub mp4: String,
    pub photo_thumbnail: String,
    pub duration: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub url: String,
    pub hash_key: String,
    pub owner: Option<UserPublic>,
    pub title: String,
    pub description: String,
    pub photo_thumbnail: String,
    pub photo_small_thumbnail: String,
    pub liked: bool,
    pub likes_count: i64,
    pub plays_count: i64,
    pub clips_count: i64,
    pub duration: f64,
    pub score: f64,
    pub new_likes_count: i64,
    pub new_clips_count: i64,
    pub membership_status: MemberStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub clips: Vec<ClipResponse>,
    pub users_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMinimal {
    pub hash_key: String,
    pub title: String,
    pub photo_small_thumbnail: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateVideoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub url: String,
    pub user: UserPublic,
    pub status: MemberStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub users: Vec<PhoneEntry>,
}

// -- Activities --

/// Object or target of an activity, rendered by its kind.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActivityObject {
    User(UserMinimal),
    Video(VideoMinimal),
    Clip(ClipMinimal),
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub id: i64,
    pub actor: Option<UserMinimal>,
    pub verb: ActivityVerb,
    pub object: Option<ActivityObject>,
    pub target: Option<ActivityObject>,
    pub created_at: DateTime<Utc>,
}

// -- Pagination --

#[derive(Debug, Serialize)]
pub struct CursorPage<T> {
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct Results<T> {
    pub results: Vec<T>,
}

// -- Feedback --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    pub body: String,
}

// -- Push --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDeviceRequest {
    pub registration_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub user: UserPublic,
    pub name: String,
    pub registration_id: String,
    pub active: bool,
    pub date_created: DateTime<Utc>,
}
