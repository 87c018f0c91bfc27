pub mod account;
pub mod clips;
pub mod error;
pub mod feedback;
pub mod members;
pub mod middleware;
pub mod multipart;
pub mod pagination;
pub mod push;
pub mod users;
pub mod videos;
pub mod views;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use tracing::warn;

use gravvy_db::Database;
use gravvy_db::models::{ClipRow, PhotoChange};
use gravvy_media::MediaStore;
use gravvy_notify::{EventBus, Transport};
use gravvy_types::events::DomainEvent;
use gravvy_types::models::RankWeights;

use crate::error::ApiResult;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub media: MediaStore,
    pub bus: EventBus,
    /// Sends verification codes directly; domain notifications go via the bus
    pub transport: Transport,
    pub settings: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Absolute root of the API, used to build resource URLs
    pub base_url: String,
    pub session_age: chrono::Duration,
    pub activation_days: i64,
    pub verification_code_len: u32,
    pub max_recent_contacts: usize,
    pub max_clip_size: usize,
    pub max_image_size: usize,
    pub rank_weights: RankWeights,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".into(),
            session_age: chrono::Duration::seconds(1_209_600),
            activation_days: 2,
            verification_code_len: 4,
            max_recent_contacts: 20,
            max_clip_size: 20 * 1024 * 1024,
            max_image_size: 5 * 1024 * 1024,
            rank_weights: RankWeights::default(),
        }
    }
}

/// Routes of the REST API, relative to its mount point.
pub fn router(state: AppState) -> Router {
    // A clip upload carries an mp4 and its photo plus a few text fields.
    let body_limit = state.settings.max_clip_size + 2 * state.settings.max_image_size + (1 << 20);

    Router::new()
        .route("/users/", post(account::register))
        .route(
            "/users/{phone_number}/",
            get(users::get_user).patch(users::update_user),
        )
        .route("/users/{phone_number}/videos/", get(users::user_videos))
        .route("/user/", get(users::get_me).patch(users::update_me))
        .route("/user/videos/", get(users::my_videos))
        .route("/user/activities/", get(users::my_activities))
        .route("/user/recentcontacts/", get(users::recent_contacts))
        .route("/account/auth/", post(account::obtain_token))
        .route("/account/activate/", post(account::activate))
        .route("/videos/", get(videos::list_videos).post(videos::create_video))
        .route(
            "/videos/{hash_key}/",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route(
            "/videos/{hash_key}/like/",
            post(videos::like_video).delete(videos::unlike_video),
        )
        .route("/videos/{hash_key}/likes/", get(videos::list_likes))
        .route("/videos/{hash_key}/play/", post(videos::play_video))
        .route(
            "/videos/{hash_key}/clearnotifications/",
            post(videos::clear_notifications),
        )
        .route(
            "/videos/{hash_key}/clips/",
            get(clips::list_clips).post(clips::create_clip),
        )
        .route(
            "/videos/{hash_key}/clips/{clip_id}/",
            get(clips::get_clip).delete(clips::delete_clip),
        )
        .route(
            "/videos/{hash_key}/users/",
            get(members::list_members).post(members::add_members),
        )
        .route(
            "/videos/{hash_key}/users/{phone_number}/",
            get(members::get_member).delete(members::remove_member),
        )
        .route("/feedbacks/", post(feedback::create_feedback))
        .route("/push/apns/", post(push::register_apns))
        .route("/push/gcm/", post(push::register_gcm))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Run a database call on the blocking pool.
pub(crate) async fn db_call<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let out = tokio::task::spawn_blocking(move || f(&db)).await??;
    Ok(out)
}

/// Last step of a write path: hand committed events to the bus. Handler
/// failures are logged by the bus and never reach the client.
pub(crate) async fn publish(state: &AppState, events: Vec<DomainEvent>, at: DateTime<Utc>) {
    if events.is_empty() {
        return;
    }
    let bus = state.bus.clone();
    let published = tokio::task::spawn_blocking(move || {
        for event in events {
            bus.publish(event, at);
        }
    })
    .await;
    if let Err(e) = published {
        warn!("Event publishing task failed: {}", e);
    }
}

/// A media file (or thumbnail cache) left behind by a committed write.
#[derive(Debug, Clone)]
pub(crate) enum Cleanup {
    Avatar(String),
    Clip { photo: String, mp4: String },
    VideoPhotoCache(String),
}

impl Cleanup {
    pub(crate) fn clip(clip: &ClipRow) -> Self {
        Self::Clip {
            photo: clip.photo.clone(),
            mp4: clip.mp4.clone(),
        }
    }

    /// Thumbnails derived from a lead clip photo that is no longer the
    /// video's photo.
    pub(crate) fn stale_photo(change: &PhotoChange) -> Option<Self> {
        change
            .stale()
            .map(|photo| Self::VideoPhotoCache(photo.to_string()))
    }
}

/// File step of a write path. Deletion failures are logged and skipped; the
/// rows are already gone.
pub(crate) async fn cleanup(state: &AppState, items: Vec<Cleanup>) {
    for item in items {
        let result = match &item {
            Cleanup::Avatar(path) => state.media.delete_avatar(path).await,
            Cleanup::Clip { photo, mp4 } => state.media.delete_clip_files(photo, mp4).await,
            Cleanup::VideoPhotoCache(photo) => state.media.delete_video_photo_cache(photo).await,
        };
        if let Err(e) = result {
            warn!("Failed to clean up {:?}: {:#}", item, e);
        }
    }
}
