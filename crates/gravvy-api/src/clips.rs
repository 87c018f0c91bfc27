use std::collections::HashMap;

use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::PathRejection,
    },
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use gravvy_db::models::NewClip;
use gravvy_media::MediaKind;
use gravvy_types::api::ClipResponse;
use gravvy_types::events::DomainEvent;

use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::middleware::CurrentUser;
use crate::multipart::{Form, Upload, check_clip, check_image};
use crate::videos::load_video;
use crate::{ApiSettings, AppState, Cleanup, cleanup, db_call, publish};

/// The validated parts of a clip upload, not yet on disk.
pub(crate) struct ClipUpload {
    mp4: Upload,
    photo: Upload,
    duration: f64,
}

impl ClipUpload {
    /// Write both files to the media store.
    pub(crate) async fn store(self, state: &AppState, now: DateTime<Utc>) -> ApiResult<NewClip> {
        let mp4 = state
            .media
            .save(MediaKind::ClipMp4, &self.mp4.filename, &self.mp4.data, now)
            .await?;
        let photo = match state
            .media
            .save(MediaKind::ClipPhoto, &self.photo.filename, &self.photo.data, now)
            .await
        {
            Ok(photo) => photo,
            Err(e) => {
                if let Err(e) = state.media.delete_file(&mp4).await {
                    warn!("Failed to remove orphaned clip {}: {:#}", mp4, e);
                }
                return Err(e.into());
            }
        };
        Ok(NewClip {
            mp4,
            photo,
            duration: self.duration,
        })
    }
}

/// Pull `mp4`, `photo` and `duration` out of a form, optionally nested as
/// `prefix[field]`. Problems are recorded in `errors` and yield `None`.
pub(crate) fn take_clip(
    form: &mut Form,
    prefix: Option<&str>,
    settings: &ApiSettings,
    errors: &mut FieldErrors,
) -> Option<ClipUpload> {
    let name = |field: &str| match prefix {
        Some(prefix) => format!("{}[{}]", prefix, field),
        None => field.to_string(),
    };
    let (mp4_field, photo_field, duration_field) = (name("mp4"), name("photo"), name("duration"));

    let mp4 = form.take_file(&mp4_field);
    match &mp4 {
        Some(upload) => check_clip(errors, &mp4_field, upload, settings.max_clip_size),
        None => errors.add(&mp4_field, "No file was submitted."),
    }

    let photo = form.take_file(&photo_field);
    match &photo {
        Some(upload) => check_image(errors, &photo_field, upload, settings.max_image_size),
        None => errors.add(&photo_field, "No file was submitted."),
    }

    let duration = match form.text(&duration_field).map(str::trim) {
        None | Some("") => {
            errors.add(&duration_field, "This field is required.");
            None
        }
        Some(raw) => match raw.parse::<f64>() {
            Ok(d) if d.is_finite() && d >= 0.0 => Some(d),
            _ => {
                errors.add(&duration_field, "A valid number is required.");
                None
            }
        },
    };

    Some(ClipUpload {
        mp4: mp4?,
        photo: photo?,
        duration: duration?,
    })
}

/// `GET /videos/{hash_key}/clips/`, in play order.
pub async fn list_clips(
    State(state): State<AppState>,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<Vec<ClipResponse>>> {
    let video = load_video(&state, hash_key).await?;
    let video_id = video.id;
    let (clips, owners) = db_call(&state, move |db| {
        let clips = db.list_clips(video_id)?;
        let ids: Vec<i64> = clips.iter().map(|c| c.owner_id).collect();
        let owners: HashMap<i64, _> = db.get_users(&ids)?.into_iter().map(|u| (u.id, u)).collect();
        Ok((clips, owners))
    })
    .await?;

    Ok(Json(
        clips
            .iter()
            .map(|c| state.clip_response(&video.hash_key, c, owners.get(&c.owner_id)))
            .collect(),
    ))
}

/// `POST /videos/{hash_key}/clips/`: members append a clip.
pub async fn create_clip(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<ClipResponse>)> {
    let video = load_video(&state, hash_key).await?;
    let (video_id, user_id) = (video.id, me.id);
    if !db_call(&state, move |db| db.is_associated(video_id, user_id)).await? {
        return Err(ApiError::Forbidden);
    }

    let mut form = Form::read(multipart?).await?;
    let mut errors = FieldErrors::new();
    let upload = take_clip(&mut form, None, &state.settings, &mut errors);
    errors.into_result()?;
    let upload = upload.ok_or_else(|| ApiError::field("mp4", "No file was submitted."))?;

    let now = Utc::now();
    let new_clip = upload.store(&state, now).await?;
    let files = Cleanup::Clip {
        photo: new_clip.photo.clone(),
        mp4: new_clip.mp4.clone(),
    };
    let created = match db_call(&state, move |db| {
        db.create_clip(video_id, user_id, &new_clip, now)
    })
    .await
    {
        Ok(created) => created,
        Err(e) => {
            cleanup(&state, vec![files]).await;
            return Err(e);
        }
    };

    if let Some(stale) = Cleanup::stale_photo(&created.photo_change) {
        cleanup(&state, vec![stale]).await;
    }
    let event = DomainEvent::ClipAdded {
        clip_id: created.clip.id,
        video_id,
        owner_id: user_id,
    };
    publish(&state, vec![event], now).await;

    info!(
        "User {} added clip {} to video {}",
        user_id, created.clip.id, created.video.hash_key
    );
    Ok((
        StatusCode::CREATED,
        Json(state.clip_response(&created.video.hash_key, &created.clip, Some(&me))),
    ))
}

pub async fn get_clip(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> ApiResult<Json<ClipResponse>> {
    let Path((hash_key, clip_id)) = path?;
    let video = load_video(&state, hash_key).await?;
    let video_id = video.id;
    let (clip, owner) = db_call(&state, move |db| {
        let Some(clip) = db.get_clip(video_id, clip_id)? else {
            return Ok(None);
        };
        let owner = db.get_user(clip.owner_id)?;
        Ok(Some((clip, owner)))
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    Ok(Json(state.clip_response(&video.hash_key, &clip, owner.as_ref())))
}

/// `DELETE /videos/{hash_key}/clips/{clip_id}/`: the clip's owner or the
/// video's owner.
pub async fn delete_clip(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path((hash_key, clip_id)) = path?;
    let video = load_video(&state, hash_key).await?;
    let video_id = video.id;
    let clip = db_call(&state, move |db| db.get_clip(video_id, clip_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    if clip.owner_id != me.id && video.owner_id != me.id {
        return Err(ApiError::Forbidden);
    }

    let now = Utc::now();
    let deleted = db_call(&state, move |db| db.delete_clip(clip_id, now))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut files: Vec<Cleanup> = Cleanup::stale_photo(&deleted.photo_change)
        .into_iter()
        .collect();
    files.push(Cleanup::clip(&deleted.clip));
    cleanup(&state, files).await;

    let event = DomainEvent::ClipDeleted {
        clip_id,
        video_id,
        owner_id: deleted.clip.owner_id,
        actor_id: me.id,
    };
    publish(&state, vec![event], now).await;

    Ok(StatusCode::NO_CONTENT)
}
