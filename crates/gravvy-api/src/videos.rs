use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::StatusCode,
};
use chrono::Utc;
use tracing::info;

use gravvy_db::models::VideoRow;
use gravvy_types::PhoneNumber;
use gravvy_types::api::{Page, UpdateVideoRequest, UserPublic, VideoResponse};
use gravvy_types::events::{ClipSnapshot, DomainEvent, VideoSnapshot};

use crate::clips::take_clip;
use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::middleware::{CurrentUser, MaybeUser};
use crate::multipart::Form;
use crate::pagination::{PageQuery, VIDEO_PAGE_SIZE, page_links, page_number};
use crate::views::load_video_bundles;
use crate::{AppState, Cleanup, cleanup, db_call, publish};

const TITLE_MAX_CHARS: usize = 200;
const DESCRIPTION_MAX_CHARS: usize = 1000;

/// Field name of the repeated invitee numbers in a video creation form.
const INVITEE_FIELD: &str = "users[][phone_number]";

pub(crate) async fn load_video(state: &AppState, hash_key: String) -> ApiResult<VideoRow> {
    db_call(state, move |db| db.get_video_by_hash(&hash_key))
        .await?
        .ok_or(ApiError::NotFound)
}

/// Render one video as `viewer` sees it.
pub(crate) async fn render_video(
    state: &AppState,
    viewer: Option<i64>,
    video: VideoRow,
) -> ApiResult<VideoResponse> {
    let mut bundles =
        db_call(state, move |db| load_video_bundles(db, viewer, vec![video])).await?;
    let bundle = bundles.pop().ok_or(ApiError::NotFound)?;
    Ok(state.video_response(&bundle))
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("Ensure this field has no more than {} characters.", max),
        );
    }
}

/// `GET /videos/`: every video by rank score.
pub async fn list_videos(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<VideoResponse>>> {
    let page = page_number(&query)?;
    let weights = state.settings.rank_weights;
    let viewer = viewer.id();

    let (count, bundles) = db_call(&state, move |db| {
        let (count, videos) = db.list_videos_ranked(Utc::now(), &weights, page, VIDEO_PAGE_SIZE)?;
        Ok((count, load_video_bundles(db, viewer, videos)?))
    })
    .await?;
    if page > 1 && bundles.is_empty() {
        return Err(ApiError::NotFound);
    }

    let url = format!("{}/videos/", state.settings.base_url);
    let (next, previous) = page_links(&url, page, count);
    Ok(Json(Page {
        count,
        next,
        previous,
        results: bundles.iter().map(|b| state.video_response(b)).collect(),
    }))
}

/// `POST /videos/`: a multipart form with the lead clip and the numbers to
/// invite. Numbers without a country code are read in the caller's region.
pub async fn create_video(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    let mut form = Form::read(multipart?).await?;
    let mut errors = FieldErrors::new();

    let title = form.text("title").unwrap_or("").to_string();
    let description = form.text("description").unwrap_or("").to_string();
    check_length(&mut errors, "title", &title, TITLE_MAX_CHARS);
    check_length(&mut errors, "description", &description, DESCRIPTION_MAX_CHARS);

    let region = me.phone().and_then(|p| p.region());
    let mut invitees = Vec::new();
    for raw in form.texts(INVITEE_FIELD) {
        match PhoneNumber::parse_in_region(raw, region) {
            Ok(phone) => invitees.push(phone),
            Err(e) => errors.add("users", e.to_string()),
        }
    }

    let clip = take_clip(&mut form, Some("lead_clip"), &state.settings, &mut errors);
    errors.into_result()?;
    let clip = clip.ok_or_else(|| ApiError::field("lead_clip", "This field is required."))?;

    let now = Utc::now();
    let new_clip = clip.store(&state, now).await?;
    let files = Cleanup::Clip {
        photo: new_clip.photo.clone(),
        mp4: new_clip.mp4.clone(),
    };

    let owner_id = me.id;
    let created = match db_call(&state, move |db| {
        db.create_video(owner_id, &title, &description, &new_clip, &invitees, now)
    })
    .await
    {
        Ok(created) => created,
        Err(e) => {
            cleanup(&state, vec![files]).await;
            return Err(e);
        }
    };

    let events = created
        .invited
        .iter()
        .map(|member| DomainEvent::MemberInvited {
            actor_id: me.id,
            video_id: created.video.id,
            invitee_id: member.user_id,
        })
        .collect();
    publish(&state, events, now).await;

    let response = render_video(&state, Some(me.id), created.video).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_video(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    Ok(Json(render_video(&state, viewer.id(), video).await?))
}

/// `PATCH /videos/{hash_key}/`: owner only.
pub async fn update_video(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
    payload: Result<Json<UpdateVideoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    if video.owner_id != me.id {
        return Err(ApiError::Forbidden);
    }
    let Json(req) = payload?;

    let mut errors = FieldErrors::new();
    if let Some(title) = &req.title {
        check_length(&mut errors, "title", title, TITLE_MAX_CHARS);
    }
    if let Some(description) = &req.description {
        check_length(&mut errors, "description", description, DESCRIPTION_MAX_CHARS);
    }
    errors.into_result()?;

    let video = db_call(&state, move |db| {
        db.update_video(
            video.id,
            req.title.as_deref(),
            req.description.as_deref(),
            Utc::now(),
        )
    })
    .await?;
    Ok(Json(render_video(&state, Some(me.id), video).await?))
}

/// `DELETE /videos/{hash_key}/`: owner only. Rows go first, then the files,
/// then the event that notifies former members.
pub async fn delete_video(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
) -> ApiResult<StatusCode> {
    let video = load_video(&state, hash_key).await?;
    if video.owner_id != me.id {
        return Err(ApiError::Forbidden);
    }

    let now = Utc::now();
    let deleted = db_call(&state, move |db| db.delete_video(video.id))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut files: Vec<Cleanup> = deleted
        .video
        .photo
        .iter()
        .map(|photo| Cleanup::VideoPhotoCache(photo.clone()))
        .collect();
    files.extend(deleted.clips.iter().map(Cleanup::clip));
    cleanup(&state, files).await;

    let event = DomainEvent::VideoDeleted {
        video: VideoSnapshot {
            id: deleted.video.id,
            hash_key: deleted.video.hash_key.clone(),
            title: deleted.video.title.clone(),
            owner_id: deleted.video.owner_id,
        },
        clips: deleted
            .clips
            .iter()
            .map(|c| ClipSnapshot {
                id: c.id,
                owner_id: c.owner_id,
            })
            .collect(),
        member_ids: deleted.member_ids,
    };
    publish(&state, vec![event], now).await;

    info!("User {} deleted video {}", me.id, deleted.video.hash_key);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /videos/{hash_key}/like/`. Liking twice changes nothing.
pub async fn like_video(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    let (video_id, user_id) = (video.id, me.id);
    let now = Utc::now();
    let added = db_call(&state, move |db| db.like_video(video_id, user_id, now)).await?;
    if added {
        let event = DomainEvent::VideoLiked {
            video_id,
            actor_id: user_id,
        };
        publish(&state, vec![event], now).await;
    }

    let video = load_video(&state, video.hash_key).await?;
    Ok(Json(render_video(&state, Some(me.id), video).await?))
}

pub async fn unlike_video(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    let (video_id, user_id) = (video.id, me.id);
    let now = Utc::now();
    let removed = db_call(&state, move |db| db.unlike_video(video_id, user_id, now)).await?;
    if removed {
        let event = DomainEvent::VideoUnliked {
            video_id,
            actor_id: user_id,
        };
        publish(&state, vec![event], now).await;
    }

    let video = load_video(&state, video.hash_key).await?;
    Ok(Json(render_video(&state, Some(me.id), video).await?))
}

pub async fn list_likes(
    State(state): State<AppState>,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<Vec<UserPublic>>> {
    let video = load_video(&state, hash_key).await?;
    let likers = db_call(&state, move |db| db.likers(video.id)).await?;
    Ok(Json(likers.iter().map(|u| state.user_public(u)).collect()))
}

pub async fn play_video(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    let video = db_call(&state, move |db| db.record_play(video.id)).await?;
    Ok(Json(render_video(&state, viewer.id(), video).await?))
}

/// `POST /videos/{hash_key}/clearnotifications/`: members only.
pub async fn clear_notifications(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_video(&state, hash_key).await?;
    let (video_id, user_id) = (video.id, me.id);
    let member = db_call(&state, move |db| {
        db.clear_notifications(video_id, user_id, Utc::now())
    })
    .await?;
    if member.is_none() {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(render_video(&state, Some(me.id), video).await?))
}
