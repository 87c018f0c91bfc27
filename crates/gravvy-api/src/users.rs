use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::header,
};
use chrono::Utc;
use tracing::info;

use gravvy_db::models::{AvatarChange, UserRow};
use gravvy_media::MediaKind;
use gravvy_types::PhoneNumber;
use gravvy_types::api::{
    ActivityResponse, CursorPage, Results, UpdateUserRequest, UserPrivate, UserPublic, UserView,
    VideoResponse,
};

use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::middleware::{CurrentUser, MaybeUser};
use crate::multipart::{Form, check_image};
use crate::pagination::{ACTIVITY_PAGE_SIZE, CursorQuery, decode_cursor, feed_links};
use crate::views::{ObjectResolver, load_video_bundles};
use crate::{AppState, Cleanup, cleanup, db_call};

/// Look up a user by the phone number in the URL. Unparseable numbers are
/// treated like unknown ones.
pub(crate) async fn load_user(state: &AppState, phone_number: &str) -> ApiResult<UserRow> {
    let phone = PhoneNumber::parse(phone_number).map_err(|_| ApiError::NotFound)?;
    db_call(state, move |db| db.get_user_by_phone(&phone))
        .await?
        .ok_or(ApiError::NotFound)
}

/// `GET /users/{phone_number}/`: the public view, or the private one when
/// asking about yourself.
pub async fn get_user(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(phone_number): Path<String>,
) -> ApiResult<Json<UserView>> {
    let user = load_user(&state, &phone_number).await?;
    let view = if viewer.id() == Some(user.id) {
        UserView::Private(state.user_private(&user))
    } else {
        UserView::Public(state.user_public(&user))
    };
    Ok(Json(view))
}

/// `PATCH /users/{phone_number}/`: only the user themself may edit.
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(phone_number): Path<String>,
    req: Request,
) -> ApiResult<Json<UserPrivate>> {
    let user = load_user(&state, &phone_number).await?;
    if user.id != me.id {
        return Err(ApiError::Forbidden);
    }
    update_profile(&state, me, req).await
}

/// `GET /users/{phone_number}/videos/`: only readable by the user themself.
pub async fn user_videos(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(phone_number): Path<String>,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    let user = load_user(&state, &phone_number).await?;
    if user.id != me.id {
        return Err(ApiError::Forbidden);
    }
    videos_of(&state, user.id).await
}

pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<UserPrivate> {
    Json(state.user_private(&me))
}

pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    req: Request,
) -> ApiResult<Json<UserPrivate>> {
    update_profile(&state, me, req).await
}

pub async fn my_videos(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    videos_of(&state, me.id).await
}

/// `GET /user/activities/`: activity on videos the caller belongs to, newest
/// first, cursor paginated.
pub async fn my_activities(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Query(query): Query<CursorQuery>,
) -> ApiResult<Json<CursorPage<ActivityResponse>>> {
    let cursor = query.cursor.as_deref().map(decode_cursor).transpose()?;

    let (page, resolver) = db_call(&state, move |db| {
        let page = db.activity_feed(me.id, cursor, ACTIVITY_PAGE_SIZE)?;
        let resolver = ObjectResolver::load(db, &page.rows)?;
        Ok((page, resolver))
    })
    .await?;

    let url = format!("{}/user/activities/", state.settings.base_url);
    let (next, previous) = feed_links(&url, &page);
    let results = page
        .rows
        .iter()
        .map(|activity| resolver.render(&state.media, activity))
        .collect();
    Ok(Json(CursorPage {
        next,
        previous,
        results,
    }))
}

/// `GET /user/recentcontacts/`: people the caller invited lately.
pub async fn recent_contacts(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> ApiResult<Json<Results<UserPublic>>> {
    let limit = state.settings.max_recent_contacts;
    let contacts = db_call(&state, move |db| db.recent_contacts(me.id, limit)).await?;
    Ok(Json(Results {
        results: contacts.iter().map(|u| state.user_public(u)).collect(),
    }))
}

async fn videos_of(state: &AppState, user_id: i64) -> ApiResult<Json<Vec<VideoResponse>>> {
    let bundles = db_call(state, move |db| {
        let videos = db.list_user_videos(user_id)?;
        load_video_bundles(db, Some(user_id), videos)
    })
    .await?;
    Ok(Json(
        bundles.iter().map(|b| state.video_response(b)).collect(),
    ))
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

/// Apply a JSON or multipart profile edit. Only multipart bodies can carry
/// an avatar; an empty `avatar` text field clears it.
async fn update_profile(state: &AppState, me: UserRow, req: Request) -> ApiResult<Json<UserPrivate>> {
    let now = Utc::now();
    let (full_name, avatar) = if is_multipart(&req) {
        let multipart = Multipart::from_request(req, state).await?;
        let mut form = Form::read(multipart).await?;
        let full_name = form.text("full_name").map(str::to_string);

        let avatar = match form.take_file("avatar") {
            Some(upload) => {
                let mut errors = FieldErrors::new();
                check_image(&mut errors, "avatar", &upload, state.settings.max_image_size);
                errors.into_result()?;
                let path = state
                    .media
                    .save(MediaKind::Avatar, &upload.filename, &upload.data, now)
                    .await?;
                AvatarChange::Replace(path)
            }
            None if form.text("avatar") == Some("") => AvatarChange::Clear,
            None => AvatarChange::Keep,
        };
        (full_name, avatar)
    } else {
        let Json(body) = Json::<UpdateUserRequest>::from_request(req, state).await?;
        (body.full_name, AvatarChange::Keep)
    };

    let update = db_call(state, move |db| {
        db.update_user_profile(me.id, full_name.as_deref(), avatar, now)
    })
    .await?;
    info!("Updated profile of user {}", update.user.id);

    if let Some(old) = update.replaced_avatar {
        cleanup(state, vec![Cleanup::Avatar(old)]).await;
    }
    Ok(Json(state.user_private(&update.user)))
}
