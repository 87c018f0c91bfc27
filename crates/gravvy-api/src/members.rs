use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;
use tracing::info;

use gravvy_db::models::{MemberRow, UserRow};
use gravvy_types::PhoneNumber;
use gravvy_types::api::{AddMembersRequest, MemberResponse};
use gravvy_types::events::DomainEvent;

use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::middleware::CurrentUser;
use crate::users::load_user;
use crate::videos::load_video;
use crate::{AppState, Cleanup, cleanup, db_call, publish};

fn render_members(
    state: &AppState,
    hash_key: &str,
    members: &[MemberRow],
    users: &HashMap<i64, UserRow>,
) -> Vec<MemberResponse> {
    members
        .iter()
        .filter_map(|m| {
            users
                .get(&m.user_id)
                .map(|u| state.member_response(hash_key, m, u))
        })
        .collect()
}

/// `GET /videos/{hash_key}/users/`, oldest membership first.
pub async fn list_members(
    State(state): State<AppState>,
    Path(hash_key): Path<String>,
) -> ApiResult<Json<Vec<MemberResponse>>> {
    let video = load_video(&state, hash_key).await?;
    let video_id = video.id;
    let (members, users) = db_call(&state, move |db| {
        let members = db.list_members(video_id)?;
        let ids: Vec<i64> = members.iter().map(|m| m.user_id).collect();
        let users: HashMap<i64, UserRow> =
            db.get_users(&ids)?.into_iter().map(|u| (u.id, u)).collect();
        Ok((members, users))
    })
    .await?;
    Ok(Json(render_members(&state, &video.hash_key, &members, &users)))
}

/// `POST /videos/{hash_key}/users/`: a member invites phone numbers. Unknown
/// numbers become placeholder users; existing members are skipped. Responds
/// with the memberships that were created.
pub async fn add_members(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(hash_key): Path<String>,
    payload: Result<Json<AddMembersRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vec<MemberResponse>>)> {
    let video = load_video(&state, hash_key).await?;
    let (video_id, actor_id) = (video.id, me.id);
    if !db_call(&state, move |db| db.is_associated(video_id, actor_id)).await? {
        return Err(ApiError::Forbidden);
    }
    let Json(req) = payload?;

    let region = me.phone().and_then(|p| p.region());
    let mut errors = FieldErrors::new();
    let mut phones = Vec::with_capacity(req.users.len());
    for entry in &req.users {
        match PhoneNumber::parse_in_region(&entry.phone_number, region) {
            Ok(phone) => phones.push(phone),
            Err(e) => errors.add("users", e.to_string()),
        }
    }
    errors.into_result()?;

    let now = Utc::now();
    let (invited, users) = db_call(&state, move |db| {
        let invited = db.invite_to_video(video_id, &phones, now)?;
        let ids: Vec<i64> = invited.iter().map(|m| m.user_id).collect();
        let users: HashMap<i64, UserRow> =
            db.get_users(&ids)?.into_iter().map(|u| (u.id, u)).collect();
        Ok((invited, users))
    })
    .await?;

    let events = invited
        .iter()
        .map(|m| DomainEvent::MemberInvited {
            actor_id,
            video_id,
            invitee_id: m.user_id,
        })
        .collect();
    publish(&state, events, now).await;

    info!(
        "User {} invited {} users to video {}",
        actor_id,
        invited.len(),
        video.hash_key
    );
    Ok((
        StatusCode::CREATED,
        Json(render_members(&state, &video.hash_key, &invited, &users)),
    ))
}

pub async fn get_member(
    State(state): State<AppState>,
    Path((hash_key, phone_number)): Path<(String, String)>,
) -> ApiResult<Json<MemberResponse>> {
    let video = load_video(&state, hash_key).await?;
    let user = load_user(&state, &phone_number).await?;
    let (video_id, user_id) = (video.id, user.id);
    let member = db_call(&state, move |db| db.get_member(video_id, user_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(state.member_response(&video.hash_key, &member, &user)))
}

/// `DELETE /videos/{hash_key}/users/{phone_number}/`: the video's owner
/// removes anyone; everyone else can only leave. The member's clips go too.
pub async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((hash_key, phone_number)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let video = load_video(&state, hash_key).await?;
    let user = load_user(&state, &phone_number).await?;
    if video.owner_id != me.id && user.id != me.id {
        return Err(ApiError::Forbidden);
    }

    let (video_id, user_id) = (video.id, user.id);
    let now = Utc::now();
    let removed = db_call(&state, move |db| db.remove_member(video_id, user_id, now))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut files: Vec<Cleanup> = Cleanup::stale_photo(&removed.photo_change)
        .into_iter()
        .collect();
    files.extend(removed.clips.iter().map(|d| Cleanup::clip(&d.clip)));
    cleanup(&state, files).await;

    let mut events: Vec<DomainEvent> = removed
        .clips
        .iter()
        .map(|d| DomainEvent::ClipDeleted {
            clip_id: d.clip.id,
            video_id,
            owner_id: d.clip.owner_id,
            actor_id: me.id,
        })
        .collect();
    events.push(DomainEvent::MemberRemoved {
        video_id,
        user_id,
        actor_id: me.id,
    });
    publish(&state, events, now).await;

    Ok(StatusCode::NO_CONTENT)
}
