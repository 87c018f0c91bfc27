use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::Utc;

use gravvy_db::Database;
use gravvy_db::models::{ActivityRow, ClipRow, DeviceRow, MemberRow, UserRow, VideoRow};
use gravvy_media::{MediaStore, Thumbnail};
use gravvy_types::api::{
    ActivityObject, ActivityResponse, ClipMinimal, ClipResponse, DeviceResponse, MemberResponse,
    UserMinimal, UserPrivate, UserPublic, VideoMinimal, VideoResponse,
};
use gravvy_types::events::{ObjectKind, ObjectRef};
use gravvy_types::models::MemberStatus;

use crate::AppStateInner;

/// Everything needed to render one video for one viewer.
#[derive(Debug, Clone)]
pub struct VideoBundle {
    pub video: VideoRow,
    pub owner: Option<UserRow>,
    pub clips: Vec<(ClipRow, Option<UserRow>)>,
    pub liked: bool,
    pub membership: Option<MemberRow>,
}

/// Load the owners, clips, like flag and membership of each video in a few
/// queries. Input order is kept.
pub fn load_video_bundles(
    db: &Database,
    viewer: Option<i64>,
    videos: Vec<VideoRow>,
) -> Result<Vec<VideoBundle>> {
    if videos.is_empty() {
        return Ok(vec![]);
    }
    let ids: Vec<i64> = videos.iter().map(|v| v.id).collect();

    let mut clips_by_video = HashMap::with_capacity(videos.len());
    let mut user_ids: HashSet<i64> = videos.iter().map(|v| v.owner_id).collect();
    for video in &videos {
        let clips = db.list_clips(video.id)?;
        user_ids.extend(clips.iter().map(|c| c.owner_id));
        clips_by_video.insert(video.id, clips);
    }
    let user_ids: Vec<i64> = user_ids.into_iter().collect();
    let users: HashMap<i64, UserRow> = db
        .get_users(&user_ids)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let (liked, memberships): (HashSet<i64>, HashMap<i64, MemberRow>) = match viewer {
        Some(viewer) => (
            db.liked_video_ids(viewer, &ids)?.into_iter().collect(),
            db.memberships_for(viewer, &ids)?
                .into_iter()
                .map(|m| (m.video_id, m))
                .collect(),
        ),
        None => Default::default(),
    };

    let bundles = videos
        .into_iter()
        .map(|video| {
            let clips = clips_by_video
                .remove(&video.id)
                .unwrap_or_default()
                .into_iter()
                .map(|c| {
                    let owner = users.get(&c.owner_id).cloned();
                    (c, owner)
                })
                .collect();
            VideoBundle {
                owner: users.get(&video.owner_id).cloned(),
                liked: liked.contains(&video.id),
                membership: memberships.get(&video.id).cloned(),
                clips,
                video,
            }
        })
        .collect();
    Ok(bundles)
}

/// Activity objects and targets resolved per kind.
#[derive(Debug, Default)]
pub struct ObjectResolver {
    users: HashMap<i64, UserRow>,
    videos: HashMap<i64, VideoRow>,
    clips: HashMap<i64, ClipRow>,
}

impl ObjectResolver {
    /// Fetch the actors, objects and targets of the given activities.
    pub fn load(db: &Database, activities: &[ActivityRow]) -> Result<Self> {
        let mut wanted: HashMap<ObjectKind, HashSet<i64>> = HashMap::new();
        for activity in activities {
            wanted
                .entry(ObjectKind::User)
                .or_default()
                .insert(activity.actor_id);
            for r in [activity.object, activity.target].into_iter().flatten() {
                wanted.entry(r.kind).or_default().insert(r.id);
            }
        }
        let ids = |kind: ObjectKind| -> Vec<i64> {
            wanted
                .get(&kind)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default()
        };

        Ok(Self {
            users: db
                .get_users(&ids(ObjectKind::User))?
                .into_iter()
                .map(|u| (u.id, u))
                .collect(),
            videos: db
                .get_videos(&ids(ObjectKind::Video))?
                .into_iter()
                .map(|v| (v.id, v))
                .collect(),
            clips: db
                .get_clips(&ids(ObjectKind::Clip))?
                .into_iter()
                .map(|c| (c.id, c))
                .collect(),
        })
    }

    fn resolve(&self, media: &MediaStore, r: ObjectRef) -> Option<ActivityObject> {
        match r.kind {
            ObjectKind::User => self
                .users
                .get(&r.id)
                .map(|u| ActivityObject::User(user_minimal(media, u))),
            ObjectKind::Video => self
                .videos
                .get(&r.id)
                .map(|v| ActivityObject::Video(video_minimal(media, v))),
            ObjectKind::Clip => self
                .clips
                .get(&r.id)
                .map(|c| ActivityObject::Clip(clip_minimal(media, c))),
        }
    }

    pub fn render(&self, media: &MediaStore, activity: &ActivityRow) -> ActivityResponse {
        ActivityResponse {
            id: activity.id,
            actor: self
                .users
                .get(&activity.actor_id)
                .map(|u| user_minimal(media, u)),
            verb: activity.verb,
            object: activity.object.and_then(|r| self.resolve(media, r)),
            target: activity.target.and_then(|r| self.resolve(media, r)),
            created_at: activity.created_at,
        }
    }
}

impl AppStateInner {
    pub fn user_url(&self, user: &UserRow) -> String {
        format!("{}/users/{}/", self.settings.base_url, user.phone_number)
    }

    pub fn video_url(&self, hash_key: &str) -> String {
        format!("{}/videos/{}/", self.settings.base_url, hash_key)
    }

    pub fn user_public(&self, user: &UserRow) -> UserPublic {
        UserPublic {
            url: self.user_url(user),
            id: user.id,
            phone_number: user.phone_number.clone(),
            full_name: user.full_name.clone(),
            avatar_thumbnail: self
                .media
                .thumbnail_url(user.avatar.as_deref(), Thumbnail::Avatar),
            updated_at: user.updated_at,
        }
    }

    pub fn user_private(&self, user: &UserRow) -> UserPrivate {
        let public = self.user_public(user);
        UserPrivate {
            videos_url: format!("{}videos/", public.url),
            url: public.url,
            id: public.id,
            phone_number: public.phone_number,
            full_name: public.full_name,
            avatar_thumbnail: public.avatar_thumbnail,
            updated_at: public.updated_at,
        }
    }

    pub fn clip_response(&self, hash_key: &str, clip: &ClipRow, owner: Option<&UserRow>) -> ClipResponse {
        ClipResponse {
            url: format!("{}clips/{}/", self.video_url(hash_key), clip.id),
            id: clip.id,
            owner: owner.map(|u| self.user_public(u)),
            order: clip.order,
            mp4: self.media.url(&clip.mp4),
            photo_thumbnail: self
                .media
                .thumbnail_url(Some(&clip.photo), Thumbnail::ClipPhoto),
            duration: clip.duration,
            updated_at: clip.updated_at,
        }
    }

    pub fn video_response(&self, bundle: &VideoBundle) -> VideoResponse {
        let video = &bundle.video;
        let url = self.video_url(&video.hash_key);
        let (status, new_likes, new_clips) = match &bundle.membership {
            Some(m) => (m.status, m.new_likes_count, m.new_clips_count),
            None => (MemberStatus::None, 0, 0),
        };

        VideoResponse {
            users_url: format!("{}users/", url),
            url,
            hash_key: video.hash_key.clone(),
            owner: bundle.owner.as_ref().map(|u| self.user_public(u)),
            title: video.title.clone(),
            description: video.description.clone(),
            photo_thumbnail: self
                .media
                .thumbnail_url(video.photo.as_deref(), Thumbnail::VideoPhoto),
            photo_small_thumbnail: self
                .media
                .thumbnail_url(video.photo.as_deref(), Thumbnail::VideoPhotoSmall),
            liked: bundle.liked,
            likes_count: video.likes_count,
            plays_count: video.plays_count,
            clips_count: video.clips_count,
            duration: video.duration,
            score: video.score(Utc::now(), &self.settings.rank_weights),
            new_likes_count: new_likes,
            new_clips_count: new_clips,
            membership_status: status,
            created_at: video.created_at,
            updated_at: video.updated_at,
            clips: bundle
                .clips
                .iter()
                .map(|(c, owner)| self.clip_response(&video.hash_key, c, owner.as_ref()))
                .collect(),
        }
    }

    pub fn member_response(&self, hash_key: &str, member: &MemberRow, user: &UserRow) -> MemberResponse {
        MemberResponse {
            url: format!("{}users/{}/", self.video_url(hash_key), user.phone_number),
            user: self.user_public(user),
            status: member.status,
            created_at: member.created_at,
            updated_at: member.updated_at,
        }
    }

    pub fn device_response(&self, device: &DeviceRow, user: &UserRow) -> DeviceResponse {
        DeviceResponse {
            user: self.user_public(user),
            name: device.name.clone(),
            registration_id: device.registration_id.clone(),
            active: device.active,
            date_created: device.date_created,
        }
    }
}

pub fn user_minimal(media: &MediaStore, user: &UserRow) -> UserMinimal {
    UserMinimal {
        phone_number: user.phone_number.clone(),
        full_name: user.full_name.clone(),
        avatar_thumbnail: media.thumbnail_url(user.avatar.as_deref(), Thumbnail::Avatar),
        updated_at: user.updated_at,
    }
}

pub fn video_minimal(media: &MediaStore, video: &VideoRow) -> VideoMinimal {
    VideoMinimal {
        hash_key: video.hash_key.clone(),
        title: video.title.clone(),
        photo_small_thumbnail: media
            .thumbnail_url(video.photo.as_deref(), Thumbnail::VideoPhotoSmall),
        updated_at: video.updated_at,
    }
}

pub fn clip_minimal(media: &MediaStore, clip: &ClipRow) -> ClipMinimal {
    ClipMinimal {
        id: clip.id,
        order: clip.order,
        mp4: media.url(&clip.mp4),
        photo_thumbnail: media.thumbnail_url(Some(&clip.photo), Thumbnail::ClipPhoto),
        duration: clip.duration,
        updated_at: clip.updated_at,
    }
}
