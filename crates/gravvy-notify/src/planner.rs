use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use gravvy_db::Database;
use gravvy_db::models::{UserRow, VideoRow};
use gravvy_types::events::{ClipSnapshot, DomainEvent};

/// Settings that shape notification content.
#[derive(Debug, Clone)]
pub struct NotifySettings {
    /// Public site root, used for invitation links in texts
    pub http_domain: String,
    /// Sound played with alerting pushes
    pub push_sound: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            http_domain: "http://localhost:8000".into(),
            push_sound: "default".into(),
        }
    }
}

/// What the receiving app should do with a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    Default,
    InvitedUserToVideo,
    AddedUser,
    RemovedUser,
    AddedClip,
    DeletedClip,
    Liked,
}

/// Custom payload carried with every push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushExtra {
    pub action: PushAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl PushExtra {
    fn new(action: PushAction, video_hash: &str, actor: Option<&UserRow>) -> Self {
        Self {
            action,
            video: Some(video_hash.to_string()),
            phone_number: actor.map(|u| u.phone_number.clone()),
            full_name: actor.map(|u| u.full_name.clone()),
            message: None,
            object: None,
        }
    }

    fn message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    fn object(mut self, object: impl ToString) -> Self {
        self.object = Some(object.to_string());
        self
    }
}

/// One message to a set of users, before it is expanded per device.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Push {
        user_ids: Vec<i64>,
        /// `None` makes a silent push
        alert: Option<String>,
        extra: PushExtra,
    },
    Sms {
        to: String,
        body: String,
    },
}

/// A single message bound for one device or phone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    Push {
        user_id: i64,
        platform: String,
        registration_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alert: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        badge: Option<i64>,
        extra: PushExtra,
    },
    Sms {
        to: String,
        body: String,
    },
}

/// Decide who hears about an event and what they are told.
pub fn plan_notifications(
    db: &Database,
    event: &DomainEvent,
    settings: &NotifySettings,
) -> Result<Vec<Notification>> {
    match event {
        DomainEvent::VideoLiked { video_id, actor_id } => {
            let Some((video, actor)) = video_and_user(db, *video_id, *actor_id)? else {
                return Ok(vec![]);
            };

            let mut owners: Vec<i64> = db
                .list_clips(video.id)?
                .iter()
                .map(|c| c.owner_id)
                .collect();
            owners.sort_unstable();
            owners.dedup();

            let owners = active_ids(db, &owners, &[actor.id])?;
            let mut skip = owners.clone();
            skip.push(actor.id);
            let others = active_member_ids(db, video.id, &skip)?;

            let extra = PushExtra::new(PushAction::Liked, &video.hash_key, Some(&actor));
            Ok(vec![
                Notification::Push {
                    user_ids: owners,
                    alert: Some(format!(
                        "{} liked {}",
                        actor.short_name(),
                        video.display_title()
                    )),
                    extra: extra.clone().message("Liked video"),
                },
                Notification::Push {
                    user_ids: others,
                    alert: None,
                    extra,
                },
            ])
        }

        DomainEvent::ClipAdded {
            clip_id,
            video_id,
            owner_id,
        } => {
            let Some((video, owner)) = video_and_user(db, *video_id, *owner_id)? else {
                return Ok(vec![]);
            };
            Ok(vec![Notification::Push {
                user_ids: active_member_ids(db, video.id, &[owner.id])?,
                alert: Some(format!(
                    "{} @ {}:\nAdded new clip",
                    owner.short_name(),
                    video.display_title()
                )),
                extra: PushExtra::new(PushAction::AddedClip, &video.hash_key, Some(&owner))
                    .message("Added new clip")
                    .object(clip_id),
            }])
        }

        DomainEvent::ClipDeleted {
            clip_id,
            video_id,
            owner_id,
            ..
        } => {
            let Some(video) = db.get_video(*video_id)? else {
                return Ok(vec![]);
            };
            let owner = db.get_user(*owner_id)?;
            Ok(vec![Notification::Push {
                user_ids: active_member_ids(db, video.id, &[*owner_id])?,
                alert: None,
                extra: PushExtra::new(PushAction::DeletedClip, &video.hash_key, owner.as_ref())
                    .object(clip_id),
            }])
        }

        DomainEvent::MemberInvited {
            actor_id,
            video_id,
            invitee_id,
        } => {
            let Some((video, inviter)) = video_and_user(db, *video_id, *actor_id)? else {
                return Ok(vec![]);
            };
            let Some(invitee) = db.get_user(*invitee_id)? else {
                return Ok(vec![]);
            };

            let mut plan = Vec::with_capacity(2);
            if invitee.is_active {
                plan.push(Notification::Push {
                    user_ids: vec![invitee.id],
                    alert: Some(format!(
                        "{} has invited you to {}",
                        inviter.short_name(),
                        video.display_title()
                    )),
                    extra: PushExtra::new(
                        PushAction::InvitedUserToVideo,
                        &video.hash_key,
                        Some(&inviter),
                    )
                    .message("Invited you to video"),
                });
            } else {
                let link_hash = db
                    .get_member(video.id, invitee.id)?
                    .map(|m| m.hash_key)
                    .unwrap_or_else(|| video.hash_key.clone());
                let url = format!(
                    "{}/v/{}/",
                    settings.http_domain.trim_end_matches('/'),
                    link_hash
                );
                plan.push(Notification::Sms {
                    to: invitee.phone_number.clone(),
                    body: format!(
                        "{} has shared {} with you at {}",
                        inviter.short_name(),
                        video.display_title(),
                        url
                    ),
                });
            }

            let owner = db.get_user(video.owner_id)?;
            plan.push(Notification::Push {
                user_ids: active_member_ids(db, video.id, &[])?,
                alert: None,
                extra: PushExtra::new(PushAction::AddedUser, &video.hash_key, owner.as_ref())
                    .object(&invitee.phone_number),
            });
            Ok(plan)
        }

        DomainEvent::MemberRemoved {
            video_id, user_id, ..
        } => {
            let Some(video) = db.get_video(*video_id)? else {
                return Ok(vec![]);
            };
            let Some(removed) = db.get_user(*user_id)? else {
                return Ok(vec![]);
            };

            let mut user_ids = active_member_ids(db, video.id, &[removed.id])?;
            user_ids.push(removed.id);
            let owner = db.get_user(video.owner_id)?;
            Ok(vec![Notification::Push {
                user_ids,
                alert: None,
                extra: PushExtra::new(PushAction::RemovedUser, &video.hash_key, owner.as_ref())
                    .object(&removed.phone_number),
            }])
        }

        DomainEvent::VideoDeleted {
            video,
            clips,
            member_ids,
        } => {
            let members = active_ids(db, member_ids, &[])?;
            let mut plan = Vec::with_capacity(clips.len());
            for &ClipSnapshot { id, owner_id } in clips {
                let owner = db.get_user(owner_id)?;
                plan.push(Notification::Push {
                    user_ids: members.iter().copied().filter(|&u| u != owner_id).collect(),
                    alert: None,
                    extra: PushExtra::new(PushAction::DeletedClip, &video.hash_key, owner.as_ref())
                        .object(id),
                });
            }
            Ok(plan)
        }

        DomainEvent::VideoUnliked { .. } => Ok(vec![]),
    }
}

/// Expand notifications into per-device deliveries. Alerting pushes carry
/// the sound and every push carries the recipient's current badge.
pub fn expand(
    db: &Database,
    notifications: Vec<Notification>,
    settings: &NotifySettings,
) -> Result<Vec<Delivery>> {
    let mut deliveries = Vec::new();
    for notification in notifications {
        match notification {
            Notification::Sms { to, body } => deliveries.push(Delivery::Sms { to, body }),
            Notification::Push {
                user_ids,
                alert,
                extra,
            } => {
                if user_ids.is_empty() {
                    continue;
                }
                let sound = alert.as_ref().map(|_| settings.push_sound.clone());
                for device in db.devices_for_users(&user_ids)? {
                    deliveries.push(Delivery::Push {
                        user_id: device.user_id,
                        platform: device.platform.as_str().to_string(),
                        registration_id: device.registration_id,
                        alert: alert.clone(),
                        sound: sound.clone(),
                        badge: db.user_badge(device.user_id)?,
                        extra: extra.clone(),
                    });
                }
            }
        }
    }
    Ok(deliveries)
}

pub fn plan_deliveries(
    db: &Database,
    event: &DomainEvent,
    settings: &NotifySettings,
) -> Result<Vec<Delivery>> {
    let notifications = plan_notifications(db, event, settings)?;
    expand(db, notifications, settings)
}

fn video_and_user(db: &Database, video_id: i64, user_id: i64) -> Result<Option<(VideoRow, UserRow)>> {
    let Some(video) = db.get_video(video_id)? else {
        return Ok(None);
    };
    Ok(db.get_user(user_id)?.map(|user| (video, user)))
}

/// Active users among `ids`, minus `skip`.
fn active_ids(db: &Database, ids: &[i64], skip: &[i64]) -> Result<Vec<i64>> {
    let skip: HashSet<i64> = skip.iter().copied().collect();
    let wanted: Vec<i64> = ids.iter().copied().filter(|id| !skip.contains(id)).collect();
    Ok(db
        .get_users(&wanted)?
        .into_iter()
        .filter(|u| u.is_active)
        .map(|u| u.id)
        .collect())
}

fn active_member_ids(db: &Database, video_id: i64, skip: &[i64]) -> Result<Vec<i64>> {
    let ids: Vec<i64> = db
        .list_members(video_id)?
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    active_ids(db, &ids, skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gravvy_db::models::NewClip;
    use gravvy_types::PhoneNumber;
    use gravvy_types::models::DevicePlatform;

    fn clip(name: &str) -> NewClip {
        NewClip {
            mp4: format!("vid/c/{name}.mp4"),
            photo: format!("img/c/{name}.jpg"),
            duration: 2.0,
        }
    }

    fn active(db: &Database, raw: &str, name: &str) -> UserRow {
        let now = Utc::now();
        let phone = PhoneNumber::parse(raw).unwrap();
        let (user, profile) = db.register_inactive_user(&phone, "hash", 4, now).unwrap();
        db.activate_user(user.id, profile.verification_code, "hash", 7, now)
            .unwrap();
        db.update_user_profile(user.id, Some(name), gravvy_db::models::AvatarChange::Keep, now)
            .unwrap();
        db.get_user(user.id).unwrap().unwrap()
    }

    fn settings() -> NotifySettings {
        NotifySettings {
            http_domain: "https://gravvy.test/".into(),
            push_sound: "chime".into(),
        }
    }

    #[test]
    fn like_alerts_clip_owners_and_quietly_updates_the_rest() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let owner = active(&db, "+18005551234", "Ann");
        let liker = active(&db, "+18005551235", "Bob");
        let watcher = active(&db, "+18005551236", "Cid");

        let video = db
            .create_video(
                owner.id,
                "Beach",
                "",
                &clip("a"),
                &[
                    PhoneNumber::parse(&liker.phone_number).unwrap(),
                    PhoneNumber::parse(&watcher.phone_number).unwrap(),
                ],
                now,
            )
            .unwrap()
            .video;

        let plan = plan_notifications(
            &db,
            &DomainEvent::VideoLiked {
                video_id: video.id,
                actor_id: liker.id,
            },
            &settings(),
        )
        .unwrap();

        let Notification::Push {
            user_ids,
            alert,
            extra,
        } = &plan[0]
        else {
            panic!("expected push");
        };
        assert_eq!(user_ids, &vec![owner.id]);
        assert_eq!(alert.as_deref(), Some("Bob liked \"Beach\""));
        assert_eq!(extra.message.as_deref(), Some("Liked video"));
        assert_eq!(extra.action, PushAction::Liked);

        let Notification::Push { user_ids, alert, .. } = &plan[1] else {
            panic!("expected push");
        };
        assert_eq!(user_ids, &vec![watcher.id]);
        assert!(alert.is_none());
    }

    #[test]
    fn inactive_invitee_gets_a_text_with_link() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let owner = active(&db, "+18005551234", "Ann");
        let phone = PhoneNumber::parse("+18005551239").unwrap();

        let created = db
            .create_video(owner.id, "", "", &clip("a"), &[phone.clone()], now)
            .unwrap();
        let invitee = db.get_user_by_phone(&phone).unwrap().unwrap();
        let member = db.get_member(created.video.id, invitee.id).unwrap().unwrap();

        let plan = plan_notifications(
            &db,
            &DomainEvent::MemberInvited {
                actor_id: owner.id,
                video_id: created.video.id,
                invitee_id: invitee.id,
            },
            &settings(),
        )
        .unwrap();

        assert_eq!(
            plan[0],
            Notification::Sms {
                to: "+18005551239".into(),
                body: format!(
                    "Ann has shared a video with you at https://gravvy.test/v/{}/",
                    member.hash_key
                ),
            }
        );
        let Notification::Push { user_ids, extra, .. } = &plan[1] else {
            panic!("expected push");
        };
        assert_eq!(user_ids, &vec![owner.id]);
        assert_eq!(extra.action, PushAction::AddedUser);
        assert_eq!(extra.object.as_deref(), Some("+18005551239"));
    }

    #[test]
    fn membership_changes_reach_every_member_including_the_subject() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let owner = active(&db, "+18005551234", "Ann");
        let friend = active(&db, "+18005551235", "Bob");
        let stranger = PhoneNumber::parse("+18005551239").unwrap();

        let video = db
            .create_video(owner.id, "Beach", "", &clip("a"), &[stranger.clone()], now)
            .unwrap()
            .video;
        db.invite_to_video(video.id, &[PhoneNumber::parse(&friend.phone_number).unwrap()], now)
            .unwrap();

        let plan = plan_notifications(
            &db,
            &DomainEvent::MemberInvited {
                actor_id: owner.id,
                video_id: video.id,
                invitee_id: friend.id,
            },
            &settings(),
        )
        .unwrap();
        let Notification::Push { user_ids, extra, .. } = &plan[0] else {
            panic!("expected push");
        };
        assert_eq!(user_ids, &vec![friend.id]);
        assert_eq!(extra.action, PushAction::InvitedUserToVideo);

        let Notification::Push { user_ids, extra, .. } = &plan[1] else {
            panic!("expected push");
        };
        let mut user_ids = user_ids.clone();
        user_ids.sort();
        assert_eq!(user_ids, vec![owner.id, friend.id]);
        assert_eq!(extra.action, PushAction::AddedUser);

        // Placeholder users are still told they were removed.
        let removed = db.get_user_by_phone(&stranger).unwrap().unwrap();
        assert!(!removed.is_active);
        db.remove_member(video.id, removed.id, now).unwrap().unwrap();

        let plan = plan_notifications(
            &db,
            &DomainEvent::MemberRemoved {
                video_id: video.id,
                user_id: removed.id,
                actor_id: owner.id,
            },
            &settings(),
        )
        .unwrap();
        let Notification::Push { user_ids, extra, .. } = &plan[0] else {
            panic!("expected push");
        };
        let mut user_ids = user_ids.clone();
        user_ids.sort();
        let mut expected = vec![owner.id, friend.id, removed.id];
        expected.sort();
        assert_eq!(user_ids, expected);
        assert_eq!(extra.action, PushAction::RemovedUser);
        assert_eq!(extra.object.as_deref(), Some("+18005551239"));
    }

    #[test]
    fn deliveries_carry_sound_only_when_alerting() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let owner = active(&db, "+18005551234", "Ann");
        let member = active(&db, "+18005551235", "Bob");
        db.register_device(member.id, DevicePlatform::Gcm, "gcm-bob", None, now)
            .unwrap();

        let video = db
            .create_video(
                owner.id,
                "",
                "",
                &clip("a"),
                &[PhoneNumber::parse(&member.phone_number).unwrap()],
                now,
            )
            .unwrap()
            .video;
        let added = db.create_clip(video.id, owner.id, &clip("b"), now).unwrap();

        let deliveries = plan_deliveries(
            &db,
            &DomainEvent::ClipAdded {
                clip_id: added.clip.id,
                video_id: video.id,
                owner_id: owner.id,
            },
            &settings(),
        )
        .unwrap();
        assert_eq!(deliveries.len(), 1);
        let Delivery::Push {
            user_id,
            alert,
            sound,
            badge,
            extra,
            ..
        } = &deliveries[0]
        else {
            panic!("expected push");
        };
        assert_eq!(*user_id, member.id);
        assert_eq!(alert.as_deref(), Some("Ann @ a video:\nAdded new clip"));
        assert_eq!(sound.as_deref(), Some("chime"));
        assert_eq!(*badge, Some(1));
        assert_eq!(extra.object, Some(added.clip.id.to_string()));

        let quiet = plan_deliveries(
            &db,
            &DomainEvent::ClipDeleted {
                clip_id: added.clip.id,
                video_id: video.id,
                owner_id: owner.id,
                actor_id: owner.id,
            },
            &settings(),
        )
        .unwrap();
        let Delivery::Push { alert, sound, .. } = &quiet[0] else {
            panic!("expected push");
        };
        assert!(alert.is_none());
        assert!(sound.is_none());
    }

    #[test]
    fn extra_serializes_snake_case_without_empty_fields() {
        let extra = PushExtra::new(PushAction::InvitedUserToVideo, "abc", None).object(7);
        let json = serde_json::to_value(&extra).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "invited_user_to_video", "video": "abc", "object": "7"})
        );
    }
}
