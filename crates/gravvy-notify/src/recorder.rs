use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use gravvy_db::Database;
use gravvy_types::events::{ActivityVerb, DomainEvent, ObjectRef};

use crate::bus::EventHandler;

/// The activity row an event produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySpec {
    pub actor_id: i64,
    pub verb: ActivityVerb,
    pub object: Option<ObjectRef>,
    pub target: Option<ObjectRef>,
}

/// Map an event to its activity. Likes are stored by the like write path
/// itself; unlikes and video deletes remove rows instead.
pub fn activity_for(event: &DomainEvent) -> Option<ActivitySpec> {
    match *event {
        DomainEvent::MemberInvited {
            actor_id,
            video_id,
            invitee_id,
        } => Some(ActivitySpec {
            actor_id,
            verb: ActivityVerb::Invite,
            object: Some(ObjectRef::user(invitee_id)),
            target: Some(ObjectRef::video(video_id)),
        }),
        DomainEvent::ClipAdded {
            clip_id,
            video_id,
            owner_id,
        } => Some(ActivitySpec {
            actor_id: owner_id,
            verb: ActivityVerb::Add,
            object: Some(ObjectRef::clip(clip_id)),
            target: Some(ObjectRef::video(video_id)),
        }),
        DomainEvent::ClipDeleted {
            video_id, actor_id, ..
        } => Some(ActivitySpec {
            actor_id,
            verb: ActivityVerb::Delete,
            object: None,
            target: Some(ObjectRef::video(video_id)),
        }),
        DomainEvent::MemberRemoved {
            video_id,
            user_id,
            actor_id,
        } if actor_id == user_id => Some(ActivitySpec {
            actor_id,
            verb: ActivityVerb::Leave,
            object: None,
            target: Some(ObjectRef::video(video_id)),
        }),
        DomainEvent::MemberRemoved {
            video_id,
            user_id,
            actor_id,
        } => Some(ActivitySpec {
            actor_id,
            verb: ActivityVerb::Delete,
            object: Some(ObjectRef::user(user_id)),
            target: Some(ObjectRef::video(video_id)),
        }),
        DomainEvent::VideoLiked { .. }
        | DomainEvent::VideoUnliked { .. }
        | DomainEvent::VideoDeleted { .. } => None,
    }
}

/// Writes one activity row per event.
pub struct ActivityRecorder {
    db: Arc<Database>,
}

impl ActivityRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl EventHandler for ActivityRecorder {
    fn name(&self) -> &'static str {
        "activity_recorder"
    }

    fn handle(&self, event: &DomainEvent, at: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(spec) = activity_for(event) else {
            return Ok(());
        };

        let row = self
            .db
            .record_activity(spec.actor_id, spec.verb, spec.object, spec.target, at)?;
        debug!("Recorded activity {} ({})", row.id, row.verb.as_str());
        Ok(())
    }
}
