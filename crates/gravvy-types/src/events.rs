use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of activity verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityVerb {
    Add,
    Delete,
    Follow,
    Invite,
    Leave,
    Like,
    Play,
    Post,
    Share,
    StopFollowing,
    Unlike,
    Unshare,
}

impl ActivityVerb {
    pub const ALL: [ActivityVerb; 12] = [
        Self::Add,
        Self::Delete,
        Self::Follow,
        Self::Invite,
        Self::Leave,
        Self::Like,
        Self::Play,
        Self::Post,
        Self::Share,
        Self::StopFollowing,
        Self::Unlike,
        Self::Unshare,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Follow => "follow",
            Self::Invite => "invite",
            Self::Leave => "leave",
            Self::Like => "like",
            Self::Play => "play",
            Self::Post => "post",
            Self::Share => "share",
            Self::StopFollowing => "stop-following",
            Self::Unlike => "unlike",
            Self::Unshare => "unshare",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Add => "added",
            Self::Delete => "deleted",
            Self::Follow => "started following",
            Self::Invite => "invited",
            Self::Leave => "left",
            Self::Like => "liked",
            Self::Play => "played",
            Self::Post => "posted",
            Self::Share => "shared",
            Self::StopFollowing => "stopped following",
            Self::Unlike => "unliked",
            Self::Unshare => "unshared",
        }
    }
}

impl fmt::Display for ActivityVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| format!("unknown activity verb: {s}"))
    }
}

/// Discriminant of the entities an activity can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    User,
    Video,
    Clip,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Video => "video",
            Self::Clip => "clip",
        }
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "video" => Ok(Self::Video),
            "clip" => Ok(Self::Clip),
            other => Err(format!("unknown object kind: {other}")),
        }
    }
}

/// Polymorphic reference to a user, video or clip row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: i64,
}

impl ObjectRef {
    pub fn user(id: i64) -> Self {
        Self { kind: ObjectKind::User, id }
    }

    pub fn video(id: i64) -> Self {
        Self { kind: ObjectKind::Video, id }
    }

    pub fn clip(id: i64) -> Self {
        Self { kind: ObjectKind::Clip, id }
    }
}

/// What a deleted video looked like, captured before its rows went away.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSnapshot {
    pub id: i64,
    pub hash_key: String,
    pub title: String,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipSnapshot {
    pub id: i64,
    pub owner_id: i64,
}

/// Domain events published after a mutation has been committed.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A user was added to a video by another member
    MemberInvited {
        actor_id: i64,
        video_id: i64,
        invitee_id: i64,
    },

    /// A clip was appended to a video
    ClipAdded {
        clip_id: i64,
        video_id: i64,
        owner_id: i64,
    },

    /// A clip was removed from a video that still exists
    ClipDeleted {
        clip_id: i64,
        video_id: i64,
        owner_id: i64,
        actor_id: i64,
    },

    /// A user liked a video
    VideoLiked { video_id: i64, actor_id: i64 },

    /// A user withdrew their like
    VideoUnliked { video_id: i64, actor_id: i64 },

    /// A membership was dropped, either by the member or by another member
    MemberRemoved {
        video_id: i64,
        user_id: i64,
        actor_id: i64,
    },

    /// A video and everything under it was deleted
    VideoDeleted {
        video: VideoSnapshot,
        clips: Vec<ClipSnapshot>,
        member_ids: Vec<i64>,
    },
}

impl DomainEvent {
    /// Returns the video this event concerns.
    pub fn video_id(&self) -> i64 {
        match self {
            Self::MemberInvited { video_id, .. }
            | Self::ClipAdded { video_id, .. }
            | Self::ClipDeleted { video_id, .. }
            | Self::VideoLiked { video_id, .. }
            | Self::VideoUnliked { video_id, .. }
            | Self::MemberRemoved { video_id, .. } => *video_id,
            Self::VideoDeleted { video, .. } => video.id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MemberInvited { .. } => "member_invited",
            Self::ClipAdded { .. } => "clip_added",
            Self::ClipDeleted { .. } => "clip_deleted",
            Self::VideoLiked { .. } => "video_liked",
            Self::VideoUnliked { .. } => "video_unliked",
            Self::MemberRemoved { .. } => "member_removed",
            Self::VideoDeleted { .. } => "video_deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_from_their_identifiers() {
        for verb in ActivityVerb::ALL {
            assert_eq!(verb.as_str().parse::<ActivityVerb>(), Ok(verb));
        }
        assert!("poke".parse::<ActivityVerb>().is_err());
        assert_eq!(
            serde_json::to_string(&ActivityVerb::StopFollowing).unwrap(),
            "\"stop-following\""
        );
    }
}
