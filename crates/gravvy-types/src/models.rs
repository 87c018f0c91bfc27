use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// How far a member has engaged with a video. Only ever escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MemberStatus {
    /// Not a member at all; used when annotating videos for non-members.
    #[default]
    None,
    Invited,
    Viewed,
    Contributed,
}

impl MemberStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Invited => 1,
            Self::Viewed => 2,
            Self::Contributed => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Invited),
            2 => Some(Self::Viewed),
            3 => Some(Self::Contributed),
            _ => None,
        }
    }

    /// The higher of the two statuses.
    pub fn escalate(self, to: MemberStatus) -> MemberStatus {
        self.max(to)
    }
}

impl Serialize for MemberStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

/// Push platforms a device token can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevicePlatform {
    Apns,
    Gcm,
}

impl DevicePlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apns => "apns",
            Self::Gcm => "gcm",
        }
    }
}

impl fmt::Display for DevicePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevicePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apns" => Ok(Self::Apns),
            "gcm" => Ok(Self::Gcm),
            other => Err(format!("unknown device platform: {other}")),
        }
    }
}

/// Weights of the decaying popularity rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub plays: f64,
    pub likes: f64,
    pub gravity: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            plays: 1.0,
            likes: 2.0,
            gravity: 1.8,
        }
    }
}

impl RankWeights {
    /// `(w1*plays + w2*likes) / (hours + 2)^gravity`
    pub fn score(&self, plays: i64, likes: i64, hours_since_created: f64) -> f64 {
        let points = self.plays * plays as f64 + self.likes * likes as f64;
        points / (hours_since_created.max(0.0) + 2.0).powf(self.gravity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_escalation_never_lowers() {
        assert_eq!(
            MemberStatus::Invited.escalate(MemberStatus::Contributed),
            MemberStatus::Contributed
        );
        assert_eq!(
            MemberStatus::Contributed.escalate(MemberStatus::Viewed),
            MemberStatus::Contributed
        );
        assert_eq!(MemberStatus::from_code(2), Some(MemberStatus::Viewed));
        assert_eq!(MemberStatus::from_code(9), None);
    }

    #[test]
    fn score_decays_with_age() {
        let weights = RankWeights::default();
        let fresh = weights.score(10, 5, 0.0);
        let old = weights.score(10, 5, 48.0);
        assert!(fresh > old);
        assert_eq!(weights.score(0, 0, 1.0), 0.0);

        let flat = RankWeights { plays: 1.0, likes: 1.0, gravity: 1.0 };
        assert!((flat.score(3, 1, 2.0) - 1.0).abs() < f64::EPSILON);
    }
}
