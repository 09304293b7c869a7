//! Rows owned by the managed backend, mirrored transiently by the coordination layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Table holding one row per group.
pub const GROUPS_TABLE: &str = "groups";
/// Table holding group memberships.
pub const PARTICIPANTS_TABLE: &str = "group_participants";
/// Table holding chat messages.
pub const MESSAGES_TABLE: &str = "group_messages";
/// Table holding force-confirm votes.
pub const VOTES_TABLE: &str = "group_votes";

/// Remote procedure confirming a group ahead of bar assignment.
pub const FORCE_CONFIRM_PROCEDURE: &str = "force_confirm_group";
/// Remote procedure recomputing a user's CRM health score.
pub const HEALTH_SCORE_PROCEDURE: &str = "calculate_health_score";

/// Lifecycle of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Still looking for participants.
    Waiting,
    /// Every seat is taken; waiting for bar assignment.
    Full,
    /// A bar and meeting time are set.
    Confirmed,
    /// The outing happened.
    Completed,
    /// The group was dissolved.
    Cancelled,
}

/// Membership status of a user inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Counts toward the group size and the vote quorum.
    Confirmed,
    /// Joined but not yet confirmed.
    Waiting,
    /// Left the group.
    Left,
}

/// Group row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntity {
    /// Primary key.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: GroupStatus,
    /// Seats in the group.
    pub max_participants: u32,
    /// Confirmed members, maintained by the backend.
    pub current_participants: u32,
    /// Assigned venue, once matched.
    #[serde(default)]
    pub bar_name: Option<String>,
    /// Scheduled meeting time, once matched.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub meeting_time: Option<OffsetDateTime>,
}

/// Membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntity {
    /// Group joined.
    pub group_id: Uuid,
    /// Member.
    pub user_id: Uuid,
    /// Membership status.
    pub status: ParticipantStatus,
    /// Time of the first join.
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

impl ParticipantEntity {
    /// Whether this membership counts toward the group's confirmed size.
    pub fn is_confirmed(&self) -> bool {
        self.status == ParticipantStatus::Confirmed
    }
}

/// Chat message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    /// Primary key.
    pub id: Uuid,
    /// Group the message was posted to.
    pub group_id: Uuid,
    /// Author.
    pub user_id: Uuid,
    /// Message body.
    pub content: String,
    /// Time of posting.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Force-confirm vote row, unique per `(group_id, user_id)` cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntity {
    /// Group voted on.
    pub group_id: Uuid,
    /// Voter.
    pub user_id: Uuid,
    /// Time of the vote; only votes inside the window count.
    #[serde(with = "time::serde::rfc3339")]
    pub voted_at: OffsetDateTime,
}
