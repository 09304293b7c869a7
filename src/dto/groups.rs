//! DTO definitions used by the group REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GroupEntity, GroupStatus, MessageEntity, ParticipantEntity, ParticipantStatus},
    dto::{format_timestamp, validation::validate_message_content},
    state::{GroupView, VoteTally},
};

/// Optional viewer used to personalise the vote tally.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ViewerQuery {
    /// User whose own vote is reported as `has_voted`.
    pub user_id: Option<Uuid>,
}

/// Group row as exposed to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupSummary {
    /// Group identifier.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: GroupStatus,
    /// Seats in the group.
    pub max_participants: u32,
    /// Confirmed members.
    pub current_participants: u32,
    /// Assigned venue, once matched.
    pub bar_name: Option<String>,
    /// RFC 3339 meeting time, once a bar was assigned.
    pub meeting_time: Option<String>,
}

impl From<&GroupEntity> for GroupSummary {
    fn from(group: &GroupEntity) -> Self {
        Self {
            id: group.id,
            status: group.status,
            max_participants: group.max_participants,
            current_participants: group.current_participants,
            bar_name: group.bar_name.clone(),
            meeting_time: group.meeting_time.map(format_timestamp),
        }
    }
}

/// Membership entry of a group.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantSummary {
    /// Group joined.
    pub group_id: Uuid,
    /// Member.
    pub user_id: Uuid,
    /// Membership status.
    pub status: ParticipantStatus,
    /// RFC 3339 join time.
    pub joined_at: String,
}

impl From<&ParticipantEntity> for ParticipantSummary {
    fn from(participant: &ParticipantEntity) -> Self {
        Self {
            group_id: participant.group_id,
            user_id: participant.user_id,
            status: participant.status,
            joined_at: format_timestamp(participant.joined_at),
        }
    }
}

/// Chat message posted to a group.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageSummary {
    /// Message identifier.
    pub id: Uuid,
    /// Group the message belongs to.
    pub group_id: Uuid,
    /// Author.
    pub user_id: Uuid,
    /// Message body.
    pub content: String,
    /// RFC 3339 posting time.
    pub created_at: String,
}

impl From<&MessageEntity> for MessageSummary {
    fn from(message: &MessageEntity) -> Self {
        Self {
            id: message.id,
            group_id: message.group_id,
            user_id: message.user_id,
            content: message.content.clone(),
            created_at: format_timestamp(message.created_at),
        }
    }
}

/// Force-confirm tally of a group.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct TallyResponse {
    /// Distinct users with a vote inside the trailing window.
    pub votes_count: usize,
    /// Confirmed participants, all of whom must vote.
    pub required: usize,
    /// Whether the viewer has an in-window vote.
    pub has_voted: bool,
    /// Whether the group can be force confirmed now.
    pub can_confirm: bool,
}

impl From<VoteTally> for TallyResponse {
    fn from(tally: VoteTally) -> Self {
        Self {
            votes_count: tally.votes_count,
            required: tally.required,
            has_voted: tally.has_voted,
            can_confirm: tally.can_confirm,
        }
    }
}

/// Full local view of a group, as last refetched.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupViewResponse {
    /// Group identifier.
    pub group_id: Uuid,
    /// Absent when the group does not exist (or is not visible).
    pub group: Option<GroupSummary>,
    /// Members, one entry per user.
    pub participants: Vec<ParticipantSummary>,
    /// Chat history, oldest first.
    pub messages: Vec<MessageSummary>,
    /// Vote tally for the viewer.
    pub tally: TallyResponse,
    /// Fetch sequence that produced this view.
    pub revision: u64,
    /// RFC 3339 time of the fetch; absent before the first one.
    pub fetched_at: Option<String>,
}

impl GroupViewResponse {
    /// Render `view` together with the viewer's `tally`.
    pub fn new(view: &GroupView, tally: VoteTally) -> Self {
        Self {
            group_id: view.group_id,
            group: view.group.as_ref().map(GroupSummary::from),
            participants: view
                .participants
                .values()
                .map(ParticipantSummary::from)
                .collect(),
            messages: view.messages.iter().map(MessageSummary::from).collect(),
            tally: tally.into(),
            revision: view.revision,
            fetched_at: view.fetched_at.map(format_timestamp),
        }
    }
}

/// Request casting the caller's force-confirm vote.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CastVoteRequest {
    /// Voter.
    pub user_id: Uuid,
}

/// Outcome of a vote.
#[derive(Debug, Serialize, ToSchema)]
pub struct VoteResponse {
    /// Tally after the vote.
    pub tally: TallyResponse,
    /// Whether this vote completed the quorum and confirmed the group.
    pub force_confirmed: bool,
}

/// Request posting a chat message.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SendMessageRequest {
    /// Author; must be a confirmed member.
    pub user_id: Uuid,
    /// 1 to 1000 characters, not blank.
    #[validate(length(min = 1, max = 1000), custom(function = "validate_message_content"))]
    pub content: String,
}

/// Request adding the caller to a group.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinGroupRequest {
    /// User joining.
    pub user_id: Uuid,
}
