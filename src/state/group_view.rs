use std::time::Duration;

use indexmap::IndexMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{GroupEntity, MessageEntity, ParticipantEntity, VoteEntity};

use super::tally::VoteTally;

/// Local, fully refetched picture of one group.
///
/// Every resync replaces the whole view; nothing is merged incrementally.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    /// Group this view follows.
    pub group_id: Uuid,
    /// Group row; `None` when it does not exist.
    pub group: Option<GroupEntity>,
    /// Memberships keyed by user id, in join order.
    pub participants: IndexMap<Uuid, ParticipantEntity>,
    /// Messages in creation order.
    pub messages: Vec<MessageEntity>,
    /// Votes cast inside the vote window at fetch time.
    pub votes: Vec<VoteEntity>,
    /// Sequence number of the fetch that produced this view; zero before the first fetch.
    pub revision: u64,
    /// Time of the fetch that produced this view.
    pub fetched_at: Option<OffsetDateTime>,
}

impl GroupView {
    /// View of a group that has not been fetched yet.
    pub fn empty(group_id: Uuid) -> Self {
        Self {
            group_id,
            group: None,
            participants: IndexMap::new(),
            messages: Vec::new(),
            votes: Vec::new(),
            revision: 0,
            fetched_at: None,
        }
    }

    /// Assemble a view from freshly fetched rows.
    pub fn from_rows(
        group_id: Uuid,
        group: Option<GroupEntity>,
        participants: Vec<ParticipantEntity>,
        mut messages: Vec<MessageEntity>,
        votes: Vec<VoteEntity>,
        revision: u64,
        fetched_at: OffsetDateTime,
    ) -> Self {
        let mut by_user = IndexMap::with_capacity(participants.len());
        for participant in participants {
            by_user.insert(participant.user_id, participant);
        }
        messages.sort_by_key(|message| message.created_at);

        Self {
            group_id,
            group,
            participants: by_user,
            messages,
            votes,
            revision,
            fetched_at: Some(fetched_at),
        }
    }

    /// Participants counting toward the quorum.
    pub fn confirmed_participants(&self) -> usize {
        self.participants
            .values()
            .filter(|participant| participant.is_confirmed())
            .count()
    }

    /// Whether `user_id` is a confirmed member of the group.
    pub fn is_confirmed_member(&self, user_id: Uuid) -> bool {
        self.participants
            .get(&user_id)
            .is_some_and(ParticipantEntity::is_confirmed)
    }

    /// Force-confirm tally for `viewer` at `now`.
    pub fn tally(&self, viewer: Option<Uuid>, now: OffsetDateTime, window: Duration) -> VoteTally {
        VoteTally::compute(
            &self.votes,
            self.confirmed_participants(),
            viewer,
            now,
            window,
        )
    }
}
