use std::{collections::HashSet, time::Duration};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::VoteEntity;

/// Earliest vote time still inside `window`; saturates at the Unix epoch.
pub fn window_start(now: OffsetDateTime, window: Duration) -> OffsetDateTime {
    time::Duration::try_from(window)
        .ok()
        .and_then(|window| now.checked_sub(window))
        .map_or(OffsetDateTime::UNIX_EPOCH, |start| start.max(OffsetDateTime::UNIX_EPOCH))
}

/// Derived force-confirm vote state for one group, as seen by one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    /// Distinct users who voted inside the window.
    pub votes_count: usize,
    /// Votes needed: the number of currently confirmed participants.
    pub required: usize,
    /// Whether the viewer has an in-window vote.
    pub has_voted: bool,
    /// Whether every confirmed participant voted inside the window.
    ///
    /// Always false while the group has no confirmed participants, so an
    /// emptied group cannot be confirmed by zero votes.
    pub can_confirm: bool,
}

impl VoteTally {
    /// Tally `votes` against `current_participants`, ignoring votes older than `window`.
    ///
    /// Votes are counted once per user. An empty group never reaches quorum.
    pub fn compute(
        votes: &[VoteEntity],
        current_participants: usize,
        viewer: Option<Uuid>,
        now: OffsetDateTime,
        window: Duration,
    ) -> Self {
        let cutoff = window_start(now, window);
        let voters: HashSet<Uuid> = votes
            .iter()
            .filter(|vote| vote.voted_at >= cutoff)
            .map(|vote| vote.user_id)
            .collect();

        let votes_count = voters.len();
        Self {
            votes_count,
            required: current_participants,
            has_voted: viewer.is_some_and(|user| voters.contains(&user)),
            can_confirm: current_participants > 0 && votes_count >= current_participants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn vote(user_id: Uuid, voted_at: OffsetDateTime) -> VoteEntity {
        VoteEntity {
            group_id: Uuid::nil(),
            user_id,
            voted_at,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::from_secs(10 * 3_600)
    }

    #[test]
    fn unanimous_fresh_votes_reach_quorum() {
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let votes: Vec<_> = users
            .iter()
            .map(|user| vote(*user, now() - Duration::from_secs(60)))
            .collect();

        let tally = VoteTally::compute(&votes, 5, Some(users[0]), now(), HOUR);
        assert_eq!(tally.votes_count, 5);
        assert!(tally.has_voted);
        assert!(tally.can_confirm);
    }

    #[test]
    fn an_aged_vote_drops_quorum() {
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let mut votes: Vec<_> = users
            .iter()
            .map(|user| vote(*user, now() - Duration::from_secs(60)))
            .collect();
        votes[4].voted_at = now() - HOUR - Duration::from_secs(1);

        let tally = VoteTally::compute(&votes, 5, Some(users[4]), now(), HOUR);
        assert_eq!(tally.votes_count, 4);
        assert!(!tally.has_voted);
        assert!(!tally.can_confirm);
    }

    #[test]
    fn duplicate_votes_count_once() {
        let user = Uuid::new_v4();
        let votes = vec![vote(user, now()), vote(user, now())];
        let tally = VoteTally::compute(&votes, 2, None, now(), HOUR);
        assert_eq!(tally.votes_count, 1);
        assert!(!tally.can_confirm);
    }

    #[test]
    fn shrinking_group_is_recomputed_live() {
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let votes: Vec<_> = users[..2].iter().map(|user| vote(*user, now())).collect();

        assert!(!VoteTally::compute(&votes, 3, None, now(), HOUR).can_confirm);
        assert!(VoteTally::compute(&votes, 2, None, now(), HOUR).can_confirm);
    }

    #[test]
    fn oversized_window_saturates_instead_of_overflowing() {
        assert_eq!(
            window_start(now(), Duration::from_millis(u64::MAX)),
            OffsetDateTime::UNIX_EPOCH
        );
        assert_eq!(window_start(now(), HOUR), now() - HOUR);

        let user = Uuid::new_v4();
        let votes = vec![vote(user, OffsetDateTime::UNIX_EPOCH)];
        let tally = VoteTally::compute(&votes, 1, Some(user), now(), Duration::MAX);
        assert!(tally.can_confirm);
    }

    #[test]
    fn empty_group_never_confirms() {
        let tally = VoteTally::compute(&[], 0, None, now(), HOUR);
        assert!(!tally.can_confirm);
    }
}
