use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use random_sync::{
    clock::ManualClock,
    config::AppConfig,
    dao::{
        backend::GroupBackend,
        memory::MemoryBackend,
        models::{GroupEntity, GroupStatus, ParticipantEntity, ParticipantStatus, VoteEntity},
    },
    error::ServiceError,
    realtime::{ChangeHub, group_channel_name},
    services::{
        event_bus::EVENT_GROUP_FORCE_CONFIRMED,
        group_service, voting,
    },
    state::{AppState, SharedState},
};
use time::OffsetDateTime;
use uuid::Uuid;

const START_MS: u64 = 1_700_000_000_000;

struct Harness {
    state: SharedState,
    hub: Arc<ChangeHub>,
    backend: MemoryBackend,
    clock: Arc<ManualClock>,
}

fn harness_with(config: AppConfig) -> Harness {
    let hub = ChangeHub::new(config.channel_capacity);
    let backend = MemoryBackend::new(Some(hub.clone()));
    let clock = Arc::new(ManualClock::new(START_MS));
    let state = AppState::new(config, clock.clone(), hub.clone(), Arc::new(backend.clone()));
    Harness {
        state,
        hub,
        backend,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(AppConfig::default())
}

async fn seed_group(backend: &MemoryBackend, members: usize) -> (Uuid, Vec<Uuid>) {
    let group_id = Uuid::new_v4();
    backend
        .insert_group(GroupEntity {
            id: group_id,
            status: GroupStatus::Waiting,
            max_participants: 5,
            current_participants: 0,
            bar_name: None,
            meeting_time: None,
        })
        .await;

    let mut users = Vec::with_capacity(members);
    for _ in 0..members {
        let user_id = Uuid::new_v4();
        backend
            .upsert_participant(ParticipantEntity {
                group_id,
                user_id,
                status: ParticipantStatus::Confirmed,
                joined_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        users.push(user_id);
    }
    (group_id, users)
}

#[tokio::test]
async fn duplicate_notifications_never_duplicate_rows() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 1).await;
    let view = h.state.syncs().mount(group_id).await.unwrap();
    let mut updates = view.watch();
    let start = view.snapshot().revision;

    // each write publishes one notification; the member and vote are written twice
    let member = ParticipantEntity {
        group_id,
        user_id: users[0],
        status: ParticipantStatus::Confirmed,
        joined_at: OffsetDateTime::UNIX_EPOCH,
    };
    h.backend.upsert_participant(member.clone()).await.unwrap();
    h.backend.upsert_participant(member).await.unwrap();
    let vote = VoteEntity {
        group_id,
        user_id: users[0],
        voted_at: h.state.clock().now_utc(),
    };
    h.backend.insert_vote(vote.clone()).await.unwrap();
    h.backend.insert_vote(vote).await.unwrap();

    updates
        .wait_for(|current| current.revision >= start + 4)
        .await
        .unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.participants.len(), 1);
    assert_eq!(snapshot.votes.len(), 1);
    assert_eq!(view.tally(Some(users[0])).votes_count, 1);
}

#[tokio::test]
async fn remounting_keeps_at_most_one_channel() {
    let h = harness();
    let (group_id, _) = seed_group(&h.backend, 2).await;
    let name = group_channel_name(group_id);

    for _ in 0..5 {
        let first = h.state.syncs().mount(group_id).await.unwrap();
        let second = h.state.syncs().mount(group_id).await.unwrap();
        assert_eq!(h.hub.allocated_channels(), 1);
        assert!(h.hub.is_subscribed(&name));

        drop(first);
        assert!(h.hub.is_subscribed(&name));
        second.unmount();
        assert!(!h.hub.is_subscribed(&name));
        assert_eq!(h.hub.allocated_channels(), 0);
    }
    assert_eq!(h.state.syncs().mounted_groups(), 0);
}

#[tokio::test]
async fn switching_groups_moves_the_channel() {
    let h = harness();
    let (first_group, _) = seed_group(&h.backend, 1).await;
    let (second_group, _) = seed_group(&h.backend, 2).await;

    let view = h.state.syncs().mount(first_group).await.unwrap();
    let view = view.switch_group(second_group).await.unwrap();

    assert_eq!(view.snapshot().participants.len(), 2);
    assert!(!h.hub.is_subscribed(&group_channel_name(first_group)));
    assert!(h.hub.is_subscribed(&group_channel_name(second_group)));
    assert_eq!(h.hub.allocated_channels(), 1);
}

#[tokio::test]
async fn unanimous_votes_force_confirm_the_group() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 3).await;
    let mut admin = h.state.admin_sse().subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _failing = h
        .state
        .bus()
        .subscribe(EVENT_GROUP_FORCE_CONFIRMED, |_| panic!("dashboard widget crashed"));
    let _recorder = h
        .state
        .bus()
        .subscribe(EVENT_GROUP_FORCE_CONFIRMED, move |event| {
            sink.lock().unwrap().push(event.payload.clone());
        });

    for user in &users[..2] {
        let outcome = voting::cast_vote(&h.state, group_id, *user).await.unwrap();
        assert!(!outcome.force_confirmed);
        assert!(!outcome.tally.can_confirm);
    }
    let last = voting::cast_vote(&h.state, group_id, users[2]).await.unwrap();
    assert!(last.force_confirmed);
    assert_eq!(last.tally.votes_count, 3);
    assert_eq!(last.tally.required, 3);

    let group = h.backend.fetch_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Confirmed);

    assert_eq!(seen.lock().unwrap().len(), 1);
    let forwarded = admin.try_recv().unwrap();
    assert_eq!(forwarded.name, EVENT_GROUP_FORCE_CONFIRMED);
}

#[tokio::test]
async fn votes_are_refused_for_outsiders_and_repeats() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 3).await;

    let outsider = voting::cast_vote(&h.state, group_id, Uuid::new_v4()).await;
    assert!(matches!(outsider, Err(ServiceError::InvalidState(_))));

    voting::cast_vote(&h.state, group_id, users[0]).await.unwrap();
    let repeat = voting::cast_vote(&h.state, group_id, users[0]).await;
    assert!(matches!(repeat, Err(ServiceError::Conflict(_))));

    let missing = voting::cast_vote(&h.state, Uuid::new_v4(), users[1]).await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn fourth_vote_attempt_in_a_minute_is_rate_limited() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 3).await;

    voting::cast_vote(&h.state, group_id, users[0]).await.unwrap();
    for _ in 0..2 {
        let repeat = voting::cast_vote(&h.state, group_id, users[0]).await;
        assert!(matches!(repeat, Err(ServiceError::Conflict(_))));
    }
    let blocked = voting::cast_vote(&h.state, group_id, users[0]).await;
    match blocked {
        Err(ServiceError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(300));
        }
        other => panic!("expected a rate limit, got {other:?}"),
    }

    // other users are unaffected
    voting::cast_vote(&h.state, group_id, users[1]).await.unwrap();
}

#[tokio::test]
async fn aged_votes_no_longer_count_toward_quorum() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 3).await;

    voting::cast_vote(&h.state, group_id, users[0]).await.unwrap();
    voting::cast_vote(&h.state, group_id, users[1]).await.unwrap();

    h.clock.advance(Duration::from_secs(61 * 60));
    let late = voting::cast_vote(&h.state, group_id, users[2]).await.unwrap();
    assert!(!late.force_confirmed);
    assert_eq!(late.tally.votes_count, 1);

    let tally = voting::get_tally(&h.state, group_id, Some(users[0])).await.unwrap();
    assert!(!tally.has_voted);
    assert!(!tally.can_confirm);
}

#[tokio::test]
async fn leaving_shrinks_the_quorum() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 3).await;

    voting::cast_vote(&h.state, group_id, users[0]).await.unwrap();
    voting::cast_vote(&h.state, group_id, users[1]).await.unwrap();
    group_service::leave_group(&h.state, group_id, users[2])
        .await
        .unwrap();

    let tally = voting::get_tally(&h.state, group_id, None).await.unwrap();
    assert_eq!(tally.required, 2);
    assert!(tally.can_confirm);
}

#[tokio::test]
async fn only_members_can_post_and_members_see_messages() {
    let h = harness();
    let (group_id, users) = seed_group(&h.backend, 2).await;

    let refused =
        group_service::send_message(&h.state, group_id, Uuid::new_v4(), "hi".into()).await;
    assert!(matches!(refused, Err(ServiceError::InvalidState(_))));
    let blank = group_service::send_message(&h.state, group_id, users[0], "   ".into()).await;
    assert!(matches!(blank, Err(ServiceError::InvalidInput(_))));

    group_service::send_message(&h.state, group_id, users[0], "see you at 8".into())
        .await
        .unwrap();
    let view = group_service::get_group_view(&h.state, group_id, Some(users[1]))
        .await
        .unwrap();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].content, "see you at 8");
}

#[tokio::test]
async fn joining_fills_the_group() {
    let h = harness();
    let (group_id, _) = seed_group(&h.backend, 4).await;

    let newcomer = Uuid::new_v4();
    group_service::join_group(&h.state, group_id, newcomer)
        .await
        .unwrap();
    let again = group_service::join_group(&h.state, group_id, newcomer).await;
    assert!(matches!(again, Err(ServiceError::Conflict(_))));

    let late = group_service::join_group(&h.state, group_id, Uuid::new_v4()).await;
    assert!(matches!(late, Err(ServiceError::InvalidState(_))));

    let view = group_service::get_group_view(&h.state, group_id, None)
        .await
        .unwrap();
    let group = view.group.unwrap();
    assert_eq!(group.current_participants, 5);
    assert_eq!(group.status, GroupStatus::Full);
}

#[tokio::test]
async fn exhausted_request_budget_opens_the_breaker() {
    let mut config = AppConfig::default();
    config.throttle.max_requests = 2;
    let h = harness_with(config);
    let (group_id, _) = seed_group(&h.backend, 1).await;

    // each unmounted resync is one full fetch
    for _ in 0..2 {
        group_service::resync_group(&h.state, group_id, None)
            .await
            .unwrap();
    }
    let refused = group_service::resync_group(&h.state, group_id, None).await;
    assert!(matches!(refused, Err(ServiceError::CircuitOpen { .. })));

    let status = h.state.throttler().status("table:groups");
    assert!(status.blocked);

    h.clock.advance(Duration::from_secs(31));
    group_service::resync_group(&h.state, group_id, None)
        .await
        .unwrap();
}
