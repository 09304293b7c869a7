use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        format_timestamp,
        groups::GroupViewResponse,
        sse::{Handshake, ServerEvent},
    },
    error::ServiceError,
    services::group_sync::GroupSyncHandle,
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_GROUP_VIEW: &str = "group_view";

type EventStream = ReceiverStream<Result<Event, Infallible>>;
type SseEvents = Sse<KeepAliveStream<EventStream>>;

/// Subscribe to the admin event stream, queueing the handshake first.
pub fn subscribe_admin(state: &SharedState) -> (Option<ServerEvent>, broadcast::Receiver<ServerEvent>) {
    let receiver = state.admin_sse().subscribe();
    (handshake_event(state, None), receiver)
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    first: Option<ServerEvent>,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(payload) = first {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "admin SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!("Admin SSE stream disconnected");
    });

    with_keep_alive(ReceiverStream::new(rx))
}

/// Stream every new view of `group_id` to one client.
///
/// The group stays mounted for as long as the client is connected.
pub async fn group_stream(
    state: &SharedState,
    group_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<SseEvents, ServiceError> {
    let view = state.syncs().mount(group_id).await?;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let handshake = handshake_event(state, Some(group_id));

    tokio::spawn(forward_group_views(view, viewer, handshake, tx));

    Ok(with_keep_alive(ReceiverStream::new(rx)))
}

async fn forward_group_views(
    view: GroupSyncHandle,
    viewer: Option<Uuid>,
    handshake: Option<ServerEvent>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let group_id = view.group_id();
    let mut updates = view.watch();

    if let Some(payload) = handshake {
        if tx.send(Ok(to_event(payload))).await.is_err() {
            return;
        }
    }

    loop {
        let snapshot = updates.borrow_and_update().clone();
        let payload = GroupViewResponse::new(&snapshot, view.tally(viewer));
        match ServerEvent::encode(EVENT_GROUP_VIEW, &payload) {
            Ok(event) => {
                if tx.send(Ok(to_event(event))).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(%group_id, error = %err, "failed to serialize group view"),
        }

        tokio::select! {
            _ = tx.closed() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(%group_id, "group SSE stream disconnected");
    view.unmount();
}

fn handshake_event(state: &SharedState, group_id: Option<Uuid>) -> Option<ServerEvent> {
    let handshake = Handshake {
        stream: if group_id.is_some() { "group" } else { "admin" }.to_string(),
        group_id,
        degraded: state.is_degraded(),
        connected_at: format_timestamp(state.clock().now_utc()),
    };
    match ServerEvent::encode(EVENT_HANDSHAKE, &handshake) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize SSE handshake");
            None
        }
    }
}

fn to_event(payload: ServerEvent) -> Event {
    Event::default().event(payload.name).data(payload.data)
}

fn with_keep_alive(stream: EventStream) -> SseEvents {
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
