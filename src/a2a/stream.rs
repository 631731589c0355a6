//! Server-Sent Events bridge from the [`EventBus`] to HTTP clients.
//!
//! A connection first receives the replay backlog after its `Last-Event-ID`
//! and then live events. The bus subscription is registered before the
//! backlog is read, so anything published in between arrives twice; live
//! events at or below the backlog's last sequence are dropped.
//!
//! Each connection buffers at most [`STREAM_BUFFER`] undelivered events. A
//! client that falls further behind has its stream closed and is expected to
//! reconnect with the last id it saw.

use crate::a2a::events::{Event, EventBus, Subscription};
use axum::response::sse::Event as SseEvent;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

pub const LAST_EVENT_ID: &str = "last-event-id";

/// SSE event name sent when the requested `Last-Event-ID` is no longer retained.
pub const REPLAY_EXPIRED: &str = "replay.expired";

/// Live events held per connection before it is treated as lagging.
pub const STREAM_BUFFER: usize = 256;

/// What a connection emits, before SSE encoding.
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    /// The id the client resumed from has been evicted.
    ReplayExpired(String),
    Event(Event),
}

/// Tears down the bus subscription when the client goes away.
struct ConnectionGuard {
    bus: EventBus,
    subscription: Subscription,
    client_id: String,
    lagged: Arc<AtomicBool>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        self.bus.agent_disconnected(&self.client_id);
    }
}

/// Open an event stream for `client_id`, resuming after `last_event_id`.
pub fn event_stream(
    bus: &EventBus,
    client_id: &str,
    last_event_id: Option<&str>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + use<> {
    frames(bus, client_id, last_event_id, STREAM_BUFFER)
        .map(|frame| Ok::<_, Infallible>(to_sse(&frame)))
}

fn frames(
    bus: &EventBus,
    client_id: &str,
    last_event_id: Option<&str>,
    buffer: usize,
) -> impl Stream<Item = Frame> + Send + use<> {
    let (tx, rx) = mpsc::channel::<Event>(buffer);
    let lagged = Arc::new(AtomicBool::new(false));
    let overflow = Arc::clone(&lagged);
    let subscription = bus.subscribe(move |event| {
        if overflow.load(Ordering::Acquire) {
            return Ok(());
        }
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                overflow.store(true, Ordering::Release);
                Err(format!("event stream fell {} events behind", buffer).into())
            }
            Err(TrySendError::Closed(_)) => Err("event stream closed".into()),
        }
    });

    let replay = bus.replay(last_event_id);
    let high_water = replay.events.last().map(|e| e.sequence);

    tracing::debug!(
        client_id,
        backlog = replay.events.len(),
        expired = replay.expired,
        "A2A: event stream opened"
    );
    bus.agent_connected(client_id, None, None);

    let guard = ConnectionGuard {
        bus: bus.clone(),
        subscription,
        client_id: client_id.to_string(),
        lagged,
    };

    let notice = replay
        .expired
        .then(|| Frame::ReplayExpired(last_event_id.unwrap_or_default().to_string()));

    let live = stream::unfold((rx, guard), move |(mut rx, guard)| async move {
        loop {
            if guard.lagged.load(Ordering::Acquire) {
                tracing::warn!(client_id = %guard.client_id, "A2A: event stream lagging, closing");
                return None;
            }
            let event = rx.recv().await?;
            if high_water.is_some_and(|hw| event.sequence <= hw) {
                continue;
            }
            return Some((Frame::Event(event), (rx, guard)));
        }
    });

    stream::iter(notice)
        .chain(stream::iter(replay.events).map(Frame::Event))
        .chain(live)
}

fn to_sse(frame: &Frame) -> SseEvent {
    let event = match frame {
        Frame::ReplayExpired(id) => {
            return SseEvent::default().event(REPLAY_EXPIRED).data(id.as_str());
        }
        Frame::Event(event) => event,
    };
    let sse = SseEvent::default()
        .id(event.id.as_str())
        .event(event.event_type.as_str());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            tracing::warn!(event_id = %event.id, "Failed to serialize event: {}", e);
            sse.comment("serialization failed")
        }
    }
}
