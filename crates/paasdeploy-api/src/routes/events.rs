//! Server-sent event stream over the event bus. Replays the ring before live
//! events (handled inside `EventBus::subscribe` itself) and idle-keepalives
//! every 30s per §6.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stream_events))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (subscriber_id, receiver) = state.events.subscribe().await;
    let events = state.events.clone();

    let stream = ReceiverStream::new(receiver).map(|event| {
        let sse = SseEvent::default()
            .event(event.payload.event_name())
            .json_data(&event)
            .unwrap_or_else(|_| SseEvent::default().event("error").data("failed to encode event"));
        Ok(sse)
    });

    let stream = UnsubscribeOnDrop { inner: stream, events, subscriber_id };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

/// Wraps the receiver stream so the subscriber is removed from the bus the
/// moment the client disconnects, instead of leaking a channel until the
/// next publish finds it full.
struct UnsubscribeOnDrop<S> {
    inner: S,
    events: paasdeploy_core::eventbus::BoxEventBus,
    subscriber_id: paasdeploy_core::eventbus::SubscriberId,
}

impl<S: Stream + Unpin> Stream for UnsubscribeOnDrop<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for UnsubscribeOnDrop<S> {
    fn drop(&mut self) {
        let events = self.events.clone();
        let subscriber_id = self.subscriber_id;
        tokio::spawn(async move {
            events.unsubscribe(subscriber_id).await;
        });
    }
}
