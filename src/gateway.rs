//! Subscriber Gateway: the long-lived SSE endpoint browser tabs and the
//! interceptor script watch for review state changes.
//!
//! Grounded on the `gg` web mode's `stream_events` handler (a
//! `broadcast::Receiver` fed into `Sse::new(stream::unfold(...))`), extended
//! with the per-connection `connected` bootstrap frame and 30-second
//! heartbeat timer this protocol requires.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tokio::time::{self, Interval};
use uuid::Uuid;

use crate::events::{EventBus, ReviewEvent};
use crate::model::Review;

const HEARTBEAT_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);

enum Frame {
    Connected(Box<Review>),
    Review(ReviewEvent),
    Heartbeat,
    Lagged,
}

impl Frame {
    /// `(event name, JSON data)` — kept separate from axum's `Event` builder
    /// so the framing logic is testable without depending on its internals.
    fn parts(&self) -> Option<(&'static str, String)> {
        match self {
            Frame::Connected(review) => {
                Some(("connected", serde_json::to_string(review).unwrap_or_default()))
            }
            Frame::Review(event) => Some((
                event.type_name(),
                serde_json::to_string(event).unwrap_or_default(),
            )),
            Frame::Heartbeat => Some((
                "heartbeat",
                serde_json::json!({ "timestamp": Utc::now() }).to_string(),
            )),
            Frame::Lagged => None,
        }
    }

    fn into_sse_event(self) -> Event {
        match self.parts() {
            Some((name, data)) => Event::default()
                .event(name)
                .id(format!("{}", Utc::now().timestamp_millis()))
                .data(data),
            None => Event::default().comment("lagged"),
        }
    }
}

struct ConnState {
    bootstrap: Option<Review>,
    rx: broadcast::Receiver<ReviewEvent>,
    heartbeat: Interval,
}

/// Subscribes to `bus` for `review_id` and builds the per-connection SSE
/// stream: bootstrap `connected` frame, then a merge of Bus events and a
/// fixed-cadence heartbeat.
pub fn review_event_stream(
    bus: &EventBus,
    review_id: Uuid,
    snapshot: Review,
    heartbeat_interval: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = bus.subscribe(review_id);
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let state = ConnState {
        bootstrap: Some(snapshot),
        rx,
        heartbeat,
    };

    let stream = stream::unfold(state, |mut state| async move {
        if let Some(review) = state.bootstrap.take() {
            return Some((Frame::Connected(Box::new(review)), state));
        }

        tokio::select! {
            biased;
            received = state.rx.recv() => {
                match received {
                    Ok(event) => Some((Frame::Review(event), state)),
                    Err(broadcast::error::RecvError::Lagged(_)) => Some((Frame::Lagged, state)),
                    Err(broadcast::error::RecvError::Closed) => None,
                }
            }
            _ = state.heartbeat.tick() => {
                Some((Frame::Heartbeat, state))
            }
        }
    })
    .map(|frame| Ok(frame.into_sse_event()));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn default_heartbeat_interval() -> Duration {
    HEARTBEAT_INTERVAL_DEFAULT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_frame_carries_full_review_snapshot() {
        let review = Review::new("# Step 1\nDo X", None);
        let review_id = review.id;
        let frame = Frame::Connected(Box::new(review));
        let (name, data) = frame.parts().expect("connected always has parts");
        assert_eq!(name, "connected");
        assert!(data.contains(&review_id.to_string()));
    }

    #[test]
    fn test_heartbeat_frame_event_name() {
        let (name, data) = Frame::Heartbeat.parts().expect("heartbeat always has parts");
        assert_eq!(name, "heartbeat");
        assert!(data.contains("timestamp"));
    }

    #[test]
    fn test_lagged_frame_has_no_event_parts() {
        assert!(Frame::Lagged.parts().is_none());
    }
}
