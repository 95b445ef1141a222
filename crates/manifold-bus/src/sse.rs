use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, warn};

use crate::bus::SessionSubscription;
use crate::events::{EventType, SessionEvent};

/// The worker never acknowledged the session within the handshake window.
#[derive(Debug, thiserror::Error)]
#[error("no worker acknowledged session '{session_id}' in time")]
pub struct HandshakeTimeout {
    pub session_id: String,
}

/// Wait for the worker's `worker_ack` before any SSE bytes are written.
///
/// The channel is non-retentive, so the subscription must exist before the
/// task is enqueued; this handshake closes the remaining race where the
/// worker never picks the task up. Returns the ack event for the stream to
/// emit as its first frame.
pub async fn await_worker_ack(
    sub: &mut SessionSubscription,
    timeout: Duration,
) -> Result<SessionEvent, HandshakeTimeout> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Ok(Some(event)) if event.event_type == EventType::WorkerAck => {
                debug!(session_id = %sub.session_id, "worker handshake complete");
                return Ok(event);
            }
            // a well-behaved worker acks first; anything else means the
            // producer is confused, keep waiting for the ack until deadline
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => {
                warn!(session_id = %sub.session_id, "worker handshake timed out");
                return Err(HandshakeTimeout {
                    session_id: sub.session_id.clone(),
                });
            }
        }
    }
}

/// Frame one event for the SSE wire: `data: <json>\n\n`, non-ASCII
/// passed through verbatim.
fn frame(event: &SessionEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"event_type":"error","payload":{"code":"SERIALIZATION_ERROR"}}"#.to_string()
    });
    format!("data: {json}\n\n")
}

/// Turn an acknowledged subscription into a lazy sequence of SSE frames.
///
/// The stream ends after a terminal event (`FinalAnswerStreamEnd` or
/// `error`), when the per-message read timeout elapses, or when the
/// producer goes away. Dropping the stream drops the subscription, which
/// unregisters the channel; the worker is unaffected.
pub fn frame_stream(
    mut sub: SessionSubscription,
    ack: SessionEvent,
    read_timeout: Duration,
) -> impl Stream<Item = String> {
    async_stream::stream! {
        yield frame(&ack);

        loop {
            match tokio::time::timeout(read_timeout, sub.recv()).await {
                Ok(Some(event)) => {
                    let terminal = event.event_type.is_terminal();
                    yield frame(&event);
                    if terminal {
                        debug!(session_id = %sub.session_id, "sse stream complete");
                        break;
                    }
                }
                Ok(None) => {
                    warn!(session_id = %sub.session_id, "producer gone, closing sse stream");
                    break;
                }
                Err(_) => {
                    warn!(session_id = %sub.session_id, "sse read timeout, closing stream");
                    yield frame(&SessionEvent::error(
                        "STREAM_TIMEOUT",
                        "no event received within the read timeout",
                    ));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn handshake_succeeds_on_worker_ack() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");
        bus.publish("s1", SessionEvent::worker_ack("s1")).await;

        let ack = await_worker_ack(&mut sub, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.event_type, EventType::WorkerAck);
    }

    #[tokio::test]
    async fn handshake_times_out_without_worker() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");
        let err = await_worker_ack(&mut sub, Duration::from_millis(20)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn delivered_frames_are_a_prefix_of_published_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");

        bus.publish("s1", SessionEvent::worker_ack("s1")).await;
        bus.publish(
            "s1",
            SessionEvent::new(EventType::AgentThoughtStream, serde_json::json!({"text": "t"})),
        )
        .await;
        bus.publish(
            "s1",
            SessionEvent::new(EventType::FinalAnswerStreamEnd, serde_json::json!({})),
        )
        .await;

        let ack = await_worker_ack(&mut sub, Duration::from_secs(1)).await.unwrap();
        let frames: Vec<String> =
            frame_stream(sub, ack, Duration::from_secs(1)).collect().await;

        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("data: "));
        assert!(frames[0].contains("worker_ack"));
        assert!(frames[1].contains("AgentThoughtStream"));
        assert!(frames[2].contains("FinalAnswerStreamEnd"));
        for f in &frames {
            assert!(f.ends_with("\n\n"));
        }
    }

    #[tokio::test]
    async fn stream_closes_on_terminal_event_and_ignores_later_publishes() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");

        bus.publish("s1", SessionEvent::worker_ack("s1")).await;
        bus.publish(
            "s1",
            SessionEvent::new(EventType::FinalAnswerStreamEnd, serde_json::json!({})),
        )
        .await;

        let ack = await_worker_ack(&mut sub, Duration::from_secs(1)).await.unwrap();
        let frames: Vec<String> =
            frame_stream(sub, ack, Duration::from_secs(1)).collect().await;
        assert_eq!(frames.len(), 2);

        // the subscription is gone: the worker's late publish is dropped
        assert!(
            !bus.publish("s1", SessionEvent::error("LATE", "ignored")).await
        );
    }

    #[tokio::test]
    async fn read_timeout_terminates_the_stream() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");
        bus.publish("s1", SessionEvent::worker_ack("s1")).await;

        let ack = await_worker_ack(&mut sub, Duration::from_secs(1)).await.unwrap();
        let frames: Vec<String> =
            frame_stream(sub, ack, Duration::from_millis(20)).collect().await;

        // ack frame plus the timeout error frame
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("STREAM_TIMEOUT"));
    }

    #[tokio::test]
    async fn non_ascii_passes_through_verbatim() {
        let event = SessionEvent::new(
            EventType::FinalAnswerStream,
            serde_json::json!({"text": "Париж — столица Франции"}),
        );
        let f = frame(&event);
        assert!(f.contains("Париж — столица Франции"));
    }
}
