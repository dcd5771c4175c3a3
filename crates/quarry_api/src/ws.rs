//! Live monitoring stream.
//!
//! The client opens a WebSocket, optionally sends one subscribe frame
//! `{topics[], from_sequence?}`, then receives `events`,
//! `metric_snapshots` and `alert_transitions` frames. Metric updates are
//! coalesced to at most one frame per second; a consumer that lags past
//! the ring gets a `missed_events` frame and can re-subscribe with
//! `from_sequence` to replay the durable tail.

use crate::ApiState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use quarry_monitor::{BusMessage, MetricCoalescer};
use quarry_protocol::events::{Event, EventKind};
use quarry_protocol::http_types::{StreamMessage, StreamSubscribe};
use std::time::Duration;
use tracing::{debug, warn};

/// Replay chunk size for `from_sequence` catch-up.
const REPLAY_CHUNK: u32 = 256;

pub async fn stream(State(state): State<ApiState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| run_stream(state, socket))
}

fn topic_match(topics: &[String], kind: EventKind) -> bool {
    topics.is_empty() || topics.iter().any(|t| t == kind.as_str())
}

async fn send_frame(socket: &mut WebSocket, frame: &StreamMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("stream frame serialization failed: {e}");
            true
        }
    }
}

async fn run_stream(state: ApiState, mut socket: WebSocket) {
    // First frame within a short window may be a subscription; anything
    // else (or silence) means "everything, live only".
    let subscribe = match tokio::time::timeout(Duration::from_millis(500), socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            serde_json::from_str::<StreamSubscribe>(&text).unwrap_or_default()
        }
        _ => StreamSubscribe::default(),
    };

    // Historical replay from the durable tail, complete past the ring.
    if let Some(mut since) = subscribe.from_sequence {
        loop {
            let events = match state.engine.db().events_since(since, REPLAY_CHUNK).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("stream replay failed: {e}");
                    break;
                }
            };
            if events.is_empty() {
                break;
            }
            since = events.last().map(|e| e.sequence).unwrap_or(since);
            let filtered: Vec<Event> = events
                .into_iter()
                .filter(|e| topic_match(&subscribe.topics, e.kind))
                .collect();
            if !filtered.is_empty()
                && !send_frame(&mut socket, &StreamMessage::Events { events: filtered }).await
            {
                return;
            }
        }
    }

    let mut subscription = state.engine.bus().subscribe();
    let mut coalescer = MetricCoalescer::default();
    let mut metric_tick = tokio::time::interval(Duration::from_millis(250));
    metric_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = subscription.recv() => {
                match message {
                    Some(BusMessage::Event(event)) => {
                        if event.kind == EventKind::AlertRaised {
                            if let Ok(alert) = serde_json::from_value::<
                                quarry_protocol::types::Alert,
                            >(event.payload.clone())
                            {
                                if !send_frame(
                                    &mut socket,
                                    &StreamMessage::AlertTransitions { alerts: vec![alert] },
                                )
                                .await
                                {
                                    return;
                                }
                                continue;
                            }
                        }
                        if !topic_match(&subscribe.topics, event.kind) {
                            continue;
                        }
                        if !send_frame(
                            &mut socket,
                            &StreamMessage::Events { events: vec![event] },
                        )
                        .await
                        {
                            return;
                        }
                    }
                    Some(BusMessage::Missed { from, to }) => {
                        if !send_frame(&mut socket, &StreamMessage::MissedEvents { from, to }).await {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = metric_tick.tick() => {
                for point in state.engine.metrics().snapshot() {
                    coalescer.offer(point);
                }
                if let Some(metrics) = coalescer.drain_if_due() {
                    if !send_frame(&mut socket, &StreamMessage::MetricSnapshots { metrics }).await {
                        return;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("stream client disconnected");
                        return;
                    }
                    // Later frames (pings, re-subscribes) are ignored; the
                    // client reconnects to change topics.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("stream receive error: {e}");
                        return;
                    }
                }
            }
        }
    }
}
