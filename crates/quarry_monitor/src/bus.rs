//! In-process pub/sub with bounded history.
//!
//! A ring of the most recent events backs historical queries by sequence;
//! live fan-out rides a broadcast channel sized to the same ring so a
//! consumer that lags beyond it gets a missed-events notice instead of
//! stalling producers.

use quarry_protocol::events::{Event, EventKind};
use quarry_protocol::types::{JobId, SourceId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct EventBus {
    ring: Mutex<VecDeque<Event>>,
    capacity: usize,
    tx: broadcast::Sender<Event>,
    next_sequence: AtomicU64,
    published_total: AtomicU64,
}

/// What a subscriber sees next.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Event(Event),
    /// The consumer lagged past the ring; events in `from..=to` were
    /// dropped from this stream and must be re-read by sequence.
    Missed { from: u64, to: u64 },
}

pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    last_seen: u64,
}

impl Subscription {
    /// Next message; never returns duplicates, and reports gaps exactly once.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.last_seen = event.sequence;
                    return Some(BusMessage::Event(event));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    let from = self.last_seen + 1;
                    let to = self.last_seen + missed;
                    self.last_seen = to;
                    return Some(BusMessage::Missed { from, to });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(16);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
            next_sequence: AtomicU64::new(1),
            published_total: AtomicU64::new(0),
        }
    }

    /// Publish an event. Sequence assignment and ring append happen under
    /// one short lock so ring order always matches sequence order; the
    /// broadcast send never blocks.
    pub fn publish(
        &self,
        kind: EventKind,
        job_id: Option<JobId>,
        source_id: Option<SourceId>,
        payload: serde_json::Value,
    ) -> Event {
        let event = {
            let mut ring = self.ring.lock().expect("event ring lock");
            let event = Event {
                sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
                timestamp: chrono::Utc::now(),
                kind,
                job_id,
                source_id,
                payload,
            };
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
            event
        };
        self.published_total.fetch_add(1, Ordering::Relaxed);
        // Send fails only when there are no subscribers; that is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            last_seen: self.next_sequence.load(Ordering::SeqCst).saturating_sub(1),
        }
    }

    /// Events with `sequence > since`, oldest first, from the in-memory
    /// ring. Gaps older than the ring live in the durable tail.
    pub fn history_since(&self, since: u64) -> Vec<Event> {
        let ring = self.ring.lock().expect("event ring lock");
        ring.iter()
            .filter(|e| e.sequence > since)
            .cloned()
            .collect()
    }

    pub fn last_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst).saturating_sub(1)
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_n(bus: &EventBus, n: u64) {
        for _ in 0..n {
            bus.publish(
                EventKind::QuestionExtracted,
                Some(JobId::new(1)),
                None,
                serde_json::json!({}),
            );
        }
    }

    #[tokio::test]
    async fn sequences_are_strictly_increasing() {
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        publish_n(&bus, 10);

        let mut last = 0;
        for _ in 0..10 {
            match sub.recv().await.unwrap() {
                BusMessage::Event(e) => {
                    assert!(e.sequence > last);
                    last = e.sequence;
                }
                BusMessage::Missed { .. } => panic!("no lag expected"),
            }
        }
    }

    #[tokio::test]
    async fn lagging_consumer_gets_missed_notice() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        publish_n(&bus, 40);

        match sub.recv().await.unwrap() {
            BusMessage::Missed { from, to } => {
                assert_eq!(from, 1);
                assert!(to >= 16);
            }
            BusMessage::Event(e) => panic!("expected lag notice, got event {}", e.sequence),
        }
    }

    #[tokio::test]
    async fn history_is_complete_within_the_ring() {
        let bus = EventBus::new(100);
        publish_n(&bus, 20);
        let history = bus.history_since(5);
        assert_eq!(history.len(), 15);
        assert_eq!(history.first().unwrap().sequence, 6);
        assert_eq!(history.last().unwrap().sequence, 20);
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let bus = EventBus::new(16);
        publish_n(&bus, 100);
        assert_eq!(bus.history_since(0).len(), 16);
        assert_eq!(bus.last_sequence(), 100);
    }
}
