//! Event bus for lot activity

use parking_core::{LotEvent, LotEventType};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Distributes lot events to subscribers and keeps a short history
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LotEvent>,
    history: Arc<RwLock<VecDeque<LotEvent>>>,
    max_history: usize,
    event_count: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let max_history = capacity.max(1);

        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history))),
            max_history,
            event_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LotEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: LotEvent) {
        {
            let mut history = self.history.write();
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let total = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(lot_id = %event.lot_id, event = ?event.event_type(), total, "Event published");

        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Most recent events, oldest first
    pub fn get_recent(&self, count: usize) -> Vec<LotEvent> {
        let history = self.history.read();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    /// Recent events of one type, oldest first
    pub fn recent_of_type(&self, event_type: LotEventType) -> Vec<LotEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn get_event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::LotId;

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.publish(LotEvent::removed(LotId::new(format!("L{i}"))));
        }

        assert_eq!(bus.get_event_count(), 5);
        let recent = bus.get_recent(10);
        let ids: Vec<_> = recent.iter().map(|e| e.lot_id.as_str()).collect();
        assert_eq!(ids, vec!["L2", "L3", "L4"]);
    }

    #[test]
    fn test_recent_of_type() {
        let bus = EventBus::new(16);
        bus.publish(LotEvent::registered(LotId::new("L1"), "rtsp://a"));
        bus.publish(LotEvent::cycle_failed(LotId::new("L1"), "down"));
        assert_eq!(bus.recent_of_type(LotEventType::CycleFailed).len(), 1);
    }

    #[tokio::test]
    async fn test_subscription() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(LotEvent::spots_updated(LotId::new("L1"), 2));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), LotEventType::SpotsUpdated);
    }
}
