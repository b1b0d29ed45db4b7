//! Event types for the parking occupancy system
//!
//! Events are published in-process by the monitoring supervisor so that
//! other components (metrics, API, tests) can follow lot activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LotId, OccupancyCounts};

/// Event envelope for all lot events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub lot_id: LotId,
    pub payload: LotEventPayload,
}

impl LotEvent {
    pub fn new(lot_id: LotId, payload: LotEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            lot_id,
            payload,
        }
    }

    pub fn registered(lot_id: LotId, stream_source: impl Into<String>) -> Self {
        Self::new(
            lot_id,
            LotEventPayload::Registered {
                stream_source: stream_source.into(),
            },
        )
    }

    pub fn removed(lot_id: LotId) -> Self {
        Self::new(lot_id, LotEventPayload::Removed)
    }

    pub fn spots_updated(lot_id: LotId, spot_count: usize) -> Self {
        Self::new(lot_id, LotEventPayload::SpotsUpdated { spot_count })
    }

    pub fn cycle_completed(lot_id: LotId, counts: OccupancyCounts, detections: usize) -> Self {
        Self::new(lot_id, LotEventPayload::CycleCompleted { counts, detections })
    }

    pub fn cycle_failed(lot_id: LotId, reason: impl Into<String>) -> Self {
        Self::new(
            lot_id,
            LotEventPayload::CycleFailed {
                reason: reason.into(),
            },
        )
    }

    pub fn event_type(&self) -> LotEventType {
        self.payload.event_type()
    }
}

/// Event type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotEventType {
    LotRegistered,
    LotRemoved,
    SpotsUpdated,
    CycleCompleted,
    CycleFailed,
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotEventPayload {
    Registered { stream_source: String },
    Removed,
    SpotsUpdated { spot_count: usize },
    CycleCompleted { counts: OccupancyCounts, detections: usize },
    CycleFailed { reason: String },
}

impl LotEventPayload {
    pub fn event_type(&self) -> LotEventType {
        match self {
            Self::Registered { .. } => LotEventType::LotRegistered,
            Self::Removed => LotEventType::LotRemoved,
            Self::SpotsUpdated { .. } => LotEventType::SpotsUpdated,
            Self::CycleCompleted { .. } => LotEventType::CycleCompleted,
            Self::CycleFailed { .. } => LotEventType::CycleFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let event = LotEvent::cycle_failed(LotId::new("L1"), "stream unreadable");
        assert_eq!(event.event_type(), LotEventType::CycleFailed);
        assert_eq!(event.lot_id.as_str(), "L1");
    }

    #[test]
    fn test_event_serialization() {
        let event = LotEvent::cycle_completed(LotId::new("L1"), OccupancyCounts::new(2, 2), 2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "CYCLE_COMPLETED");
        assert_eq!(json["payload"]["data"]["counts"]["occupied"], 2);
    }
}
