//! Messages that leave the engine: published decisions and status changes.

use serde::{Deserialize, Serialize};

use crate::decision::Decision;

/// A decision addressed to a topic, as handed to sinks and broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEnvelope {
    pub topic: String,
    pub payload: Decision,
}

/// Emitted on the status channel whenever the engine changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Opening the sample source and warming up the model.
    Loading,
    /// Waiting for a trigger.
    Listening,
    /// Capturing a window and classifying it.
    Recording,
    /// Stopped; may be restarted.
    Stopped,
    /// Stopped by an unrecoverable error.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn envelope_nests_decision_payload() {
        let envelope = DecisionEnvelope {
            topic: "/R0001/alerts".into(),
            payload: Decision {
                timestamp: Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
                label: "Bark".into(),
                class_index: 0,
                confidence: 0.9,
            },
        };
        let json = serde_json::to_value(&envelope).expect("serialize envelope");
        assert_eq!(json["topic"], "/R0001/alerts");
        assert_eq!(json["payload"]["class"], "Bark");
        assert_eq!(json["payload"]["timestamp"], "01/02/2024, 03:04:05");
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Recording,
            detail: Some("window 3".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "recording");
        assert_eq!(json["detail"], "window 3");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::Recording);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<EngineStatus>(r#""Listening""#).is_err());
    }
}
