//! Events broadcast to engine subscribers.
//!
//! All payloads serialize as camelCase JSON so host applications can forward
//! them unchanged over their own push channels.

use serde::{Deserialize, Serialize};

use crate::scorer::LabelScore;

/// Emitted when a scored window crosses the detection threshold and clears
/// the debounce gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClapEvent {
    /// Monotonically increasing sequence number, reset only with the engine.
    pub seq: u64,
    /// Identifier of the producing session: `"microphone"`, `"rtsp-…"` or
    /// `"vban-…"`.
    pub source_id: String,
    /// Detection time as Unix seconds.
    pub timestamp: f64,
    /// Composite score that crossed the threshold.
    pub score: f32,
}

/// Emitted after every scored window, regardless of threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsEvent {
    /// Window counter within the current session.
    pub seq: u64,
    /// Top labels by confidence, best first.
    pub detected: Vec<LabelScore>,
}

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created, no session active.
    Idle,
    /// Scorer warm-up in progress.
    WarmingUp,
    /// Session active, windows being scored.
    Listening,
    /// Session stopped by request.
    Stopped,
    /// Startup or runtime failure; see the event detail.
    Error,
}

/// Status change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Human-readable detail, set on errors.
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_event_serializes_camel_case() {
        let event = ClapEvent {
            seq: 3,
            source_id: "vban-192.168.1.50".to_string(),
            timestamp: 1_700_000_000.25,
            score: 0.82,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["sourceId"], "vban-192.168.1.50");
        assert!((json["timestamp"].as_f64().unwrap() - 1_700_000_000.25).abs() < 1e-6);
        assert!((json["score"].as_f64().unwrap() - 0.82).abs() < 1e-6);

        let back: ClapEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.seq, 3);
        assert_eq!(back.source_id, "vban-192.168.1.50");
    }

    #[test]
    fn labels_event_embeds_label_scores() {
        let event = LabelsEvent {
            seq: 12,
            detected: vec![
                LabelScore {
                    label: "Clapping".to_string(),
                    confidence: 0.7,
                },
                LabelScore {
                    label: "Speech".to_string(),
                    confidence: 0.2,
                },
            ],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["detected"][0]["label"], "Clapping");
        assert!((json["detected"][0]["confidence"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["detected"][1]["label"], "Speech");
    }

    #[test]
    fn status_serializes_lowercase() {
        for (status, expected) in [
            (EngineStatus::Idle, "idle"),
            (EngineStatus::WarmingUp, "warmingup"),
            (EngineStatus::Listening, "listening"),
            (EngineStatus::Stopped, "stopped"),
            (EngineStatus::Error, "error"),
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, expected);
        }
    }

    #[test]
    fn status_rejects_unknown_casing() {
        assert!(serde_json::from_str::<EngineStatus>("\"Listening\"").is_err());
        assert!(serde_json::from_str::<EngineStatus>("\"listening\"").is_ok());
    }

    #[test]
    fn status_event_carries_optional_detail() {
        let event = EngineStatusEvent {
            status: EngineStatus::Error,
            detail: Some("bind failed".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "bind failed");

        let quiet = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };
        let json = serde_json::to_value(&quiet).unwrap();
        assert_eq!(json["detail"], serde_json::Value::Null);
    }
}
