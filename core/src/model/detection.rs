use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor modality that triggered a detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    PowerUsage,
    AcousticNoise,
    RfSignal,
    NetworkTraffic,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::PowerUsage,
        Method::AcousticNoise,
        Method::RfSignal,
        Method::NetworkTraffic,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Method::PowerUsage => "Power Usage",
            Method::AcousticNoise => "Acoustic Noise",
            Method::RfSignal => "RF Signal",
            Method::NetworkTraffic => "Network Traffic",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Triage status. Any status may follow any other.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Confirmed,
    #[default]
    UnderReview,
    Rejected,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Confirmed, Status::UnderReview, Status::Rejected];

    pub fn label(self) -> &'static str {
        match self {
            Status::Confirmed => "Confirmed",
            Status::UnderReview => "Under Review",
            Status::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Method-specific readings attached for display. Not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SensorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_watts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_dbm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mbps: Option<f64>,
}

impl SensorDetails {
    /// Returns the reading that belongs to `method`, formatted with its unit.
    pub fn describe(&self, method: Method) -> Option<String> {
        match method {
            Method::PowerUsage => self.power_watts.map(|v| format!("{v:.0} W")),
            Method::AcousticNoise => self.noise_db.map(|v| format!("{v:.1} dB")),
            Method::RfSignal => self.rf_dbm.map(|v| format!("{v:.1} dBm")),
            Method::NetworkTraffic => self.network_mbps.map(|v| format!("{v:.1} Mbps")),
        }
    }
}

/// One sensor-triggered mining observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub id: String,
    pub location: String,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub coordinates: Coordinates,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<SensorDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl Detection {
    /// Confidence on the 0–100 scale used by the filter bar.
    pub fn confidence_percent(&self) -> f64 {
        self.confidence * 100.0
    }
}

/// Ingest payload; the service assigns `id` and the initial status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDetection {
    pub location: String,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
    pub coordinates: Coordinates,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<SensorDetails>,
}

impl NewDetection {
    pub fn into_detection(self, id: String) -> Detection {
        Detection {
            id,
            location: self.location,
            method: self.method,
            timestamp: self.timestamp,
            status: Status::default(),
            coordinates: self.coordinates,
            confidence: self.confidence,
            details: self.details,
            assigned_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tags_are_snake_case() {
        let json = serde_json::to_string(&Method::RfSignal).unwrap();
        assert_eq!(json, "\"rf_signal\"");
        let parsed: Method = serde_json::from_str("\"network_traffic\"").unwrap();
        assert_eq!(parsed, Method::NetworkTraffic);
    }

    #[test]
    fn new_detection_starts_under_review() {
        let new = NewDetection {
            location: "Tehran-5".into(),
            method: Method::PowerUsage,
            timestamp: Utc::now(),
            coordinates: Coordinates::new(35.7, 51.4),
            confidence: 0.7,
            details: None,
        };
        let detection = new.into_detection("det-000001".into());
        assert_eq!(detection.status, Status::UnderReview);
        assert!(detection.assigned_to.is_none());
    }

    #[test]
    fn detection_without_optional_fields_parses() {
        let json = r#"{
            "id": "a1",
            "location": "Tehran-5",
            "method": "acoustic_noise",
            "timestamp": "2024-03-01T10:00:00Z",
            "status": "confirmed",
            "coordinates": {"lat": 35.7, "lng": 51.4},
            "confidence": 0.82
        }"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.status, Status::Confirmed);
        assert!(detection.details.is_none());
        assert!((detection.confidence_percent() - 82.0).abs() < 1e-9);
    }

    #[test]
    fn details_describe_only_matching_method() {
        let details = SensorDetails {
            power_watts: Some(4200.0),
            ..Default::default()
        };
        assert_eq!(details.describe(Method::PowerUsage).as_deref(), Some("4200 W"));
        assert!(details.describe(Method::RfSignal).is_none());
    }
}
