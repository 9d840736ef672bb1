use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Descriptor of whatever asked for a clip.
///
/// The assembler never looks at `attributes`; the label only ends up in the
/// clip file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: String,
    pub label: String,
    pub raised_at: DateTime<Utc>,
    /// Detector specific payload such as confidence, bounding box or GPS fix
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl TriggerEvent {
    /// New trigger raised now with a generated id
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            raised_at: Utc::now(),
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn raised_at(mut self, raised_at: DateTime<Utc>) -> Self {
        self.raised_at = raised_at;
        self
    }

    /// Label reduced to characters that are safe in a file name
    pub fn file_label(&self) -> String {
        let cleaned: String = self
            .label
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();

        let trimmed = cleaned.trim_matches('_');
        if trimmed.is_empty() {
            "event".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_label_sanitizes() {
        assert_eq!(TriggerEvent::new("person_detected").file_label(), "person_detected");
        assert_eq!(TriggerEvent::new("Car / Truck").file_label(), "car___truck");
        assert_eq!(TriggerEvent::new("../..").file_label(), "event");
        assert_eq!(TriggerEvent::new("").file_label(), "event");
    }

    #[test]
    fn test_serde_keeps_attributes() {
        let trigger = TriggerEvent::new("vehicle_detected")
            .with_id("det-42")
            .with_attributes(json!({ "confidence": 0.93, "bbox": [10, 20, 110, 220] }));

        let encoded = serde_json::to_string(&trigger).unwrap();
        let decoded: TriggerEvent = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, trigger);
        assert_eq!(decoded.attributes["confidence"], json!(0.93));
    }

    #[test]
    fn test_missing_attributes_default_to_null() {
        let decoded: TriggerEvent = serde_json::from_str(
            r#"{"id":"a","label":"b","raised_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(decoded.attributes.is_null());
    }
}
