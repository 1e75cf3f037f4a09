//! The wire envelope (spec §3) and the tab↔host protocol frame that wraps it
//! (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `{type, data, meta?, timestamp?}` — required on the wire and between
/// host/tabs. `type` is required; messages with a missing or non-string
/// `type` are silently dropped by callers, which is why parsing goes
/// through [`Envelope::from_json_str`] rather than a derived `Deserialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(r#type: impl Into<String>, data: Value) -> Self {
        Self {
            r#type: r#type.into(),
            data,
            meta: None,
            timestamp: None,
        }
    }

    /// Builds the default outbound heartbeat envelope: `{"type":"PING","timestamp":<epoch ms>}`.
    pub fn heartbeat(now_ms: i64) -> Self {
        Self {
            r#type: "PING".to_string(),
            data: Value::Null,
            meta: None,
            timestamp: Some(now_ms),
        }
    }

    /// Parses a raw text frame. Returns `None` (rather than a serde error)
    /// when the JSON is valid but `type` is missing or non-string — per
    /// spec §3 that case is a silent drop, distinct from a parse failure
    /// which is logged at `warn`.
    pub fn from_json_str(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: Value) -> Option<Self> {
        let obj = value.as_object()?;
        let r#type = obj.get("type")?.as_str()?.to_string();
        let data = obj.get("data").cloned().unwrap_or(Value::Null);
        let meta = obj
            .get("meta")
            .and_then(|m| m.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        let timestamp = obj.get("timestamp").and_then(|t| t.as_i64());
        Some(Envelope {
            r#type,
            data,
            meta,
            timestamp,
        })
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_missing_type_silently() {
        let result = Envelope::from_json_str(r#"{"data":{"n":1}}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn drops_non_string_type_silently() {
        let result = Envelope::from_json_str(r#"{"type":7,"data":{}}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let result = Envelope::from_json_str("not json");
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_a_full_envelope() {
        let original = Envelope {
            r#type: "UNREAD".to_string(),
            data: serde_json::json!({"n": 7}),
            meta: None,
            timestamp: Some(123),
        };
        let text = original.to_json_string();
        let parsed = Envelope::from_json_str(&text).unwrap().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn heartbeat_has_ping_type() {
        let hb = Envelope::heartbeat(42);
        assert_eq!(hb.r#type, "PING");
        assert_eq!(hb.timestamp, Some(42));
    }
}
