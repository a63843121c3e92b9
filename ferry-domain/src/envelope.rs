use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// ---

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload of one observability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // ---
    /// A single log line. `stderr` distinguishes the two process streams.
    Log { payload: String, stderr: bool },

    /// Monotonic counter. `total` is optional when only the delta is known.
    Counter {
        name: String,
        delta: u64,
        total: Option<u64>,
    },

    /// One or more named point-in-time values sharing a timestamp.
    Gauge { metrics: HashMap<String, f64> },

    /// A timed span, e.g. an HTTP request, in nanoseconds since the epoch.
    Timer { name: String, start: i64, stop: i64 },

    /// Free-form event with a title and body.
    Event { title: String, body: String },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One observability record with its routing metadata.
///
/// Ferry never reads `tags` or the message body; both are forwarded
/// verbatim to the aggregation tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Identifies the emitting application or component.
    pub source_id: String,

    /// Instance index of the emitter, empty when not applicable.
    #[serde(default)]
    pub instance_id: String,

    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,

    #[serde(default)]
    pub tags: HashMap<String, String>,

    pub message: Message,
}

// ---

impl Envelope {
    // ---
    /// Build an envelope stamped with the current wall-clock time.
    pub fn now(source_id: impl Into<String>, message: Message) -> Self {
        // ---
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();

        Self {
            source_id: source_id.into(),
            instance_id: String::new(),
            timestamp,
            tags: HashMap::new(),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// EnvelopeBatch
// ---------------------------------------------------------------------------

/// The unit handed to the connection manager and sent upstream in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeBatch {
    // ---
    pub batch: Vec<Envelope>,
}

// ---

impl EnvelopeBatch {
    // ---
    pub fn new(batch: Vec<Envelope>) -> Self {
        Self { batch }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

// ---

impl From<Vec<Envelope>> for EnvelopeBatch {
    fn from(batch: Vec<Envelope>) -> Self {
        Self { batch }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn message_is_tagged_by_type() {
        // ---
        let env = Envelope::now(
            "app-1",
            Message::Log {
                payload: "hello".into(),
                stderr: false,
            },
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["message"]["type"], "log");
        assert_eq!(json["source_id"], "app-1");
        assert!(env.timestamp > 0);
    }

    // ---

    #[test]
    fn optional_fields_default_when_missing() {
        // ---
        let raw = r#"{
            "source_id": "router",
            "timestamp": 42,
            "message": {"type": "counter", "name": "requests", "delta": 3, "total": null}
        }"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(env.instance_id.is_empty());
        assert!(env.tags.is_empty());
        assert_eq!(
            env.message,
            Message::Counter {
                name: "requests".into(),
                delta: 3,
                total: None,
            }
        );
    }
}
