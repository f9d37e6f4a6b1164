use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            EventStatus::Queued => write!(f, "queued"),
            EventStatus::Processing => write!(f, "processing"),
            EventStatus::Sent => write!(f, "sent"),
            EventStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An order webhook event as it travels through the queue.
///
/// The wire names (`type`, `data`, `timestamp`, `messageId`) are the ones the
/// dashboard reads; `event_type` and `payload` are accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,

    #[serde(rename = "type", alias = "event_type")]
    pub event_type: String,

    #[serde(rename = "data", alias = "payload")]
    pub payload: JsonValue,

    #[serde(rename = "timestamp", alias = "received_at")]
    pub received_at: i64,

    pub status: EventStatus,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_handle: Option<String>,
}

impl Event {
    pub fn new(event_id: String, event_type: String, payload: JsonValue, received_at: i64) -> Self {
        Self {
            event_id,
            event_type,
            payload,
            received_at,
            status: EventStatus::Queued,
            retry_count: 0,
            delivery_handle: None,
        }
    }

    pub fn recipient(&self) -> Option<&str> {
        self.payload
            .get("userId")
            .or_else(|| self.payload.get("user_id"))
            .and_then(|v| v.as_str())
    }

    pub fn order_id(&self) -> Option<String> {
        match self.payload.get("order_id")? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Copy queued for another delivery attempt.
    pub fn requeued(&self, retry_count: u32) -> Self {
        Self {
            status: EventStatus::Queued,
            retry_count,
            delivery_handle: None,
            ..self.clone()
        }
    }

    /// Terminal copy written to the dead-letter list.
    pub fn dead_lettered(&self, retry_count: u32) -> Self {
        Self {
            status: EventStatus::Failed,
            retry_count,
            delivery_handle: None,
            ..self.clone()
        }
    }

    /// JSON stored in the queue, the dedup record and the dead-letter list.
    /// The delivery handle is queue-assigned and never stored.
    pub fn to_record(&self) -> serde_json::Result<String> {
        if self.delivery_handle.is_none() {
            return serde_json::to_string(self);
        }
        let mut record = self.clone();
        record.delivery_handle = None;
        serde_json::to_string(&record)
    }

    pub fn from_record(record: &str) -> serde_json::Result<Self> {
        serde_json::from_str(record)
    }
}
