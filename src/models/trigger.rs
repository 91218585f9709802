use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::middleware::AppError;

pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Inbound storage notification as delivered by Event Grid
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// The part of a notification the pipeline cares about, validated up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// A file changed at `url`
    DataChanged { id: Option<String>, url: String },
    /// Event Grid handshake that must be answered with the validation code
    SubscriptionValidation { code: String },
}

impl StorageEvent {
    pub fn url(&self) -> Option<&str> {
        match self {
            StorageEvent::DataChanged { url, .. } => Some(url),
            StorageEvent::SubscriptionValidation { .. } => None,
        }
    }
}

impl TryFrom<EventGridEvent> for StorageEvent {
    type Error = AppError;

    fn try_from(event: EventGridEvent) -> Result<Self, Self::Error> {
        if event.event_type.as_deref() == Some(SUBSCRIPTION_VALIDATION_EVENT) {
            let code = event
                .data
                .get("validationCode")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError::Validation("Subscription validation event has no validationCode".to_string())
                })?;
            return Ok(StorageEvent::SubscriptionValidation {
                code: code.to_string(),
            });
        }

        let url = event
            .data
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Validation("Event data has no url field".to_string()))?;

        Ok(StorageEvent::DataChanged {
            id: event.id,
            url: url.to_string(),
        })
    }
}

/// Queue message envelope: an event body plus delivery metadata for observability
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueMessage {
    pub message_id: String,
    #[serde(default)]
    pub delivery_count: u32,
    #[serde(default)]
    pub enqueued_time_utc: Option<DateTime<Utc>>,
    pub body: EventGridEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_changed_event() {
        let event: EventGridEvent = serde_json::from_value(json!({
            "id": "evt-1",
            "eventType": "Microsoft.Storage.BlobCreated",
            "subject": "/blobServices/default/containers/lake/blobs/sales.manifest.cdm.json",
            "data": { "url": "https://acct.blob.core.windows.net/lake/sales.manifest.cdm.json", "api": "PutBlob" }
        }))
        .unwrap();

        let storage_event = StorageEvent::try_from(event).unwrap();
        assert_eq!(
            storage_event.url(),
            Some("https://acct.blob.core.windows.net/lake/sales.manifest.cdm.json")
        );
    }

    #[test]
    fn test_validation_event() {
        let event: EventGridEvent = serde_json::from_value(json!({
            "id": "evt-2",
            "eventType": SUBSCRIPTION_VALIDATION_EVENT,
            "data": { "validationCode": "abc-123" }
        }))
        .unwrap();

        assert_eq!(
            StorageEvent::try_from(event).unwrap(),
            StorageEvent::SubscriptionValidation { code: "abc-123".to_string() }
        );
    }

    #[test]
    fn test_event_without_url_is_rejected() {
        let event: EventGridEvent = serde_json::from_value(json!({ "data": { "api": "PutBlob" } })).unwrap();
        assert!(StorageEvent::try_from(event).is_err());
    }

    #[test]
    fn test_queue_message_deserializes() {
        let message: QueueMessage = serde_json::from_value(json!({
            "message_id": "m-1",
            "delivery_count": 2,
            "enqueued_time_utc": "2024-05-01T10:00:00Z",
            "body": { "data": { "url": "https://acct.blob.core.windows.net/lake/a.manifest.cdm.json" } }
        }))
        .unwrap();
        assert_eq!(message.delivery_count, 2);
        assert!(message.enqueued_time_utc.is_some());
    }
}
