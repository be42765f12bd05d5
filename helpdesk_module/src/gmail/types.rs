//! Wire types for the Gmail REST API and Pub/Sub push envelopes.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Stub returned by messages.list; only ids come back.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    /// Milliseconds since the epoch, serialized as a string.
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    pub payload: Option<MessagePart>,
}

impl GmailMessage {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let payload = self.payload.as_ref()?;
        payload
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Millisecond timestamp for ordering. Missing or mangled values sort
    /// first rather than failing the message.
    pub fn internal_timestamp(&self) -> i64 {
        self.internal_date
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.internal_timestamp();
        if millis == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn history_id_value(&self) -> Option<u64> {
        self.history_id.as_deref().and_then(|raw| raw.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchRequest {
    #[serde(rename = "topicName")]
    pub topic_name: String,
    #[serde(rename = "labelIds", skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
    #[serde(rename = "labelFilterBehavior", skip_serializing_if = "Option::is_none")]
    pub label_filter_behavior: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchResponse {
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    /// Milliseconds since the epoch, serialized as a string.
    pub expiration: Option<String>,
}

impl WatchResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.expiration.as_deref()?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn history_id_value(&self) -> Option<u64> {
        self.history_id.as_deref().and_then(|raw| raw.parse().ok())
    }
}

/// Pub/Sub push envelope as delivered to the notification webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    /// Standard-alphabet base64 of the notification JSON.
    pub data: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MailboxNotification {
    #[serde(rename = "emailAddress")]
    pub email_address: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<u64>,
}

/// Unwrap the envelope's inner payload. None on missing, undecodable, or
/// unparsable data; the webhook turns that into a client error.
pub fn decode_notification(envelope: &PushEnvelope) -> Option<MailboxNotification> {
    let data = envelope.message.data.as_deref()?;
    let bytes = BASE64_STANDARD.decode(data.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_parses_and_defaults() {
        let parsed: ListMessagesResponse = serde_json::from_str(
            r#"{
                "messages": [
                    {"id": "msg-1", "threadId": "thread-1"},
                    {"id": "msg-2", "threadId": "thread-1"}
                ],
                "nextPageToken": "page-2",
                "resultSizeEstimate": 2
            }"#,
        )
        .expect("parse");
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[1].thread_id, "thread-1");
        assert_eq!(parsed.next_page_token.as_deref(), Some("page-2"));

        let empty: ListMessagesResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).expect("parse empty");
        assert!(empty.messages.is_empty());
        assert!(empty.next_page_token.is_none());
    }

    #[test]
    fn message_headers_and_timestamp() {
        let parsed: GmailMessage = serde_json::from_str(
            r#"{
                "id": "msg-1",
                "threadId": "thread-1",
                "internalDate": "1714650000000",
                "historyId": "88211",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [
                        {"name": "From", "value": "Jane <jane@acme.com>"},
                        {"name": "SUBJECT", "value": "Printer on fire"}
                    ],
                    "parts": [
                        {
                            "mimeType": "text/plain",
                            "body": {"size": 4, "data": "aGVscA"}
                        }
                    ]
                }
            }"#,
        )
        .expect("parse");

        assert_eq!(parsed.header("from").as_deref(), Some("Jane <jane@acme.com>"));
        assert_eq!(parsed.header("Subject").as_deref(), Some("Printer on fire"));
        assert!(parsed.header("To").is_none());
        assert_eq!(parsed.internal_timestamp(), 1_714_650_000_000);
        assert!(parsed.received_at().is_some());
        assert_eq!(parsed.history_id_value(), Some(88_211));

        let payload = parsed.payload.expect("payload");
        assert_eq!(payload.parts.len(), 1);
        assert_eq!(payload.parts[0].body.as_ref().expect("body").size, 4);
    }

    #[test]
    fn missing_internal_date_sorts_first() {
        let parsed: GmailMessage =
            serde_json::from_str(r#"{"id": "msg-1", "threadId": "thread-1"}"#).expect("parse");
        assert_eq!(parsed.internal_timestamp(), 0);
        assert!(parsed.received_at().is_none());
    }

    #[test]
    fn watch_request_serializes_camel_case() {
        let request = WatchRequest {
            topic_name: "projects/helpdeck/topics/gmail".to_string(),
            label_ids: vec!["INBOX".to_string()],
            label_filter_behavior: Some("INCLUDE".to_string()),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["topicName"], "projects/helpdeck/topics/gmail");
        assert_eq!(value["labelIds"][0], "INBOX");
        assert_eq!(value["labelFilterBehavior"], "INCLUDE");

        let bare = WatchRequest {
            topic_name: "projects/helpdeck/topics/gmail".to_string(),
            label_ids: Vec::new(),
            label_filter_behavior: None,
        };
        let value = serde_json::to_value(&bare).expect("serialize bare");
        assert!(value.get("labelIds").is_none());
        assert!(value.get("labelFilterBehavior").is_none());
    }

    #[test]
    fn watch_response_expiration_parses() {
        let parsed: WatchResponse = serde_json::from_str(
            r#"{"historyId": "97531", "expiration": "1714736400000"}"#,
        )
        .expect("parse");
        assert_eq!(parsed.history_id_value(), Some(97_531));
        let expires = parsed.expires_at().expect("expiry");
        assert_eq!(expires.timestamp_millis(), 1_714_736_400_000);
    }

    #[test]
    fn notification_decodes_from_envelope() {
        let inner = r#"{"emailAddress": "support@acme.com", "historyId": 424242}"#;
        let envelope = PushEnvelope {
            message: PushMessage {
                data: Some(BASE64_STANDARD.encode(inner)),
                message_id: Some("pubsub-1".to_string()),
            },
            subscription: Some("projects/helpdeck/subscriptions/gmail".to_string()),
        };
        let decoded = decode_notification(&envelope).expect("decode");
        assert_eq!(decoded.email_address.as_deref(), Some("support@acme.com"));
        assert_eq!(decoded.history_id, Some(424_242));
    }

    #[test]
    fn garbage_notification_data_is_rejected() {
        let envelope = PushEnvelope {
            message: PushMessage {
                data: Some("%%% not base64 %%%".to_string()),
                message_id: None,
            },
            subscription: None,
        };
        assert!(decode_notification(&envelope).is_none());

        let no_data = PushEnvelope {
            message: PushMessage {
                data: None,
                message_id: None,
            },
            subscription: None,
        };
        assert!(decode_notification(&no_data).is_none());
    }
}
