use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecodeError;

/// Body shown for records that carry no text (media, stickers, unknown kinds).
pub const MEDIA_PLACEHOLDER: &str = "Media/Other";

pub const INBOUND_SENDER_TAG: &str = "client";

pub const OUTBOUND_SENDER_TAG: &str = "me";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Me,
    Them,
}

impl Direction {
    /// Only the `client` tag is inbound; every other tag counts as ours.
    pub fn from_sender_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(INBOUND_SENDER_TAG) => Direction::Them,
            _ => Direction::Me,
        }
    }

    pub fn sender_tag(self) -> &'static str {
        match self {
            Direction::Me => OUTBOUND_SENDER_TAG,
            Direction::Them => INBOUND_SENDER_TAG,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

/// Either an id assigned by the store/gateway or one generated locally for an
/// optimistic entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Stored(String),
    Temporary(String),
}

impl MessageId {
    pub fn temporary() -> Self {
        MessageId::Temporary(format!("tmp-{}", Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, MessageId::Temporary(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Stored(id) | MessageId::Temporary(id) => id,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl Message {
    pub fn optimistic(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::temporary(),
            text: text.into(),
            direction: Direction::Me,
            timestamp: Utc::now(),
            status: DeliveryStatus::Sending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: String,
    pub name: String,
    /// Phone-like address, also the gateway lookup key.
    pub address: String,
    pub last_message: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Ids arrive as text or as integers depending on the table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Int(i64),
}

impl RawId {
    pub fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactRow {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRow {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub contact_id: Option<RawId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl MessageRow {
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Row written by the outbound pipeline once the gateway accepted a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub contact_id: String,
    pub content: String,
    pub sender: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn outbound(contact_id: &str, content: &str) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            content: content.to_string(),
            sender: OUTBOUND_SENDER_TAG.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Accepts RFC 3339 (`timestamptz`) and offset-less (`timestamp`) values, the
/// latter read as UTC.
pub fn parse_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(DecodeError::InvalidField {
        field,
        reason: format!("unrecognised timestamp `{raw}`"),
    })
}

impl TryFrom<ContactRow> for Contact {
    type Error = DecodeError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        let id = row.id.ok_or(DecodeError::MissingField("id"))?.into_string();
        let address = row
            .phone
            .filter(|p| !p.trim().is_empty())
            .ok_or(DecodeError::MissingField("phone"))?;
        let name = row
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address.clone());
        let last_activity = row
            .last_message_at
            .as_deref()
            .map(|raw| parse_timestamp("last_message_at", raw))
            .transpose()?;
        Ok(Contact {
            id,
            name,
            address,
            last_message: row.last_message_content,
            last_activity,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = DecodeError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id.ok_or(DecodeError::MissingField("id"))?.into_string();
        let created_at = row.created_at.ok_or(DecodeError::MissingField("created_at"))?;
        Ok(Message {
            id: MessageId::Stored(id),
            text: row.content.unwrap_or_else(|| MEDIA_PLACEHOLDER.to_string()),
            direction: Direction::from_sender_tag(row.sender.as_deref()),
            timestamp: parse_timestamp("created_at", &created_at)?,
            status: DeliveryStatus::Sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contact_name_defaults_to_address() {
        let row: ContactRow = serde_json::from_value(json!({
            "id": 7,
            "name": null,
            "phone": "5511888",
        }))
        .unwrap();
        let contact = Contact::try_from(row).unwrap();
        assert_eq!(contact.id, "7");
        assert_eq!(contact.name, "5511888");
        assert_eq!(contact.address, "5511888");
        assert!(contact.last_activity.is_none());
    }

    #[test]
    fn contact_without_phone_is_rejected() {
        let row: ContactRow = serde_json::from_value(json!({"id": "c1", "name": "Alice"})).unwrap();
        assert_eq!(Contact::try_from(row), Err(DecodeError::MissingField("phone")));
    }

    #[test]
    fn sender_tag_client_is_the_only_inbound_tag() {
        assert_eq!(Direction::from_sender_tag(Some("client")), Direction::Them);
        assert_eq!(Direction::from_sender_tag(Some("me")), Direction::Me);
        assert_eq!(Direction::from_sender_tag(Some("agent")), Direction::Me);
        assert_eq!(Direction::from_sender_tag(None), Direction::Me);
    }

    #[test]
    fn message_row_decodes_with_defaults() {
        let row = MessageRow::from_value(json!({
            "id": "m1",
            "contact_id": "c1",
            "sender": "client",
            "created_at": "2024-05-01T10:00:00.250+00:00",
        }))
        .unwrap();
        let msg = Message::try_from(row).unwrap();
        assert_eq!(msg.id, MessageId::Stored("m1".into()));
        assert_eq!(msg.text, MEDIA_PLACEHOLDER);
        assert_eq!(msg.direction, Direction::Them);
        assert_eq!(msg.status, DeliveryStatus::Sent);
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let ts = parse_timestamp("created_at", "2024-05-01T10:00:00").unwrap();
        assert_eq!(ts.timestamp(), 1_714_557_600);
        assert!(parse_timestamp("created_at", "yesterday").is_err());
    }

    #[test]
    fn temporary_ids_are_unique() {
        let a = MessageId::temporary();
        let b = MessageId::temporary();
        assert!(a.is_temporary());
        assert_ne!(a, b);
    }
}
