use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::model::{DeliveryStatus, Direction, MEDIA_PLACEHOLDER, Message, MessageId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionBody {
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<TextBody>,
    #[serde(default)]
    pub image_message: Option<CaptionBody>,
}

impl MessageBody {
    pub fn text(&self) -> Option<&str> {
        self.conversation
            .as_deref()
            .or_else(|| self.extended_text_message.as_ref().and_then(|m| m.text.as_deref()))
            .or_else(|| self.image_message.as_ref().and_then(|m| m.caption.as_deref()))
    }
}

/// `messageTimestamp` is sent as a number by some gateway versions and as a
/// string by others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochSeconds {
    Int(i64),
    Float(f64),
    Text(String),
}

impl EpochSeconds {
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, DecodeError> {
        let secs = match self {
            EpochSeconds::Int(n) => *n,
            EpochSeconds::Float(f) => *f as i64,
            EpochSeconds::Text(s) => s.trim().parse::<i64>().map_err(|e| DecodeError::InvalidField {
                field: "messageTimestamp",
                reason: e.to_string(),
            })?,
        };
        DateTime::<Utc>::from_timestamp(secs, 0).ok_or(DecodeError::InvalidField {
            field: "messageTimestamp",
            reason: format!("{secs} is out of range"),
        })
    }
}

/// Provider-native message record returned by `chat/findMessages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMessage {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub message_timestamp: Option<EpochSeconds>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
}

impl TryFrom<GatewayMessage> for Message {
    type Error = DecodeError;

    fn try_from(raw: GatewayMessage) -> Result<Self, Self::Error> {
        let id = raw.key.id.ok_or(DecodeError::MissingField("key.id"))?;
        let timestamp = raw
            .message_timestamp
            .as_ref()
            .ok_or(DecodeError::MissingField("messageTimestamp"))?
            .to_datetime()?;
        let text = raw
            .message
            .as_ref()
            .and_then(MessageBody::text)
            .unwrap_or(MEDIA_PLACEHOLDER)
            .to_string();
        Ok(Message {
            id: MessageId::Stored(id),
            text,
            direction: if raw.key.from_me { Direction::Me } else { Direction::Them },
            timestamp,
            status: DeliveryStatus::Sent,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest<'a> {
    pub number: &'a str,
    pub text: &'a str,
}

/// Acknowledgement for an accepted `sendText`; fields are best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(default)]
    pub key: Option<MessageKey>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message_timestamp: Option<EpochSeconds>,
}

/// Search options for `chat/findMessages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    pub newest_first: bool,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            newest_first: true,
        }
    }
}
