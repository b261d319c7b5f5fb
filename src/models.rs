use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identifier, unique within a conversation.
pub type MessageId = i64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Document,
    Voice,
    System,
}

impl MessageKind {
    pub fn is_media(self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Video | MessageKind::Document | MessageKind::Voice
        )
    }

    /// Placeholder shown for media in previews and bubbles. Empty for
    /// non-media kinds.
    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Image => "[image]",
            MessageKind::Video => "[video]",
            MessageKind::Voice => "[voice]",
            MessageKind::Document => "[file]",
            MessageKind::Text | MessageKind::System => "",
        }
    }
}

/// Message record as the server serializes it, both over the channel and in
/// the upload response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<String>>,
}

/// One entry of the nearby-devices heartbeat.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NearbyDevice {
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    pub ip: String,
    pub user_id: i64,
}

impl NearbyDevice {
    pub fn label(&self) -> String {
        format!(
            "{} • {}",
            self.device_name.as_deref().unwrap_or("Generic Device"),
            self.ip
        )
    }
}
