//! JSON wire protocol spoken over the conversation channel.
//!
//! Every frame is an object with a `type` tag. Outbound frames are produced by
//! the composer; inbound frames are decoded one at a time so that a single
//! malformed frame never stops the ones behind it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{MessageId, MessageRecord};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message { content: String },
    Typing { is_typing: bool },
    Reaction { message_id: MessageId, emoji: String },
    Edit { message_id: MessageId, content: String },
    Delete { message_id: MessageId },
    ReadReceipt { message_id: MessageId },
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::Typing { .. } => "typing",
            OutboundEvent::Reaction { .. } => "reaction",
            OutboundEvent::Edit { .. } => "edit",
            OutboundEvent::Delete { .. } => "delete",
            OutboundEvent::ReadReceipt { .. } => "read_receipt",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    #[serde(alias = "chat_message")]
    Message { message: MessageRecord },
    Typing {
        username: String,
        #[serde(default)]
        is_typing: bool,
    },
    ReadReceipt {
        message_id: MessageId,
        #[serde(default)]
        reader: Option<String>,
    },
    Reaction {
        message_id: MessageId,
        #[serde(default)]
        emoji: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        reactions: Option<BTreeMap<String, Vec<String>>>,
    },
    #[serde(alias = "message_edit")]
    Edited { message_id: MessageId, content: String },
    #[serde(alias = "message_delete")]
    Deleted { message_id: MessageId },
    #[serde(alias = "user_status")]
    Status { username: String, is_online: bool },
}

const KNOWN_KINDS: &[&str] = &[
    "message",
    "chat_message",
    "typing",
    "read_receipt",
    "reaction",
    "edited",
    "message_edit",
    "deleted",
    "message_delete",
    "status",
    "user_status",
];

/// The two shapes a reaction event can take, folded into one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReactionUpdate {
    /// One user toggled one emoji.
    Delta { emoji: String, username: String },
    /// The server's complete aggregate for the message.
    Snapshot(BTreeMap<String, Vec<String>>),
}

impl InboundEvent {
    /// Decode one frame. Unknown kinds yield `Ok(None)` so newer servers can
    /// add events without breaking older clients.
    pub fn decode(frame: &str) -> Result<Option<InboundEvent>, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(frame).map_err(ProtocolError::Json)?;
        let kind = value
            .get("type")
            .and_then(|kind| kind.as_str())
            .ok_or(ProtocolError::MissingKind)?
            .to_string();
        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ProtocolError::Shape { kind, source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Message { .. } => "message",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::ReadReceipt { .. } => "read_receipt",
            InboundEvent::Reaction { .. } => "reaction",
            InboundEvent::Edited { .. } => "edited",
            InboundEvent::Deleted { .. } => "deleted",
            InboundEvent::Status { .. } => "status",
        }
    }

    /// Normalize a reaction event. A full aggregate wins over a delta when a
    /// frame carries both; a frame with neither carries nothing to apply.
    pub fn reaction_update(&self) -> Option<ReactionUpdate> {
        let InboundEvent::Reaction {
            emoji,
            username,
            reactions,
            ..
        } = self
        else {
            return None;
        };
        if let Some(snapshot) = reactions {
            return Some(ReactionUpdate::Snapshot(snapshot.clone()));
        }
        match (emoji, username) {
            (Some(emoji), Some(username)) if !emoji.is_empty() => Some(ReactionUpdate::Delta {
                emoji: emoji.clone(),
                username: username.clone(),
            }),
            _ => None,
        }
    }
}
