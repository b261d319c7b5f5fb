//! Pure projection from the view model to what a message bubble shows.
//!
//! Front-ends draw [`RenderedMessage`]s and never look at [`Message`]
//! directly. [`RenderCache`] keeps one projection per message and redoes only
//! the entry a [`Redraw`] names.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};

use crate::dispatcher::Redraw;
use crate::models::{MessageId, MessageKind};
use crate::timeline::{Message, Timeline};

pub const TOMBSTONE_TEXT: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sent,
    Received,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Media { kind: MessageKind, url: String },
    System(String),
    Tombstone,
}

/// Delivery tick on the sender's own bubbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMark {
    Sent,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub side: Side,
    pub sender: String,
    pub avatar: Option<String>,
    pub body: Body,
    pub time: String,
    pub edited: bool,
    pub delivery: Option<DeliveryMark>,
    pub reactions: Vec<(String, usize)>,
}

impl RenderedMessage {
    /// Whether edit/delete/react controls should be offered.
    pub fn is_actionable(&self) -> bool {
        !matches!(self.body, Body::Tombstone | Body::System(_))
    }
}

pub fn project(message: &Message, me: &str) -> RenderedMessage {
    let side = if message.kind == MessageKind::System {
        Side::System
    } else if message.sender == me {
        Side::Sent
    } else {
        Side::Received
    };

    let body = if message.deleted {
        Body::Tombstone
    } else {
        match (message.kind, &message.media_url) {
            (MessageKind::System, _) => Body::System(message.content.clone()),
            (kind, Some(url)) if kind.is_media() => Body::Media {
                kind,
                url: url.clone(),
            },
            _ => Body::Text(message.content.clone()),
        }
    };

    let delivery = (side == Side::Sent).then_some(if message.read {
        DeliveryMark::Read
    } else {
        DeliveryMark::Sent
    });

    RenderedMessage {
        id: message.id,
        side,
        sender: message.sender.clone(),
        avatar: (side == Side::Received)
            .then(|| message.sender_avatar.clone())
            .flatten(),
        body,
        time: time_label(message.timestamp),
        edited: message.edited && !message.deleted,
        delivery,
        reactions: if message.deleted {
            Vec::new()
        } else {
            message.reactions.counts()
        },
    }
}

/// Hour and minute in local time, e.g. `9:05 AM`.
pub fn time_label(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%-I:%M %p")
        .to_string()
}

/// Cached projections of a timeline, kept in timeline order.
#[derive(Debug, Default)]
pub struct RenderCache {
    me: String,
    entries: Vec<RenderedMessage>,
    positions: HashMap<MessageId, usize>,
    projections: usize,
}

impl RenderCache {
    pub fn new(me: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            ..Self::default()
        }
    }

    pub fn entries(&self) -> &[RenderedMessage] {
        &self.entries
    }

    /// Total projections performed, for checking that redraws stay local.
    pub fn projections(&self) -> usize {
        self.projections
    }

    /// Re-project everything, e.g. after switching conversations.
    pub fn rebuild(&mut self, timeline: &Timeline) {
        self.entries.clear();
        self.positions.clear();
        for message in timeline.items() {
            self.push(message);
        }
    }

    /// Bring the one affected entry up to date. Banner and presence redraws
    /// do not touch message entries.
    pub fn apply(&mut self, timeline: &Timeline, redraw: &Redraw) {
        match redraw {
            Redraw::Appended(id) => {
                if self.positions.contains_key(id) {
                    return;
                }
                if let Some(message) = timeline.get(*id) {
                    self.push(message);
                }
            }
            Redraw::Entry(id) => {
                let (Some(&pos), Some(message)) = (self.positions.get(id), timeline.get(*id)) else {
                    return;
                };
                self.projections += 1;
                self.entries[pos] = project(message, &self.me);
            }
            Redraw::TypingBanner | Redraw::Presence(_) => {}
        }
    }

    fn push(&mut self, message: &Message) {
        self.projections += 1;
        self.positions.insert(message.id, self.entries.len());
        self.entries.push(project(message, &self.me));
    }
}
