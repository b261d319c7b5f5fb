use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{MessageId, MessageKind, MessageRecord};
use crate::protocol::ReactionUpdate;
use crate::reactions::ReactionAggregate;

/// One entry of the conversation timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    pub read: bool,
    pub reactions: ReactionAggregate,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let deleted = record.is_deleted;
        Self {
            id: record.id,
            sender: record.sender,
            sender_avatar: record.sender_avatar,
            content: if deleted { String::new() } else { record.content },
            kind: record.message_type,
            media_url: if deleted { None } else { record.media_url },
            timestamp: record.timestamp,
            edited: record.is_edited,
            deleted,
            read: record.is_read,
            reactions: ReactionAggregate::from_snapshot(&record.reactions),
        }
    }
}

/// Ordered, id-indexed message collection.
///
/// Entries are never removed: deletion leaves a tombstone in place. Every
/// mutator returns `true` only when the entry actually changed, which is what
/// callers use to decide whether that one entry needs redrawing.
#[derive(Debug, Default)]
pub struct Timeline {
    items: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.index.get(&id).map(|&pos| &self.items[pos])
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Append in arrival order. A second record with a known id is ignored.
    pub fn append(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id, self.items.len());
        self.items.push(message);
        true
    }

    pub fn apply_edit(&mut self, id: MessageId, content: &str) -> bool {
        let Some(message) = self.live_mut(id) else {
            return false;
        };
        if message.edited && message.content == content {
            return false;
        }
        message.content = content.to_string();
        message.edited = true;
        true
    }

    /// Turn the entry into a tombstone. There is no way back.
    pub fn apply_delete(&mut self, id: MessageId) -> bool {
        let Some(message) = self.live_mut(id) else {
            return false;
        };
        message.deleted = true;
        message.content.clear();
        message.media_url = None;
        true
    }

    pub fn apply_reaction(&mut self, id: MessageId, emoji: &str, user: &str) -> bool {
        self.live_mut(id)
            .is_some_and(|message| message.reactions.toggle(emoji, user))
    }

    pub fn apply_reaction_update(&mut self, id: MessageId, update: &ReactionUpdate) -> bool {
        self.live_mut(id)
            .is_some_and(|message| message.reactions.apply(update))
    }

    /// Mark one of `me`'s own messages as read by `reader`. Receipts for
    /// other people's messages, or issued by `me`, change nothing.
    pub fn mark_read(&mut self, id: MessageId, me: &str, reader: Option<&str>) -> bool {
        if reader == Some(me) {
            return false;
        }
        let Some(&pos) = self.index.get(&id) else {
            return false;
        };
        let message = &mut self.items[pos];
        if message.sender != me || message.read {
            return false;
        }
        message.read = true;
        true
    }

    fn live_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let pos = *self.index.get(&id)?;
        let message = &mut self.items[pos];
        (!message.deleted).then_some(message)
    }
}
