use std::time::Instant;

use log::{debug, warn};

use crate::models::MessageId;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::timeline::Message;
use crate::view_model::ViewModel;

/// Which visual unit needs to be redrawn after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redraw {
    Appended(MessageId),
    Entry(MessageId),
    TypingBanner,
    Presence(String),
}

/// A message from someone else worth surfacing outside the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub sender: String,
    pub preview: String,
}

/// Effects of handling one inbound event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub redraw: Option<Redraw>,
    pub reply: Option<OutboundEvent>,
    pub notification: Option<Notification>,
}

impl Outcome {
    fn redraw(redraw: Redraw) -> Self {
        Self {
            redraw: Some(redraw),
            ..Self::default()
        }
    }

    fn when(changed: bool, redraw: Redraw) -> Self {
        if changed {
            Self::redraw(redraw)
        } else {
            Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

const PREVIEW_CHARS: usize = 80;

/// Maps inbound events onto view model mutations, one event at a time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    me: String,
}

impl Dispatcher {
    pub fn new(me: impl Into<String>) -> Self {
        Self { me: me.into() }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn handle(&self, view: &mut ViewModel, event: InboundEvent, now: Instant) -> Outcome {
        let kind = event.kind();
        let reaction = event.reaction_update();
        let outcome = match event {
            InboundEvent::Message { message } => self.on_message(view, Message::from(message)),
            InboundEvent::Typing {
                username,
                is_typing,
            } => {
                if username == self.me {
                    Outcome::default()
                } else {
                    Outcome::when(
                        view.typing.on_typing(&username, is_typing, now),
                        Redraw::TypingBanner,
                    )
                }
            }
            InboundEvent::ReadReceipt { message_id, reader } => Outcome::when(
                view.timeline
                    .mark_read(message_id, &self.me, reader.as_deref()),
                Redraw::Entry(message_id),
            ),
            InboundEvent::Reaction { message_id, .. } => match reaction {
                Some(update) => Outcome::when(
                    view.timeline.apply_reaction_update(message_id, &update),
                    Redraw::Entry(message_id),
                ),
                None => {
                    warn!("reaction event for {message_id} carries no emoji or aggregate");
                    Outcome::default()
                }
            },
            InboundEvent::Edited {
                message_id,
                content,
            } => Outcome::when(
                view.timeline.apply_edit(message_id, &content),
                Redraw::Entry(message_id),
            ),
            InboundEvent::Deleted { message_id } => Outcome::when(
                view.timeline.apply_delete(message_id),
                Redraw::Entry(message_id),
            ),
            InboundEvent::Status {
                username,
                is_online,
            } => {
                let changed = view.set_presence(&username, is_online);
                Outcome::when(changed, Redraw::Presence(username))
            }
        };
        if outcome.is_noop() {
            debug!("{kind} event changed nothing");
        }
        outcome
    }

    /// Remove the typing banner once its quiet interval elapsed.
    pub fn expire(&self, view: &mut ViewModel, now: Instant) -> Option<Redraw> {
        view.typing.expire(now).then_some(Redraw::TypingBanner)
    }

    fn on_message(&self, view: &mut ViewModel, message: Message) -> Outcome {
        let id = message.id;
        let received = message.sender != self.me;
        let notification = (received && !message.deleted).then(|| Notification {
            sender: message.sender.clone(),
            preview: preview(&message),
        });

        if !view.timeline.append(message) {
            debug!("message {id} already in timeline");
            return Outcome::default();
        }

        Outcome {
            redraw: Some(Redraw::Appended(id)),
            reply: received.then_some(OutboundEvent::ReadReceipt { message_id: id }),
            notification,
        }
    }
}

fn preview(message: &Message) -> String {
    if message.kind.is_media() {
        return message.kind.label().to_string();
    }
    let mut preview: String = message.content.chars().take(PREVIEW_CHARS).collect();
    if message.content.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}
