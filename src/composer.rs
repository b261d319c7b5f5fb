use std::time::{Duration, Instant};

use crate::error::ComposeError;
use crate::models::MessageId;
use crate::protocol::OutboundEvent;
use crate::timeline::{Message, Timeline};
use crate::typing::{TypingInput, TypingMachine, TypingSignal};

/// Turns local user intents into outbound events.
///
/// Validation happens here, before anything reaches the transport. Text sends
/// are not echoed locally: the sender's own message shows up when the server
/// broadcasts it back.
#[derive(Debug, Clone)]
pub struct Composer {
    me: String,
    draft: String,
    typing: TypingMachine,
}

impl Composer {
    pub fn new(me: impl Into<String>, quiet: Duration) -> Self {
        Self {
            me: me.into(),
            draft: String::new(),
            typing: TypingMachine::new(quiet),
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn typing(&self) -> &TypingMachine {
        &self.typing
    }

    /// Record a keystroke. Yields a typing-start only on the idle to typing
    /// transition.
    pub fn notify_typing(&mut self, now: Instant) -> Option<OutboundEvent> {
        self.typing
            .step(TypingInput::Keystroke(now))
            .map(typing_event)
    }

    /// Replace the draft with the input box contents and count it as a
    /// keystroke.
    pub fn update_draft(&mut self, draft: impl Into<String>, now: Instant) -> Option<OutboundEvent> {
        self.draft = draft.into();
        self.notify_typing(now)
    }

    /// Advance the quiet timer. Yields the typing-stop once the interval has
    /// passed since the last keystroke.
    pub fn tick(&mut self, now: Instant) -> Option<OutboundEvent> {
        self.typing.step(TypingInput::Tick(now)).map(typing_event)
    }

    /// Validate `content` and clear the draft. The second event, if any, is
    /// the typing-stop that closes the current burst.
    pub fn submit_text(
        &mut self,
        content: &str,
    ) -> Result<(OutboundEvent, Option<OutboundEvent>), ComposeError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ComposeError::EmptyContent);
        }
        let message = OutboundEvent::Message {
            content: content.to_string(),
        };
        self.draft.clear();
        let stop = self.typing.step(TypingInput::Finished).map(typing_event);
        Ok((message, stop))
    }

    /// Send the current draft.
    pub fn submit_draft(&mut self) -> Result<(OutboundEvent, Option<OutboundEvent>), ComposeError> {
        let draft = std::mem::take(&mut self.draft);
        let result = self.submit_text(&draft);
        if result.is_err() {
            self.draft = draft;
        }
        result
    }

    pub fn submit_edit(
        &self,
        timeline: &Timeline,
        id: MessageId,
        new_content: &str,
    ) -> Result<OutboundEvent, ComposeError> {
        self.own_target(timeline, id)?;
        let content = new_content.trim();
        if content.is_empty() {
            return Err(ComposeError::EmptyContent);
        }
        Ok(OutboundEvent::Edit {
            message_id: id,
            content: content.to_string(),
        })
    }

    /// Delete is irrevocable, so `confirm` is asked before anything is sent.
    /// The timeline itself is untouched until the server's `deleted` event.
    pub fn submit_delete<F>(
        &self,
        timeline: &Timeline,
        id: MessageId,
        confirm: F,
    ) -> Result<OutboundEvent, ComposeError>
    where
        F: FnOnce(&Message) -> bool,
    {
        let target = self.own_target(timeline, id)?;
        if !confirm(target) {
            return Err(ComposeError::NotConfirmed(id));
        }
        Ok(OutboundEvent::Delete { message_id: id })
    }

    pub fn submit_reaction(
        &self,
        timeline: &Timeline,
        id: MessageId,
        emoji: &str,
    ) -> Result<OutboundEvent, ComposeError> {
        live_target(timeline, id)?;
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ComposeError::EmptyEmoji);
        }
        Ok(OutboundEvent::Reaction {
            message_id: id,
            emoji: emoji.to_string(),
        })
    }
}

impl Composer {
    /// Only the author may edit or delete a message.
    fn own_target<'t>(
        &self,
        timeline: &'t Timeline,
        id: MessageId,
    ) -> Result<&'t Message, ComposeError> {
        let message = live_target(timeline, id)?;
        if message.sender != self.me {
            return Err(ComposeError::NotOwner(id));
        }
        Ok(message)
    }
}

fn typing_event(signal: TypingSignal) -> OutboundEvent {
    OutboundEvent::Typing {
        is_typing: signal.is_typing(),
    }
}

fn live_target(timeline: &Timeline, id: MessageId) -> Result<&Message, ComposeError> {
    let message = timeline.get(id).ok_or(ComposeError::UnknownMessage(id))?;
    if message.deleted {
        return Err(ComposeError::Deleted(id));
    }
    Ok(message)
}
