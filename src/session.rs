//! One open conversation view: view model, dispatcher, composer and the sink
//! that carries outbound events.
//!
//! A session is created when a conversation is opened and dropped when the
//! user leaves it. Nothing is shared between sessions, so two of them can be
//! driven side by side in tests.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::composer::Composer;
use crate::dispatcher::{Dispatcher, Outcome, Redraw};
use crate::error::ComposeError;
use crate::models::{MessageId, MessageRecord};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::timeline::{Message, Timeline};
use crate::transport::EventSink;
use crate::view_model::ViewModel;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Debounce window for the local typing-stop.
    pub typing_quiet: Duration,
    /// How long a remote typing banner survives without a refresh.
    pub banner_quiet: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            typing_quiet: crate::typing::DEFAULT_QUIET_INTERVAL,
            banner_quiet: crate::typing::DEFAULT_QUIET_INTERVAL,
        }
    }
}

pub struct Session<S> {
    conversation_id: String,
    view: ViewModel,
    dispatcher: Dispatcher,
    composer: Composer,
    sink: S,
}

impl<S: EventSink> Session<S> {
    pub fn new(
        conversation_id: impl Into<String>,
        me: impl Into<String>,
        sink: S,
        settings: SessionSettings,
    ) -> Self {
        let me = me.into();
        Self {
            conversation_id: conversation_id.into(),
            view: ViewModel::new(settings.banner_quiet),
            composer: Composer::new(me.clone(), settings.typing_quiet),
            dispatcher: Dispatcher::new(me),
            sink,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn me(&self) -> &str {
        self.dispatcher.me()
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn timeline(&self) -> &Timeline {
        &self.view.timeline
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decode and dispatch one raw frame. A bad frame is logged and skipped;
    /// it never affects the frames after it.
    pub fn handle_frame(&mut self, frame: &str, now: Instant) -> Outcome {
        match InboundEvent::decode(frame) {
            Ok(Some(event)) => self.handle(event, now),
            Ok(None) => {
                debug!("ignoring frame of unknown kind: {frame}");
                Outcome::default()
            }
            Err(err) => {
                warn!("dropping undecodable frame: {err}");
                Outcome::default()
            }
        }
    }

    pub fn handle(&mut self, event: InboundEvent, now: Instant) -> Outcome {
        let outcome = self.dispatcher.handle(&mut self.view, event, now);
        if let Some(reply) = &outcome.reply {
            self.emit(reply);
        }
        outcome
    }

    /// Append a record that arrived outside the channel (upload response).
    pub fn append_record(&mut self, record: MessageRecord, now: Instant) -> Outcome {
        self.handle(InboundEvent::Message { message: record }, now)
    }

    /// Advance timers: the local typing debounce and the remote banner.
    pub fn tick(&mut self, now: Instant) -> Option<Redraw> {
        if let Some(stop) = self.composer.tick(now) {
            self.emit(&stop);
        }
        self.dispatcher.expire(&mut self.view, now)
    }

    pub fn update_draft(&mut self, draft: impl Into<String>, now: Instant) {
        if let Some(start) = self.composer.update_draft(draft, now) {
            self.emit(&start);
        }
    }

    /// Send the draft. The message itself appears once the server echoes it.
    pub fn submit_draft(&mut self) -> Result<(), ComposeError> {
        let (message, stop) = self.composer.submit_draft()?;
        self.emit(&message);
        if let Some(stop) = stop {
            self.emit(&stop);
        }
        Ok(())
    }

    pub fn submit_text(&mut self, content: &str) -> Result<(), ComposeError> {
        let (message, stop) = self.composer.submit_text(content)?;
        self.emit(&message);
        if let Some(stop) = stop {
            self.emit(&stop);
        }
        Ok(())
    }

    pub fn submit_edit(&mut self, id: MessageId, content: &str) -> Result<(), ComposeError> {
        let event = self.composer.submit_edit(&self.view.timeline, id, content)?;
        self.emit(&event);
        Ok(())
    }

    pub fn submit_delete<F>(&mut self, id: MessageId, confirm: F) -> Result<(), ComposeError>
    where
        F: FnOnce(&Message) -> bool,
    {
        let event = self
            .composer
            .submit_delete(&self.view.timeline, id, confirm)?;
        self.emit(&event);
        Ok(())
    }

    pub fn submit_reaction(&mut self, id: MessageId, emoji: &str) -> Result<(), ComposeError> {
        let event = self
            .composer
            .submit_reaction(&self.view.timeline, id, emoji)?;
        self.emit(&event);
        Ok(())
    }

    fn emit(&self, event: &OutboundEvent) {
        if !self.sink.send(event) {
            debug!(
                "{} event for conversation {} not sent",
                event.kind(),
                self.conversation_id
            );
        }
    }
}
