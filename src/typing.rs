//! Typing state, both directions.
//!
//! [`TypingBanner`] tracks the remote user currently typing. [`TypingMachine`]
//! decides when the local user's keystrokes become typing-start/stop signals.
//! Both are driven by explicit `Instant`s so they can be stepped in tests.

use std::time::{Duration, Instant};

pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_secs(3);

/// The single "X is typing" banner of a conversation. Last writer wins.
#[derive(Debug, Clone)]
pub struct TypingBanner {
    quiet: Duration,
    current: Option<(String, Instant)>,
}

impl TypingBanner {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            current: None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.current.as_ref().map(|(user, _)| user.as_str())
    }

    /// Apply a remote typing signal. Returns whether the banner changed.
    pub fn on_typing(&mut self, user: &str, is_typing: bool, now: Instant) -> bool {
        if is_typing {
            let changed = self.user() != Some(user);
            self.current = Some((user.to_string(), now + self.quiet));
            return changed;
        }
        if self.user() == Some(user) {
            self.current = None;
            return true;
        }
        false
    }

    /// Clear the banner once its quiet interval has passed without a refresh.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.current {
            Some((_, deadline)) if now >= deadline => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for TypingBanner {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingPhase {
    Idle,
    Typing { quiet_deadline: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingInput {
    Keystroke(Instant),
    Tick(Instant),
    /// The draft was sent or discarded.
    Finished,
}

/// Signal to put on the wire after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    pub fn is_typing(self) -> bool {
        matches!(self, TypingSignal::Start)
    }
}

/// Transition table for local typing.
///
/// | phase  | input                      | next                 | signal |
/// |--------|----------------------------|----------------------|--------|
/// | Idle   | Keystroke(t)               | Typing(t + quiet)    | Start  |
/// | Typing | Keystroke(t)               | Typing(t + quiet)    | -      |
/// | Typing | Tick(t), t >= deadline     | Idle                 | Stop   |
/// | Typing | Finished                   | Idle                 | Stop   |
/// | any    | anything else              | unchanged            | -      |
pub fn transition(
    phase: TypingPhase,
    input: TypingInput,
    quiet: Duration,
) -> (TypingPhase, Option<TypingSignal>) {
    use TypingInput::*;
    use TypingPhase::*;

    match (phase, input) {
        (Idle, Keystroke(now)) => (
            Typing {
                quiet_deadline: now + quiet,
            },
            Some(TypingSignal::Start),
        ),
        (Typing { .. }, Keystroke(now)) => (
            Typing {
                quiet_deadline: now + quiet,
            },
            None,
        ),
        (Typing { quiet_deadline }, Tick(now)) if now >= quiet_deadline => {
            (Idle, Some(TypingSignal::Stop))
        }
        (Typing { .. }, Finished) => (Idle, Some(TypingSignal::Stop)),
        (phase, _) => (phase, None),
    }
}

#[derive(Debug, Clone)]
pub struct TypingMachine {
    phase: TypingPhase,
    quiet: Duration,
}

impl TypingMachine {
    pub fn new(quiet: Duration) -> Self {
        Self {
            phase: TypingPhase::Idle,
            quiet,
        }
    }

    pub fn phase(&self) -> TypingPhase {
        self.phase
    }

    pub fn step(&mut self, input: TypingInput) -> Option<TypingSignal> {
        let (next, signal) = transition(self.phase, input, self.quiet);
        self.phase = next;
        signal
    }
}

impl Default for TypingMachine {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(3);

    #[test]
    fn one_start_and_one_stop_per_burst() {
        let start = Instant::now();
        let mut machine = TypingMachine::new(QUIET);
        let mut signals = Vec::new();

        for ms in [0u64, 400, 900, 1_500, 2_800, 4_000] {
            let now = start + Duration::from_millis(ms);
            signals.extend(machine.step(TypingInput::Keystroke(now)));
            signals.extend(machine.step(TypingInput::Tick(now)));
        }
        assert_eq!(signals, vec![TypingSignal::Start]);

        // last keystroke at 4.0s, quiet until 7.0s
        let before = start + Duration::from_millis(6_999);
        assert_eq!(machine.step(TypingInput::Tick(before)), None);
        let after = start + Duration::from_millis(7_000);
        assert_eq!(machine.step(TypingInput::Tick(after)), Some(TypingSignal::Stop));
        assert_eq!(machine.phase(), TypingPhase::Idle);
        assert_eq!(machine.step(TypingInput::Tick(after)), None);
    }

    #[test]
    fn finishing_ends_the_burst_once() {
        let now = Instant::now();
        let mut machine = TypingMachine::new(QUIET);
        assert_eq!(machine.step(TypingInput::Finished), None);
        assert_eq!(
            machine.step(TypingInput::Keystroke(now)),
            Some(TypingSignal::Start)
        );
        assert_eq!(machine.step(TypingInput::Finished), Some(TypingSignal::Stop));
        assert_eq!(machine.step(TypingInput::Tick(now + QUIET)), None);
    }

    #[test]
    fn banner_last_writer_wins_and_expires() {
        let now = Instant::now();
        let mut banner = TypingBanner::new(QUIET);

        assert!(banner.on_typing("bob", true, now));
        assert!(!banner.on_typing("bob", true, now + Duration::from_secs(1)));
        assert!(banner.on_typing("carol", true, now + Duration::from_secs(2)));
        assert_eq!(banner.user(), Some("carol"));

        // a stop from someone no longer shown is ignored
        assert!(!banner.on_typing("bob", false, now + Duration::from_secs(2)));
        assert!(!banner.expire(now + Duration::from_millis(4_999)));
        assert!(banner.expire(now + Duration::from_secs(5)));
        assert_eq!(banner.user(), None);
    }

    #[test]
    fn banner_clears_on_explicit_stop() {
        let now = Instant::now();
        let mut banner = TypingBanner::default();
        banner.on_typing("bob", true, now);
        assert!(banner.on_typing("bob", false, now));
        assert_eq!(banner.user(), None);
        assert!(!banner.expire(now + QUIET));
    }
}
